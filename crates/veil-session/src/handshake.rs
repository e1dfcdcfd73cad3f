//! Friend-request handshake.
//!
//! No chat content is processed from a peer who is neither an established
//! contact nor handshake-approved this session. The exchange is:
//! `connection-request` → `request-received` (ack) → `connection-accepted`
//! or `connection-rejected`.

use tracing::{debug, info, warn};

use veil_net::LinkState;
use veil_shared::{ConnectionStatus, PeerAddress, WireMessage};
use veil_store::Contact;

use crate::engine::Engine;
use crate::events::{NoticeLevel, SessionNotification};
use crate::handle::EngineCommand;
use crate::state::PendingRequest;

impl Engine {
    /// Responder side: a peer asked to talk to us.
    pub(crate) async fn on_connection_request(&mut self, peer: PeerAddress, name: String) {
        debug!(peer = %peer, "friend request received");

        // Ack immediately so the initiator knows we are alive, independent
        // of the decision below.
        self.send_frame(&peer, &WireMessage::RequestReceived);

        if self.db.find_contact(&peer).is_some() {
            // Known contact: consent was given when they were saved.
            info!(peer = %peer, "auto-accepting known contact");
            self.state.session_trusted.insert(peer.clone());
            self.send_frame(
                &peer,
                &WireMessage::ConnectionAccepted {
                    name: self.display_name(),
                },
            );
            return;
        }

        let name = if name.trim().is_empty() {
            "Unknown".to_string()
        } else {
            name
        };

        // One pending entry per peer, however often they re-send.
        if self.state.pending_requests.iter().any(|r| r.id == peer) {
            return;
        }
        let request = PendingRequest {
            id: peer.clone(),
            name: name.clone(),
        };
        self.state.pending_requests.push(request.clone());
        self.notify(SessionNotification::RequestReceived { request })
            .await;
        self.notice(NoticeLevel::Info, format!("Friend request from {name}."))
            .await;
    }

    /// Initiator side: the peer consented.
    pub(crate) async fn on_connection_accepted(&mut self, peer: PeerAddress, name: String) {
        // Only meaningful if we actually asked (or they are a contact we
        // pinged to re-establish presence). Anything else is unsolicited
        // and earns no trust.
        let expecting = self.registry.state(&peer) == LinkState::AwaitingApproval
            || self.db.find_contact(&peer).is_some();
        if !expecting {
            debug!(peer = %peer, "ignoring unsolicited acceptance");
            return;
        }

        info!(peer = %peer, "friend request accepted");
        self.state.session_trusted.insert(peer.clone());
        self.registry.set_state(&peer, LinkState::Open);

        if self.state.is_focused(&peer) {
            if self.state.waiting_for_approval {
                self.state.waiting_for_approval = false;
                self.notify(SessionNotification::WaitingForApproval { waiting: false })
                    .await;
            }
            self.notify(SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Connected,
            })
            .await;
        }
        self.notify(SessionNotification::RequestAccepted { peer, name })
            .await;
    }

    /// Initiator side: the peer declined. The conversation is abandoned.
    pub(crate) async fn on_connection_rejected(&mut self, peer: PeerAddress) {
        info!(peer = %peer, "friend request rejected");
        self.state.session_trusted.remove(&peer);

        if self.state.is_focused(&peer) {
            self.state.focused_peer = None;
            if self.state.waiting_for_approval {
                self.state.waiting_for_approval = false;
                self.notify(SessionNotification::WaitingForApproval { waiting: false })
                    .await;
            }
            self.notify(SessionNotification::FocusChanged {
                peer: None,
                name: None,
            })
            .await;
            self.notice(NoticeLevel::Error, "Your connection request was declined.")
                .await;
        }
        self.notify(SessionNotification::ConnectionRejected { peer: peer.clone() })
            .await;
        self.registry.close(&peer);
    }

    /// User action: accept a pending request. Persists the contact, sends
    /// the acceptance and clears the pending entry in one step.
    pub(crate) async fn accept_request(&mut self, peer: PeerAddress) {
        let Some(pos) = self.state.pending_requests.iter().position(|r| r.id == peer) else {
            debug!(peer = %peer, "no pending request to accept");
            return;
        };
        let request = self.state.pending_requests.remove(pos);

        let contact = Contact::new(request.id.clone(), request.name.clone());
        if let Err(e) = self.db.upsert_contact(&contact) {
            warn!(error = %e, "failed to persist accepted contact");
            // Undo the dequeue so the user can retry.
            self.state.pending_requests.insert(pos, request);
            self.notice(NoticeLevel::Error, "Failed to save contact.").await;
            return;
        }
        self.state.session_trusted.insert(peer.clone());

        if self.registry.is_open(&peer) {
            self.send_frame(
                &peer,
                &WireMessage::ConnectionAccepted {
                    name: self.display_name(),
                },
            );
            self.notice(
                NoticeLevel::Success,
                format!("Connected with {}.", request.name),
            )
            .await;
        } else {
            // Their channel is gone; reach out so the acceptance lands.
            self.notice(
                NoticeLevel::Info,
                format!("Added {}. Reconnecting.", request.name),
            )
            .await;
            self.initiate_connection(peer).await;
        }
    }

    /// User action: decline a pending request. The channel closes shortly
    /// after so the rejection frame can still be delivered.
    pub(crate) async fn reject_request(&mut self, peer: PeerAddress) {
        self.state.pending_requests.retain(|r| r.id != peer);
        self.state.session_trusted.remove(&peer);

        if self.registry.is_open(&peer) {
            self.send_frame(&peer, &WireMessage::ConnectionRejected);
            if let Some(channel_id) = self.registry.channel_id(&peer) {
                self.schedule(
                    EngineCommand::CloseAfterReject { peer, channel_id },
                    self.config.reject_close_delay,
                );
            }
        } else {
            self.registry.close(&peer);
        }
    }

    /// Timer: the channel has been open for the grace period; send our
    /// friend request. Contacts get the request too (it re-establishes
    /// presence) but we do not block on their approval.
    pub(crate) async fn on_handshake_grace(&mut self, peer: PeerAddress, channel_id: u64) {
        if self.registry.channel_id(&peer) != Some(channel_id) || !self.registry.is_open(&peer) {
            // Superseded or already gone; the timer is a no-op.
            return;
        }

        self.send_frame(
            &peer,
            &WireMessage::ConnectionRequest {
                name: self.display_name(),
            },
        );

        if self.db.find_contact(&peer).is_none() {
            self.registry.set_state(&peer, LinkState::AwaitingApproval);
            if self.state.is_focused(&peer) && !self.state.waiting_for_approval {
                self.state.waiting_for_approval = true;
                self.notify(SessionNotification::WaitingForApproval { waiting: true })
                    .await;
            }
        } else {
            debug!(peer = %peer, "handshake sent to known contact");
        }
    }
}
