//! The session engine task.
//!
//! One tokio task owns every piece of session state: the connection
//! registry, the persistent store handle, focus/unread/pending bookkeeping.
//! User actions, transport events and timer callbacks are serialized
//! through the task's queues, so protocol logic never runs concurrently
//! with itself. Timers re-enter the queue as commands and re-check
//! authoritative state when they fire, which makes every scheduled action
//! safe to fire late.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use veil_net::{ConnectionRegistry, LinkState, Transport, TransportEvent};
use veil_shared::{
    ConnectionStatus, EncryptionMode, PeerAddress, ServerStatus, SymmetricKey, WireMessage,
};
use veil_store::{Contact, Database};

use crate::config::EngineConfig;
use crate::events::{NoticeLevel, SessionNotification};
use crate::handle::{EngineCommand, SessionHandle, StatusSnapshot};
use crate::state::EngineState;

/// Fallback display name for users who never set one.
const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

pub(crate) struct Engine {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) db: Database,
    pub(crate) state: EngineState,
    pub(crate) config: EngineConfig,
    pub(crate) my_address: PeerAddress,
    cmd_tx: mpsc::Sender<EngineCommand>,
    notif_tx: mpsc::Sender<SessionNotification>,
}

/// Start the engine in a background task.
///
/// Returns the command handle and the notification stream the UI layer
/// consumes. The engine stops when the handle is dropped, the transport
/// event stream ends, or `shutdown` is called.
pub fn spawn_engine(
    transport: impl Transport + 'static,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    db: Database,
    config: EngineConfig,
) -> (SessionHandle, mpsc::Receiver<SessionNotification>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SessionNotification>(1024);

    let my_address = transport.local_address();
    let mut engine = Engine {
        transport: Box::new(transport),
        registry: ConnectionRegistry::new(),
        db,
        state: EngineState::new(),
        config,
        my_address,
        cmd_tx: cmd_tx.clone(),
        notif_tx,
    };

    tokio::spawn(async move {
        info!(address = %engine.my_address, "session engine started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(cmd) => engine.handle_command(cmd).await,
                },
                event = events.recv() => match event {
                    Some(event) => engine.handle_transport_event(event).await,
                    None => {
                        warn!("transport event stream ended");
                        break;
                    }
                },
            }
        }
        info!("session engine stopped");
    });

    (SessionHandle::new(cmd_tx), notif_rx)
}

impl Engine {
    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    pub(crate) async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::StartConversation(peer) => self.start_conversation(peer).await,
            EngineCommand::LeaveConversation => self.leave_conversation().await,
            EngineCommand::Disconnect => self.disconnect().await,
            EngineCommand::SendMessage {
                content,
                kind,
                burn_timer,
            } => self.send_message(content, kind, burn_timer).await,
            EngineCommand::NotifyTyping => self.notify_typing().await,
            EngineCommand::SendReaction { message_id, emoji } => {
                self.send_reaction(message_id, emoji).await
            }
            EngineCommand::AcceptRequest(peer) => self.accept_request(peer).await,
            EngineCommand::RejectRequest(peer) => self.reject_request(peer).await,
            EngineCommand::AddContact { id, name } => self.add_contact(id, name).await,
            EngineCommand::RemoveContact(id) => self.remove_contact(id).await,
            EngineCommand::RenameContact { id, name } => self.rename_contact(id, name).await,
            EngineCommand::SetEncryption { mode, secret } => {
                self.set_encryption(mode, secret).await
            }
            EngineCommand::PinContactSecret { id, mode, secret } => {
                self.pin_contact_secret(id, mode, secret).await
            }
            EngineCommand::DeleteMessage { peer, message_id } => {
                if let Err(e) = self.db.delete_message(&peer, &message_id) {
                    warn!(error = %e, "failed to delete message");
                }
            }
            EngineCommand::ClearHistory(peer) => {
                if let Err(e) = self.db.clear_history(&peer) {
                    warn!(error = %e, "failed to clear history");
                }
            }
            EngineCommand::ClearAllHistory => self.clear_all_history().await,
            EngineCommand::SetUsername(username) => {
                let mut settings = self.db.settings();
                settings.username = username;
                if let Err(e) = self.db.set_settings(&settings) {
                    warn!(error = %e, "failed to save settings");
                }
            }
            EngineCommand::SetDefaultBurnTimer(seconds) => {
                let mut settings = self.db.settings();
                settings.default_burn_timer = seconds;
                if let Err(e) = self.db.set_settings(&settings) {
                    warn!(error = %e, "failed to save settings");
                }
            }

            EngineCommand::GetContacts(reply) => {
                let _ = reply.send(self.db.contacts());
            }
            EngineCommand::GetRecents(reply) => {
                let _ = reply.send(self.db.recents());
            }
            EngineCommand::GetHistory(peer, reply) => {
                let _ = reply.send(self.db.history(&peer));
            }
            EngineCommand::GetUnreadCounts(reply) => {
                let _ = reply.send(self.state.unread.clone());
            }
            EngineCommand::GetPendingRequests(reply) => {
                let _ = reply.send(self.state.pending_requests.clone());
            }
            EngineCommand::GetStatus(reply) => {
                let _ = reply.send(self.status_snapshot());
            }

            EngineCommand::ConnectTimeout { peer, channel_id } => {
                self.on_connect_timeout(peer, channel_id).await
            }
            EngineCommand::HandshakeGrace { peer, channel_id } => {
                self.on_handshake_grace(peer, channel_id).await
            }
            EngineCommand::BurnExpired { peer, message_id } => {
                self.on_burn_expired(peer, message_id).await
            }
            EngineCommand::TypingStopped { generation } => {
                self.on_typing_stopped(generation).await
            }
            EngineCommand::CloseAfterReject { peer, channel_id } => {
                if self.registry.channel_id(&peer) == Some(channel_id) {
                    self.registry.close(&peer);
                }
            }
            EngineCommand::ReconnectSignaling => {
                if self.state.server_status == ServerStatus::Disconnected {
                    debug!("re-dialing signaling server");
                    self.transport.reconnect().await;
                }
            }
            EngineCommand::Shutdown => unreachable!("handled by the event loop"),
        }
    }

    pub(crate) async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ServerUp => {
                if self.state.server_status != ServerStatus::Connected {
                    self.state.server_status = ServerStatus::Connected;
                    self.notify(SessionNotification::ServerStatusChanged {
                        status: ServerStatus::Connected,
                    })
                    .await;
                }
            }

            TransportEvent::ServerDown => {
                if self.state.server_status != ServerStatus::Disconnected {
                    self.state.server_status = ServerStatus::Disconnected;
                    self.notify(SessionNotification::ServerStatusChanged {
                        status: ServerStatus::Disconnected,
                    })
                    .await;
                }
                // Reconnecting is our job; the transport only reports.
                self.schedule(
                    EngineCommand::ReconnectSignaling,
                    self.config.signaling_backoff,
                );
            }

            TransportEvent::Incoming { peer, channel } => {
                debug!(peer = %peer, channel_id = channel.channel_id(), "incoming channel");
                self.registry.insert_incoming(peer, channel);
            }

            TransportEvent::Opened { peer, channel_id } => {
                if !self.registry.on_opened(&peer, channel_id) {
                    return;
                }
                info!(peer = %peer, "channel open");
                if self.state.is_focused(&peer) {
                    self.notify(SessionNotification::FocusedStatusChanged {
                        status: ConnectionStatus::Connected,
                    })
                    .await;
                }
                if self.registry.is_outbound(&peer) {
                    // Give the channel a moment to be usable end-to-end
                    // before the friend request goes out.
                    self.schedule(
                        EngineCommand::HandshakeGrace { peer, channel_id },
                        self.config.handshake_grace,
                    );
                }
            }

            TransportEvent::Data {
                peer,
                channel_id,
                payload,
            } => self.on_data(peer, channel_id, payload).await,

            TransportEvent::Closed { peer, channel_id } => {
                if !self.registry.on_closed(&peer, channel_id) {
                    return;
                }
                info!(peer = %peer, "channel closed");
                if self.state.is_focused(&peer) {
                    self.notify(SessionNotification::FocusedStatusChanged {
                        status: ConnectionStatus::Disconnected,
                    })
                    .await;
                }
            }

            TransportEvent::Error {
                peer,
                channel_id,
                reason,
            } => {
                if !self.registry.on_errored(&peer, channel_id) {
                    return;
                }
                warn!(peer = %peer, reason = %reason, "channel error");
                if self.state.is_focused(&peer) {
                    self.notify(SessionNotification::FocusedStatusChanged {
                        status: ConnectionStatus::Error,
                    })
                    .await;
                }
            }
        }
    }

    async fn on_data(&mut self, peer: PeerAddress, channel_id: u64, payload: Vec<u8>) {
        if self.registry.channel_id(&peer) != Some(channel_id) {
            debug!(peer = %peer, channel_id, "dropping frame from superseded channel");
            return;
        }

        let frame = match WireMessage::from_bytes(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropping undecodable frame");
                return;
            }
        };

        match frame {
            WireMessage::ConnectionRequest { name } => {
                self.on_connection_request(peer, name).await
            }
            WireMessage::RequestReceived => {
                // Liveness ack; nothing to do.
            }
            WireMessage::ConnectionAccepted { name } => {
                self.on_connection_accepted(peer, name).await
            }
            WireMessage::ConnectionRejected => self.on_connection_rejected(peer).await,

            // The trust boundary: chat frames from peers that are neither
            // contacts nor handshake-approved this session are dropped
            // without a trace of state change.
            WireMessage::Message { .. } | WireMessage::Typing { .. } | WireMessage::Reaction { .. }
                if !self.is_admitted(&peer) =>
            {
                debug!(peer = %peer, "dropping chat frame from unknown sender");
            }

            WireMessage::Message {
                id,
                content,
                msg_type,
                is_encrypted,
                burn_timer,
            } => {
                self.on_message(peer, id, content, msg_type, is_encrypted, burn_timer)
                    .await
            }
            WireMessage::Typing { is_typing } => self.on_peer_typing(peer, is_typing).await,
            WireMessage::Reaction { message_id, emoji } => {
                self.on_peer_reaction(peer, message_id, emoji).await
            }
        }
    }

    // -----------------------------------------------------------------
    // Conversation lifecycle
    // -----------------------------------------------------------------

    pub(crate) async fn start_conversation(&mut self, peer: PeerAddress) {
        if peer == self.my_address {
            self.notice(NoticeLevel::Error, "You cannot message your own address.")
                .await;
            return;
        }

        self.state.focused_peer = Some(peer.clone());
        self.state.peer_typing = false;
        if self.state.unread.remove(&peer).is_some() {
            self.notify(SessionNotification::UnreadChanged {
                peer: peer.clone(),
                count: 0,
            })
            .await;
        }

        // Focus changed: name and key must be re-resolved from live state
        // before anything buffered is rendered.
        self.refresh_focused_key();
        let name = self.resolve_peer_name(&peer);
        self.notify(SessionNotification::FocusChanged {
            peer: Some(peer.clone()),
            name: Some(name),
        })
        .await;

        let waiting = self.registry.state(&peer) == LinkState::AwaitingApproval;
        if waiting != self.state.waiting_for_approval {
            self.state.waiting_for_approval = waiting;
            self.notify(SessionNotification::WaitingForApproval { waiting })
                .await;
        }

        if self.registry.is_open(&peer) {
            self.notify(SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Connected,
            })
            .await;
            return;
        }
        self.initiate_connection(peer).await;
    }

    pub(crate) async fn leave_conversation(&mut self) {
        self.state.focused_peer = None;
        self.state.peer_typing = false;
        self.state.waiting_for_approval = false;
        self.state.focused_key = None;
        self.notify(SessionNotification::FocusChanged {
            peer: None,
            name: None,
        })
        .await;
    }

    pub(crate) async fn disconnect(&mut self) {
        if let Some(peer) = self.state.focused_peer.take() {
            self.registry.close(&peer);
            self.state.waiting_for_approval = false;
            self.state.peer_typing = false;
            self.state.focused_key = None;
            self.notify(SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Disconnected,
            })
            .await;
            self.notify(SessionNotification::FocusChanged {
                peer: None,
                name: None,
            })
            .await;
        }
    }

    /// Dial a peer unless an open channel already exists. Does not retry:
    /// a failed or timed-out attempt surfaces once and waits for the user.
    pub(crate) async fn initiate_connection(&mut self, peer: PeerAddress) {
        if peer == self.my_address {
            self.notice(NoticeLevel::Error, "You cannot connect to your own address.")
                .await;
            return;
        }
        if self.state.server_status == ServerStatus::Disconnected {
            self.notice(
                NoticeLevel::Error,
                "You are offline. Waiting for the signaling server.",
            )
            .await;
            return;
        }
        if self.registry.is_open(&peer) {
            if self.state.is_focused(&peer) {
                self.notify(SessionNotification::FocusedStatusChanged {
                    status: ConnectionStatus::Connected,
                })
                .await;
            }
            return;
        }

        if self.state.is_focused(&peer) {
            self.notify(SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Connecting,
            })
            .await;
        }

        match self.transport.connect(&peer).await {
            Ok(channel) => {
                let channel_id = channel.channel_id();
                debug!(peer = %peer, channel_id, "dialing peer");
                self.registry.insert_outbound(peer.clone(), channel);
                self.schedule(
                    EngineCommand::ConnectTimeout { peer, channel_id },
                    self.config.connect_timeout,
                );
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "connect failed");
                if self.state.is_focused(&peer) {
                    self.notify(SessionNotification::FocusedStatusChanged {
                        status: ConnectionStatus::Error,
                    })
                    .await;
                }
                self.notice(
                    NoticeLevel::Error,
                    format!("Could not reach {peer}. They may be offline."),
                )
                .await;
            }
        }
    }

    async fn on_connect_timeout(&mut self, peer: PeerAddress, channel_id: u64) {
        // The attempt may have succeeded, failed, or been superseded since
        // the timer was armed.
        if self.registry.channel_id(&peer) != Some(channel_id)
            || self.registry.state(&peer) != LinkState::Connecting
        {
            return;
        }
        debug!(peer = %peer, "connect attempt timed out");
        self.registry.close(&peer);
        if self.state.is_focused(&peer) {
            self.notify(SessionNotification::FocusedStatusChanged {
                status: ConnectionStatus::Error,
            })
            .await;
        }
        self.notice(
            NoticeLevel::Error,
            format!("Could not connect to {peer}. They may be offline."),
        )
        .await;
    }

    // -----------------------------------------------------------------
    // Contacts and settings
    // -----------------------------------------------------------------

    pub(crate) async fn add_contact(&mut self, id: PeerAddress, name: String) {
        if id == self.my_address {
            self.notice(NoticeLevel::Error, "That is your own address.").await;
            return;
        }
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let contact = Contact::new(id.clone(), name);
        if let Err(e) = self.db.upsert_contact(&contact) {
            warn!(error = %e, "failed to save contact");
            self.notice(NoticeLevel::Error, "Failed to save contact.").await;
            return;
        }
        self.state.pending_requests.retain(|r| r.id != id);
        if self.state.is_focused(&id) {
            self.refresh_focused_key();
        }
        self.notice(NoticeLevel::Success, format!("Saved {name} to contacts."))
            .await;
    }

    pub(crate) async fn remove_contact(&mut self, id: PeerAddress) {
        match self.db.remove_contact(&id) {
            Ok(true) => {
                // Deleting a contact closes the trust boundary immediately.
                self.state.session_trusted.remove(&id);
                if self.state.is_focused(&id) {
                    self.refresh_focused_key();
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to remove contact"),
        }
    }

    pub(crate) async fn rename_contact(&mut self, id: PeerAddress, name: String) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        match self.db.rename_contact(&id, name) {
            Ok(true) => {
                if self.state.is_focused(&id) {
                    self.notify(SessionNotification::FocusChanged {
                        peer: Some(id.clone()),
                        name: Some(name.to_string()),
                    })
                    .await;
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to rename contact"),
        }
    }

    pub(crate) async fn set_encryption(&mut self, mode: EncryptionMode, secret: Option<String>) {
        self.state.encryption_mode = mode;
        self.state.shared_secret = secret;
        self.refresh_focused_key();
        if mode == EncryptionMode::Aes256
            && self.state.shared_secret.is_some()
            && self.state.focused_key.is_none()
        {
            self.notice(NoticeLevel::Error, "Could not derive an encryption key.")
                .await;
        }
    }

    pub(crate) async fn pin_contact_secret(
        &mut self,
        id: PeerAddress,
        mode: EncryptionMode,
        secret: String,
    ) {
        match self
            .db
            .set_contact_encryption(&id, Some(mode), Some(secret))
        {
            Ok(true) => {
                if self.state.is_focused(&id) {
                    self.refresh_focused_key();
                }
            }
            Ok(false) => {
                self.notice(NoticeLevel::Error, "No such contact to pin a key to.")
                    .await;
            }
            Err(e) => warn!(error = %e, "failed to pin contact secret"),
        }
    }

    pub(crate) async fn clear_all_history(&mut self) {
        if let Err(e) = self.db.clear_all_history() {
            warn!(error = %e, "failed to clear history");
            return;
        }
        self.state.unread.clear();
        self.notice(NoticeLevel::Info, "All history cleared.").await;
    }

    // -----------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------

    /// Whether chat frames from this peer are admitted: a contact, or a
    /// handshake completed this session. Recents alone do not admit.
    pub(crate) fn is_admitted(&self, peer: &PeerAddress) -> bool {
        self.state.session_trusted.contains(peer) || self.db.find_contact(peer).is_some()
    }

    /// Display name we introduce ourselves with.
    pub(crate) fn display_name(&self) -> String {
        let username = self.db.settings().username;
        if username.trim().is_empty() {
            DEFAULT_DISPLAY_NAME.to_string()
        } else {
            username
        }
    }

    /// Freshly resolved display name for a peer.
    pub(crate) fn resolve_peer_name(&self, peer: &PeerAddress) -> String {
        if let Some(contact) = self.db.find_contact(peer) {
            return contact.name;
        }
        if let Some(recent) = self.db.find_recent(peer) {
            if let Some(name) = recent.name {
                return name;
            }
        }
        peer.to_string()
    }

    /// Re-derive the key in effect for the focused conversation. A secret
    /// pinned to the focused contact wins over the session-level setting.
    pub(crate) fn refresh_focused_key(&mut self) {
        self.state.focused_key = None;

        if let Some(peer) = self.state.focused_peer.clone() {
            if let Some(contact) = self.db.find_contact(&peer) {
                if contact.encryption_mode == Some(EncryptionMode::Aes256) {
                    if let Some(secret) = contact.shared_secret {
                        self.state.focused_key = self.derive_cached(&secret);
                        return;
                    }
                }
            }
        }

        if self.state.encryption_mode == EncryptionMode::Aes256 {
            if let Some(secret) = self.state.shared_secret.clone() {
                self.state.focused_key = self.derive_cached(&secret);
            }
        }
    }

    /// Stretch a secret once per session; the KDF is deliberately slow.
    pub(crate) fn derive_cached(&mut self, secret: &str) -> Option<SymmetricKey> {
        if let Some(key) = self.state.key_cache.get(secret) {
            return Some(*key);
        }
        match veil_shared::derive_key(secret) {
            Ok(key) => {
                self.state.key_cache.insert(secret.to_string(), key);
                Some(key)
            }
            Err(e) => {
                warn!(error = %e, "key derivation failed");
                None
            }
        }
    }

    /// Serialize and send one frame through the registry. Returns whether
    /// the frame was handed to the transport.
    pub(crate) fn send_frame(&self, peer: &PeerAddress, frame: &WireMessage) -> bool {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode frame");
                return false;
            }
        };
        match self.registry.send(peer, bytes) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer, error = %e, "frame not sent");
                false
            }
        }
    }

    /// Arm a timer that re-enters the command queue.
    pub(crate) fn schedule(&self, cmd: EngineCommand, delay: Duration) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd).await;
        });
    }

    pub(crate) async fn notify(&mut self, notification: SessionNotification) {
        let _ = self.notif_tx.send(notification).await;
    }

    pub(crate) async fn notice(&mut self, level: NoticeLevel, text: impl Into<String>) {
        self.notify(SessionNotification::Notice {
            level,
            text: text.into(),
        })
        .await;
    }

    fn status_snapshot(&self) -> StatusSnapshot {
        let (focused_peer, focused_name, connection) = match &self.state.focused_peer {
            Some(peer) => {
                let connection = match self.registry.state(peer) {
                    LinkState::Open => ConnectionStatus::Connected,
                    LinkState::Connecting | LinkState::AwaitingApproval => {
                        ConnectionStatus::Connecting
                    }
                    LinkState::Closed | LinkState::Errored => ConnectionStatus::Disconnected,
                };
                (
                    Some(peer.clone()),
                    Some(self.resolve_peer_name(peer)),
                    connection,
                )
            }
            None => (None, None, ConnectionStatus::Disconnected),
        };

        StatusSnapshot {
            my_address: self.my_address.clone(),
            server_status: self.state.server_status,
            focused_peer,
            focused_name,
            connection,
            waiting_for_approval: self.state.waiting_for_approval,
            peer_typing: self.state.peer_typing,
        }
    }
}
