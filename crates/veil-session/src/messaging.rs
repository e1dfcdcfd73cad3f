//! Messaging pipeline: encrypting, decoding and dispatching chat payloads.
//!
//! Outbound content is stored as plaintext immediately and travels as
//! ciphertext when a key is in effect. Inbound content that cannot be
//! decrypted is replaced with a placeholder, with the original envelope
//! kept alongside so a later key can still recover it.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use tracing::{debug, warn};

use veil_shared::constants::{PLACEHOLDER_KEY_MISMATCH, PLACEHOLDER_MISSING_KEY};
use veil_shared::crypto::{self, Envelope, SymmetricKey};
use veil_shared::{new_message_id, EncryptionMode, MessageKind, PeerAddress, WireMessage};
use veil_store::{ChatMessage, DeliveryStatus};

use crate::engine::Engine;
use crate::events::{NoticeLevel, SessionNotification};
use crate::handle::EngineCommand;

impl Engine {
    // -----------------------------------------------------------------
    // Send
    // -----------------------------------------------------------------

    /// Send a chat payload to the focused peer.
    ///
    /// A failed send stays failed: resending is a new user action, never an
    /// automatic retry, so a flaky reconnect cannot duplicate messages.
    pub(crate) async fn send_message(
        &mut self,
        content: String,
        kind: MessageKind,
        burn_timer: Option<u32>,
    ) {
        let Some(peer) = self.state.focused_peer.clone() else {
            self.notice(NoticeLevel::Error, "No active conversation.").await;
            return;
        };
        if self.state.waiting_for_approval {
            self.notice(
                NoticeLevel::Info,
                "Waiting for the peer to accept your request.",
            )
            .await;
            return;
        }
        if !self.registry.is_open(&peer) {
            self.notice(NoticeLevel::Error, "Connection lost. Reconnecting.")
                .await;
            self.initiate_connection(peer).await;
            return;
        }

        self.stop_typing_now();

        let burn_timer = burn_timer
            .or_else(|| {
                let default = self.db.settings().default_burn_timer;
                (default > 0).then_some(default)
            })
            .filter(|t| *t > 0);

        let key = self.state.focused_key;
        let encrypting = key.is_some();

        let wire_content = match key {
            Some(key) => match encrypt_content(&key, &content, kind) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    // Never downgrade to plaintext on failure.
                    warn!(error = %e, "encryption failed, message not sent");
                    self.notice(NoticeLevel::Error, "Encryption failed. Message not sent.")
                        .await;
                    return;
                }
            },
            None => content.clone(),
        };

        let message = ChatMessage {
            id: new_message_id(),
            sender_id: self.my_address.clone(),
            content,
            ciphertext: None,
            timestamp: Utc::now(),
            kind,
            is_me: true,
            status: Some(DeliveryStatus::Sending),
            is_encrypted: encrypting,
            reactions: Vec::new(),
            burn_timer,
        };

        if let Err(e) = self.db.append_message(&peer, &message) {
            warn!(error = %e, "failed to persist outbound message");
        }
        self.refresh_recent(&peer, &message);
        self.notify(SessionNotification::MessageAppended {
            peer: peer.clone(),
            message: message.clone(),
        })
        .await;

        let frame = WireMessage::Message {
            id: message.id.clone(),
            content: wire_content,
            msg_type: kind,
            is_encrypted: encrypting,
            burn_timer,
        };
        let status = if self.send_frame(&peer, &frame) {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Error
        };

        match self
            .db
            .update_message(&peer, &message.id, |m| m.status = Some(status))
        {
            Ok(Some(updated)) => {
                self.notify(SessionNotification::MessageUpdated {
                    peer: peer.clone(),
                    message: updated,
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to update delivery status"),
        }
        if status == DeliveryStatus::Error {
            self.notice(NoticeLevel::Error, "Message failed to send.").await;
        }

        if let Some(secs) = burn_timer {
            self.schedule(
                EngineCommand::BurnExpired {
                    peer,
                    message_id: message.id,
                },
                Duration::from_secs(secs.into()),
            );
        }
    }

    // -----------------------------------------------------------------
    // Receive
    // -----------------------------------------------------------------

    pub(crate) async fn on_message(
        &mut self,
        sender: PeerAddress,
        id: String,
        wire_content: String,
        kind: MessageKind,
        is_encrypted: bool,
        burn_timer: Option<u32>,
    ) {
        let focused = self.state.is_focused(&sender);
        if focused && self.state.peer_typing {
            self.state.peer_typing = false;
            self.notify(SessionNotification::PeerTyping {
                peer: sender.clone(),
                is_typing: false,
            })
            .await;
        }

        let id = if id.is_empty() { new_message_id() } else { id };
        let burn_timer = burn_timer.filter(|t| *t > 0);

        let (content, ciphertext) = if is_encrypted {
            match self.resolve_receive_key(&sender) {
                Some(key) => match decrypt_content(&key, &wire_content, kind) {
                    Ok(plain) => (plain, None),
                    Err(e) => {
                        debug!(peer = %sender, error = %e, "decryption failed");
                        (PLACEHOLDER_KEY_MISMATCH.to_string(), Some(wire_content))
                    }
                },
                None => (PLACEHOLDER_MISSING_KEY.to_string(), Some(wire_content)),
            }
        } else {
            (wire_content, None)
        };

        let message = ChatMessage {
            id: id.clone(),
            sender_id: sender.clone(),
            content,
            ciphertext,
            timestamp: Utc::now(),
            kind,
            is_me: false,
            status: None,
            is_encrypted,
            reactions: Vec::new(),
            burn_timer,
        };

        if let Err(e) = self.db.append_message(&sender, &message) {
            warn!(error = %e, "failed to persist inbound message");
        }
        self.refresh_recent(&sender, &message);

        if focused {
            self.notify(SessionNotification::MessageAppended {
                peer: sender.clone(),
                message,
            })
            .await;
        } else {
            let count = {
                let entry = self.state.unread.entry(sender.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            self.notify(SessionNotification::UnreadChanged {
                peer: sender.clone(),
                count,
            })
            .await;
        }

        if let Some(secs) = burn_timer {
            self.schedule(
                EngineCommand::BurnExpired {
                    peer: sender,
                    message_id: id,
                },
                Duration::from_secs(secs.into()),
            );
        }
    }

    /// Key for an inbound payload: a secret pinned to the contact wins,
    /// then one remembered in recents, then the focused conversation's key.
    fn resolve_receive_key(&mut self, sender: &PeerAddress) -> Option<SymmetricKey> {
        if let Some(contact) = self.db.find_contact(sender) {
            if contact.encryption_mode == Some(EncryptionMode::Aes256) {
                if let Some(secret) = contact.shared_secret {
                    return self.derive_cached(&secret);
                }
            }
        }
        if let Some(recent) = self.db.find_recent(sender) {
            if recent.saved_encryption_mode == Some(EncryptionMode::Aes256) {
                if let Some(secret) = recent.saved_shared_secret {
                    return self.derive_cached(&secret);
                }
            }
        }
        if self.state.is_focused(sender) {
            return self.state.focused_key;
        }
        None
    }

    pub(crate) fn refresh_recent(&mut self, peer: &PeerAddress, message: &ChatMessage) {
        let contact = self.db.find_contact(peer);
        let name = contact.as_ref().map(|c| c.name.clone());
        let (mode, secret) = contact
            .map(|c| (c.encryption_mode, c.shared_secret))
            .unwrap_or((None, None));
        if let Err(e) = self
            .db
            .touch_recent(peer, name, &message.snippet(), mode, secret)
        {
            warn!(error = %e, "failed to update recents");
        }
    }

    // -----------------------------------------------------------------
    // Typing indicators
    // -----------------------------------------------------------------

    /// User keystroke: raise the typing indicator and (re-)arm the stop
    /// timer.
    pub(crate) async fn notify_typing(&mut self) {
        let Some(peer) = self.state.focused_peer.clone() else {
            return;
        };
        if self.state.waiting_for_approval || !self.registry.is_open(&peer) {
            return;
        }
        self.state.typing_generation += 1;
        if !self.state.typing_active {
            self.state.typing_active = true;
            self.send_frame(&peer, &WireMessage::Typing { is_typing: true });
        }
        self.schedule(
            EngineCommand::TypingStopped {
                generation: self.state.typing_generation,
            },
            self.config.typing_stop,
        );
    }

    /// Timer: the debounce window elapsed with no further keystrokes.
    pub(crate) async fn on_typing_stopped(&mut self, generation: u64) {
        if generation != self.state.typing_generation {
            return; // superseded by a later keystroke
        }
        self.stop_typing_now();
    }

    /// Drop the outbound typing indicator immediately (on send, or when the
    /// debounce expires).
    pub(crate) fn stop_typing_now(&mut self) {
        if !self.state.typing_active {
            return;
        }
        self.state.typing_active = false;
        self.state.typing_generation += 1;
        if let Some(peer) = self.state.focused_peer.clone() {
            if self.registry.is_open(&peer) {
                self.send_frame(&peer, &WireMessage::Typing { is_typing: false });
            }
        }
    }

    /// Inbound typing indicator: applied only to the focused conversation,
    /// otherwise dropped entirely.
    pub(crate) async fn on_peer_typing(&mut self, sender: PeerAddress, is_typing: bool) {
        if !self.state.is_focused(&sender) {
            return;
        }
        if self.state.peer_typing != is_typing {
            self.state.peer_typing = is_typing;
            self.notify(SessionNotification::PeerTyping {
                peer: sender,
                is_typing,
            })
            .await;
        }
    }

    // -----------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------

    pub(crate) async fn send_reaction(&mut self, message_id: String, emoji: String) {
        let Some(peer) = self.state.focused_peer.clone() else {
            return;
        };
        if self.registry.is_open(&peer) {
            self.send_frame(
                &peer,
                &WireMessage::Reaction {
                    message_id: message_id.clone(),
                    emoji: emoji.clone(),
                },
            );
        }
        let me = self.my_address.clone();
        match self
            .db
            .update_message(&peer, &message_id, |m| m.set_reaction(&me, &emoji))
        {
            Ok(Some(updated)) => {
                self.notify(SessionNotification::MessageUpdated {
                    peer,
                    message: updated,
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to persist reaction"),
        }
    }

    pub(crate) async fn on_peer_reaction(
        &mut self,
        sender: PeerAddress,
        message_id: String,
        emoji: String,
    ) {
        let who = sender.clone();
        match self
            .db
            .update_message(&sender, &message_id, |m| m.set_reaction(&who, &emoji))
        {
            Ok(Some(updated)) => {
                if self.state.is_focused(&sender) {
                    self.notify(SessionNotification::MessageUpdated {
                        peer: sender,
                        message: updated,
                    })
                    .await;
                }
            }
            Ok(None) => debug!(peer = %sender, message_id, "reaction to unknown message"),
            Err(e) => warn!(error = %e, "failed to persist reaction"),
        }
    }

    // -----------------------------------------------------------------
    // Burn timers
    // -----------------------------------------------------------------

    /// Timer: a burn timer elapsed. Deleting an already-deleted message is
    /// a no-op, so late timers are harmless.
    pub(crate) async fn on_burn_expired(&mut self, peer: PeerAddress, message_id: String) {
        match self.db.delete_message(&peer, &message_id) {
            Ok(true) => {
                self.notify(SessionNotification::MessageExpired { peer, message_id })
                    .await;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to expire message"),
        }
    }
}

/// Encrypt outbound content: text as UTF-8 bytes, images as the raw bytes
/// behind their base64 form.
fn encrypt_content(
    key: &SymmetricKey,
    content: &str,
    kind: MessageKind,
) -> Result<String, veil_shared::CryptoError> {
    match kind {
        MessageKind::Image => {
            let bytes = BASE64
                .decode(content.as_bytes())
                .map_err(|_| veil_shared::CryptoError::EncryptionFailed)?;
            crypto::encrypt(key, &bytes)?.to_json()
        }
        _ => crypto::encrypt_text(key, content),
    }
}

/// Decrypt inbound content back into its displayable form.
fn decrypt_content(
    key: &SymmetricKey,
    wire_content: &str,
    kind: MessageKind,
) -> Result<String, veil_shared::CryptoError> {
    match kind {
        MessageKind::Image => {
            let envelope = Envelope::from_json(wire_content)?;
            let bytes = crypto::decrypt(key, &envelope)?;
            Ok(BASE64.encode(bytes))
        }
        _ => crypto::decrypt_text(key, wire_content),
    }
}
