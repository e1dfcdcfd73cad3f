//! Domain model structs persisted in the local key/value store.
//!
//! Every struct derives `Serialize` and `Deserialize`; the camelCase field
//! names are part of the persisted format (and of contact cards shared over
//! the wire), so renames are breaking changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veil_shared::constants::SNIPPET_MAX_CHARS;
use veil_shared::{EncryptionMode, MessageKind, PeerAddress};

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A persisted, trusted peer. At most one Contact exists per address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: PeerAddress,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    /// Passphrase pinned to this contact for conversation encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_mode: Option<EncryptionMode>,
}

impl Contact {
    pub fn new(id: PeerAddress, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            added_at: Utc::now(),
            shared_secret: None,
            encryption_mode: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SavedPeer (recents)
// ---------------------------------------------------------------------------

/// One entry of the recent-conversations list: every peer ever messaged,
/// most recent first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedPeer {
    pub id: PeerAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    /// Short preview of the last message.
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_encryption_mode: Option<EncryptionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_shared_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// Delivery state of an outbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

/// An emoji reaction. One per sender per message, last write wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub sender_id: PeerAddress,
}

/// A single message of a conversation, as stored and as rendered.
///
/// Immutable once delivered except for `status` and `reactions`. `content`
/// is always displayable; when an encrypted payload could not be decrypted
/// the original envelope is retained in `ciphertext` so it can be recovered
/// once a key is configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: PeerAddress,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub is_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burn_timer: Option<u32>,
}

impl ChatMessage {
    /// Replace any prior reaction by `sender` with `emoji`.
    pub fn set_reaction(&mut self, sender: &PeerAddress, emoji: &str) {
        self.reactions.retain(|r| &r.sender_id != sender);
        self.reactions.push(Reaction {
            emoji: emoji.to_string(),
            sender_id: sender.clone(),
        });
    }

    /// Derive the recent-conversation preview for this message.
    pub fn snippet(&self) -> String {
        let base = match self.kind {
            MessageKind::Image => "[Image]".to_string(),
            MessageKind::Contact => "[Contact Card]".to_string(),
            MessageKind::Text | MessageKind::System => self.content.clone(),
        };
        let base = if self.is_encrypted && self.content.starts_with('[') {
            "[Encrypted message]".to_string()
        } else {
            base
        };
        if base.chars().count() > SNIPPET_MAX_CHARS {
            let truncated: String = base.chars().take(SNIPPET_MAX_CHARS).collect();
            format!("{truncated}...")
        } else {
            base
        }
    }
}

// ---------------------------------------------------------------------------
// UserSettings
// ---------------------------------------------------------------------------

/// Device-local user preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub username: String,
    /// Default burn timer applied to outbound messages, in seconds.
    /// Zero disables burning.
    #[serde(rename = "burnTimer", default)]
    pub default_burn_timer: u32,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            default_burn_timer: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(content: &str) -> ChatMessage {
        ChatMessage {
            id: "m1".into(),
            sender_id: PeerAddress::from("veil-aaaaaa"),
            content: content.into(),
            ciphertext: None,
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            is_me: false,
            status: None,
            is_encrypted: false,
            reactions: Vec::new(),
            burn_timer: None,
        }
    }

    #[test]
    fn snippet_truncates_long_text() {
        let msg = text_message("a long message that keeps going well past the preview cap");
        let snippet = msg.snippet();
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn snippet_marks_images_and_contacts() {
        let mut msg = text_message("ignored");
        msg.kind = MessageKind::Image;
        assert_eq!(msg.snippet(), "[Image]");
        msg.kind = MessageKind::Contact;
        assert_eq!(msg.snippet(), "[Contact Card]");
    }

    #[test]
    fn reaction_replaces_prior_by_same_sender() {
        let mut msg = text_message("hi");
        let alice = PeerAddress::from("veil-alice1");
        let bob = PeerAddress::from("veil-bob111");

        msg.set_reaction(&alice, "👍");
        msg.set_reaction(&bob, "🔥");
        msg.set_reaction(&alice, "❤️");

        assert_eq!(msg.reactions.len(), 2);
        let alices: Vec<_> = msg
            .reactions
            .iter()
            .filter(|r| r.sender_id == alice)
            .collect();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].emoji, "❤️");
    }

    #[test]
    fn persisted_field_names_are_camel_case() {
        let contact = Contact::new(PeerAddress::from("veil-x"), "X");
        let json = serde_json::to_value(&contact).unwrap();
        assert!(json.get("addedAt").is_some());

        let msg = text_message("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("senderId").is_some());
        assert!(json.get("isMe").is_some());
        assert_eq!(json["type"], "text");
    }
}
