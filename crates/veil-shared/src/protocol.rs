use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// All frames exchanged over a peer channel.
///
/// The wire encoding is a JSON object with a `type` discriminant; field
/// names are fixed by the protocol and must not change between releases,
/// or peers on different builds stop understanding each other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Friend request opening a handshake. Carries the sender's display name.
    ConnectionRequest { name: String },

    /// Liveness ack emitted as soon as a request arrives. Informational only.
    RequestReceived,

    /// The responder consented; carries their display name.
    ConnectionAccepted { name: String },

    /// The responder declined. The initiator abandons the conversation.
    ConnectionRejected,

    /// A chat payload. `content` is either plaintext or a serialized
    /// encryption envelope, as indicated by `is_encrypted`.
    Message {
        id: String,
        content: String,
        #[serde(rename = "msgType")]
        msg_type: MessageKind,
        #[serde(rename = "isEncrypted", default)]
        is_encrypted: bool,
        #[serde(rename = "burnTimer", default, skip_serializing_if = "Option::is_none")]
        burn_timer: Option<u32>,
    },

    /// Live typing indicator. Never persisted.
    Typing {
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Emoji reaction to an earlier message.
    Reaction {
        #[serde(rename = "messageId")]
        message_id: String,
        emoji: String,
    },
}

/// Kind of chat payload carried by a `message` frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Contact,
    System,
}

impl WireMessage {
    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the JSON wire form. Unknown or malformed `type`
    /// values are a decode error, never a silent pass-through.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Whether this frame belongs to the handshake layer (as opposed to the
    /// messaging pipeline).
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            WireMessage::ConnectionRequest { .. }
                | WireMessage::RequestReceived
                | WireMessage::ConnectionAccepted { .. }
                | WireMessage::ConnectionRejected
        )
    }
}
