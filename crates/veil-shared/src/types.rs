use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_PREFIX, ADDRESS_SUFFIX_LEN, MESSAGE_ID_LEN};

/// Opaque peer address, self-assigned at first run and stable across
/// sessions. Two installations never exchange anything but these strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerAddress(pub String);

impl PeerAddress {
    /// Generate a fresh address (`veil-` + 6 random alphanumerics).
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ADDRESS_SUFFIX_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        Self(format!("{ADDRESS_PREFIX}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generate an effectively-unique short message identifier.
pub fn new_message_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_LEN)
        .map(char::from)
        .collect()
}

/// How chat content for a conversation is protected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Transport-level protection only; content travels as-is inside the
    /// channel.
    #[serde(rename = "STANDARD")]
    Standard,
    /// Application-layer end-to-end encryption with a shared passphrase.
    #[serde(rename = "AES_256")]
    Aes256,
}

/// Connection state of the focused conversation, as surfaced to the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Signaling-server connectivity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    Connected,
    Disconnected,
}
