//! Runtime state owned by the engine task.
//!
//! Everything in here is authoritative and re-read on every event; no
//! component may keep its own copy across an await point.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use veil_shared::{EncryptionMode, PeerAddress, ServerStatus, SymmetricKey};

/// A friend request awaiting the user's decision. Transient: never
/// persisted, discarded on accept/reject and on restart.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: PeerAddress,
    pub name: String,
}

/// Central engine state.
pub struct EngineState {
    /// The peer whose conversation is currently visible. Gates whether
    /// inbound messages render live or increment the unread count.
    pub focused_peer: Option<PeerAddress>,

    /// Whether the focused conversation is blocked on the peer approving
    /// our friend request.
    pub waiting_for_approval: bool,

    /// Unread message count per non-focused peer.
    pub unread: HashMap<PeerAddress, u32>,

    /// Friend requests awaiting a decision, deduplicated by peer address.
    pub pending_requests: Vec<PendingRequest>,

    /// Peers that completed a handshake this session. Message admission
    /// requires contact status or membership here.
    pub session_trusted: HashSet<PeerAddress>,

    /// Encryption mode negotiated for the focused conversation.
    pub encryption_mode: EncryptionMode,

    /// Shared secret for the focused conversation, when the enhanced mode
    /// is active.
    pub shared_secret: Option<String>,

    /// Key currently in effect for the focused conversation, re-derived on
    /// focus or settings changes.
    pub focused_key: Option<SymmetricKey>,

    /// Derivation cache: the KDF is deliberately slow, so each secret is
    /// stretched once per session.
    pub key_cache: HashMap<String, SymmetricKey>,

    /// Whether the focused peer is currently typing.
    pub peer_typing: bool,

    /// Whether we have an outbound typing indicator in effect.
    pub typing_active: bool,

    /// Bumped on every keystroke so stale typing-stop timers can tell they
    /// have been superseded.
    pub typing_generation: u64,

    /// Signaling-server connectivity.
    pub server_status: ServerStatus,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            focused_peer: None,
            waiting_for_approval: false,
            unread: HashMap::new(),
            pending_requests: Vec::new(),
            session_trusted: HashSet::new(),
            encryption_mode: EncryptionMode::Standard,
            shared_secret: None,
            focused_key: None,
            key_cache: HashMap::new(),
            peer_typing: false,
            typing_active: false,
            typing_generation: 0,
            server_status: ServerStatus::Disconnected,
        }
    }

    /// Whether `peer` is the focused conversation.
    pub fn is_focused(&self, peer: &PeerAddress) -> bool {
        self.focused_peer.as_ref() == Some(peer)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}
