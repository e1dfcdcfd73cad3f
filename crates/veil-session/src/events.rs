//! Notifications emitted to the UI layer.
//!
//! The engine pushes these on its notification channel; the UI renders them
//! or re-pulls snapshots through the handle. Everything serializes so the
//! payloads can cross an IPC boundary unchanged.

use serde::Serialize;

use veil_shared::{ConnectionStatus, PeerAddress, ServerStatus};
use veil_store::ChatMessage;

use crate::state::PendingRequest;

/// Severity of a transient user-facing notice (toast surface).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionNotification {
    /// Signaling connectivity changed.
    ServerStatusChanged { status: ServerStatus },

    /// The focused conversation's connection status changed.
    FocusedStatusChanged { status: ConnectionStatus },

    /// Focus moved to another conversation (or none). Carries the freshly
    /// resolved display name.
    FocusChanged {
        peer: Option<PeerAddress>,
        name: Option<String>,
    },

    /// A message was appended to a conversation's history (either
    /// direction).
    MessageAppended {
        peer: PeerAddress,
        message: ChatMessage,
    },

    /// A stored message changed (delivery status or reactions).
    MessageUpdated {
        peer: PeerAddress,
        message: ChatMessage,
    },

    /// A message was deleted by its burn timer.
    MessageExpired {
        peer: PeerAddress,
        message_id: String,
    },

    /// A non-focused peer's unread count changed.
    UnreadChanged { peer: PeerAddress, count: u32 },

    /// The focused peer started or stopped typing.
    PeerTyping { peer: PeerAddress, is_typing: bool },

    /// A friend request arrived and awaits a decision.
    RequestReceived { request: PendingRequest },

    /// The remote peer accepted our friend request.
    RequestAccepted { peer: PeerAddress, name: String },

    /// The remote peer rejected our friend request; the conversation is
    /// abandoned.
    ConnectionRejected { peer: PeerAddress },

    /// We are (no longer) waiting for the focused peer's approval.
    WaitingForApproval { waiting: bool },

    /// Transient user-facing notice.
    Notice { level: NoticeLevel, text: String },
}
