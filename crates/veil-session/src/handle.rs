//! Typed façade over the engine's command channel.
//!
//! The engine task is the only owner of session state; everything here just
//! enqueues commands (and, for snapshots, waits on a oneshot reply).

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use veil_shared::{ConnectionStatus, EncryptionMode, MessageKind, PeerAddress, ServerStatus};
use veil_store::{ChatMessage, Contact, SavedPeer};

use crate::state::PendingRequest;

/// Commands processed by the engine task. User actions, snapshot queries
/// and internal timer callbacks all travel through the same queue, which is
/// what serializes the protocol logic.
#[derive(Debug)]
pub enum EngineCommand {
    // -- user actions ------------------------------------------------------
    StartConversation(PeerAddress),
    LeaveConversation,
    Disconnect,
    SendMessage {
        content: String,
        kind: MessageKind,
        burn_timer: Option<u32>,
    },
    NotifyTyping,
    SendReaction {
        message_id: String,
        emoji: String,
    },
    AcceptRequest(PeerAddress),
    RejectRequest(PeerAddress),
    AddContact {
        id: PeerAddress,
        name: String,
    },
    RemoveContact(PeerAddress),
    RenameContact {
        id: PeerAddress,
        name: String,
    },
    SetEncryption {
        mode: EncryptionMode,
        secret: Option<String>,
    },
    PinContactSecret {
        id: PeerAddress,
        mode: EncryptionMode,
        secret: String,
    },
    DeleteMessage {
        peer: PeerAddress,
        message_id: String,
    },
    ClearHistory(PeerAddress),
    ClearAllHistory,
    SetUsername(String),
    SetDefaultBurnTimer(u32),

    // -- snapshot queries --------------------------------------------------
    GetContacts(oneshot::Sender<Vec<Contact>>),
    GetRecents(oneshot::Sender<Vec<SavedPeer>>),
    GetHistory(PeerAddress, oneshot::Sender<Vec<ChatMessage>>),
    GetUnreadCounts(oneshot::Sender<HashMap<PeerAddress, u32>>),
    GetPendingRequests(oneshot::Sender<Vec<PendingRequest>>),
    GetStatus(oneshot::Sender<StatusSnapshot>),

    // -- internal timers (check-then-act, idempotent) ----------------------
    ConnectTimeout {
        peer: PeerAddress,
        channel_id: u64,
    },
    HandshakeGrace {
        peer: PeerAddress,
        channel_id: u64,
    },
    BurnExpired {
        peer: PeerAddress,
        message_id: String,
    },
    TypingStopped {
        generation: u64,
    },
    CloseAfterReject {
        peer: PeerAddress,
        channel_id: u64,
    },
    ReconnectSignaling,

    /// Gracefully stop the engine task.
    Shutdown,
}

/// Point-in-time view of the session, for the UI layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub my_address: PeerAddress,
    pub server_status: ServerStatus,
    pub focused_peer: Option<PeerAddress>,
    pub focused_name: Option<String>,
    pub connection: ConnectionStatus,
    pub waiting_for_approval: bool,
    pub peer_typing: bool,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl SessionHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn send(&self, cmd: EngineCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::warn!("engine task is gone, command dropped");
        }
    }

    async fn query<T: Default>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> T {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await;
        rx.await.unwrap_or_default()
    }

    /// Focus a conversation, connecting if needed, and reset its unread
    /// count.
    pub async fn start_conversation(&self, peer: PeerAddress) {
        self.send(EngineCommand::StartConversation(peer)).await;
    }

    /// Drop focus without touching the connection.
    pub async fn leave_conversation(&self) {
        self.send(EngineCommand::LeaveConversation).await;
    }

    /// Close the focused peer's channel and drop focus.
    pub async fn disconnect(&self) {
        self.send(EngineCommand::Disconnect).await;
    }

    /// Send a chat payload to the focused peer.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
        burn_timer: Option<u32>,
    ) {
        self.send(EngineCommand::SendMessage {
            content: content.into(),
            kind,
            burn_timer,
        })
        .await;
    }

    /// Signal a keystroke; the engine debounces the wire indicator.
    pub async fn notify_typing(&self) {
        self.send(EngineCommand::NotifyTyping).await;
    }

    pub async fn send_reaction(&self, message_id: impl Into<String>, emoji: impl Into<String>) {
        self.send(EngineCommand::SendReaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
        .await;
    }

    pub async fn accept_request(&self, peer: PeerAddress) {
        self.send(EngineCommand::AcceptRequest(peer)).await;
    }

    pub async fn reject_request(&self, peer: PeerAddress) {
        self.send(EngineCommand::RejectRequest(peer)).await;
    }

    pub async fn add_contact(&self, id: PeerAddress, name: impl Into<String>) {
        self.send(EngineCommand::AddContact {
            id,
            name: name.into(),
        })
        .await;
    }

    pub async fn remove_contact(&self, id: PeerAddress) {
        self.send(EngineCommand::RemoveContact(id)).await;
    }

    pub async fn rename_contact(&self, id: PeerAddress, name: impl Into<String>) {
        self.send(EngineCommand::RenameContact {
            id,
            name: name.into(),
        })
        .await;
    }

    /// Set the encryption mode (and secret) for the focused conversation.
    pub async fn set_encryption(&self, mode: EncryptionMode, secret: Option<String>) {
        self.send(EngineCommand::SetEncryption { mode, secret }).await;
    }

    /// Pin a conversation key to a contact so it survives refocusing.
    pub async fn pin_contact_secret(
        &self,
        id: PeerAddress,
        mode: EncryptionMode,
        secret: impl Into<String>,
    ) {
        self.send(EngineCommand::PinContactSecret {
            id,
            mode,
            secret: secret.into(),
        })
        .await;
    }

    pub async fn delete_message(&self, peer: PeerAddress, message_id: impl Into<String>) {
        self.send(EngineCommand::DeleteMessage {
            peer,
            message_id: message_id.into(),
        })
        .await;
    }

    pub async fn clear_history(&self, peer: PeerAddress) {
        self.send(EngineCommand::ClearHistory(peer)).await;
    }

    pub async fn clear_all_history(&self) {
        self.send(EngineCommand::ClearAllHistory).await;
    }

    pub async fn set_username(&self, username: impl Into<String>) {
        self.send(EngineCommand::SetUsername(username.into())).await;
    }

    pub async fn set_default_burn_timer(&self, seconds: u32) {
        self.send(EngineCommand::SetDefaultBurnTimer(seconds)).await;
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.query(EngineCommand::GetContacts).await
    }

    pub async fn recents(&self) -> Vec<SavedPeer> {
        self.query(EngineCommand::GetRecents).await
    }

    pub async fn history(&self, peer: PeerAddress) -> Vec<ChatMessage> {
        self.query(|tx| EngineCommand::GetHistory(peer, tx)).await
    }

    pub async fn unread_counts(&self) -> HashMap<PeerAddress, u32> {
        self.query(EngineCommand::GetUnreadCounts).await
    }

    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        self.query(EngineCommand::GetPendingRequests).await
    }

    /// Current session status; `None` only if the engine has stopped.
    pub async fn status(&self) -> Option<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetStatus(tx)).await;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        self.send(EngineCommand::Shutdown).await;
    }
}
