use veil_shared::constants::HISTORY_CAP;
use veil_shared::PeerAddress;

use crate::database::{history_namespace, Database};
use crate::error::Result;
use crate::models::ChatMessage;

impl Database {
    /// Full history of one conversation, oldest first.
    pub fn history(&self, peer: &PeerAddress) -> Vec<ChatMessage> {
        self.get(&history_namespace(peer))
    }

    /// Append a message, dropping the oldest entries beyond the cap.
    pub fn append_message(&self, peer: &PeerAddress, message: &ChatMessage) -> Result<()> {
        let mut history = self.history(peer);
        history.push(message.clone());
        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_CAP;
            history.drain(..excess);
        }
        self.set(&history_namespace(peer), &history)
    }

    /// Apply a mutation to one stored message, returning the updated copy,
    /// or `None` when the message does not exist.
    pub fn update_message(
        &self,
        peer: &PeerAddress,
        message_id: &str,
        mutate: impl FnOnce(&mut ChatMessage),
    ) -> Result<Option<ChatMessage>> {
        let mut history = self.history(peer);
        let Some(message) = history.iter_mut().find(|m| m.id == message_id) else {
            return Ok(None);
        };
        mutate(message);
        let updated = message.clone();
        self.set(&history_namespace(peer), &history)?;
        Ok(Some(updated))
    }

    /// Delete one message. Deleting an already-deleted message is a no-op.
    pub fn delete_message(&self, peer: &PeerAddress, message_id: &str) -> Result<bool> {
        let mut history = self.history(peer);
        let before = history.len();
        history.retain(|m| m.id != message_id);
        let removed = history.len() != before;
        if removed {
            self.set(&history_namespace(peer), &history)?;
        }
        Ok(removed)
    }

    /// Drop one conversation's history.
    pub fn clear_history(&self, peer: &PeerAddress) -> Result<()> {
        self.delete(&history_namespace(peer))
    }

    /// Drop every conversation's history and the recents list.
    pub fn clear_all_history(&self) -> Result<()> {
        self.delete_matching("history:%")?;
        self.clear_recents()
    }
}
