use chrono::Utc;

use veil_shared::constants::RECENTS_CAP;
use veil_shared::{EncryptionMode, PeerAddress};

use crate::database::{Database, NS_RECENTS};
use crate::error::Result;
use crate::models::SavedPeer;

impl Database {
    /// Recent conversations, most recent first.
    pub fn recents(&self) -> Vec<SavedPeer> {
        self.get(NS_RECENTS)
    }

    /// Move a peer to the front of the recents list, refreshing its snippet
    /// and merged metadata. The list is capped; the oldest entry falls off.
    ///
    /// The merged value is computed here and written once, so callers never
    /// observe a half-updated entry.
    pub fn touch_recent(
        &self,
        id: &PeerAddress,
        name: Option<String>,
        snippet: &str,
        saved_encryption_mode: Option<EncryptionMode>,
        saved_shared_secret: Option<String>,
    ) -> Result<()> {
        let mut recents = self.recents();

        // Carry the previous alias forward when the caller has none.
        let prior_name = recents
            .iter()
            .find(|p| &p.id == id)
            .and_then(|p| p.name.clone());

        recents.retain(|p| &p.id != id);
        recents.insert(
            0,
            SavedPeer {
                id: id.clone(),
                name: name.or(prior_name),
                last_seen: Utc::now(),
                snippet: snippet.to_string(),
                saved_encryption_mode,
                saved_shared_secret,
            },
        );
        recents.truncate(RECENTS_CAP);

        self.set(NS_RECENTS, &recents)
    }

    pub fn find_recent(&self, id: &PeerAddress) -> Option<SavedPeer> {
        self.recents().into_iter().find(|p| &p.id == id)
    }

    pub fn clear_recents(&self) -> Result<()> {
        self.delete(NS_RECENTS)
    }
}
