use veil_shared::PeerAddress;

use crate::database::{Database, NS_IDENTITY, NS_SETTINGS};
use crate::error::Result;
use crate::models::UserSettings;

impl Database {
    pub fn settings(&self) -> UserSettings {
        self.get(NS_SETTINGS)
    }

    pub fn set_settings(&self, settings: &UserSettings) -> Result<()> {
        self.set(NS_SETTINGS, settings)
    }

    /// The self-assigned peer address, if one has been persisted.
    pub fn local_address(&self) -> Option<PeerAddress> {
        self.get(NS_IDENTITY)
    }

    pub fn set_local_address(&self, address: &PeerAddress) -> Result<()> {
        self.set(NS_IDENTITY, address)
    }

    /// Load the persisted address or assign and persist a fresh one.
    /// The address is stable across sessions from then on.
    pub fn local_address_or_assign(&self) -> Result<PeerAddress> {
        if let Some(address) = self.local_address() {
            return Ok(address);
        }
        let address = PeerAddress::generate();
        tracing::info!(address = %address, "assigned new local peer address");
        self.set_local_address(&address)?;
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_when_missing() {
        let db = Database::in_memory().unwrap();
        let settings = db.settings();
        assert!(settings.username.is_empty());
        assert_eq!(settings.default_burn_timer, 0);
    }

    #[test]
    fn settings_round_trip() {
        let db = Database::in_memory().unwrap();
        let settings = UserSettings {
            username: "Ghost".into(),
            default_burn_timer: 30,
        };
        db.set_settings(&settings).unwrap();
        assert_eq!(db.settings(), settings);
    }

    #[test]
    fn address_assigned_once_then_stable() {
        let db = Database::in_memory().unwrap();
        assert!(db.local_address().is_none());

        let first = db.local_address_or_assign().unwrap();
        let second = db.local_address_or_assign().unwrap();
        assert_eq!(first, second);
    }
}
