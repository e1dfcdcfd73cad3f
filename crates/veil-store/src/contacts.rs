use veil_shared::PeerAddress;

use crate::database::{Database, NS_CONTACTS};
use crate::error::Result;
use crate::models::{Contact, SavedPeer};

impl Database {
    /// All contacts, in insertion order.
    pub fn contacts(&self) -> Vec<Contact> {
        self.get(NS_CONTACTS)
    }

    pub fn find_contact(&self, id: &PeerAddress) -> Option<Contact> {
        self.contacts().into_iter().find(|c| &c.id == id)
    }

    /// Insert or replace a contact. Uniqueness by id: any prior entry with
    /// the same address is dropped first. The recents entry for the same
    /// peer picks up the new display name.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        let mut contacts: Vec<Contact> = self.contacts();
        contacts.retain(|c| c.id != contact.id);
        contacts.push(contact.clone());
        self.set(NS_CONTACTS, &contacts)?;

        self.set_recent_name(&contact.id, &contact.name)?;
        Ok(())
    }

    /// Remove a contact. Returns whether an entry existed.
    pub fn remove_contact(&self, id: &PeerAddress) -> Result<bool> {
        let mut contacts = self.contacts();
        let before = contacts.len();
        contacts.retain(|c| &c.id != id);
        let removed = contacts.len() != before;
        if removed {
            self.set(NS_CONTACTS, &contacts)?;
        }
        Ok(removed)
    }

    /// Rename a contact, syncing the recents display name.
    pub fn rename_contact(&self, id: &PeerAddress, name: &str) -> Result<bool> {
        let mut contacts = self.contacts();
        let Some(contact) = contacts.iter_mut().find(|c| &c.id == id) else {
            return Ok(false);
        };
        contact.name = name.to_string();
        self.set(NS_CONTACTS, &contacts)?;

        self.set_recent_name(id, name)?;
        Ok(true)
    }

    /// Pin a conversation key to a contact.
    pub fn set_contact_encryption(
        &self,
        id: &PeerAddress,
        mode: Option<veil_shared::EncryptionMode>,
        secret: Option<String>,
    ) -> Result<bool> {
        let mut contacts = self.contacts();
        let Some(contact) = contacts.iter_mut().find(|c| &c.id == id) else {
            return Ok(false);
        };
        contact.encryption_mode = mode;
        contact.shared_secret = secret;
        self.set(NS_CONTACTS, &contacts)?;
        Ok(true)
    }

    pub(crate) fn set_recent_name(&self, id: &PeerAddress, name: &str) -> Result<()> {
        let mut recents: Vec<SavedPeer> = self.recents();
        if let Some(peer) = recents.iter_mut().find(|p| &p.id == id) {
            peer.name = Some(name.to_string());
            self.set(crate::database::NS_RECENTS, &recents)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::from(s)
    }

    #[test]
    fn upsert_is_unique_by_id() {
        let db = Database::in_memory().unwrap();
        db.upsert_contact(&Contact::new(addr("veil-a"), "First")).unwrap();
        db.upsert_contact(&Contact::new(addr("veil-a"), "Second")).unwrap();

        let contacts = db.contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Second");
    }

    #[test]
    fn remove_contact_reports_existence() {
        let db = Database::in_memory().unwrap();
        db.upsert_contact(&Contact::new(addr("veil-a"), "A")).unwrap();

        assert!(db.remove_contact(&addr("veil-a")).unwrap());
        assert!(!db.remove_contact(&addr("veil-a")).unwrap());
        assert!(db.contacts().is_empty());
    }

    #[test]
    fn rename_syncs_recents_display_name() {
        let db = Database::in_memory().unwrap();
        db.upsert_contact(&Contact::new(addr("veil-a"), "Old")).unwrap();
        db.touch_recent(&addr("veil-a"), Some("Old".into()), "hey", None, None)
            .unwrap();

        assert!(db.rename_contact(&addr("veil-a"), "New").unwrap());

        assert_eq!(db.find_contact(&addr("veil-a")).unwrap().name, "New");
        assert_eq!(db.recents()[0].name.as_deref(), Some("New"));
    }

    #[test]
    fn pinning_encryption_requires_existing_contact() {
        let db = Database::in_memory().unwrap();
        assert!(!db
            .set_contact_encryption(&addr("veil-a"), None, None)
            .unwrap());

        db.upsert_contact(&Contact::new(addr("veil-a"), "A")).unwrap();
        assert!(db
            .set_contact_encryption(
                &addr("veil-a"),
                Some(veil_shared::EncryptionMode::Aes256),
                Some("hunter2".into()),
            )
            .unwrap());

        let contact = db.find_contact(&addr("veil-a")).unwrap();
        assert_eq!(contact.shared_secret.as_deref(), Some("hunter2"));
    }
}
