//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] holding a single
//! `kv` table: one row per logical namespace, the value a whole JSON
//! document. Writes replace the whole value; partial updates do not exist at
//! this layer, so concurrent writers to different namespaces never conflict.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Namespace holding the contact list.
pub const NS_CONTACTS: &str = "contacts";
/// Namespace holding the recent-conversations list.
pub const NS_RECENTS: &str = "recents";
/// Namespace holding user settings.
pub const NS_SETTINGS: &str = "settings";
/// Namespace holding the self-assigned peer address.
pub const NS_IDENTITY: &str = "identity";

/// Namespace of a single conversation's history.
pub fn history_namespace(peer: &veil_shared::PeerAddress) -> String {
    format!("history:{peer}")
}

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database in the
    /// platform-appropriate data directory.
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("net", "veil", "veil").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("veil.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT PRIMARY KEY,
                value     TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Read a namespace's whole value.
    ///
    /// Missing or corrupt values yield the type's default; corruption is
    /// logged and never propagated to the caller.
    pub fn get<T: DeserializeOwned + Default>(&self, namespace: &str) -> T {
        let raw: Option<String> = match self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(namespace, error = %e, "store read failed, using default");
                return T::default();
            }
        };

        match raw {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(namespace, error = %e, "corrupt store value, using default");
                T::default()
            }),
            None => T::default(),
        }
    }

    /// Replace a namespace's whole value.
    pub fn set<T: Serialize>(&self, namespace: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO kv (namespace, value) VALUES (?1, ?2)
             ON CONFLICT(namespace) DO UPDATE SET value = excluded.value",
            params![namespace, json],
        )?;
        Ok(())
    }

    /// Delete a namespace. Deleting a missing namespace is a no-op.
    pub fn delete(&self, namespace: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM kv WHERE namespace = ?1",
            params![namespace],
        )?;
        Ok(())
    }

    /// Delete every namespace matching a SQL LIKE pattern.
    pub(crate) fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM kv WHERE namespace LIKE ?1",
            params![pattern],
        )?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        db.set("settings", &vec!["a".to_string()]).unwrap();
        drop(db);

        let db = Database::open_at(&path).unwrap();
        let restored: Vec<String> = db.get("settings");
        assert_eq!(restored, vec!["a".to_string()]);
    }

    #[test]
    fn missing_value_yields_default() {
        let db = Database::in_memory().unwrap();
        let value: Vec<String> = db.get("nothing-here");
        assert!(value.is_empty());
    }

    #[test]
    fn corrupt_value_yields_default() {
        let db = Database::in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO kv (namespace, value) VALUES ('contacts', 'not json {')",
                [],
            )
            .unwrap();

        let value: Vec<String> = db.get("contacts");
        assert!(value.is_empty());
    }

    #[test]
    fn set_replaces_whole_value() {
        let db = Database::in_memory().unwrap();
        db.set("ns", &vec![1, 2, 3]).unwrap();
        db.set("ns", &vec![9]).unwrap();
        let value: Vec<i32> = db.get("ns");
        assert_eq!(value, vec![9]);
    }

    #[test]
    fn delete_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.set("ns", &1).unwrap();
        db.delete("ns").unwrap();
        db.delete("ns").unwrap();
        let value: Option<i32> = db.get("ns");
        assert!(value.is_none());
    }
}
