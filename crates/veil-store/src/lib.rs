//! # veil-store
//!
//! Local persistence for the veil session engine, backed by SQLite.
//!
//! The store is a namespaced key/value surface: each namespace holds one
//! whole JSON document (`contacts`, `recents`, `settings`, `identity`, and
//! one `history:{peer}` per conversation). Reads of missing or corrupt
//! values return the type's empty default; writes replace whole values.

pub mod contacts;
pub mod database;
pub mod history;
pub mod models;
pub mod recents;
pub mod settings;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
