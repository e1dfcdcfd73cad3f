//! # veil-session
//!
//! The peer session engine: turns raw transport events into consistent
//! per-peer session state. A friend-request handshake gates who may message
//! whom, chat payloads are end-to-end encrypted when a shared passphrase is
//! configured, history is capped and persisted per peer, and disconnects
//! recover through user-driven reconnects.
//!
//! All protocol logic runs on one task; see [`engine::spawn_engine`].

pub mod config;
pub mod engine;
pub mod events;
pub mod handle;
pub mod state;

mod handshake;
mod messaging;

pub use config::EngineConfig;
pub use engine::spawn_engine;
pub use events::{NoticeLevel, SessionNotification};
pub use handle::{EngineCommand, SessionHandle, StatusSnapshot};
pub use state::PendingRequest;
