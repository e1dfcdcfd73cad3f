// Shared types, wire protocol and crypto for the veil peer session engine.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use crypto::{decrypt, derive_key, encrypt, Envelope, SymmetricKey};
pub use error::{CryptoError, ProtocolError};
pub use protocol::{MessageKind, WireMessage};
pub use types::{
    new_message_id, ConnectionStatus, EncryptionMode, PeerAddress, ServerStatus,
};
