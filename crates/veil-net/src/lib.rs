// Transport seam and connection ownership for the veil session engine.

pub mod error;
pub mod memory;
pub mod registry;
pub mod transport;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransport};
pub use registry::{ConnectionRegistry, LinkState};
pub use transport::{PeerChannel, Transport, TransportEvent};
