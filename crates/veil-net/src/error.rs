use thiserror::Error;

use veil_shared::PeerAddress;

/// Errors produced by the transport seam and the connection registry.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The signaling substrate is unreachable; no new channels can be dialed.
    #[error("signaling server unavailable")]
    SignalingDown,

    /// The remote peer could not be reached (offline or unknown address).
    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerAddress),

    /// No live channel exists for the peer.
    #[error("channel to {0} is closed")]
    ChannelClosed(PeerAddress),

    /// The channel exists but handing the frame to the transport failed.
    #[error("send to {0} failed")]
    SendFailed(PeerAddress),

    /// Refusing to dial our own address.
    #[error("cannot connect to own address {0}")]
    AddressConflict(PeerAddress),
}
