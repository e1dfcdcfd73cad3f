//! The transport collaborator seam.
//!
//! The engine consumes a [`Transport`] plus one ordered stream of
//! [`TransportEvent`]s. Whatever substrate sits behind the trait must
//! provide addressable, ordered, reliable point-to-point channels between
//! endpoints identified by opaque string addresses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use veil_shared::PeerAddress;

use crate::error::TransportError;

/// Events delivered by the transport, serialized on one receiver.
///
/// Channel-scoped events carry the `channel_id` of the handle they belong
/// to, so a consumer can discard events from a channel it has already
/// replaced.
#[derive(Debug)]
pub enum TransportEvent {
    /// Signaling connectivity came up.
    ServerUp,
    /// Signaling connectivity was lost. Reconnecting is the caller's job.
    ServerDown,
    /// A remote peer dialed us; the channel is not open yet.
    Incoming {
        peer: PeerAddress,
        channel: PeerChannel,
    },
    /// A channel finished opening and is usable.
    Opened { peer: PeerAddress, channel_id: u64 },
    /// An inbound frame on an open channel.
    Data {
        peer: PeerAddress,
        channel_id: u64,
        payload: Vec<u8>,
    },
    /// The channel was closed (either side).
    Closed { peer: PeerAddress, channel_id: u64 },
    /// The channel failed.
    Error {
        peer: PeerAddress,
        channel_id: u64,
        reason: String,
    },
}

/// A handle to one live peer channel.
///
/// Handles are cheap to clone; all clones refer to the same underlying
/// channel. The id is unique per handle lineage for the lifetime of the
/// process.
#[derive(Clone)]
pub struct PeerChannel {
    peer: PeerAddress,
    channel_id: u64,
    open: Arc<AtomicBool>,
    /// Frames pushed here surface as `Data` events on the remote endpoint.
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Invoked once on close to notify both endpoints.
    closer: Arc<dyn Fn() + Send + Sync>,
}

impl PeerChannel {
    pub fn new(
        peer: PeerAddress,
        channel_id: u64,
        open: Arc<AtomicBool>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        closer: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            peer,
            channel_id,
            open,
            outbound,
            closer,
        }
    }

    /// The remote peer this channel is connected to.
    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Hand one frame to the transport for ordered, reliable delivery.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.peer.clone()));
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::SendFailed(self.peer.clone()))
    }

    /// Close the channel. Both endpoints observe a `Closed` event; closing
    /// twice is a no-op.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            (self.closer)();
        }
    }
}

impl std::fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerChannel")
            .field("peer", &self.peer)
            .field("channel_id", &self.channel_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// The substrate that dials peers and reports connectivity.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Our own stable address on the substrate.
    fn local_address(&self) -> PeerAddress;

    /// Dial a remote peer. An `Opened` event follows once the channel is
    /// usable end-to-end.
    async fn connect(&self, peer: &PeerAddress) -> Result<PeerChannel, TransportError>;

    /// Try to re-attach to the signaling substrate after a `ServerDown`.
    /// Outcome surfaces as a `ServerUp` or another `ServerDown` event.
    async fn reconnect(&self);
}
