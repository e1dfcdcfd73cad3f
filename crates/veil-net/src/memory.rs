//! In-process transport: a switchboard connecting endpoints by address.
//!
//! Frames travel over tokio channels, so delivery is ordered and reliable
//! per channel, exactly the guarantees the real substrate provides. The hub
//! doubles as the signaling server: endpoints can be taken offline to
//! exercise reconnect paths, and channel opening can be held back to
//! exercise connect timeouts.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use veil_shared::PeerAddress;

use crate::error::TransportError;
use crate::transport::{PeerChannel, Transport, TransportEvent};

#[derive(Default)]
struct HubInner {
    next_channel_id: u64,
    hold_open: bool,
    endpoints: HashMap<PeerAddress, Endpoint>,
}

struct Endpoint {
    events: mpsc::UnboundedSender<TransportEvent>,
    online: bool,
}

/// The shared switchboard. Clone handles freely; all clones are the same hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its transport plus the event stream
    /// the engine consumes. The endpoint starts online.
    pub fn endpoint(
        &self,
        address: PeerAddress,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().expect("hub lock");
            inner.endpoints.insert(
                address.clone(),
                Endpoint {
                    events: events_tx.clone(),
                    online: true,
                },
            );
        }
        let _ = events_tx.send(TransportEvent::ServerUp);

        (
            MemoryTransport {
                address,
                hub: self.clone(),
            },
            events_rx,
        )
    }

    /// Toggle an endpoint's signaling connectivity. Going offline delivers
    /// `ServerDown`; coming back up is only observed once the endpoint
    /// re-dials via [`Transport::reconnect`].
    pub fn set_online(&self, address: &PeerAddress, online: bool) {
        let mut inner = self.inner.lock().expect("hub lock");
        if let Some(endpoint) = inner.endpoints.get_mut(address) {
            let was_online = endpoint.online;
            endpoint.online = online;
            if was_online && !online {
                let _ = endpoint.events.send(TransportEvent::ServerDown);
            }
        }
    }

    /// When set, newly created channels never emit `Opened` (they hang in
    /// the connecting state until closed or timed out).
    pub fn set_hold_open(&self, hold: bool) {
        self.inner.lock().expect("hub lock").hold_open = hold;
    }
}

/// One endpoint's view of the hub.
pub struct MemoryTransport {
    address: PeerAddress,
    hub: MemoryHub,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> PeerAddress {
        self.address.clone()
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<PeerChannel, TransportError> {
        if peer == &self.address {
            return Err(TransportError::AddressConflict(peer.clone()));
        }
        let mut inner = self.hub.inner.lock().expect("hub lock");

        let caller_online = inner
            .endpoints
            .get(&self.address)
            .map(|e| e.online)
            .unwrap_or(false);
        if !caller_online {
            return Err(TransportError::SignalingDown);
        }

        let remote = match inner.endpoints.get(peer) {
            Some(endpoint) if endpoint.online => endpoint.events.clone(),
            _ => return Err(TransportError::PeerUnavailable(peer.clone())),
        };
        let local = inner
            .endpoints
            .get(&self.address)
            .map(|e| e.events.clone())
            .expect("caller endpoint checked above");

        let local_id = inner.next_channel_id;
        let remote_id = inner.next_channel_id + 1;
        inner.next_channel_id += 2;
        let hold_open = inner.hold_open;
        drop(inner);

        debug!(
            from = %self.address,
            to = %peer,
            local_id,
            remote_id,
            "memory transport dialing"
        );

        let open = Arc::new(AtomicBool::new(!hold_open));

        // One pump task per direction keeps per-channel frame order.
        let (local_out_tx, local_out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (remote_out_tx, remote_out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        spawn_pump(local_out_rx, remote.clone(), self.address.clone(), remote_id);
        spawn_pump(remote_out_rx, local.clone(), peer.clone(), local_id);

        let closer: Arc<dyn Fn() + Send + Sync> = {
            let local = local.clone();
            let remote = remote.clone();
            let local_addr = self.address.clone();
            let peer_addr = peer.clone();
            Arc::new(move || {
                let _ = local.send(TransportEvent::Closed {
                    peer: peer_addr.clone(),
                    channel_id: local_id,
                });
                let _ = remote.send(TransportEvent::Closed {
                    peer: local_addr.clone(),
                    channel_id: remote_id,
                });
            })
        };

        let local_channel = PeerChannel::new(
            peer.clone(),
            local_id,
            open.clone(),
            local_out_tx,
            closer.clone(),
        );
        let remote_channel = PeerChannel::new(
            self.address.clone(),
            remote_id,
            open,
            remote_out_tx,
            closer,
        );

        let _ = remote.send(TransportEvent::Incoming {
            peer: self.address.clone(),
            channel: remote_channel,
        });
        if !hold_open {
            let _ = remote.send(TransportEvent::Opened {
                peer: self.address.clone(),
                channel_id: remote_id,
            });
            let _ = local.send(TransportEvent::Opened {
                peer: peer.clone(),
                channel_id: local_id,
            });
        }

        Ok(local_channel)
    }

    async fn reconnect(&self) {
        let inner = self.hub.inner.lock().expect("hub lock");
        if let Some(endpoint) = inner.endpoints.get(&self.address) {
            let event = if endpoint.online {
                TransportEvent::ServerUp
            } else {
                TransportEvent::ServerDown
            };
            let _ = endpoint.events.send(event);
        }
    }
}

fn spawn_pump(
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    sink: mpsc::UnboundedSender<TransportEvent>,
    from: PeerAddress,
    channel_id: u64,
) {
    tokio::spawn(async move {
        while let Some(payload) = frames.recv().await {
            if sink
                .send(TransportEvent::Data {
                    peer: from.clone(),
                    channel_id,
                    payload,
                })
                .is_err()
            {
                break;
            }
        }
    });
}
