//! Connection registry: the single owner of live peer channels.
//!
//! Maintains at most one channel per peer address with its link state.
//! Every other component reaches a channel only through a registry lookup,
//! never by caching a handle, so a replaced or closed channel can never be
//! written to by mistake.

use std::collections::HashMap;

use tracing::debug;

use veil_shared::PeerAddress;

use crate::error::TransportError;
use crate::transport::PeerChannel;

/// Per-peer link state.
///
/// `AwaitingApproval` is entered only by the initiating side, once its
/// friend request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    AwaitingApproval,
    Open,
    Closed,
    Errored,
}

struct ChannelEntry {
    channel: PeerChannel,
    state: LinkState,
    /// Whether we dialed this channel (as opposed to receiving it).
    outbound: bool,
}

/// Tracks the one live channel per peer.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: HashMap<PeerAddress, ChannelEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live, open channel exists for the peer.
    pub fn is_open(&self, peer: &PeerAddress) -> bool {
        self.channels
            .get(peer)
            .map(|entry| entry.channel.is_open())
            .unwrap_or(false)
    }

    /// The peer's link state; `Closed` when no channel is registered.
    pub fn state(&self, peer: &PeerAddress) -> LinkState {
        self.channels
            .get(peer)
            .map(|entry| entry.state)
            .unwrap_or(LinkState::Closed)
    }

    pub fn set_state(&mut self, peer: &PeerAddress, state: LinkState) {
        if let Some(entry) = self.channels.get_mut(peer) {
            entry.state = state;
        }
    }

    /// The id of the peer's current channel, for staleness checks by timers.
    pub fn channel_id(&self, peer: &PeerAddress) -> Option<u64> {
        self.channels.get(peer).map(|entry| entry.channel.channel_id())
    }

    /// Whether the peer's current channel was dialed by us.
    pub fn is_outbound(&self, peer: &PeerAddress) -> bool {
        self.channels
            .get(peer)
            .map(|entry| entry.outbound)
            .unwrap_or(false)
    }

    /// Register a channel we dialed, in the `Connecting` state.
    pub fn insert_outbound(&mut self, peer: PeerAddress, channel: PeerChannel) {
        self.replace(peer, channel, true);
    }

    /// Register a channel the peer dialed.
    ///
    /// A duplicate inbound connection while one is live wins: only one
    /// channel per peer is permitted, so the existing one is closed and
    /// replaced.
    pub fn insert_incoming(&mut self, peer: PeerAddress, channel: PeerChannel) {
        self.replace(peer, channel, false);
    }

    fn replace(&mut self, peer: PeerAddress, channel: PeerChannel, outbound: bool) {
        if let Some(existing) = self.channels.remove(&peer) {
            if existing.channel.channel_id() == channel.channel_id() {
                // Same channel re-registered; keep its state.
                self.channels.insert(peer, existing);
                return;
            }
            if existing.channel.is_open() {
                debug!(peer = %peer, "closing superseded channel");
                existing.channel.close();
            }
        }
        let state = if channel.is_open() {
            LinkState::Open
        } else {
            LinkState::Connecting
        };
        self.channels.insert(
            peer,
            ChannelEntry {
                channel,
                state,
                outbound,
            },
        );
    }

    /// Apply a transport `Opened` event. Returns false for stale channels.
    pub fn on_opened(&mut self, peer: &PeerAddress, channel_id: u64) -> bool {
        match self.channels.get_mut(peer) {
            Some(entry) if entry.channel.channel_id() == channel_id => {
                entry.state = LinkState::Open;
                true
            }
            _ => false,
        }
    }

    /// Apply a transport `Closed` event, removing the entry. Returns false
    /// for stale channels.
    pub fn on_closed(&mut self, peer: &PeerAddress, channel_id: u64) -> bool {
        self.remove_if_current(peer, channel_id)
    }

    /// Apply a transport `Error` event, removing the entry. Returns false
    /// for stale channels.
    pub fn on_errored(&mut self, peer: &PeerAddress, channel_id: u64) -> bool {
        self.remove_if_current(peer, channel_id)
    }

    fn remove_if_current(&mut self, peer: &PeerAddress, channel_id: u64) -> bool {
        match self.channels.get(peer) {
            Some(entry) if entry.channel.channel_id() == channel_id => {
                self.channels.remove(peer);
                true
            }
            _ => false,
        }
    }

    /// Send one frame to a peer through its registered channel.
    pub fn send(&self, peer: &PeerAddress, payload: Vec<u8>) -> Result<(), TransportError> {
        let entry = self
            .channels
            .get(peer)
            .ok_or_else(|| TransportError::ChannelClosed(peer.clone()))?;
        entry.channel.send(payload)
    }

    /// Close and drop the peer's channel, if any.
    pub fn close(&mut self, peer: &PeerAddress) {
        if let Some(entry) = self.channels.remove(peer) {
            entry.channel.close();
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.channels
            .iter()
            .filter(|(_, entry)| entry.channel.is_open())
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
