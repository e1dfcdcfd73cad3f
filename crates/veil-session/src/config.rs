use std::time::Duration;

use veil_shared::constants::{
    CONNECT_TIMEOUT_SECS, HANDSHAKE_GRACE_SECS, REJECT_CLOSE_DELAY_MS, SIGNALING_BACKOFF_SECS,
    TYPING_STOP_MS,
};

/// Timing knobs of the session engine.
///
/// The defaults are the production values; tests shrink them to keep
/// timer-driven scenarios fast.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an outbound connect may stay un-opened before it is
    /// reported as failed. The engine does not retry on its own.
    pub connect_timeout: Duration,

    /// Wait between a channel opening and the friend request being sent.
    pub handshake_grace: Duration,

    /// Backoff before re-dialing the signaling server after a disconnect.
    pub signaling_backoff: Duration,

    /// Grace between sending a rejection and closing the channel, so the
    /// frame can still be delivered.
    pub reject_close_delay: Duration,

    /// Silence window after which the outbound typing indicator clears.
    pub typing_stop: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            handshake_grace: Duration::from_secs(HANDSHAKE_GRACE_SECS),
            signaling_backoff: Duration::from_secs(SIGNALING_BACKOFF_SECS),
            reject_close_delay: Duration::from_millis(REJECT_CLOSE_DELAY_MS),
            typing_stop: Duration::from_millis(TYPING_STOP_MS),
        }
    }
}

impl EngineConfig {
    /// Uniformly scaled-down timings for tests.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_millis(40),
            handshake_grace: Duration::from_millis(10),
            signaling_backoff: Duration::from_millis(20),
            reject_close_delay: Duration::from_millis(5),
            typing_stop: Duration::from_millis(30),
        }
    }
}
