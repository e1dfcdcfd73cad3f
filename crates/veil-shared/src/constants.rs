/// Salt for the passphrase KDF. Both peers must use the same constant so
/// that separately typed passphrases derive identical keys.
pub const KDF_SALT: &str = "veil_salt_v1";

/// PBKDF2-HMAC-SHA256 iteration count.
pub const KDF_ITERATIONS: u32 = 100_000;

/// AES-256-GCM nonce size in bytes (96-bit IV).
pub const NONCE_SIZE: usize = 12;

/// Symmetric key size in bytes.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Prefix of self-assigned peer addresses.
pub const ADDRESS_PREFIX: &str = "veil-";

/// Random suffix length of a generated peer address.
pub const ADDRESS_SUFFIX_LEN: usize = 6;

/// Length of generated message identifiers.
pub const MESSAGE_ID_LEN: usize = 9;

/// Maximum number of messages kept per conversation.
pub const HISTORY_CAP: usize = 100;

/// Maximum number of entries in the recent-conversations list.
pub const RECENTS_CAP: usize = 20;

/// Maximum character length of a recent-conversation snippet.
pub const SNIPPET_MAX_CHARS: usize = 30;

/// How long a pending outbound connect may stay un-opened before it is
/// reported as failed.
pub const CONNECT_TIMEOUT_SECS: u64 = 2;

/// Delay between a channel opening and the friend-request frame being sent,
/// so the channel is genuinely usable on both ends.
pub const HANDSHAKE_GRACE_SECS: u64 = 2;

/// Backoff before re-dialing the signaling server after a disconnect.
pub const SIGNALING_BACKOFF_SECS: u64 = 2;

/// Grace before closing the channel after sending a rejection, so the
/// rejection frame has a chance to be delivered.
pub const REJECT_CLOSE_DELAY_MS: u64 = 100;

/// Silence window after which a typing indicator is automatically cleared.
pub const TYPING_STOP_MS: u64 = 1_500;

/// Shown in place of content that arrived encrypted with no key configured.
pub const PLACEHOLDER_MISSING_KEY: &str = "[Encrypted message - no key]";

/// Shown in place of content that failed authentication on decrypt.
pub const PLACEHOLDER_KEY_MISMATCH: &str = "[Decryption failed - key mismatch]";
