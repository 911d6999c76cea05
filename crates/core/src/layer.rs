//! The channel layer contract shared by every backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::message::Message;
use crate::Result;

/// Default message TTL.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60);

/// Default group membership TTL.
pub const DEFAULT_GROUP_EXPIRY: Duration = Duration::from_secs(86_400);

/// Default per-channel inbox bound.
pub const DEFAULT_CAPACITY: usize = 100;

/// A process-external message bus.
///
/// A layer stores per-channel inboxes and group membership, and moves
/// messages between channels, possibly across processes and hosts. All
/// operations suspend rather than block; `receive` assumes at most one
/// concurrent receiver per channel (concurrent receivers yield undefined
/// interleaving).
#[async_trait]
pub trait ChannelLayer: Send + Sync + 'static {
    /// Return a fresh, unused channel name owned by this layer.
    async fn new_channel(&self, prefix: &str) -> Result<String>;

    /// Enqueue `message` for `channel`. Unknown channels are created lazily;
    /// a saturated inbox fails with [`crate::Error::ChannelFull`].
    async fn send(&self, channel: &str, message: Message) -> Result<()>;

    /// Suspend until a non-expired message is available for `channel` and
    /// return exactly one.
    async fn receive(&self, channel: &str) -> Result<Message>;

    /// Add `channel` to `group`. Idempotent; refreshes the membership
    /// timestamp when already present.
    async fn group_add(&self, group: &str, channel: &str) -> Result<()>;

    /// Remove `channel` from `group`. No-op when absent.
    async fn group_discard(&self, group: &str, channel: &str) -> Result<()>;

    /// Fan `message` out to every current member of `group`. Per-recipient
    /// capacity failures are logged and swallowed, never raised.
    async fn group_send(&self, group: &str, message: Message) -> Result<()>;

    /// Discard all layer state. Testing only.
    async fn flush(&self) -> Result<()>;

    /// Release transport resources.
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn ChannelLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn ChannelLayer>")
    }
}

/// Knobs shared by every layer backend.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Message TTL; expired messages are silently discarded
    pub expiry: Duration,

    /// Group membership TTL; older memberships are reaped
    pub group_expiry: Duration,

    /// Default per-channel inbox bound
    pub capacity: usize,

    /// Ordered glob-pattern capacity overrides; the first matching pattern
    /// wins over later ones and over the default
    pub channel_capacity: Vec<(String, usize)>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_EXPIRY,
            group_expiry: DEFAULT_GROUP_EXPIRY,
            capacity: DEFAULT_CAPACITY,
            channel_capacity: Vec::new(),
        }
    }
}

impl LayerConfig {
    /// Set the message TTL.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the group membership TTL.
    pub fn with_group_expiry(mut self, group_expiry: Duration) -> Self {
        self.group_expiry = group_expiry;
        self
    }

    /// Set the default inbox bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Append a glob-pattern capacity override.
    pub fn with_channel_capacity(mut self, pattern: impl Into<String>, capacity: usize) -> Self {
        self.channel_capacity.push((pattern.into(), capacity));
        self
    }
}

/// Compiled per-channel capacity overrides.
///
/// Patterns are shell-style globs (`*` and `?`) matched against the full
/// channel name. Overlapping patterns resolve to the first match in
/// configured order.
#[derive(Debug)]
pub struct CapacityTable {
    default: usize,
    patterns: Vec<(Regex, usize)>,
}

impl CapacityTable {
    /// Compile the override table from a layer configuration.
    pub fn from_config(config: &LayerConfig) -> Self {
        let patterns = config
            .channel_capacity
            .iter()
            .filter_map(|(glob, capacity)| {
                match Regex::new(&glob_to_regex(glob)) {
                    Ok(regex) => Some((regex, *capacity)),
                    Err(err) => {
                        tracing::warn!(pattern = %glob, error = %err, "Ignoring unparsable capacity pattern");
                        None
                    }
                }
            })
            .collect();

        Self {
            default: config.capacity,
            patterns,
        }
    }

    /// The inbox bound for `channel`.
    pub fn capacity_for(&self, channel: &str) -> usize {
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(channel))
            .map(|(_, capacity)| *capacity)
            .unwrap_or(self.default)
    }
}

/// Translate a shell-style glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            ch => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    pattern.push('$');
    pattern
}

/// Monotonic counters a layer updates as it moves messages.
#[derive(Debug, Default)]
pub struct LayerStats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped_full: AtomicU64,
    dropped_expired: AtomicU64,
}

impl LayerStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_full(&self) {
        self.dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_expired(&self) {
        self.dropped_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> LayerStatsSnapshot {
        LayerStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_expired: self.dropped_expired.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`LayerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerStatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub dropped_full: u64,
    pub dropped_expired: u64,
}
