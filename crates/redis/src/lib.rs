//! Redis-backed channel layers for wirebus.
//!
//! This crate provides the two production backends plus their shared
//! connection machinery:
//! - [`RedisQueueLayer`] — reliable delivery over Redis lists with atomic
//!   capacity checks, group sorted sets, and background membership reaping
//! - [`RedisPubSubLayer`] — low-latency best-effort broadcast over Redis
//!   pub/sub with one multiplexing subscriber worker per shard
//! - [`RedisHost`] — connection descriptors, including Sentinel-monitored
//!   services resolved to the current master
//!
//! Both layers shard channels and groups across their host list by hashing
//! the routable portion of the name (see [`sharding`]).

pub mod hosts;
pub mod pubsub;
pub mod queue;
pub mod scripts;
pub mod sharding;

// Re-export commonly used types
pub use hosts::{is_failover_error, RedisHost, Shard};
pub use pubsub::{RedisPubSubConfig, RedisPubSubLayer};
pub use queue::{RedisQueueConfig, RedisQueueLayer};
pub use sharding::shard_index;

use std::time::Duration;

/// Outcome of a layer health probe.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether every shard answered PING
    pub healthy: bool,
    /// Probe round-trip time
    pub latency: Duration,
    /// First error encountered, if any
    pub error: Option<String>,
}

impl HealthStatus {
    pub(crate) fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            error: None,
        }
    }

    pub(crate) fn unhealthy(latency: Duration, error: String) -> Self {
        Self {
            healthy: false,
            latency,
            error: Some(error),
        }
    }
}
