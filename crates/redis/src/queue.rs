//! Reliable Redis queue layer.
//!
//! Messages live in Redis lists, one list per channel, pushed with an
//! atomic capacity check and popped with `BLPOP`. Groups are sorted sets of
//! channel names scored by join time. Channels and groups are sharded
//! across the configured hosts by hashing the routable portion of the name,
//! so any process with the same host list reaches the same shard.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tracing::instrument;

use wirebus_common::retry::{retry_with_predicate, RetryConfig};
use wirebus_common::serialization::{decode_payload, encode_payload, DELIVERY_TAG_LEN};
use wirebus_common::PayloadCipher;
use wirebus_core::layer::{
    CapacityTable, ChannelLayer, LayerConfig, LayerStats, LayerStatsSnapshot,
};
use wirebus_core::names::{
    new_channel_suffix, require_valid_channel_name, require_valid_group_name,
};
use wirebus_core::{Error, Message, Result};

use crate::hosts::{build_shards, is_failover_error, run_on_shard, RedisHost, Shard};
use crate::scripts::{BOUNDED_PUSH, GROUP_FAN_OUT};
use crate::sharding::shard_index;
use crate::HealthStatus;

/// How many delivery tags are remembered per channel to suppress
/// duplicates seen across a reconnect mid-push.
const TRACKED_TAGS: usize = 64;

/// Default idle interval between `BLPOP` reissues.
const DEFAULT_BLPOP_INTERVAL: Duration = Duration::from_secs(5);

/// Queue layer configuration.
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Shard hosts, in an order every participating process agrees on
    pub hosts: Vec<RedisHost>,

    /// Key namespace
    pub prefix: String,

    /// Expiry/capacity knobs shared with other layer kinds
    pub layer: LayerConfig,

    /// When non-empty, payloads are sealed; first key encrypts, all keys
    /// are tried for decryption
    pub symmetric_encryption_keys: Vec<String>,

    /// Retry budget for transport errors and failover rebinding
    pub retry: RetryConfig,

    /// Idle `BLPOP` interval; cancellation is observed between reissues
    pub blpop_interval: Duration,
}

impl RedisQueueConfig {
    pub fn new(hosts: Vec<RedisHost>) -> Self {
        Self {
            hosts,
            prefix: "asgi".to_string(),
            layer: LayerConfig::default(),
            symmetric_encryption_keys: Vec::new(),
            retry: RetryConfig::default(),
            blpop_interval: DEFAULT_BLPOP_INTERVAL,
        }
    }

    /// Single-host convenience constructor.
    pub fn single(url: impl Into<String>) -> Self {
        Self::new(vec![RedisHost::Url(url.into())])
    }

    /// Set the key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the shared layer knobs.
    pub fn with_layer(mut self, layer: LayerConfig) -> Self {
        self.layer = layer;
        self
    }

    /// Enable payload encryption with the given key list.
    pub fn with_encryption_keys(mut self, keys: Vec<String>) -> Self {
        self.symmetric_encryption_keys = keys;
        self
    }

    /// Replace the transport retry budget.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// The reliable queue-style channel layer.
pub struct RedisQueueLayer {
    config: RedisQueueConfig,
    shards: Arc<Vec<Shard>>,
    capacity: CapacityTable,
    cipher: Option<PayloadCipher>,
    // Process-unique portion baked into generated channel names
    client_prefix: String,
    stats: LayerStats,
    recent_tags: Mutex<HashMap<String, VecDeque<[u8; DELIVERY_TAG_LEN]>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl RedisQueueLayer {
    /// Build the layer and spawn its background group reaper. Connections
    /// are established lazily on first use.
    pub async fn new(config: RedisQueueConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(Error::Transport(
                "queue layer requires at least one host".to_string(),
            ));
        }

        let cipher = if config.symmetric_encryption_keys.is_empty() {
            None
        } else {
            Some(PayloadCipher::new(&config.symmetric_encryption_keys)?)
        };

        let shards = Arc::new(build_shards(&config.hosts));
        let capacity = CapacityTable::from_config(&config.layer);
        let reaper = tokio::spawn(reap_groups(
            shards.clone(),
            config.prefix.clone(),
            config.layer.group_expiry,
        ));

        Ok(Self {
            capacity,
            cipher,
            client_prefix: new_channel_suffix(),
            stats: LayerStats::default(),
            recent_tags: Mutex::new(HashMap::new()),
            reaper: Mutex::new(Some(reaper)),
            shards,
            config,
        })
    }

    /// Counters snapshot, for diagnostics and tests.
    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    /// PING every shard and report the slowest round trip.
    pub async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        for shard in self.shards.iter() {
            if let Err(err) = shard.ping().await {
                return HealthStatus::unhealthy(start.elapsed(), err.to_string());
            }
        }
        HealthStatus::healthy(start.elapsed())
    }

    fn shard_for(&self, name: &str) -> &Shard {
        &self.shards[shard_index(name, self.shards.len())]
    }

    fn channel_key(&self, channel: &str) -> String {
        format!("{}.{}", self.config.prefix, channel)
    }

    fn group_key(&self, group: &str) -> String {
        format!("{}.group.{}", self.config.prefix, group)
    }

    fn expiry_seconds(&self) -> u64 {
        self.config.layer.expiry.as_secs().max(1)
    }

    fn group_expiry_seconds(&self) -> i64 {
        self.config.layer.group_expiry.as_secs().max(1) as i64
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let payload = encode_payload(message)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&payload),
            None => Ok(payload),
        }
    }

    fn decode(&self, raw: &[u8]) -> Result<([u8; DELIVERY_TAG_LEN], Message)> {
        match &self.cipher {
            Some(cipher) => decode_payload(&cipher.decrypt(raw)?),
            None => decode_payload(raw),
        }
    }

    /// Track the delivery tag for `channel`; true when it was already seen.
    fn is_duplicate(&self, channel: &str, tag: [u8; DELIVERY_TAG_LEN]) -> bool {
        let mut tags = self.recent_tags.lock();
        let seen = tags.entry(channel.to_string()).or_default();
        if seen.contains(&tag) {
            return true;
        }
        seen.push_back(tag);
        if seen.len() > TRACKED_TAGS {
            seen.pop_front();
        }
        false
    }

    /// Run a command closure against a shard, with failover rebinding and
    /// retries, mapping exhaustion into a layer transport error.
    async fn with_manager<T, F, Fut>(&self, shard: &Shard, op: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        run_on_shard(shard, self.config.retry.clone(), op)
            .await
            .map_err(Error::transport)
    }

    async fn dedicated_with_retry(&self, shard: &Shard) -> Result<redis::aio::Connection> {
        retry_with_predicate(
            self.config.retry.clone(),
            || shard.dedicated(),
            is_failover_error,
        )
        .await
        .map_err(Error::transport)
    }
}

#[async_trait]
impl ChannelLayer for RedisQueueLayer {
    async fn new_channel(&self, prefix: &str) -> Result<String> {
        let name = format!("{}.{}!{}", prefix, self.client_prefix, new_channel_suffix());
        require_valid_channel_name(&name)?;
        Ok(name)
    }

    #[instrument(skip(self, message), fields(channel = %channel))]
    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        require_valid_channel_name(channel)?;

        let payload = self.encode(&message)?;
        let key = self.channel_key(channel);
        let capacity = self.capacity.capacity_for(channel);
        let expiry = self.expiry_seconds();
        let shard = self.shard_for(channel);

        let pushed: i64 = self
            .with_manager(shard, |mut conn| {
                let key = key.clone();
                let payload = payload.clone();
                async move {
                    BOUNDED_PUSH
                        .key(key)
                        .arg(capacity)
                        .arg(payload.as_slice())
                        .arg(expiry)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await?;

        if pushed == 0 {
            self.stats.record_dropped_full();
            return Err(Error::ChannelFull(channel.to_string()));
        }
        self.stats.record_sent();
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        require_valid_channel_name(channel)?;

        let key = self.channel_key(channel);
        let shard = self.shard_for(channel);
        let interval = self.config.blpop_interval.as_secs_f64().max(1.0);
        let mut conn = self.dedicated_with_retry(shard).await?;

        loop {
            let reply: redis::RedisResult<Option<(String, Vec<u8>)>> =
                conn.blpop(&key, interval).await;
            match reply {
                Ok(Some((_, raw))) => {
                    let (tag, message) = self.decode(&raw)?;
                    if self.is_duplicate(channel, tag) {
                        tracing::debug!(channel = %channel, "Suppressing duplicate delivery");
                        continue;
                    }
                    self.stats.record_received();
                    return Ok(message);
                }
                // Idle timeout; reissue. Cancellation is observed here.
                Ok(None) => continue,
                Err(err) if is_failover_error(&err) => {
                    shard.rebind().await;
                    conn = self.dedicated_with_retry(shard).await?;
                }
                Err(err) => return Err(Error::transport(err)),
            }
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        let key = self.group_key(group);
        let score = chrono::Utc::now().timestamp();
        let group_expiry = self.group_expiry_seconds();
        let shard = self.shard_for(group);

        self.with_manager(shard, |mut conn| {
            let key = key.clone();
            let channel = channel.to_string();
            async move {
                redis::pipe()
                    .zadd(&key, &channel, score)
                    .ignore()
                    .cmd("EXPIRE")
                    .arg(&key)
                    .arg(group_expiry)
                    .ignore()
                    .query_async::<_, ()>(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        let key = self.group_key(group);
        let shard = self.shard_for(group);

        self.with_manager(shard, |mut conn| {
            let key = key.clone();
            let channel = channel.to_string();
            async move { conn.zrem(&key, &channel).await }
        })
        .await
    }

    #[instrument(skip(self, message), fields(group = %group))]
    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        require_valid_group_name(group)?;

        let group_key = self.group_key(group);
        let horizon = chrono::Utc::now().timestamp() - self.group_expiry_seconds();
        let group_shard = self.shard_for(group);

        // Expire stale members, then read the survivors.
        let members: Vec<String> = self
            .with_manager(group_shard, |mut conn| {
                let key = group_key.clone();
                async move {
                    redis::pipe()
                        .cmd("ZREMRANGEBYSCORE")
                        .arg(&key)
                        .arg("-inf")
                        .arg(horizon)
                        .ignore()
                        .cmd("ZRANGEBYSCORE")
                        .arg(&key)
                        .arg(horizon)
                        .arg("+inf")
                        .query_async::<_, (Vec<String>,)>(&mut conn)
                        .await
                        .map(|(members,)| members)
                }
            })
            .await?;

        if members.is_empty() {
            return Ok(());
        }

        let payload = self.encode(&message)?;
        let expiry = self.expiry_seconds();

        // One fan-out script invocation per shard holding members.
        let mut buckets: HashMap<usize, Vec<String>> = HashMap::new();
        for member in members {
            buckets
                .entry(shard_index(&member, self.shards.len()))
                .or_default()
                .push(member);
        }

        for (shard_idx, channels) in buckets {
            let shard = &self.shards[shard_idx];
            let keys: Vec<String> = channels.iter().map(|c| self.channel_key(c)).collect();
            let capacities: Vec<usize> =
                channels.iter().map(|c| self.capacity.capacity_for(c)).collect();

            let outcome: Result<i64> = self
                .with_manager(shard, |mut conn| {
                    let keys = keys.clone();
                    let capacities = capacities.clone();
                    let payload = payload.clone();
                    async move {
                        let mut invocation = GROUP_FAN_OUT.prepare_invoke();
                        for key in &keys {
                            invocation.key(key.as_str());
                        }
                        invocation.arg(expiry).arg(payload.as_slice());
                        for capacity in &capacities {
                            invocation.arg(*capacity);
                        }
                        invocation.invoke_async(&mut conn).await
                    }
                })
                .await;

            // Per-shard failures must not starve the other shards.
            match outcome {
                Ok(pushed) => {
                    let dropped = channels.len() as i64 - pushed;
                    if dropped > 0 {
                        tracing::debug!(
                            group = %group,
                            dropped,
                            "Skipped full channels during group fan-out"
                        );
                    }
                    for _ in 0..pushed {
                        self.stats.record_sent();
                    }
                    for _ in 0..dropped {
                        self.stats.record_dropped_full();
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        group = %group,
                        host = %shard.host().label(),
                        error = %err,
                        "Group fan-out failed on shard"
                    );
                }
            }
        }

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let pattern = format!("{}.*", self.config.prefix);
        for shard in self.shards.iter() {
            let mut manager = shard.manager().await.map_err(Error::transport)?;
            let keys: Vec<String> = {
                let mut scan_conn = manager.clone();
                let mut iter = scan_conn
                    .scan_match::<_, String>(&pattern)
                    .await
                    .map_err(Error::transport)?;
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                keys
            };
            if !keys.is_empty() {
                manager
                    .del::<_, ()>(keys)
                    .await
                    .map_err(Error::transport)?;
            }
        }
        self.recent_tags.lock().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        for shard in self.shards.iter() {
            shard.rebind().await;
        }
        Ok(())
    }
}

/// Background membership reaper: periodically trims expired members from
/// every group sorted set so idle groups decay even when nobody sends.
async fn reap_groups(shards: Arc<Vec<Shard>>, prefix: String, group_expiry: Duration) {
    let tick = Duration::from_secs((group_expiry.as_secs() / 10).max(60));
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // the first tick completes immediately

    loop {
        interval.tick().await;
        let horizon = chrono::Utc::now().timestamp() - group_expiry.as_secs().max(1) as i64;
        for shard in shards.iter() {
            if let Err(err) = reap_shard(shard, &prefix, horizon).await {
                tracing::debug!(
                    host = %shard.host().label(),
                    error = %err,
                    "Group reap pass failed"
                );
            }
        }
    }
}

async fn reap_shard(shard: &Shard, prefix: &str, horizon: i64) -> redis::RedisResult<()> {
    let mut manager = shard.manager().await?;
    let pattern = format!("{prefix}.group.*");

    let keys: Vec<String> = {
        let mut scan_conn = manager.clone();
        let mut iter = scan_conn.scan_match::<_, String>(&pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys
    };

    for key in keys {
        // Redis drops sorted sets that become empty, so no explicit DEL.
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(horizon)
            .query_async::<_, i64>(&mut manager)
            .await?;
    }
    Ok(())
}
