//! Low-latency Redis pub/sub layer.
//!
//! Every logical channel and every group maps to a Redis pub/sub channel on
//! its shard. One subscriber worker per shard owns the pub/sub connection,
//! multiplexes every subscription over it, and routes incoming frames into
//! bounded in-process inboxes. Delivery is best-effort: a frame published
//! while no subscriber is attached — or while the subscriber is
//! reconnecting — is lost by design, and no TTLs apply.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

use wirebus_common::retry::RetryConfig;
use wirebus_common::serialization::{decode_payload, encode_payload};
use wirebus_common::PayloadCipher;
use wirebus_core::layer::{
    CapacityTable, ChannelLayer, LayerConfig, LayerStats, LayerStatsSnapshot,
};
use wirebus_core::names::{
    new_channel_suffix, require_valid_channel_name, require_valid_group_name,
};
use wirebus_core::{Error, Message, Result};

use crate::hosts::{build_shards, run_on_shard, RedisHost, Shard};
use crate::sharding::shard_index;
use crate::HealthStatus;

/// Pub/sub layer configuration.
#[derive(Debug, Clone)]
pub struct RedisPubSubConfig {
    /// Shard hosts, in an order every participating process agrees on
    pub hosts: Vec<RedisHost>,

    /// Wire channel namespace
    pub prefix: String,

    /// Capacity knobs for the in-process inboxes; expiry fields are unused
    /// because pub/sub frames are delivered live or not at all
    pub layer: LayerConfig,

    /// When non-empty, payloads are sealed; first key encrypts, all keys
    /// are tried for decryption
    pub symmetric_encryption_keys: Vec<String>,

    /// Retry budget for publish-side transport errors
    pub retry: RetryConfig,
}

impl RedisPubSubConfig {
    pub fn new(hosts: Vec<RedisHost>) -> Self {
        Self {
            hosts,
            prefix: "asgi".to_string(),
            layer: LayerConfig::default(),
            symmetric_encryption_keys: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Single-host convenience constructor.
    pub fn single(url: impl Into<String>) -> Self {
        Self::new(vec![RedisHost::Url(url.into())])
    }

    /// Set the wire channel namespace.
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
}

/// One channel's in-process inbox. The sender side is fed by the shard
/// subscriber workers; the receiver side is popped by `receive`, guarded by
/// an async mutex so the one-receiver-per-channel rule holds structurally.
struct Inbox {
    tx: mpsc::Sender<Message>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>,
}

/// State shared between the layer handle and its subscriber workers.
struct PubSubState {
    prefix: String,
    capacity: CapacityTable,
    cipher: Option<PayloadCipher>,
    stats: LayerStats,
    inboxes: Mutex<HashMap<String, Inbox>>,
    // group -> local member channels
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl PubSubState {
    /// Get or create the inbox for `channel`, returning its sender.
    fn inbox_sender(&self, channel: &str) -> mpsc::Sender<Message> {
        let mut inboxes = self.inboxes.lock();
        inboxes
            .entry(channel.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity.capacity_for(channel));
                Inbox {
                    tx,
                    rx: Arc::new(tokio::sync::Mutex::new(rx)),
                }
            })
            .tx
            .clone()
    }

    /// The receiver handle for `channel`, creating the inbox on demand.
    fn inbox_receiver(&self, channel: &str) -> Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>> {
        self.inbox_sender(channel);
        self.inboxes.lock()[channel].rx.clone()
    }

    /// Push one message into a local inbox, dropping on overflow.
    fn deliver(&self, channel: &str, message: Message) {
        match self.inbox_sender(channel).try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped_full();
                tracing::warn!(channel = %channel, "Dropping frame for full inbox");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(channel = %channel, "Dropping frame for closed inbox");
            }
        }
    }

    /// Route one pub/sub frame to the local inboxes it addresses.
    fn handle_frame(&self, wire_channel: &str, payload: &[u8]) {
        let plain = match &self.cipher {
            Some(cipher) => match cipher.decrypt(payload) {
                Ok(plain) => plain,
                Err(err) => {
                    tracing::warn!(error = %err, "Discarding undecryptable frame");
                    return;
                }
            },
            None => payload.to_vec(),
        };
        let message = match decode_payload(&plain) {
            Ok((_, message)) => message,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding undecodable frame");
                return;
            }
        };

        let group_prefix = format!("{}.group.", self.prefix);
        if let Some(group) = wire_channel.strip_prefix(&group_prefix) {
            let members: Vec<String> = self
                .groups
                .lock()
                .get(group)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default();
            for member in members {
                self.deliver(&member, message.clone());
            }
        } else if let Some(channel) = wire_channel.strip_prefix(&format!("{}.", self.prefix)) {
            self.deliver(channel, message);
        } else {
            tracing::debug!(wire_channel = %wire_channel, "Frame on unrecognized wire channel");
        }
    }
}

enum SubscriberCommand {
    Subscribe(String),
    Unsubscribe(String),
    Reset,
}

/// One shard's subscriber: owns the pub/sub connection, serializes
/// subscribe/unsubscribe commands, dispatches frames, and supervises its
/// own reconnects.
struct SubscriberWorker {
    host: RedisHost,
    state: Arc<PubSubState>,
    commands: mpsc::UnboundedReceiver<SubscriberCommand>,
    subscribed: HashSet<String>,
}

enum Step {
    Command(Option<SubscriberCommand>),
    Frame(Option<redis::Msg>),
}

impl SubscriberWorker {
    async fn run(mut self) {
        // Stay off the network until something subscribes.
        match self.commands.recv().await {
            None => return,
            Some(command) => self.apply_offline(command),
        }

        'reconnect: loop {
            let mut pubsub = match self.connect().await {
                Some(pubsub) => pubsub,
                None => return,
            };

            loop {
                let step = {
                    let mut stream = pubsub.on_message();
                    tokio::select! {
                        command = self.commands.recv() => Step::Command(command),
                        frame = stream.next() => Step::Frame(frame),
                    }
                };

                match step {
                    Step::Command(None) => return,
                    Step::Command(Some(SubscriberCommand::Subscribe(wire))) => {
                        if self.subscribed.insert(wire.clone()) {
                            if let Err(err) = pubsub.subscribe(&wire).await {
                                tracing::warn!(
                                    host = %self.host.label(),
                                    error = %err,
                                    "Subscribe failed; reconnecting"
                                );
                                continue 'reconnect;
                            }
                        }
                    }
                    Step::Command(Some(SubscriberCommand::Unsubscribe(wire))) => {
                        if self.subscribed.remove(&wire) {
                            if let Err(err) = pubsub.unsubscribe(&wire).await {
                                tracing::warn!(
                                    host = %self.host.label(),
                                    error = %err,
                                    "Unsubscribe failed; reconnecting"
                                );
                                continue 'reconnect;
                            }
                        }
                    }
                    Step::Command(Some(SubscriberCommand::Reset)) => {
                        self.subscribed.clear();
                        continue 'reconnect;
                    }
                    Step::Frame(Some(frame)) => {
                        let wire_channel = frame.get_channel_name().to_string();
                        match frame.get_payload::<Vec<u8>>() {
                            Ok(payload) => self.state.handle_frame(&wire_channel, &payload),
                            Err(err) => {
                                tracing::warn!(error = %err, "Unreadable pub/sub frame")
                            }
                        }
                    }
                    Step::Frame(None) => {
                        tracing::warn!(
                            host = %self.host.label(),
                            "Pub/sub connection lost; reconnecting"
                        );
                        continue 'reconnect;
                    }
                }
            }
        }
    }

    fn apply_offline(&mut self, command: SubscriberCommand) {
        match command {
            SubscriberCommand::Subscribe(wire) => {
                self.subscribed.insert(wire);
            }
            SubscriberCommand::Unsubscribe(wire) => {
                self.subscribed.remove(&wire);
            }
            SubscriberCommand::Reset => self.subscribed.clear(),
        }
    }

    /// Reconnect with capped backoff, replaying every live subscription
    /// before frame dispatch resumes. Commands arriving while the shard is
    /// down mutate the subscription set and are honored by the replay.
    async fn connect(&mut self) -> Option<redis::aio::PubSub> {
        let mut delay = Duration::from_millis(100);
        loop {
            match self.try_connect().await {
                Ok(pubsub) => return Some(pubsub),
                Err(err) => {
                    tracing::warn!(
                        host = %self.host.label(),
                        error = %err,
                        "Pub/sub connect failed; backing off"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                command = self.commands.recv() => match command {
                    None => return None,
                    Some(command) => self.apply_offline(command),
                },
            }
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }

    async fn try_connect(&mut self) -> redis::RedisResult<redis::aio::PubSub> {
        let client = self.host.client().await?;
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        for wire in &self.subscribed {
            pubsub.subscribe(wire).await?;
        }
        Ok(pubsub)
    }
}

/// The low-latency pub/sub channel layer.
pub struct RedisPubSubLayer {
    config: RedisPubSubConfig,
    shards: Arc<Vec<Shard>>,
    state: Arc<PubSubState>,
    client_prefix: String,
    command_txs: Vec<mpsc::UnboundedSender<SubscriberCommand>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisPubSubLayer {
    /// Build the layer and spawn one subscriber worker per shard. Workers
    /// stay off the network until their shard sees a subscription.
    pub async fn new(config: RedisPubSubConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(Error::Transport(
                "pub/sub layer requires at least one host".to_string(),
            ));
        }

        let cipher = if config.symmetric_encryption_keys.is_empty() {
            None
        } else {
            Some(PayloadCipher::new(&config.symmetric_encryption_keys)?)
        };

        let state = Arc::new(PubSubState {
            prefix: config.prefix.clone(),
            capacity: CapacityTable::from_config(&config.layer),
            cipher,
            stats: LayerStats::default(),
            inboxes: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
        });

        let shards = Arc::new(build_shards(&config.hosts));
        let mut command_txs = Vec::with_capacity(config.hosts.len());
        let mut workers = Vec::with_capacity(config.hosts.len());
        for host in &config.hosts {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = SubscriberWorker {
                host: host.clone(),
                state: state.clone(),
                commands: rx,
                subscribed: HashSet::new(),
            };
            command_txs.push(tx);
            workers.push(tokio::spawn(worker.run()));
        }

        Ok(Self {
            shards,
            state,
            client_prefix: new_channel_suffix(),
            command_txs,
            workers: Mutex::new(workers),
            config,
        })
    }

    /// Counters snapshot, for diagnostics and tests.
    pub fn stats(&self) -> LayerStatsSnapshot {
        self.state.stats.snapshot()
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

    fn wire_channel(&self, channel: &str) -> String {
        format!("{}.{}", self.config.prefix, channel)
    }

    fn wire_group(&self, group: &str) -> String {
        format!("{}.group.{}", self.config.prefix, group)
    }

    fn command_tx_for(&self, name: &str) -> &mpsc::UnboundedSender<SubscriberCommand> {
        &self.command_txs[shard_index(name, self.command_txs.len())]
    }

    /// Make sure `channel` has an inbox and its shard subscription is live.
    fn attach_channel(&self, channel: &str) {
        self.state.inbox_sender(channel);
        let _ = self
            .command_tx_for(channel)
            .send(SubscriberCommand::Subscribe(self.wire_channel(channel)));
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        let payload = encode_payload(message)?;
        match &self.state.cipher {
            Some(cipher) => cipher.encrypt(&payload),
            None => Ok(payload),
        }
    }

    /// PUBLISH `payload` on the shard owning `routing_name`.
    async fn publish(&self, routing_name: &str, wire_channel: String, payload: Vec<u8>) -> Result<()> {
        let shard = &self.shards[shard_index(routing_name, self.shards.len())];
        run_on_shard(shard, self.config.retry.clone(), |mut conn| {
            let wire_channel = wire_channel.clone();
            let payload = payload.clone();
            async move {
                redis::cmd("PUBLISH")
                    .arg(&wire_channel)
                    .arg(payload.as_slice())
                    .query_async::<_, i64>(&mut conn)
                    .await
            }
        })
        .await
        .map_err(Error::transport)?;
        self.state.stats.record_sent();
        Ok(())
    }
}

#[async_trait]
impl ChannelLayer for RedisPubSubLayer {
    async fn new_channel(&self, prefix: &str) -> Result<String> {
        let name = format!("{}.{}!{}", prefix, self.client_prefix, new_channel_suffix());
        require_valid_channel_name(&name)?;
        // Attach eagerly so frames published before the first receive are
        // already buffered locally.
        self.attach_channel(&name);
        Ok(name)
    }

    #[instrument(skip(self, message), fields(channel = %channel))]
    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        require_valid_channel_name(channel)?;
        let payload = self.encode(&message)?;
        self.publish(channel, self.wire_channel(channel), payload)
            .await
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        require_valid_channel_name(channel)?;
        self.attach_channel(channel);

        let receiver = self.state.inbox_receiver(channel);
        let mut receiver = receiver.lock().await;
        match receiver.recv().await {
            Some(message) => {
                self.state.stats.record_received();
                Ok(message)
            }
            None => Err(Error::Transport(format!(
                "inbox for {channel:?} was torn down"
            ))),
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        // The member needs an inbox before the first group frame arrives.
        self.state.inbox_sender(channel);

        let first_member = {
            let mut groups = self.state.groups.lock();
            let members = groups.entry(group.to_string()).or_default();
            let was_empty = members.is_empty();
            members.insert(channel.to_string());
            was_empty
        };

        if first_member {
            let _ = self
                .command_tx_for(group)
                .send(SubscriberCommand::Subscribe(self.wire_group(group)));
        }
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        let last_member = {
            let mut groups = self.state.groups.lock();
            match groups.get_mut(group) {
                Some(members) => {
                    members.remove(channel);
                    if members.is_empty() {
                        groups.remove(group);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last_member {
            let _ = self
                .command_tx_for(group)
                .send(SubscriberCommand::Unsubscribe(self.wire_group(group)));
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(group = %group))]
    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        require_valid_group_name(group)?;
        let payload = self.encode(&message)?;
        self.publish(group, self.wire_group(group), payload).await
    }

    async fn flush(&self) -> Result<()> {
        self.state.inboxes.lock().clear();
        self.state.groups.lock().clear();
        for tx in &self.command_txs {
            let _ = tx.send(SubscriberCommand::Reset);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        for shard in self.shards.iter() {
            shard.rebind().await;
        }
        Ok(())
    }
}
