//! In-memory channel layer.
//!
//! Single-process reference implementation: bounded per-channel queues and
//! in-process group tables. Used by the test suite and by deployments that
//! do not need cross-process delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::layer::{CapacityTable, ChannelLayer, LayerConfig, LayerStats, LayerStatsSnapshot};
use crate::message::Message;
use crate::names::{new_channel_name, require_valid_channel_name, require_valid_group_name};
use crate::{Error, Result};

/// One channel's pending messages plus its wake primitive.
#[derive(Default)]
struct ChannelState {
    queue: VecDeque<(Instant, Message)>,
    notify: Arc<Notify>,
}

impl ChannelState {
    /// Drop expired messages from the head of the queue.
    fn evict_expired(&mut self, now: Instant, stats: &LayerStats) {
        while matches!(self.queue.front(), Some((expires_at, _)) if *expires_at <= now) {
            self.queue.pop_front();
            stats.record_dropped_expired();
        }
    }
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, ChannelState>,
    // group -> channel -> membership timestamp
    groups: HashMap<String, HashMap<String, Instant>>,
}

/// Bounded in-process channel layer.
pub struct InMemoryChannelLayer {
    config: LayerConfig,
    capacity: CapacityTable,
    stats: LayerStats,
    inner: Mutex<Inner>,
}

impl InMemoryChannelLayer {
    pub fn new(config: LayerConfig) -> Self {
        let capacity = CapacityTable::from_config(&config);
        Self {
            config,
            capacity,
            stats: LayerStats::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Counters snapshot, for diagnostics and tests.
    pub fn stats(&self) -> LayerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current (non-expired) members of `group`, for diagnostics and tests.
    pub fn group_members(&self, group: &str) -> Vec<String> {
        let mut members = self.live_members(group);
        members.sort();
        members
    }

    /// Current members of `group`, dropping expired memberships in place.
    fn live_members(&self, group: &str) -> Vec<String> {
        let now = Instant::now();
        let group_expiry = self.config.group_expiry;
        let mut inner = self.inner.lock();
        let Some(members) = inner.groups.get_mut(group) else {
            return Vec::new();
        };
        members.retain(|_, joined_at| now.duration_since(*joined_at) < group_expiry);
        members.keys().cloned().collect()
    }
}

impl Default for InMemoryChannelLayer {
    fn default() -> Self {
        Self::new(LayerConfig::default())
    }
}

#[async_trait]
impl ChannelLayer for InMemoryChannelLayer {
    async fn new_channel(&self, prefix: &str) -> Result<String> {
        let name = new_channel_name(prefix);
        require_valid_channel_name(&name)?;
        Ok(name)
    }

    async fn send(&self, channel: &str, message: Message) -> Result<()> {
        require_valid_channel_name(channel)?;

        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = inner.channels.entry(channel.to_string()).or_default();
        state.evict_expired(now, &self.stats);

        if state.queue.len() >= self.capacity.capacity_for(channel) {
            self.stats.record_dropped_full();
            return Err(Error::ChannelFull(channel.to_string()));
        }

        state.queue.push_back((now + self.config.expiry, message));
        state.notify.notify_one();
        self.stats.record_sent();
        Ok(())
    }

    async fn receive(&self, channel: &str) -> Result<Message> {
        require_valid_channel_name(channel)?;

        loop {
            let notify = {
                let now = Instant::now();
                let mut inner = self.inner.lock();
                let state = inner.channels.entry(channel.to_string()).or_default();
                state.evict_expired(now, &self.stats);

                if let Some((_, message)) = state.queue.pop_front() {
                    self.stats.record_received();
                    return Ok(message);
                }
                state.notify.clone()
            };

            notify.notified().await;
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        let mut inner = self.inner.lock();
        inner
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(channel.to_string(), Instant::now());
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<()> {
        require_valid_group_name(group)?;
        require_valid_channel_name(channel)?;

        let mut inner = self.inner.lock();
        if let Some(members) = inner.groups.get_mut(group) {
            members.remove(channel);
            if members.is_empty() {
                inner.groups.remove(group);
            }
        }
        Ok(())
    }

    async fn group_send(&self, group: &str, message: Message) -> Result<()> {
        require_valid_group_name(group)?;

        for channel in self.live_members(group) {
            match self.send(&channel, message.clone()).await {
                Ok(()) => {}
                Err(Error::ChannelFull(channel)) => {
                    tracing::debug!(group = %group, channel = %channel, "Dropping group message for full channel");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.channels.clear();
        inner.groups.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn layer() -> InMemoryChannelLayer {
        InMemoryChannelLayer::default()
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let layer = layer();
        let message = Message::new("chat.message").with("text", "hi");

        layer.send("test-channel", message.clone()).await.unwrap();
        let received = layer.receive("test-channel").await.unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_send_to_unknown_channel_is_lazy() {
        let layer = layer();
        // No receiver ever attached; the inbox is created on demand.
        layer
            .send("never-read", Message::new("noop"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let layer = layer();
        for i in 0..5 {
            layer
                .send("ordered", Message::new("tick").with("seq", i))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let message = layer.receive("ordered").await.unwrap();
            assert_eq!(message.get("seq"), Some(&serde_json::json!(i)));
        }
    }

    #[tokio::test]
    async fn test_capacity_is_a_hard_bound() {
        let layer = InMemoryChannelLayer::new(LayerConfig::default().with_capacity(2));

        layer.send("full", Message::new("a")).await.unwrap();
        layer.send("full", Message::new("b")).await.unwrap();
        match layer.send("full", Message::new("c")).await {
            Err(Error::ChannelFull(channel)) => assert_eq!(channel, "full"),
            other => panic!("expected ChannelFull, got {other:?}"),
        }
        assert_eq!(layer.stats().dropped_full, 1);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let layer = Arc::new(layer());
        let receiver = {
            let layer = layer.clone();
            tokio::spawn(async move { layer.receive("wake").await })
        };

        // Give the receiver a chance to park first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        layer.send("wake", Message::new("ping")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received.message_type(), Some("ping"));
    }

    #[tokio::test]
    async fn test_expired_messages_are_discarded() {
        let layer = InMemoryChannelLayer::new(
            LayerConfig::default().with_expiry(Duration::from_millis(10)),
        );
        layer.send("stale", Message::new("old")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The expired message must not be delivered; receive should park.
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), layer.receive("stale")).await;
        assert!(outcome.is_err());
        assert_eq!(layer.stats().dropped_expired, 1);
    }

    #[tokio::test]
    async fn test_group_send_fans_out() {
        let layer = layer();
        layer.group_add("room", "chan-a").await.unwrap();
        layer.group_add("room", "chan-b").await.unwrap();

        layer
            .group_send("room", Message::new("chat.message").with("text", "hello"))
            .await
            .unwrap();

        assert_eq!(
            layer.receive("chan-a").await.unwrap().message_type(),
            Some("chat.message")
        );
        assert_eq!(
            layer.receive("chan-b").await.unwrap().message_type(),
            Some("chat.message")
        );
    }

    #[tokio::test]
    async fn test_group_discard_stops_delivery() {
        let layer = layer();
        layer.group_add("room", "chan-a").await.unwrap();
        layer.group_discard("room", "chan-a").await.unwrap();

        layer.group_send("room", Message::new("noop")).await.unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), layer.receive("chan-a")).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_group_membership_is_set_semantics() {
        let layer = layer();
        layer.group_add("room", "chan-a").await.unwrap();
        layer.group_add("room", "chan-a").await.unwrap();

        layer.group_send("room", Message::new("once")).await.unwrap();
        layer.receive("chan-a").await.unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), layer.receive("chan-a")).await;
        assert!(outcome.is_err(), "duplicate membership delivered twice");
    }

    #[tokio::test]
    async fn test_group_send_survives_full_member() {
        let layer = InMemoryChannelLayer::new(LayerConfig::default().with_capacity(1));
        layer.group_add("room", "full-member").await.unwrap();
        layer.group_add("room", "healthy").await.unwrap();
        layer.send("full-member", Message::new("filler")).await.unwrap();

        // The saturated member is skipped; the other still gets the message.
        layer.group_send("room", Message::new("fanout")).await.unwrap();
        assert_eq!(
            layer.receive("healthy").await.unwrap().message_type(),
            Some("fanout")
        );
    }

    #[tokio::test]
    async fn test_group_send_without_members_is_noop() {
        let layer = layer();
        layer.group_send("empty", Message::new("noop")).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_channel_names_validate() {
        let layer = layer();
        let name = layer.new_channel("specific").await.unwrap();
        assert!(crate::names::valid_channel_name(&name));
        assert!(name.starts_with("specific."));
    }

    #[tokio::test]
    async fn test_flush_discards_everything() {
        let layer = layer();
        layer.send("chan", Message::new("noop")).await.unwrap();
        layer.group_add("room", "chan").await.unwrap();

        layer.flush().await.unwrap();

        layer.group_send("room", Message::new("after")).await.unwrap();
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), layer.receive("chan")).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let layer = layer();
        assert!(matches!(
            layer.send("bad channel", Message::new("x")).await,
            Err(Error::InvalidChannelName(_))
        ));
        assert!(matches!(
            layer.group_add("bad!group", "chan").await,
            Err(Error::InvalidGroupName(_))
        ));
    }
}
