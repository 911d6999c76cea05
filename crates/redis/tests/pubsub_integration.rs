//! Pub/sub layer integration tests.
//!
//! These tests require a running Redis instance (REDIS_URL, default
//! redis://localhost:6379) and are disabled by default; run with --ignored.

use std::time::Duration;

use wirebus_core::{ChannelLayer, Message};
use wirebus_redis::{RedisPubSubConfig, RedisPubSubLayer};
use wirebus_testing::unique_alias;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn test_config() -> RedisPubSubConfig {
    RedisPubSubConfig::single(redis_url()).with_prefix(unique_alias())
}

/// Subscriptions propagate asynchronously; give the subscriber worker a
/// moment before publishing.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
#[ignore]
async fn send_reaches_attached_channel() {
    let layer = RedisPubSubLayer::new(test_config()).await.unwrap();
    let channel = layer.new_channel("specific").await.unwrap();
    settle().await;

    layer
        .send(&channel, Message::new("tick").with("seq", 1))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), layer.receive(&channel))
        .await
        .expect("frame not delivered")
        .unwrap();
    assert_eq!(received.message_type(), Some("tick"));

    layer.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn group_fan_out_across_processes() {
    // Two layer handles model two processes; a third publishes.
    let config = test_config();
    let process_a = RedisPubSubLayer::new(config.clone()).await.unwrap();
    let process_b = RedisPubSubLayer::new(config.clone()).await.unwrap();
    let publisher = RedisPubSubLayer::new(config).await.unwrap();

    let chan_a = process_a.new_channel("specific").await.unwrap();
    let chan_b = process_b.new_channel("specific").await.unwrap();
    process_a.group_add("live", &chan_a).await.unwrap();
    process_b.group_add("live", &chan_b).await.unwrap();
    settle().await;

    publisher
        .group_send("live", Message::new("score.update").with("value", 42))
        .await
        .unwrap();

    for (layer, channel) in [(&process_a, &chan_a), (&process_b, &chan_b)] {
        let received = tokio::time::timeout(Duration::from_secs(5), layer.receive(channel))
            .await
            .expect("frame not delivered")
            .unwrap();
        assert_eq!(received.message_type(), Some("score.update"));
    }

    process_a.close().await.unwrap();
    process_b.close().await.unwrap();
    publisher.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn discarded_member_stops_receiving() {
    let layer = RedisPubSubLayer::new(test_config()).await.unwrap();
    let channel = layer.new_channel("specific").await.unwrap();

    layer.group_add("live", &channel).await.unwrap();
    settle().await;
    layer.group_discard("live", &channel).await.unwrap();
    settle().await;

    layer
        .group_send("live", Message::new("tick"))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(500), layer.receive(&channel)).await;
    assert!(outcome.is_err());

    layer.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn publish_without_subscriber_is_lost_by_design() {
    let config = test_config();
    let publisher = RedisPubSubLayer::new(config.clone()).await.unwrap();

    // Nobody is subscribed yet; this frame evaporates.
    publisher
        .send("specific.nobody!home", Message::new("tick"))
        .await
        .unwrap();

    let subscriber = RedisPubSubLayer::new(config).await.unwrap();
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        subscriber.receive("specific.nobody!home"),
    )
    .await;
    assert!(outcome.is_err());

    publisher.close().await.unwrap();
    subscriber.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn health_check_reports_reachable() {
    let layer = RedisPubSubLayer::new(test_config()).await.unwrap();
    let health = layer.health_check().await;
    assert!(health.healthy, "unexpected: {:?}", health.error);
    layer.close().await.unwrap();
}
