//! End-to-end tests of the WebSocket runtime over the in-memory layer.

use async_trait::async_trait;
use serde_json::Value;

use wirebus_consumer::{
    ConsumerContext, ConsumerError, ConsumerResult, Frame, HandlerFuture, HandlerTable,
    JsonWebsocketConsumer, Scope, UpstreamEvent, WebsocketConsumer,
};
use wirebus_core::{ChannelLayer, Message};
use wirebus_testing::{chat_message, install_memory_layer, message_of_type, unique_alias, TestClient};

/// Layer-less consumer that echoes text frames back.
#[derive(Default)]
struct EchoConsumer;

#[async_trait]
impl WebsocketConsumer for EchoConsumer {
    fn layer_alias(&self) -> Option<&str> {
        None
    }

    async fn receive(&mut self, ctx: &ConsumerContext, frame: Frame) -> ConsumerResult<()> {
        match frame {
            Frame::Text(text) => ctx.send_text(format!("echo: {text}")).await,
            Frame::Binary(bytes) => ctx.send_bytes(bytes).await,
        }
    }
}

/// Room-chat consumer: joins one group and relays `chat.message` payloads
/// to its client.
struct ChatConsumer {
    alias: String,
    room: String,
}

impl ChatConsumer {
    fn chat_message<'a>(
        &'a mut self,
        ctx: &'a ConsumerContext,
        message: Message,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let text = message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ctx.send_text(text).await
        })
    }
}

#[async_trait]
impl WebsocketConsumer for ChatConsumer {
    fn groups(&self) -> Vec<String> {
        vec![self.room.clone()]
    }

    fn layer_alias(&self) -> Option<&str> {
        Some(&self.alias)
    }

    async fn receive(&mut self, ctx: &ConsumerContext, frame: Frame) -> ConsumerResult<()> {
        if let Frame::Text(text) = frame {
            ctx.group_send(&self.room, chat_message(text)).await?;
        }
        Ok(())
    }

    fn handlers(table: &mut HandlerTable<Self>) {
        table.route("chat.message", Self::chat_message);
    }
}

/// Consumer that refuses every handshake.
#[derive(Default)]
struct Gatekeeper;

#[async_trait]
impl WebsocketConsumer for Gatekeeper {
    fn layer_alias(&self) -> Option<&str> {
        None
    }

    async fn connect(&mut self, _ctx: &ConsumerContext) -> ConsumerResult<()> {
        Err(ConsumerError::Deny { code: 4403 })
    }
}

/// Group member with no layer-message handlers registered.
struct Deaf {
    alias: String,
}

#[async_trait]
impl WebsocketConsumer for Deaf {
    fn groups(&self) -> Vec<String> {
        vec!["deaf_room".to_string()]
    }

    fn layer_alias(&self) -> Option<&str> {
        Some(&self.alias)
    }
}

/// Consumer whose disconnect callback always fails.
#[derive(Default)]
struct FailingFarewell;

#[async_trait]
impl WebsocketConsumer for FailingFarewell {
    fn layer_alias(&self) -> Option<&str> {
        None
    }

    async fn disconnect(&mut self, _ctx: &ConsumerContext, _code: u16) -> ConsumerResult<()> {
        Err(ConsumerError::Protocol("farewell failed".to_string()))
    }
}

#[derive(Default)]
struct JsonEcho;

#[async_trait]
impl JsonWebsocketConsumer for JsonEcho {
    fn layer_alias(&self) -> Option<&str> {
        None
    }

    async fn receive_json(&mut self, ctx: &ConsumerContext, content: Value) -> ConsumerResult<()> {
        self.send_json(ctx, &serde_json::json!({ "echo": content }))
            .await
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let mut client = TestClient::start(EchoConsumer, Scope::websocket("/ws/echo/"));
    client.handshake().await;

    client.send_text("hi").await;
    assert_eq!(client.expect_text().await, "echo: hi");

    client.disconnect(1000).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn group_message_reaches_consumer() {
    let (alias, layer) = install_memory_layer();
    let consumer = ChatConsumer {
        alias,
        room: "room_general".to_string(),
    };
    let mut client = TestClient::start(consumer, Scope::websocket("/ws/chat/"));
    client.handshake().await;

    // Another process would do exactly this against its own layer handle.
    layer
        .group_send("room_general", chat_message("hello"))
        .await
        .unwrap();

    assert_eq!(client.expect_text().await, "hello");
    client.disconnect(1000).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn groups_joined_on_connect_and_left_on_disconnect() {
    let (alias, layer) = install_memory_layer();
    let consumer = ChatConsumer {
        alias,
        room: "room_joined".to_string(),
    };
    let mut client = TestClient::start(consumer, Scope::websocket("/ws/chat/"));
    client.handshake().await;

    let members = layer.group_members("room_joined");
    assert_eq!(members.len(), 1);
    assert!(members[0].starts_with("specific."));

    client.disconnect(1000).await;
    client.finish().await.unwrap();
    assert!(layer.group_members("room_joined").is_empty());
}

#[tokio::test]
async fn client_frames_fan_out_through_the_group() {
    let (alias, _layer) = install_memory_layer();
    let room = "room_fanout".to_string();

    let mut alice = TestClient::start(
        ChatConsumer {
            alias: alias.clone(),
            room: room.clone(),
        },
        Scope::websocket("/ws/chat/"),
    );
    let mut bob = TestClient::start(
        ChatConsumer { alias, room },
        Scope::websocket("/ws/chat/"),
    );
    alice.handshake().await;
    bob.handshake().await;

    alice.send_text("hello room").await;

    // Both members get the relayed payload, the sender included.
    assert_eq!(alice.expect_text().await, "hello room");
    assert_eq!(bob.expect_text().await, "hello room");

    alice.disconnect(1000).await;
    bob.disconnect(1000).await;
    alice.finish().await.unwrap();
    bob.finish().await.unwrap();
}

#[tokio::test]
async fn upstream_and_layer_events_interleave() {
    let (alias, layer) = install_memory_layer();
    let consumer = ChatConsumer {
        alias,
        room: "room_mix".to_string(),
    };
    let mut client = TestClient::start(consumer, Scope::websocket("/ws/chat/"));
    client.handshake().await;

    layer
        .group_send("room_mix", chat_message("from layer"))
        .await
        .unwrap();
    assert_eq!(client.expect_text().await, "from layer");

    client.send_text("from client").await;
    assert_eq!(client.expect_text().await, "from client");

    layer
        .group_send("room_mix", chat_message("layer again"))
        .await
        .unwrap();
    assert_eq!(client.expect_text().await, "layer again");

    client.disconnect(1000).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn failing_disconnect_still_stops_cleanly() {
    let mut client = TestClient::start(FailingFarewell, Scope::websocket("/ws/flaky/"));
    client.handshake().await;

    client.disconnect(1001).await;
    // The handler error is logged, not surfaced; the stop stays clean.
    client.finish().await.unwrap();
}

#[tokio::test]
async fn denied_connection_closes_with_code() {
    let mut client = TestClient::start(Gatekeeper, Scope::websocket("/ws/private/"));
    client.send_event(UpstreamEvent::Connect).await;

    assert_eq!(client.expect_close().await, Some(4403));
    // Denial is a clean stop, not a failure.
    client.finish().await.unwrap();
}

#[tokio::test]
async fn unhandled_message_type_terminates_the_consumer() {
    let (alias, layer) = install_memory_layer();
    let mut client = TestClient::start(Deaf { alias }, Scope::websocket("/ws/deaf/"));
    client.handshake().await;

    layer
        .group_send("deaf_room", message_of_type("mystery.event"))
        .await
        .unwrap();

    let outcome = client.finish().await;
    match outcome {
        Err(ConsumerError::NoHandler { message_type, .. }) => {
            assert_eq!(message_type, "mystery.event");
        }
        other => panic!("expected NoHandler, got {other:?}"),
    }
    // Groups are left even on abnormal exit.
    assert!(layer.group_members("deaf_room").is_empty());
}

#[tokio::test]
async fn malformed_message_type_is_rejected() {
    let (alias, layer) = install_memory_layer();
    let mut client = TestClient::start(Deaf { alias }, Scope::websocket("/ws/deaf/"));
    client.handshake().await;

    layer
        .group_send("deaf_room", message_of_type("bad.type."))
        .await
        .unwrap();

    match client.finish().await {
        Err(ConsumerError::InvalidMessageType { message_type }) => {
            assert_eq!(message_type, "bad.type.");
        }
        other => panic!("expected InvalidMessageType, got {other:?}"),
    }
}

#[tokio::test]
async fn declared_groups_without_a_layer_fail_fast() {
    let consumer = Deaf {
        alias: unique_alias(), // never registered
    };
    let client = TestClient::start(consumer, Scope::websocket("/ws/deaf/"));

    match client.finish().await {
        Err(ConsumerError::LayerRequired) => {}
        other => panic!("expected LayerRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn json_consumer_round_trips_documents() {
    let mut client = TestClient::start(JsonEcho, Scope::websocket("/ws/json/"));
    client.handshake().await;

    client.send_text(r#"{"n": 3}"#).await;
    let reply: Value = serde_json::from_str(&client.expect_text().await).unwrap();
    assert_eq!(reply, serde_json::json!({"echo": {"n": 3}}));

    client.disconnect(1000).await;
    client.finish().await.unwrap();
}

#[tokio::test]
async fn json_decode_failure_aborts_the_consumer() {
    let mut client = TestClient::start(JsonEcho, Scope::websocket("/ws/json/"));
    client.handshake().await;

    client.send_text("{not json").await;
    match client.finish().await {
        Err(ConsumerError::Json(_)) => {}
        other => panic!("expected Json error, got {other:?}"),
    }
}

#[tokio::test]
async fn binary_frame_to_json_consumer_is_a_protocol_error() {
    let mut client = TestClient::start(JsonEcho, Scope::websocket("/ws/json/"));
    client.handshake().await;

    client.send_binary(vec![0x01, 0x02]).await;
    match client.finish().await {
        Err(ConsumerError::Protocol(_)) => {}
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn first_event_must_be_connect() {
    let client = TestClient::start(EchoConsumer, Scope::websocket("/ws/echo/"));
    client.send_event(UpstreamEvent::Disconnect { code: 1000 }).await;

    match client.finish().await {
        Err(ConsumerError::Protocol(detail)) => {
            assert!(detail.contains("websocket.connect"));
        }
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn vanishing_upstream_before_connect_is_clean() {
    let client = TestClient::start(EchoConsumer, Scope::websocket("/ws/echo/"));
    client.finish().await.unwrap();
}
