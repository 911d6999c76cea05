//! JSON WebSocket consumer.

use async_trait::async_trait;
use serde_json::Value;

use wirebus_core::registry::DEFAULT_LAYER_ALIAS;

use crate::dispatch::{ConsumerContext, HandlerTable};
use crate::events::Frame;
use crate::websocket::WebsocketConsumer;
use crate::{ConsumerError, ConsumerResult};

/// A WebSocket consumer whose client frames are JSON documents.
///
/// Text frames are decoded before reaching
/// [`receive_json`](Self::receive_json); a decode failure propagates as an
/// unhandled error and aborts the connection. The encode/decode hooks are
/// overridable for alternative JSON conventions. Every implementor is
/// automatically a [`WebsocketConsumer`] through the blanket impl, so do
/// not implement both traits for one type.
#[async_trait]
pub trait JsonWebsocketConsumer: Send + 'static {
    /// Groups to join on connect and leave on termination.
    fn groups(&self) -> Vec<String> {
        Vec::new()
    }

    /// Registry alias of the channel layer to bind.
    fn layer_alias(&self) -> Option<&str> {
        Some(DEFAULT_LAYER_ALIAS)
    }

    /// Client requested the connection.
    async fn connect(&mut self, ctx: &ConsumerContext) -> ConsumerResult<()> {
        ctx.accept(None).await
    }

    /// Client sent a JSON document.
    async fn receive_json(&mut self, ctx: &ConsumerContext, content: Value) -> ConsumerResult<()>;

    /// Client went away.
    async fn disconnect(&mut self, _ctx: &ConsumerContext, _code: u16) -> ConsumerResult<()> {
        Ok(())
    }

    /// Register handlers for layer message types.
    fn handlers(_table: &mut HandlerTable<Self>)
    where
        Self: Sized,
    {
    }

    /// Decode one inbound text frame.
    fn decode_json(text: &str) -> ConsumerResult<Value>
    where
        Self: Sized,
    {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode one outbound document.
    fn encode_json(content: &Value) -> ConsumerResult<String>
    where
        Self: Sized,
    {
        Ok(serde_json::to_string(content)?)
    }

    /// Send a JSON document to the client as a text frame.
    async fn send_json(&self, ctx: &ConsumerContext, content: &Value) -> ConsumerResult<()>
    where
        Self: Sized,
    {
        ctx.send_text(Self::encode_json(content)?).await
    }
}

#[async_trait]
impl<T: JsonWebsocketConsumer> WebsocketConsumer for T {
    fn groups(&self) -> Vec<String> {
        JsonWebsocketConsumer::groups(self)
    }

    fn layer_alias(&self) -> Option<&str> {
        JsonWebsocketConsumer::layer_alias(self)
    }

    async fn connect(&mut self, ctx: &ConsumerContext) -> ConsumerResult<()> {
        JsonWebsocketConsumer::connect(self, ctx).await
    }

    async fn receive(&mut self, ctx: &ConsumerContext, frame: Frame) -> ConsumerResult<()> {
        match frame {
            Frame::Text(text) => {
                let content = Self::decode_json(&text)?;
                self.receive_json(ctx, content).await
            }
            Frame::Binary(_) => Err(ConsumerError::Protocol(
                "JSON consumer received a binary frame".to_string(),
            )),
        }
    }

    async fn disconnect(&mut self, ctx: &ConsumerContext, code: u16) -> ConsumerResult<()> {
        JsonWebsocketConsumer::disconnect(self, ctx, code).await
    }

    fn handlers(table: &mut HandlerTable<Self>) {
        <T as JsonWebsocketConsumer>::handlers(table);
    }
}
