//! Message-type routing.
//!
//! Layer messages carry a dotted `type` (`chat.message`). Each consumer
//! registers a handler per type in a [`HandlerTable`] built once when the
//! runtime starts; dispatch is a plain table lookup, and an unknown type
//! terminates the consumer. By convention the handler method is named after
//! the type with dots replaced by underscores (`chat.message` →
//! `chat_message`), and underscore-prefixed methods are never routable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use wirebus_core::{ChannelLayer, Message};

use crate::events::DownstreamEvent;
use crate::scope::Scope;
use crate::{ConsumerError, ConsumerResult};

/// Check a dotted message type: ASCII letters, digits, `_` and `-` in
/// non-empty segments joined by single dots.
pub fn validate_type_name(message_type: &str) -> ConsumerResult<()> {
    let well_formed = !message_type.is_empty()
        && !message_type.starts_with('.')
        && !message_type.ends_with('.')
        && message_type.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        });

    if well_formed {
        Ok(())
    } else {
        Err(ConsumerError::InvalidMessageType {
            message_type: message_type.to_string(),
        })
    }
}

/// The handler method name a dotted type maps to.
pub fn method_name_for(message_type: &str) -> String {
    message_type.replace('.', "_")
}

/// A boxed handler future borrowing the consumer for one dispatch.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ConsumerResult<()>> + Send + 'a>>;

/// One registered handler.
pub type Handler<C> = for<'a> fn(&'a mut C, &'a ConsumerContext, Message) -> HandlerFuture<'a>;

/// Eagerly-built routing table from dotted type to handler.
pub struct HandlerTable<C> {
    entries: HashMap<String, Handler<C>>,
}

impl<C> HandlerTable<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `handler` for `message_type`.
    ///
    /// # Panics
    ///
    /// Panics on a malformed or underscore-prefixed type; registration
    /// happens once at startup and a bad type there is a programming error.
    pub fn route(&mut self, message_type: &str, handler: Handler<C>) -> &mut Self {
        assert!(
            validate_type_name(message_type).is_ok(),
            "malformed message type {message_type:?}"
        );
        assert!(
            !message_type.starts_with('_'),
            "handlers for underscore-prefixed types are not dispatchable"
        );
        self.entries.insert(message_type.to_string(), handler);
        self
    }

    /// Look up the handler for `message_type`.
    pub fn lookup(&self, message_type: &str) -> Option<Handler<C>> {
        self.entries.get(message_type).copied()
    }

    /// Registered types, for diagnostics.
    pub fn types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl<C> Default for HandlerTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime handle passed to every consumer callback: the scope, the bound
/// layer and channel name, and the outbound event pipe.
pub struct ConsumerContext {
    scope: Scope,
    layer: Option<Arc<dyn ChannelLayer>>,
    channel_name: Option<String>,
    outbound: mpsc::Sender<DownstreamEvent>,
}

impl ConsumerContext {
    pub(crate) fn new(
        scope: Scope,
        layer: Option<Arc<dyn ChannelLayer>>,
        outbound: mpsc::Sender<DownstreamEvent>,
    ) -> Self {
        Self {
            scope,
            layer,
            channel_name: None,
            outbound,
        }
    }

    pub(crate) fn set_channel_name(&mut self, channel_name: String) {
        self.channel_name = Some(channel_name);
    }

    /// The connection's scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The channel layer this consumer is bound to, if any.
    pub fn channel_layer(&self) -> Option<&Arc<dyn ChannelLayer>> {
        self.layer.as_ref()
    }

    /// The channel name owned by this consumer, once the layer handed one out.
    pub fn channel_name(&self) -> Option<&str> {
        self.channel_name.as_deref()
    }

    /// Emit a raw protocol event upstream.
    pub async fn emit(&self, event: DownstreamEvent) -> ConsumerResult<()> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ConsumerError::UpstreamClosed)
    }

    /// Complete the WebSocket handshake.
    pub async fn accept(&self, subprotocol: Option<String>) -> ConsumerResult<()> {
        self.emit(DownstreamEvent::Accept { subprotocol }).await
    }

    /// Close the connection.
    pub async fn close(&self, code: Option<u16>) -> ConsumerResult<()> {
        self.emit(DownstreamEvent::Close { code }).await
    }

    /// Send a text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> ConsumerResult<()> {
        self.emit(DownstreamEvent::Send {
            text: Some(text.into()),
            bytes: None,
        })
        .await
    }

    /// Send a binary frame to the client.
    pub async fn send_bytes(&self, bytes: impl Into<Vec<u8>>) -> ConsumerResult<()> {
        self.emit(DownstreamEvent::Send {
            text: None,
            bytes: Some(bytes.into()),
        })
        .await
    }

    /// Fan a message out to a group on the bound layer.
    pub async fn group_send(&self, group: &str, message: Message) -> ConsumerResult<()> {
        match &self.layer {
            Some(layer) => Ok(layer.group_send(group, message).await?),
            None => Err(ConsumerError::LayerRequired),
        }
    }

    /// Send a message to a single channel on the bound layer.
    pub async fn channel_send(&self, channel: &str, message: Message) -> ConsumerResult<()> {
        match &self.layer {
            Some(layer) => Ok(layer.send(channel, message).await?),
            None => Err(ConsumerError::LayerRequired),
        }
    }
}
