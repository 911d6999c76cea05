//! WebSocket consumer trait and dispatch runtime.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wirebus_core::registry::{try_get_channel_layer, DEFAULT_LAYER_ALIAS};
use wirebus_core::Message;

use crate::dispatch::{method_name_for, validate_type_name, ConsumerContext, HandlerTable};
use crate::events::{DownstreamEvent, Frame, UpstreamEvent};
use crate::scope::Scope;
use crate::{ConsumerError, ConsumerResult};

/// Upper bound on each group-leave issued during shutdown.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A WebSocket event handler.
///
/// Implementors override the lifecycle callbacks they care about and
/// register layer-message handlers in [`handlers`](Self::handlers). The
/// default `connect` accepts the handshake; raise
/// [`ConsumerError::Deny`] to refuse it.
#[async_trait]
pub trait WebsocketConsumer: Send + 'static {
    /// Groups to join on connect and leave on termination.
    fn groups(&self) -> Vec<String> {
        Vec::new()
    }

    /// Registry alias of the channel layer to bind. Returning `None`, or an
    /// alias with no registration, runs the consumer without a layer.
    fn layer_alias(&self) -> Option<&str> {
        Some(DEFAULT_LAYER_ALIAS)
    }

    /// Client requested the connection.
    async fn connect(&mut self, ctx: &ConsumerContext) -> ConsumerResult<()> {
        ctx.accept(None).await
    }

    /// Client sent a data frame.
    async fn receive(&mut self, _ctx: &ConsumerContext, _frame: Frame) -> ConsumerResult<()> {
        Ok(())
    }

    /// Client went away. The runtime stops the consumer afterwards
    /// regardless of the return value.
    async fn disconnect(&mut self, _ctx: &ConsumerContext, _code: u16) -> ConsumerResult<()> {
        Ok(())
    }

    /// Register handlers for layer message types. Name each handler method
    /// after its dotted type with `.` replaced by `_`:
    ///
    /// ```ignore
    /// impl ChatConsumer {
    ///     fn chat_message<'a>(
    ///         &'a mut self,
    ///         ctx: &'a ConsumerContext,
    ///         message: Message,
    ///     ) -> HandlerFuture<'a> {
    ///         Box::pin(async move { /* ... */ Ok(()) })
    ///     }
    /// }
    ///
    /// fn handlers(table: &mut HandlerTable<Self>) {
    ///     table.route("chat.message", Self::chat_message);
    /// }
    /// ```
    fn handlers(_table: &mut HandlerTable<Self>)
    where
        Self: Sized,
    {
    }
}

/// Drive `consumer` over one connection: `upstream` delivers framework
/// events, `outbound` carries protocol events back.
///
/// The first event must be `websocket.connect`. Once active, the loop races
/// upstream events against layer messages addressed to the consumer's
/// channel name; whichever side completes is handled and the race reissued.
/// Declared groups are joined before the first user callback and left, with
/// a bounded best-effort discard, on every exit path.
pub async fn run_websocket<C: WebsocketConsumer>(
    mut consumer: C,
    scope: Scope,
    mut upstream: mpsc::Receiver<UpstreamEvent>,
    outbound: mpsc::Sender<DownstreamEvent>,
) -> ConsumerResult<()> {
    let layer = consumer.layer_alias().and_then(try_get_channel_layer);
    let groups = consumer.groups();
    for group in &groups {
        if !wirebus_core::names::valid_group_name(group) {
            return Err(wirebus_core::Error::InvalidGroupName(group.clone()).into());
        }
    }
    if !groups.is_empty() && layer.is_none() {
        return Err(ConsumerError::LayerRequired);
    }

    // The connection protocol guarantees connect arrives first; anything
    // else is a framework bug.
    match upstream.recv().await {
        Some(UpstreamEvent::Connect) => {}
        Some(other) => {
            return Err(ConsumerError::Protocol(format!(
                "expected websocket.connect, got {}",
                other.event_type()
            )))
        }
        None => return Ok(()),
    }

    let mut ctx = ConsumerContext::new(scope, layer.clone(), outbound);
    if let Some(layer) = &layer {
        let channel_name = layer.new_channel("specific").await?;
        tracing::debug!(channel = %channel_name, "Consumer bound to channel");
        for group in &groups {
            layer.group_add(group, &channel_name).await?;
        }
        ctx.set_channel_name(channel_name);
    }

    let mut table = HandlerTable::new();
    C::handlers(&mut table);

    let outcome = dispatch_loop(&mut consumer, &ctx, &table, &mut upstream).await;

    // Leave declared groups on every exit path, even abnormal ones.
    if let (Some(layer), Some(channel_name)) = (&layer, ctx.channel_name()) {
        for group in &groups {
            let discard = layer.group_discard(group, channel_name);
            match tokio::time::timeout(CLEANUP_TIMEOUT, discard).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(group = %group, error = %err, "Failed to leave group during shutdown");
                }
                Err(_) => {
                    tracing::warn!(group = %group, "Timed out leaving group during shutdown");
                }
            }
        }
    }

    match outcome {
        Err(ConsumerError::Stop) => Ok(()),
        other => other,
    }
}

/// The dispatch loop proper; returns only by raising. `Stop` is the clean
/// exit, everything else propagates to the caller as an abort.
async fn dispatch_loop<C: WebsocketConsumer>(
    consumer: &mut C,
    ctx: &ConsumerContext,
    table: &HandlerTable<C>,
    upstream: &mut mpsc::Receiver<UpstreamEvent>,
) -> ConsumerResult<()> {
    match consumer.connect(ctx).await {
        Ok(()) => {}
        Err(ConsumerError::Accept) => ctx.accept(None).await?,
        Err(ConsumerError::Deny { code }) => {
            ctx.close(Some(code)).await?;
            return Err(ConsumerError::Stop);
        }
        Err(other) => return Err(other),
    }

    loop {
        match (ctx.channel_layer().cloned(), ctx.channel_name()) {
            (Some(layer), Some(channel_name)) => {
                let channel_name = channel_name.to_string();
                tokio::select! {
                    event = upstream.recv() => {
                        handle_upstream_event(consumer, ctx, event).await?;
                    }
                    message = async move { layer.receive(&channel_name).await } => {
                        dispatch_message(consumer, ctx, table, message?).await?;
                    }
                }
            }
            _ => {
                let event = upstream.recv().await;
                handle_upstream_event(consumer, ctx, event).await?;
            }
        }
    }
}

async fn handle_upstream_event<C: WebsocketConsumer>(
    consumer: &mut C,
    ctx: &ConsumerContext,
    event: Option<UpstreamEvent>,
) -> ConsumerResult<()> {
    match event {
        // The framework cancelled the consumer; unwind cleanly.
        None => Err(ConsumerError::Stop),
        Some(UpstreamEvent::Connect) => Err(ConsumerError::Protocol(
            "duplicate websocket.connect".to_string(),
        )),
        Some(UpstreamEvent::Receive { text, bytes }) => match (text, bytes) {
            (Some(text), None) => consumer.receive(ctx, Frame::Text(text)).await,
            (None, Some(bytes)) => consumer.receive(ctx, Frame::Binary(bytes)).await,
            _ => Err(ConsumerError::Protocol(
                "websocket.receive requires exactly one of text or bytes".to_string(),
            )),
        },
        Some(UpstreamEvent::Disconnect { code }) => {
            // The connection is already gone; a failing handler must not
            // preempt the clean stop and its group cleanup.
            if let Err(err) = consumer.disconnect(ctx, code).await {
                tracing::warn!(error = %err, "Disconnect handler failed");
            }
            Err(ConsumerError::Stop)
        }
    }
}

/// Route one layer message through the handler table.
async fn dispatch_message<C: WebsocketConsumer>(
    consumer: &mut C,
    ctx: &ConsumerContext,
    table: &HandlerTable<C>,
    message: Message,
) -> ConsumerResult<()> {
    let message_type = message
        .message_type()
        .ok_or_else(|| ConsumerError::InvalidMessageType {
            message_type: "<missing>".to_string(),
        })?
        .to_string();
    validate_type_name(&message_type)?;

    match table.lookup(&message_type) {
        Some(handler) => handler(consumer, ctx, message).await,
        None => Err(ConsumerError::NoHandler {
            method_name: method_name_for(&message_type),
            message_type,
        }),
    }
}
