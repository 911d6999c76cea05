//! Application boundary and middleware shims.
//!
//! The host framework sees one callable per connection: an [`Application`]
//! invoked with the scope and the two event pipes. Middleware wraps an
//! application and rewrites the scope on the way in — authentication and
//! origin checks live out there, opaque to the runtime.

use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{DownstreamEvent, UpstreamEvent};
use crate::scope::Scope;
use crate::websocket::{run_websocket, WebsocketConsumer};
use crate::ConsumerResult;

/// A connection-handling callable, invoked once per connection.
#[async_trait]
pub trait Application: Send + Sync + 'static {
    async fn call(
        &self,
        scope: Scope,
        upstream: mpsc::Receiver<UpstreamEvent>,
        outbound: mpsc::Sender<DownstreamEvent>,
    ) -> ConsumerResult<()>;
}

/// Adapts a consumer type into an [`Application`]: each connection gets a
/// fresh `C::default()` driven by the WebSocket runtime.
pub struct ConsumerApp<C> {
    _consumer: PhantomData<fn() -> C>,
}

impl<C> ConsumerApp<C> {
    pub fn new() -> Self {
        Self {
            _consumer: PhantomData,
        }
    }
}

impl<C> Default for ConsumerApp<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: WebsocketConsumer + Default> Application for ConsumerApp<C> {
    async fn call(
        &self,
        scope: Scope,
        upstream: mpsc::Receiver<UpstreamEvent>,
        outbound: mpsc::Sender<DownstreamEvent>,
    ) -> ConsumerResult<()> {
        run_websocket(C::default(), scope, upstream, outbound).await
    }
}

/// Rewrites the scope before the inner application runs.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn transform(&self, scope: Scope) -> ConsumerResult<Scope>;
}

/// An application wrapped in an ordered middleware chain.
pub struct MiddlewareStack {
    layers: Vec<Box<dyn Middleware>>,
    inner: Box<dyn Application>,
}

impl MiddlewareStack {
    pub fn new(inner: impl Application) -> Self {
        Self {
            layers: Vec::new(),
            inner: Box::new(inner),
        }
    }

    /// Append a middleware; earlier additions see the scope first.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Box::new(middleware));
        self
    }
}

#[async_trait]
impl Application for MiddlewareStack {
    async fn call(
        &self,
        mut scope: Scope,
        upstream: mpsc::Receiver<UpstreamEvent>,
        outbound: mpsc::Sender<DownstreamEvent>,
    ) -> ConsumerResult<()> {
        for middleware in &self.layers {
            scope = middleware.transform(scope).await?;
        }
        self.inner.call(scope, upstream, outbound).await
    }
}
