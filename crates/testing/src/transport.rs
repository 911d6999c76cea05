//! In-process transport pair driving a consumer under test.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wirebus_consumer::{
    run_websocket, ConsumerResult, DownstreamEvent, Scope, UpstreamEvent, WebsocketConsumer,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Plays the host framework's side of a connection: feeds upstream events
/// to a spawned consumer and observes what it emits.
pub struct TestClient {
    upstream: mpsc::Sender<UpstreamEvent>,
    downstream: mpsc::Receiver<DownstreamEvent>,
    runtime: JoinHandle<ConsumerResult<()>>,
}

impl TestClient {
    /// Spawn `consumer` under the WebSocket runtime.
    pub fn start<C: WebsocketConsumer>(consumer: C, scope: Scope) -> Self {
        let (upstream, upstream_rx) = mpsc::channel(16);
        let (downstream_tx, downstream) = mpsc::channel(16);
        let runtime = tokio::spawn(run_websocket(consumer, scope, upstream_rx, downstream_tx));
        Self {
            upstream,
            downstream,
            runtime,
        }
    }

    /// Deliver one upstream event.
    pub async fn send_event(&self, event: UpstreamEvent) {
        self.upstream.send(event).await.expect("consumer is gone");
    }

    /// Open the connection and assert the consumer accepts it.
    pub async fn handshake(&mut self) {
        self.send_event(UpstreamEvent::Connect).await;
        match self.next_event().await {
            Some(DownstreamEvent::Accept { .. }) => {}
            other => panic!("expected websocket.accept, got {other:?}"),
        }
    }

    /// Deliver a client text frame.
    pub async fn send_text(&self, text: impl Into<String>) {
        self.send_event(UpstreamEvent::text(text)).await;
    }

    /// Deliver a client binary frame.
    pub async fn send_binary(&self, bytes: impl Into<Vec<u8>>) {
        self.send_event(UpstreamEvent::binary(bytes)).await;
    }

    /// Deliver a disconnect.
    pub async fn disconnect(&self, code: u16) {
        self.send_event(UpstreamEvent::Disconnect { code }).await;
    }

    /// Next outbound event, or `None` when the consumer closed its side
    /// or stayed silent past the timeout.
    pub async fn next_event(&mut self) -> Option<DownstreamEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.downstream.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert the next outbound event is a text frame and return it.
    pub async fn expect_text(&mut self) -> String {
        match self.next_event().await {
            Some(DownstreamEvent::Send {
                text: Some(text), ..
            }) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Assert the next outbound event is a close and return its code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        match self.next_event().await {
            Some(DownstreamEvent::Close { code }) => code,
            other => panic!("expected websocket.close, got {other:?}"),
        }
    }

    /// Drop the upstream side and wait for the consumer to finish.
    pub async fn finish(self) -> ConsumerResult<()> {
        drop(self.upstream);
        tokio::time::timeout(EVENT_TIMEOUT, self.runtime)
            .await
            .expect("consumer did not finish in time")
            .expect("consumer task panicked")
    }
}
