//! Consumer runtime for wirebus.
//!
//! A consumer turns one long-lived connection into an event-driven handler.
//! The runtime speaks two channels at once: framework events arriving from
//! upstream (connect, client frames, disconnect) and layer messages
//! addressed to the consumer's channel name, dispatched to handlers by
//! their dotted `type`. Declared groups are joined before the first user
//! event fires and left before the consumer terminates.

pub mod dispatch;
pub mod events;
pub mod json;
pub mod middleware;
pub mod scope;
pub mod websocket;

// Re-export commonly used types
pub use dispatch::{
    method_name_for, validate_type_name, ConsumerContext, HandlerFuture, HandlerTable,
};
pub use events::{DownstreamEvent, Frame, UpstreamEvent};
pub use json::JsonWebsocketConsumer;
pub use middleware::{Application, ConsumerApp, Middleware, MiddlewareStack};
pub use scope::{Scope, ScopeKind};
pub use websocket::{run_websocket, WebsocketConsumer};

/// Result alias for handler and runtime code.
pub type ConsumerResult<T> = std::result::Result<T, ConsumerError>;

/// Consumer failures and control-flow signals.
///
/// `Stop`, `Deny`, and `Accept` are not failures: handlers raise them to
/// steer the runtime (end the loop, refuse the handshake, force an accept),
/// and the runtime consumes them. Everything else aborts the connection
/// after best-effort group cleanup.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Terminate the dispatch loop cleanly
    #[error("consumer stopped")]
    Stop,

    /// Refuse the connection; the runtime emits `websocket.close`
    #[error("connection denied")]
    Deny { code: u16 },

    /// Explicitly accept the connection from inside `connect`
    #[error("connection accepted")]
    Accept,

    /// An inbound message type has no registered handler
    #[error("no handler for message type {message_type:?} (expected a handler registered as {method_name:?})")]
    NoHandler {
        message_type: String,
        method_name: String,
    },

    /// The message type failed validation
    #[error("invalid message type {message_type:?}")]
    InvalidMessageType { message_type: String },

    /// Groups were declared but no channel layer is registered
    #[error("consumer declares groups but no channel layer is configured")]
    LayerRequired,

    /// The event stream violated the connection protocol
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The upstream side went away mid-send
    #[error("upstream connection closed")]
    UpstreamClosed,

    /// A layer operation failed
    #[error(transparent)]
    Layer(#[from] wirebus_core::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsumerError {
    /// Deny with the normal-closure code.
    pub fn deny() -> Self {
        Self::Deny { code: 1000 }
    }

    /// Whether this variant is a control-flow signal rather than a failure.
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Stop | Self::Deny { .. } | Self::Accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_are_not_failures() {
        assert!(ConsumerError::Stop.is_signal());
        assert!(ConsumerError::deny().is_signal());
        assert!(ConsumerError::Accept.is_signal());
        assert!(!ConsumerError::LayerRequired.is_signal());
        assert!(!ConsumerError::UpstreamClosed.is_signal());
    }

    #[test]
    fn test_no_handler_names_the_expected_method() {
        let err = ConsumerError::NoHandler {
            message_type: "chat.message".into(),
            method_name: "chat_message".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("chat.message"));
        assert!(rendered.contains("chat_message"));
    }
}
