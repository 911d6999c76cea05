//! Testing utilities for wirebus.
//!
//! This crate provides:
//! - [`TestClient`] — drives a consumer the way a host framework would,
//!   with assertion helpers over the outbound event stream
//! - Layer fixtures that install uniquely-aliased in-memory layers in the
//!   process registry so parallel tests never collide
//! - Message builders for common payload shapes
//!
//! # Examples
//!
//! ```ignore
//! use wirebus_testing::{install_memory_layer, TestClient};
//!
//! let (alias, layer) = install_memory_layer();
//! let mut client = TestClient::start(MyConsumer::new(alias), Scope::websocket("/ws/"));
//! client.handshake().await;
//! ```

pub mod builders;
pub mod fixtures;
pub mod transport;

// Re-export commonly used types
pub use builders::{chat_message, message_of_type};
pub use fixtures::{install_memory_layer, memory_layer, unique_alias};
pub use transport::TestClient;

// Re-export testing dependencies for convenience
pub use fake;
pub use proptest;
pub use testcontainers;
