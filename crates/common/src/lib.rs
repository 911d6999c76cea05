//! Shared utilities for the wirebus workspace.
//!
//! This crate provides the ambient machinery the layer backends and the
//! consumer runtime lean on:
//! - Retry logic with exponential backoff
//! - The MessagePack payload envelope moved over the wire
//! - Optional symmetric payload encryption with key rotation
//! - Tracing/telemetry bootstrap

pub mod crypto;
pub mod retry;
pub mod serialization;
pub mod telemetry;

// Re-export commonly used types
pub use crypto::PayloadCipher;
pub use retry::{retry_with_backoff, retry_with_predicate, ExponentialBackoff, RetryConfig};
pub use serialization::{decode_payload, encode_payload, DELIVERY_TAG_LEN};
pub use telemetry::init_tracing;
