//! Core abstractions for the wirebus messaging substrate.
//!
//! This crate provides:
//! - Channel and group naming rules and name generation
//! - The `Message` type moved across layers
//! - The `ChannelLayer` trait every backend implements
//! - Shared layer configuration (expiry, capacity, per-pattern overrides)
//! - The process-wide layer registry
//! - An in-memory reference layer used by tests and single-process setups
//!
//! Transport-backed layers (Redis queue, Redis pub/sub) live in
//! `wirebus-redis`; the connection-facing consumer runtime lives in
//! `wirebus-consumer`.

pub mod layer;
pub mod memory;
pub mod message;
pub mod names;
pub mod registry;

// Re-export commonly used types
pub use layer::{CapacityTable, ChannelLayer, LayerConfig, LayerStats, LayerStatsSnapshot};
pub use memory::InMemoryChannelLayer;
pub use message::Message;
pub use names::{
    new_channel_name, new_channel_suffix, non_local_part, valid_channel_name, valid_group_name,
};
pub use registry::{
    get_channel_layer, has_channel_layer, register_channel_layer, try_get_channel_layer,
    unregister_channel_layer, LayerRegistry, DEFAULT_LAYER_ALIAS,
};

/// Result alias used throughout the workspace's layer-facing APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by channel layers and the registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel name failed validation
    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    /// Group name failed validation
    #[error("invalid group name: {0:?}")]
    InvalidGroupName(String),

    /// The per-channel inbox is at capacity; the message was dropped
    #[error("channel {0:?} is over capacity")]
    ChannelFull(String),

    /// Registry lookup miss
    #[error("no channel layer registered under alias {0:?}")]
    NoSuchLayer(String),

    /// Transport-level failure after the retry budget was exhausted
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl Error {
    /// Build a transport error from any displayable source.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Build an encoding error from any displayable source.
    pub fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding(err.to_string())
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
