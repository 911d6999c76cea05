//! Process-wide registry of named channel layers.
//!
//! Applications register layer instances under short alias strings at
//! startup; consumers and background workers look them up by alias. The
//! registry is plain mutable state behind a lock — mutation after startup
//! works but is discouraged, and each process (web, worker) must repeat its
//! own registration.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::layer::ChannelLayer;
use crate::{Error, Result};

/// The alias consumers resolve when they do not name one explicitly.
pub const DEFAULT_LAYER_ALIAS: &str = "default";

/// A named mapping from alias to layer instance.
#[derive(Default)]
pub struct LayerRegistry {
    layers: RwLock<HashMap<String, Arc<dyn ChannelLayer>>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `layer` under `alias`, replacing any previous registration.
    pub fn register(&self, alias: impl Into<String>, layer: Arc<dyn ChannelLayer>) {
        let alias = alias.into();
        let replaced = self.layers.write().insert(alias.clone(), layer).is_some();
        tracing::debug!(alias = %alias, replaced, "Channel layer registered");
    }

    /// Look up the layer registered under `alias`.
    pub fn get(&self, alias: &str) -> Result<Arc<dyn ChannelLayer>> {
        self.try_get(alias)
            .ok_or_else(|| Error::NoSuchLayer(alias.to_string()))
    }

    /// Look up `alias`, returning `None` on a miss.
    pub fn try_get(&self, alias: &str) -> Option<Arc<dyn ChannelLayer>> {
        self.layers.read().get(alias).cloned()
    }

    /// Remove the registration for `alias`, returning the layer if present.
    pub fn unregister(&self, alias: &str) -> Option<Arc<dyn ChannelLayer>> {
        self.layers.write().remove(alias)
    }

    /// Whether `alias` is registered.
    pub fn has(&self, alias: &str) -> bool {
        self.layers.read().contains_key(alias)
    }

    /// Currently registered aliases, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.layers.read().keys().cloned().collect()
    }
}

static GLOBAL: Lazy<LayerRegistry> = Lazy::new(LayerRegistry::new);

/// Register `layer` under `alias` in the process-wide registry.
pub fn register_channel_layer(alias: impl Into<String>, layer: Arc<dyn ChannelLayer>) {
    GLOBAL.register(alias, layer);
}

/// Fetch the layer registered under `alias`, failing with
/// [`Error::NoSuchLayer`] on a miss.
pub fn get_channel_layer(alias: &str) -> Result<Arc<dyn ChannelLayer>> {
    GLOBAL.get(alias)
}

/// Fetch the layer registered under `alias`, or `None`.
pub fn try_get_channel_layer(alias: &str) -> Option<Arc<dyn ChannelLayer>> {
    GLOBAL.try_get(alias)
}

/// Drop the registration for `alias`.
pub fn unregister_channel_layer(alias: &str) -> Option<Arc<dyn ChannelLayer>> {
    GLOBAL.unregister(alias)
}

/// Whether `alias` is registered process-wide.
pub fn has_channel_layer(alias: &str) -> bool {
    GLOBAL.has(alias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChannelLayer;

    fn test_layer() -> Arc<dyn ChannelLayer> {
        Arc::new(InMemoryChannelLayer::default())
    }

    #[test]
    fn test_register_and_get() {
        let registry = LayerRegistry::new();
        registry.register("events", test_layer());

        assert!(registry.has("events"));
        assert!(registry.get("events").is_ok());
        assert_eq!(registry.names(), vec!["events".to_string()]);
    }

    #[test]
    fn test_get_missing_alias() {
        let registry = LayerRegistry::new();
        match registry.get("absent") {
            Err(Error::NoSuchLayer(alias)) => assert_eq!(alias, "absent"),
            other => panic!("expected NoSuchLayer, got {other:?}"),
        }
        assert!(registry.try_get("absent").is_none());
    }

    #[test]
    fn test_double_register_replaces() {
        let registry = LayerRegistry::new();
        let first = test_layer();
        let second = test_layer();

        registry.register("default", first.clone());
        registry.register("default", second.clone());

        let resolved = registry.get("default").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
    }

    #[test]
    fn test_unregister() {
        let registry = LayerRegistry::new();
        registry.register("default", test_layer());

        assert!(registry.unregister("default").is_some());
        assert!(!registry.has("default"));
        assert!(registry.unregister("default").is_none());
    }
}
