//! Layer fixtures.

use std::sync::Arc;

use wirebus_core::{register_channel_layer, InMemoryChannelLayer, LayerConfig};

/// A fresh in-memory layer, not registered anywhere.
pub fn memory_layer() -> Arc<InMemoryChannelLayer> {
    Arc::new(InMemoryChannelLayer::default())
}

/// A registry alias no other test will pick.
pub fn unique_alias() -> String {
    format!("test-{}", uuid::Uuid::new_v4().simple())
}

/// Register a fresh in-memory layer under a unique alias. The registry is
/// process-global, so unique aliases keep parallel tests independent.
pub fn install_memory_layer() -> (String, Arc<InMemoryChannelLayer>) {
    install_memory_layer_with(LayerConfig::default())
}

/// Register a fresh in-memory layer with custom knobs under a unique alias.
pub fn install_memory_layer_with(config: LayerConfig) -> (String, Arc<InMemoryChannelLayer>) {
    let alias = unique_alias();
    let layer = Arc::new(InMemoryChannelLayer::new(config));
    register_channel_layer(alias.clone(), layer.clone());
    (alias, layer)
}
