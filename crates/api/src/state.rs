use crate::registry::RegistryHandle;
use quotefeed_core::{FeedConfig, QuoteSource};
use std::sync::Arc;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub registry: RegistryHandle,
    /// The resolved quote chain (cache layer on top of the vendors).
    pub source: Arc<dyn QuoteSource>,
    pub config: FeedConfig,
}

impl AppState {
    pub fn new(registry: RegistryHandle, source: Arc<dyn QuoteSource>, config: FeedConfig) -> Self {
        Self {
            registry,
            source,
            config,
        }
    }
}
