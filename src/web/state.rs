//! Application state shared across handlers

use crate::cache::ResponseCache;
use crate::config::Settings;
use crate::network::HttpClient;
use crate::provider::{SearchProvider, TwitterProvider};
use crate::search::Dispatcher;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Global settings
    pub settings: Arc<Settings>,
    /// Rate-limited search dispatcher
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Create new application state backed by the Twitter provider
    pub fn new(settings: Settings, client: HttpClient) -> Self {
        let provider = Arc::new(TwitterProvider::new(client, &settings.provider));
        Self::with_provider(settings, provider)
    }

    /// Create application state around any provider
    pub fn with_provider(settings: Settings, provider: Arc<dyn SearchProvider>) -> Self {
        let cache = Arc::new(ResponseCache::new(
            settings.cache.ttl(),
            settings.cache.max_capacity,
        ));
        let dispatcher = Dispatcher::new(provider, cache, settings.dispatcher.clone());

        Self {
            settings: Arc::new(settings),
            dispatcher,
        }
    }
}
