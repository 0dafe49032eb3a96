//! Provider trait and raw payload types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// One raw item as returned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderItem {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: Option<String>,
}

/// A page of raw provider results plus the author lookup table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPage {
    pub items: Vec<ProviderItem>,
    /// author id -> username
    pub users: HashMap<String, String>,
}

/// Errors reported by a search provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider refused the call until `reset_at`
    #[error("rate limited by provider")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("unexpected provider payload: {0}")]
    Malformed(String),

    #[error("provider request failed: {0}")]
    Request(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// External search source queried for topic results
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Run a free-text search
    async fn search(&self, query: &str) -> Result<ProviderPage, ProviderError>;
}
