//! trendgate: trending-topics search backend
//!
//! Answers topic searches from a time-bounded response cache and otherwise
//! forwards them to the Twitter search API through a two-state rate-limit
//! gate that queues callers while the provider is exhausted.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod provider;
pub mod search;
pub mod web;

pub use cache::ResponseCache;
pub use config::Settings;
pub use error::SearchError;
pub use provider::{SearchProvider, TwitterProvider};
pub use search::{Dispatcher, Tweet, TweetsPayload};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
