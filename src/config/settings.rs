//! Settings structures for trendgate configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure matching settings.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub dispatcher: DispatcherSettings,
    pub provider: ProviderSettings,
    pub outgoing: OutgoingSettings,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }

    /// Merge with environment variables (TRENDGATE_* prefix)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("TRENDGATE_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("TRENDGATE_BIND_ADDRESS") {
            self.server.bind_address = val;
        }
        if let Ok(val) = std::env::var("TRENDGATE_CACHE_TTL") {
            if let Ok(ttl) = val.parse() {
                self.cache.ttl_seconds = ttl;
            }
        }
        if let Ok(val) = std::env::var("TRENDGATE_PROVIDER_URL") {
            self.provider.api_base = val;
        }
        // Same variable name the rest of the application reads
        if let Ok(val) = std::env::var("TWITTER_BEARER_TOKEN") {
            self.provider.bearer_token = Some(val);
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server port
    pub port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Freshness window for cached search results (seconds)
    pub ttl_seconds: u64,
    /// Upper bound on stored queries
    pub max_capacity: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_capacity: 10_000,
        }
    }
}

/// Rate-limit gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Timeout applied to every provider call (seconds)
    pub provider_timeout: f64,
    /// Window assumed when the provider omits its reset header (seconds)
    pub fallback_reset_seconds: u64,
}

impl DispatcherSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.provider_timeout)
    }

    pub fn fallback_reset(&self) -> Duration {
        Duration::from_secs(self.fallback_reset_seconds)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            provider_timeout: 10.0,
            fallback_reset_seconds: 900,
        }
    }
}

/// Search provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL of the Twitter API
    pub api_base: String,
    /// Bearer token for app-only auth
    pub bearer_token: Option<String>,
    /// Results requested per search
    pub max_results: u32,
    /// Outbound requests per second (0 disables pacing)
    pub requests_per_second: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com".to_string(),
            bearer_token: None,
            max_results: 10,
            requests_per_second: 0,
        }
    }
}

/// Outgoing request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingSettings {
    /// Default request timeout in seconds
    pub request_timeout: f64,
    /// Pool max size
    pub pool_maxsize: usize,
    /// Verify SSL certificates
    pub verify_ssl: bool,
    /// Proxy for all outgoing traffic
    pub proxy: Option<String>,
}

impl Default for OutgoingSettings {
    fn default() -> Self {
        Self {
            request_timeout: 5.0,
            pool_maxsize: 20,
            verify_ssl: true,
            proxy: None,
        }
    }
}
