//! Twitter v2 recent-search provider
//!
//! Calls `GET /2/tweets/search/recent` with author expansion so usernames can
//! be resolved without a second round trip.

use super::traits::*;
use crate::config::ProviderSettings;
use crate::network::{HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use tracing::{debug, warn};

/// Header carrying the epoch second at which the rate-limit window resets
pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

#[derive(Debug, Deserialize)]
struct SearchBody {
    data: Option<serde_json::Value>,
    includes: Option<Includes>,
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct Meta {
    result_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    id: String,
    #[serde(default)]
    author_id: String,
    text: String,
    created_at: Option<String>,
}

/// Twitter search provider
pub struct TwitterProvider {
    client: HttpClient,
    search_url: String,
    bearer_token: Option<String>,
    max_results: u32,
    pacer: Option<DefaultDirectRateLimiter>,
}

impl TwitterProvider {
    pub fn new(client: HttpClient, settings: &ProviderSettings) -> Self {
        if settings.bearer_token.is_none() {
            warn!("No Twitter bearer token configured, provider calls will be rejected");
        }

        let pacer = NonZeroU32::new(settings.requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Self {
            client,
            search_url: format!(
                "{}/2/tweets/search/recent",
                settings.api_base.trim_end_matches('/')
            ),
            bearer_token: settings.bearer_token.clone(),
            // The API accepts 10..=100
            max_results: settings.max_results.clamp(10, 100),
            pacer,
        }
    }

    fn build_request(&self, query: &str) -> HttpRequest {
        let mut request = HttpRequest::get(&self.search_url)
            .param("query", query)
            .param("max_results", self.max_results.to_string())
            .param("tweet.fields", "created_at,text")
            .param("user.fields", "username")
            .param("expansions", "author_id");

        if let Some(ref token) = self.bearer_token {
            request = request.bearer(token);
        }

        request
    }
}

#[async_trait]
impl SearchProvider for TwitterProvider {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn search(&self, query: &str) -> Result<ProviderPage, ProviderError> {
        if let Some(ref pacer) = self.pacer {
            pacer.until_ready().await;
        }

        let response = self
            .client
            .execute(self.build_request(query))
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        debug!("Twitter search returned HTTP {}", response.status);
        parse_response(&response)
    }
}

/// Map a raw HTTP response to a provider page or error
pub fn parse_response(response: &HttpResponse) -> Result<ProviderPage, ProviderError> {
    if response.is_rate_limited() {
        return Err(ProviderError::RateLimited {
            reset_at: response
                .header(RATE_LIMIT_RESET_HEADER)
                .and_then(parse_reset_header),
        });
    }

    if !response.is_success() {
        return Err(ProviderError::Status(response.status));
    }

    let body: SearchBody = response
        .json()
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let items: Vec<RawTweet> = match body.data {
        Some(data @ serde_json::Value::Array(_)) => serde_json::from_value(data)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?,
        // An empty result set comes back without `data`
        None if body.meta.as_ref().and_then(|m| m.result_count) == Some(0) => Vec::new(),
        _ => {
            return Err(ProviderError::Malformed(
                "`data` is not an array".to_string(),
            ))
        }
    };

    let users = body
        .includes
        .unwrap_or_default()
        .users
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    let items = items
        .into_iter()
        .map(|t| ProviderItem {
            id: t.id,
            author_id: t.author_id,
            text: t.text,
            created_at: t.created_at,
        })
        .collect();

    Ok(ProviderPage { items, users })
}

/// Parse an epoch-seconds header value
pub fn parse_reset_header(value: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = value.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
