//! Normalized search result models

use crate::provider::ProviderPage;
use serde::{Deserialize, Serialize};

/// Permalink host for tweets
const TWEET_HOST: &str = "https://twitter.com";

/// A single tweet in the shape handed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub text: String,
    /// Author username, if the provider expanded it
    pub user: Option<String>,
    pub created_at: Option<String>,
    pub url: String,
}

/// Result payload cached per query and returned as `data`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TweetsPayload {
    pub tweets: Vec<Tweet>,
}

impl TweetsPayload {
    /// Resolve authors through the page's user table and build permalinks
    pub fn from_page(page: ProviderPage) -> Self {
        let ProviderPage { items, users } = page;

        let tweets = items
            .into_iter()
            .map(|item| {
                let user = users.get(&item.author_id).cloned();
                let url = match user {
                    Some(ref name) => format!("{}/{}/status/{}", TWEET_HOST, name, item.id),
                    None => format!("{}/i/web/status/{}", TWEET_HOST, item.id),
                };
                Tweet {
                    text: item.text,
                    user,
                    created_at: item.created_at,
                    url,
                }
            })
            .collect();

        Self { tweets }
    }

    pub fn len(&self) -> usize {
        self.tweets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
    }
}
