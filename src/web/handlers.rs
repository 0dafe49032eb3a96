//! HTTP request handlers

use super::response::ApiResponse;
use super::state::AppState;
use crate::error::SearchError;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Body of a topic search
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
}

/// Twitter topic search handler
pub async fn twitter_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let query = match body {
        Ok(Json(SearchRequest { query: Some(q) })) => q,
        Ok(_) => return SearchError::Validation.into_response(),
        Err(rejection) => {
            tracing::debug!("Rejected search body: {}", rejection);
            return SearchError::Validation.into_response();
        }
    };

    match state.dispatcher.submit(&query).await {
        Ok(payload) => (StatusCode::OK, Json(ApiResponse::success(payload))).into_response(),
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("Search for '{}' failed: {:?}", query, e);
            }
            e.into_response()
        }
    }
}

/// Counters and gate state
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub provider: String,
    pub gate: crate::search::GateStatus,
    pub cache_entries: u64,
    pub cache_ttl_seconds: u64,
    pub metrics: crate::metrics::MetricsSnapshot,
}

/// Stats handler
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = &state.dispatcher;
    let stats = StatsResponse {
        provider: dispatcher.provider_name().to_string(),
        gate: dispatcher.status().await,
        cache_entries: dispatcher.cache().len().await,
        cache_ttl_seconds: state.settings.cache.ttl_seconds,
        metrics: dispatcher.metrics().snapshot(),
    };

    Json(ApiResponse::success(stats))
}

/// Health check handler
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}
