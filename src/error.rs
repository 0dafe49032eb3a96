//! Errors surfaced to search callers

use crate::provider::ProviderError;
use crate::web::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SearchError {
    #[error("Query is required")]
    Validation,

    #[error("Rate limit exceeded. Try again at: {}", .reset_at.to_rfc2822())]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("Failed to fetch tweets")]
    Upstream(String),

    #[error("Unexpected response structure from Twitter API")]
    MalformedUpstreamResponse(String),
}

impl SearchError {
    pub fn status(&self) -> StatusCode {
        match self {
            SearchError::Validation => StatusCode::BAD_REQUEST,
            SearchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SearchError::Upstream(_) | SearchError::MalformedUpstreamResponse(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map a non-rate-limit provider failure
    pub(crate) fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Malformed(detail) => SearchError::MalformedUpstreamResponse(detail),
            other => SearchError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body: ApiResponse<()> = ApiResponse::failure(self.to_string());

        (status, Json(body)).into_response()
    }
}
