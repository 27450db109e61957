//! Error Taxonomy
//!
//! Startup, store, metrics and HTTP-boundary errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL missing")]
    MissingDatabaseUrl,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors raised by the connection pool and the store adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connect or ping failed)
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A statement failed
    #[error("query failed: {0}")]
    Query(String),
    /// A statement did not finish within the per-query timeout
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    /// The pool has been closed
    #[error("connection pool closed")]
    PoolClosed,
    /// No lease became free within the acquire timeout
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
}

/// Metrics registry errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("metric {0} is already registered")]
    DuplicateMetricName(String),
    #[error("metric {0} is not registered")]
    UnknownMetric(String),
    #[error("label set for {name} does not match registered keys {expected:?}")]
    LabelMismatch { name: String, expected: Vec<String> },
    #[error("metric {name} is a {actual}, not a {requested}")]
    KindMismatch {
        name: String,
        actual: &'static str,
        requested: &'static str,
    },
    #[error("invalid definition for {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },
    #[error("counter {0} must be incremented by at least 1")]
    InvalidDelta(String),
}

/// Handler-boundary error. Converted to an HTTP response, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> ApiError {
        move |source| ApiError::Store { operation, source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(reason) => {
                tracing::debug!(%reason, "rejected request body");
                (StatusCode::BAD_REQUEST, "invalid_body")
            }
            ApiError::Store { operation, source } => match source {
                StoreError::PoolClosed | StoreError::PoolTimeout | StoreError::Unavailable(_) => {
                    tracing::warn!(operation, error = %source, "store unavailable");
                    (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
                }
                _ => {
                    tracing::error!(operation, error = %source, "store query failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        };

        (status, Json(serde_json::json!({ "error": code }))).into_response()
    }
}
