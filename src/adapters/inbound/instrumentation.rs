//! Request Instrumentation
//!
//! Middleware applied to every route at router construction. It measures
//! each request and records it after the handler has produced its response.
//! It never touches the response and never lets a recording failure escape.

use crate::error::MetricsError;
use crate::infrastructure::metrics::{
    MetricsRegistry, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
};
use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Route label used when no route template matched.
pub const UNKNOWN_ROUTE: &str = "unknown";

/// One measured request. Consumed by `record`.
#[derive(Debug, Clone)]
pub struct RequestObservation {
    pub method: String,
    /// Route template (`/shipments/:id`), never the raw path
    pub route: String,
    pub status: StatusCode,
    pub elapsed: Duration,
}

impl RequestObservation {
    /// Count the request, then observe its duration.
    pub fn record(&self, metrics: &MetricsRegistry) -> Result<(), MetricsError> {
        let status = self.status.as_u16().to_string();
        let labels = [
            ("method", self.method.as_str()),
            ("route", self.route.as_str()),
            ("status", status.as_str()),
        ];

        metrics.increment(HTTP_REQUESTS_TOTAL, &labels, 1)?;
        metrics.observe(
            HTTP_REQUEST_DURATION_SECONDS,
            &labels,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Record an observation, logging instead of propagating any failure.
pub fn record_safely(metrics: &MetricsRegistry, observation: &RequestObservation) {
    match catch_unwind(AssertUnwindSafe(|| observation.record(metrics))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(
                error = %e,
                method = %observation.method,
                route = %observation.route,
                "failed to record request metrics"
            );
        }
        Err(_) => {
            tracing::error!(
                method = %observation.method,
                route = %observation.route,
                "request metrics recording panicked"
            );
        }
    }
}

/// Measure a request: start a monotonic timer, capture method and matched
/// route template, run the rest of the stack, then record.
pub async fn instrument_requests(
    State(metrics): State<Arc<MetricsRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| UNKNOWN_ROUTE.to_owned());

    let response = next.run(request).await;

    let observation = RequestObservation {
        method,
        route,
        status: response.status(),
        elapsed: start.elapsed(),
    };
    record_safely(&metrics, &observation);

    response
}
