//! Shipment API Server
//!
//! Router construction and the serve loop. Shutdown order is fixed:
//! stop accepting, drain in-flight requests (bounded), close the store pool,
//! mark the lifecycle closed.

use super::handlers::{
    create_shipment, delete_shipment, get_shipment, health_handler, list_shipments,
    metrics_handler, not_found_handler, ready_handler, update_shipment,
};
use super::instrumentation::instrument_requests;
use crate::domain::ports::{ShipmentRepository, StorePool};
use crate::infrastructure::metrics::MetricsRegistry;
use crate::infrastructure::shutdown::LifecycleController;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    /// Shipment persistence
    pub shipments: Arc<dyn ShipmentRepository>,
    /// Pool behind `shipments`, used for readiness and shutdown
    pub store: Arc<dyn StorePool>,
    pub metrics: Arc<MetricsRegistry>,
    pub lifecycle: LifecycleController,
    /// Bound on the `/ready` round trip
    pub ready_timeout: Duration,
}

/// Build the router with instrumentation applied to every route,
/// including the fallback.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/shipments", get(list_shipments).post(create_shipment))
        .route(
            "/shipments/:id",
            get(get_shipment)
                .patch(update_shipment)
                .delete(delete_shipment),
        )
        .fallback(not_found_handler)
        // Outermost first. Panics become 500s before instrumentation sees
        // the response.
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    state.lifecycle.clone(),
                    track_in_flight,
                ))
                .layer(middleware::from_fn_with_state(
                    state.metrics.clone(),
                    instrument_requests,
                ))
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// Count the request as in flight until its response is produced.
async fn track_in_flight(
    State(lifecycle): State<LifecycleController>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = lifecycle.request_guard();
    next.run(request).await
}

/// How the serve loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All in-flight requests finished before the drain deadline
    pub drained: bool,
    /// Requests still running when the deadline passed
    pub abandoned: usize,
    /// The pool closed without error
    pub pool_closed: bool,
}

/// HTTP server for the shipment API.
pub struct ApiServer {
    state: ApiState,
    drain_timeout: Duration,
}

impl ApiServer {
    pub fn new(state: ApiState, drain_timeout: Duration) -> Self {
        Self {
            state,
            drain_timeout,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until shutdown is initiated, then drain and release the store.
    ///
    /// Consumes the server, so the close sequence runs at most once.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<ShutdownReport> {
        let lifecycle = self.state.lifecycle.clone();
        let app = self.router();

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(lifecycle.clone().draining())
            .into_future();

        let deadline = {
            let lifecycle = lifecycle.clone();
            let drain_timeout = self.drain_timeout;
            async move {
                lifecycle.draining().await;
                tokio::time::sleep(drain_timeout).await;
            }
        };

        let drained = tokio::select! {
            result = server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "server error");
                }
                true
            }
            _ = deadline => false,
        };

        // The server can also stop on its own (listener error).
        lifecycle.begin_shutdown();

        let abandoned = if drained { 0 } else { lifecycle.in_flight() };
        if !drained {
            tracing::warn!(
                abandoned,
                timeout = ?self.drain_timeout,
                "drain deadline reached, abandoning in-flight requests"
            );
        }

        let pool_closed = match self.state.store.close().await {
            Ok(()) => {
                tracing::info!("store pool closed");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to close store pool");
                false
            }
        };

        lifecycle.mark_closed();

        Ok(ShutdownReport {
            drained,
            abandoned,
            pool_closed,
        })
    }
}
