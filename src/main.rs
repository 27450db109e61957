//! Shipment API - HTTP service with metrics, probes and graceful shutdown
//!
//! This is the composition root that wires together all the components.

use shipment_api::adapters::inbound::{ApiServer, ApiState};
use shipment_api::adapters::outbound::{SqliteConnectionManager, SqliteShipmentRepository};
use shipment_api::config::load_config;
use shipment_api::infrastructure::{
    block_on_bounded, shutdown_signal, ConnectionPool, LifecycleController, MetricsRegistry,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::fmt::format::FmtSpan;

fn main() -> ExitCode {
    // Load configuration from environment
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .init();
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(cfg.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    // Abandoned store statements must not outlive the drain deadline.
    let grace = cfg.drain_timeout;
    match block_on_bounded(runtime, run(cfg), grace) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: shipment_api::Config) -> anyhow::Result<()> {
    // ===== COMPOSITION ROOT =====

    // 1. Store: pool + repository
    let manager = SqliteConnectionManager::from_url(&cfg.database_url);
    let pool = ConnectionPool::new(manager, cfg.pool_config());
    let repository = SqliteShipmentRepository::new(pool.clone());

    // An unreachable store is not fatal; /ready reports it.
    if let Err(e) = repository.ensure_schema().await {
        tracing::warn!(error = %e, "could not bootstrap schema");
    }

    // 2. Metrics and lifecycle
    let metrics = Arc::new(MetricsRegistry::with_defaults()?);
    let lifecycle = LifecycleController::new();
    tokio::spawn(shutdown_signal(lifecycle.clone()));

    // 3. Inbound adapter
    let state = ApiState {
        shipments: Arc::new(repository),
        store: Arc::new(pool),
        metrics,
        lifecycle,
        ready_timeout: cfg.ready_timeout,
    };

    let listener = TcpListener::bind(cfg.listen_addr()).await?;
    tracing::info!(
        port = cfg.port,
        pool_max = cfg.pool_max_connections,
        "api started on {}",
        cfg.listen_addr()
    );

    let report = ApiServer::new(state, cfg.drain_timeout).serve(listener).await?;
    tracing::info!(
        drained = report.drained,
        pool_closed = report.pool_closed,
        "shutdown complete"
    );
    Ok(())
}
