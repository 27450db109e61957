//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use shipment_api::adapters::inbound::ApiState;
use shipment_api::adapters::outbound::{SqliteConnectionManager, SqliteShipmentRepository};
use shipment_api::domain::ports::{PoolStats, ShipmentRepository, StorePool};
use shipment_api::domain::{NewShipment, Shipment, ShipmentPatch};
use shipment_api::error::StoreError;
use shipment_api::infrastructure::{ConnectionPool, LifecycleController, MetricsRegistry, PoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub type SqlitePool = ConnectionPool<SqliteConnectionManager>;

/// API state backed by a SQLite file in a temp dir.
pub struct TestApp {
    pub state: ApiState,
    pub pool: SqlitePool,
    pub _dir: TempDir,
}

pub async fn sqlite_app() -> TestApp {
    sqlite_app_with_metrics(MetricsRegistry::with_defaults().unwrap()).await
}

pub async fn sqlite_app_with_metrics(metrics: MetricsRegistry) -> TestApp {
    sqlite_app_with(metrics, PoolConfig::default()).await
}

pub async fn sqlite_app_with(metrics: MetricsRegistry, pool_config: PoolConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", db_path(&dir).display());
    let pool = ConnectionPool::new(SqliteConnectionManager::from_url(&url), pool_config);
    let repository = SqliteShipmentRepository::new(pool.clone());
    repository.ensure_schema().await.unwrap();

    let state = ApiState {
        shipments: Arc::new(repository),
        store: Arc::new(pool.clone()),
        metrics: Arc::new(metrics),
        lifecycle: LifecycleController::new(),
        ready_timeout: Duration::from_millis(500),
    };

    TestApp {
        state,
        pool,
        _dir: dir,
    }
}

pub fn db_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("shipments.db")
}

/// Send one request through the router and collect the response.
pub async fn send(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let (status, text) = send(router, method, uri, body).await;
    let value = if text.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap()
    };
    (status, value)
}

/// Pool whose ping never completes.
pub struct HangingStore;

#[async_trait]
impl StorePool for HangingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        futures::future::pending().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

/// Wraps a pool and counts `close` calls.
pub struct CountingStore {
    inner: Arc<dyn StorePool>,
    pub closes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn StorePool>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorePool for CountingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }

    fn stats(&self) -> PoolStats {
        self.inner.stats()
    }
}

/// Repository whose `list` takes `delay` before answering.
pub struct SlowRepository {
    pub delay: Duration,
}

#[async_trait]
impl ShipmentRepository for SlowRepository {
    async fn list(&self, _status: Option<&str>) -> Result<Vec<Shipment>, StoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn get(&self, _id: &str) -> Result<Option<Shipment>, StoreError> {
        Ok(None)
    }

    async fn create(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
        Ok(Shipment {
            id: shipment.id,
            status: shipment.status,
            eta: shipment.eta,
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
        })
    }

    async fn update(&self, _id: &str, _patch: ShipmentPatch) -> Result<Option<Shipment>, StoreError> {
        Ok(None)
    }

    async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}
