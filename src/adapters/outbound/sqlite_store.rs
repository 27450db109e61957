//! SQLite Shipment Store
//!
//! Implements `ConnectionManager` and `ShipmentRepository` on top of rusqlite.
//! Every operation runs exactly one parameterized statement on a pooled
//! connection inside `spawn_blocking`.

use crate::domain::entities::{NewShipment, Shipment, ShipmentPatch, LIST_LIMIT};
use crate::domain::ports::ShipmentRepository;
use crate::error::StoreError;
use crate::infrastructure::connection_pool::{ConnectionManager, ConnectionPool};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::time::Duration;

/// Current UTC time in RFC 3339 with millisecond precision, computed by the store.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS shipments (
    id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL DEFAULT 'created',
    eta TEXT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS shipments_updated_at_idx ON shipments (updated_at DESC);";

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    /// Database file on disk
    File(String),
    /// Named in-memory database shared by all pooled connections
    Memory(String),
}

impl SqliteTarget {
    /// Parse a `DATABASE_URL`.
    ///
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, a bare path, and
    /// `sqlite::memory:` / `:memory:`.
    pub fn from_url(url: &str) -> Self {
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest == ":memory:" {
            let name = uuid::Uuid::new_v4().simple().to_string();
            Self::Memory(format!("file:shipments-{name}?mode=memory&cache=shared"))
        } else {
            Self::File(rest.to_string())
        }
    }
}

/// Opens rusqlite connections for the pool.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    target: SqliteTarget,
    busy_timeout: Duration,
}

impl SqliteConnectionManager {
    pub fn new(target: SqliteTarget) -> Self {
        Self {
            target,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_url(url: &str) -> Self {
        Self::new(SqliteTarget::from_url(url))
    }
}

impl ConnectionManager for SqliteConnectionManager {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection, StoreError> {
        let unavailable = |e: rusqlite::Error| StoreError::Unavailable(e.to_string());

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let location = match &self.target {
            SqliteTarget::File(path) => path,
            SqliteTarget::Memory(uri) => uri,
        };

        let conn = Connection::open_with_flags(location, flags).map_err(unavailable)?;
        conn.busy_timeout(self.busy_timeout).map_err(unavailable)?;

        if let SqliteTarget::File(_) = self.target {
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
                .map_err(unavailable)?;
        }

        Ok(conn)
    }

    fn ping(&self, conn: &mut Connection) -> Result<(), StoreError> {
        let ok: i64 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if ok == 1 {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected ping result {ok}")))
        }
    }

    fn close(&self, conn: Connection) -> Result<(), StoreError> {
        conn.close()
            .map_err(|(_, e)| StoreError::Unavailable(format!("close failed: {e}")))
    }
}

fn query_error(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Convert a SQLite row to a Shipment entity.
fn row_to_shipment(row: &Row) -> rusqlite::Result<Shipment> {
    Ok(Shipment {
        id: row.get(0)?,
        status: row.get(1)?,
        eta: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// SQLite-backed shipment repository.
pub struct SqliteShipmentRepository {
    pool: ConnectionPool<SqliteConnectionManager>,
}

impl SqliteShipmentRepository {
    pub fn new(pool: ConnectionPool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool<SqliteConnectionManager> {
        &self.pool
    }

    /// Create the shipments table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.pool
            .run(|conn| conn.execute_batch(SCHEMA).map_err(query_error))
            .await
    }
}

#[async_trait]
impl ShipmentRepository for SqliteShipmentRepository {
    async fn list(&self, status: Option<&str>) -> Result<Vec<Shipment>, StoreError> {
        let status = status.map(str::to_owned);
        self.pool
            .run(move |conn| {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT id, status, eta, updated_at FROM shipments
                         WHERE ?1 IS NULL OR status = ?1
                         ORDER BY updated_at DESC, rowid DESC
                         LIMIT ?2",
                    )
                    .map_err(query_error)?;

                let shipments = stmt
                    .query_map(params![status, LIST_LIMIT], row_to_shipment)
                    .map_err(query_error)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(query_error)?;

                Ok(shipments)
            })
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError> {
        let id = id.to_owned();
        self.pool
            .run(move |conn| {
                conn.query_row(
                    "SELECT id, status, eta, updated_at FROM shipments WHERE id = ?1",
                    params![id],
                    row_to_shipment,
                )
                .optional()
                .map_err(query_error)
            })
            .await
    }

    async fn create(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
        let sql = format!(
            "INSERT INTO shipments (id, status, eta, updated_at) VALUES (?1, ?2, ?3, {NOW})
             RETURNING id, status, eta, updated_at"
        );
        self.pool
            .run(move |conn| {
                conn.query_row(
                    &sql,
                    params![shipment.id, shipment.status, shipment.eta],
                    row_to_shipment,
                )
                .map_err(query_error)
            })
            .await
    }

    async fn update(&self, id: &str, patch: ShipmentPatch) -> Result<Option<Shipment>, StoreError> {
        let id = id.to_owned();
        let sql = format!(
            "UPDATE shipments
             SET status = COALESCE(?2, status),
                 eta = COALESCE(?3, eta),
                 updated_at = {NOW}
             WHERE id = ?1
             RETURNING id, status, eta, updated_at"
        );
        self.pool
            .run(move |conn| {
                conn.query_row(&sql, params![id, patch.status, patch.eta], row_to_shipment)
                    .optional()
                    .map_err(query_error)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_owned();
        self.pool
            .run(move |conn| {
                conn.execute("DELETE FROM shipments WHERE id = ?1", params![id])
                    .map(|affected| affected > 0)
                    .map_err(query_error)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ShipmentInput;
    use crate::domain::ports::StorePool;
    use crate::infrastructure::connection_pool::PoolConfig;
    use tempfile::TempDir;

    async fn test_repo() -> (SqliteShipmentRepository, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipments.db");
        let manager = SqliteConnectionManager::from_url(&format!("sqlite://{}", path.display()));
        let pool = ConnectionPool::new(manager, PoolConfig::default());
        let repo = SqliteShipmentRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        (repo, dir)
    }

    fn new_shipment(status: Option<&str>) -> NewShipment {
        NewShipment::from_input(ShipmentInput {
            status: status.map(str::to_string),
            eta: None,
        })
    }

    #[test]
    fn test_target_from_url() {
        assert_eq!(
            SqliteTarget::from_url("sqlite:///var/lib/app.db"),
            SqliteTarget::File("/var/lib/app.db".to_string())
        );
        assert_eq!(
            SqliteTarget::from_url("sqlite:data.db"),
            SqliteTarget::File("data.db".to_string())
        );
        assert_eq!(
            SqliteTarget::from_url("data.db"),
            SqliteTarget::File("data.db".to_string())
        );
        assert!(matches!(
            SqliteTarget::from_url("sqlite::memory:"),
            SqliteTarget::Memory(_)
        ));
    }

    #[test]
    fn test_memory_targets_are_distinct() {
        assert_ne!(
            SqliteTarget::from_url(":memory:"),
            SqliteTarget::from_url(":memory:")
        );
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, _dir) = test_repo().await;

        let created = repo.create(new_shipment(None)).await.unwrap();
        assert_eq!(created.status, "created");
        assert!(created.eta.is_none());
        assert!(created.updated_at.ends_with('Z'));

        let fetched = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched, Some(created));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (repo, _dir) = test_repo().await;
        assert_eq!(repo.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let (repo, _dir) = test_repo().await;

        let first = repo.create(new_shipment(Some("in_transit"))).await.unwrap();
        let second = repo.create(new_shipment(Some("delivered"))).await.unwrap();
        let third = repo.create(new_shipment(Some("in_transit"))).await.unwrap();

        let all = repo.list(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

        let in_transit = repo.list(Some("in_transit")).await.unwrap();
        assert_eq!(in_transit.len(), 2);
        assert!(in_transit.iter().all(|s| s.status == "in_transit"));
    }

    #[tokio::test]
    async fn test_list_is_capped() {
        let (repo, _dir) = test_repo().await;
        for _ in 0..(LIST_LIMIT + 5) {
            repo.create(new_shipment(None)).await.unwrap();
        }
        assert_eq!(repo.list(None).await.unwrap().len(), LIST_LIMIT as usize);
    }

    #[tokio::test]
    async fn test_update_coalesces_missing_fields() {
        let (repo, _dir) = test_repo().await;
        let created = repo.create(new_shipment(Some("in_transit"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let patch = ShipmentPatch {
            status: None,
            eta: Some("2030-01-01T00:00:00Z".to_string()),
        };
        let updated = repo.update(&created.id, patch).await.unwrap().unwrap();

        assert_eq!(updated.status, "in_transit");
        assert_eq!(updated.eta.as_deref(), Some("2030-01-01T00:00:00Z"));
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_is_none() {
        let (repo, _dir) = test_repo().await;
        let result = repo.update("missing", ShipmentPatch::default()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (repo, _dir) = test_repo().await;
        let created = repo.create(new_shipment(None)).await.unwrap();

        assert!(repo.delete(&created.id).await.unwrap());
        assert!(!repo.delete(&created.id).await.unwrap());
        assert!(repo.get(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_are_bound_not_interpolated() {
        let (repo, _dir) = test_repo().await;
        repo.create(new_shipment(None)).await.unwrap();

        let hostile = "x' OR '1'='1";
        assert!(repo.get(hostile).await.unwrap().is_none());
        assert!(!repo.delete(hostile).await.unwrap());
        assert_eq!(repo.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_error_releases_lease() {
        let (repo, _dir) = test_repo().await;
        repo.pool()
            .run(|conn| conn.execute_batch("DROP TABLE shipments").map_err(query_error))
            .await
            .unwrap();

        let result = repo.list(None).await;
        assert!(matches!(result, Err(StoreError::Query(_))));

        let stats = repo.pool().stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.acquired_total, stats.released_total);
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let (repo, _dir) = test_repo().await;
        let pool = repo.pool().clone();

        assert!(StorePool::ping(&pool).await.is_ok());
        StorePool::close(&pool).await.unwrap();
        assert!(matches!(
            StorePool::ping(&pool).await,
            Err(StoreError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_missing_database_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("shipments.db");
        let manager = SqliteConnectionManager::from_url(&path.display().to_string());
        let pool = ConnectionPool::new(manager, PoolConfig::default());

        assert!(matches!(
            StorePool::ping(&pool).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_database_shared_across_connections() {
        let manager = SqliteConnectionManager::from_url("sqlite::memory:");
        let pool = ConnectionPool::new(
            manager,
            PoolConfig {
                max_connections: 2,
                ..PoolConfig::default()
            },
        );
        let repo = SqliteShipmentRepository::new(pool.clone());

        // Hold one connection so the shared in-memory database stays alive.
        let keep_alive = pool.acquire().await.unwrap();
        repo.ensure_schema().await.unwrap();
        let created = repo.create(new_shipment(None)).await.unwrap();
        assert!(repo.get(&created.id).await.unwrap().is_some());
        drop(keep_alive);
    }
}
