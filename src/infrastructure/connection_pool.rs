//! Connection Pool
//!
//! Bounded pool of database connections with scoped leases.
//!
//! A `PoolLease` owns one physical connection for the duration of one
//! statement. Dropping the lease returns the connection, so every exit path
//! (success, error, panic, abandoned timeout) releases it exactly once.

use crate::domain::ports::{PoolStats, StorePool};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Driver-specific connection lifecycle.
///
/// Methods are blocking; the pool calls them from `spawn_blocking`.
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new physical connection.
    fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Minimal round trip on an open connection.
    fn ping(&self, conn: &mut Self::Connection) -> Result<(), StoreError>;

    /// Close a physical connection.
    fn close(&self, conn: Self::Connection) -> Result<(), StoreError> {
        drop(conn);
        Ok(())
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum physical connections
    pub max_connections: usize,
    /// Maximum wait for a free lease
    pub acquire_timeout: Duration,
    /// Maximum time a single statement may run
    pub query_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    /// Open connections not currently leased
    idle: Mutex<Vec<M::Connection>>,
    /// One permit per physical connection slot
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    in_use: AtomicUsize,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
}

impl<M: ConnectionManager> PoolInner<M> {
    /// Put a connection back, or close it if the pool has been closed.
    ///
    /// The closed flag is read under the idle lock so a connection is never
    /// pushed after `close` has drained the idle list.
    fn give_back(&self, conn: M::Connection) {
        let leftover = {
            let mut idle = self.idle.lock();
            if self.closed.load(Ordering::SeqCst) {
                Some(conn)
            } else {
                idle.push(conn);
                None
            }
        };

        if let Some(conn) = leftover {
            if let Err(e) = self.manager.close(conn) {
                tracing::warn!(error = %e, "failed to close connection returned after pool close");
            }
        }
    }
}

/// Bounded connection pool.
///
/// Cheap to clone; clones share the same connections.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a new pool. No connection is opened until the first acquire.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max = config.max_connections.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                permits: Arc::new(Semaphore::new(max)),
                config: PoolConfig {
                    max_connections: max,
                    ..config
                },
                idle: Mutex::new(Vec::with_capacity(max)),
                closed: AtomicBool::new(false),
                in_use: AtomicUsize::new(0),
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Acquire a lease, reusing an idle connection or opening a new one.
    pub async fn acquire(&self) -> Result<PoolLease<M>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::PoolClosed),
            Err(_) => return Err(StoreError::PoolTimeout),
        };

        let reused = self.inner.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let inner = self.inner.clone();
                tokio::task::spawn_blocking(move || inner.manager.connect())
                    .await
                    .map_err(|e| StoreError::Unavailable(format!("connect task failed: {e}")))??
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        self.inner.acquired_total.fetch_add(1, Ordering::SeqCst);

        Ok(PoolLease {
            conn: Some(conn),
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Run one blocking statement on a leased connection, bounded by the
    /// configured query timeout.
    pub async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_timeout(self.inner.config.query_timeout, f).await
    }

    /// Like `run` with an explicit timeout.
    ///
    /// A statement that outlives the timeout is abandoned, not interrupted;
    /// its lease is released when the blocking work finishes.
    pub async fn run_with_timeout<F, T>(&self, timeout: Duration, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut M::Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let lease = self.acquire().await?;
        let task = tokio::task::spawn_blocking(move || {
            let mut lease = lease;
            f(&mut *lease)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Query(format!("statement task failed: {e}"))),
            Err(_) => {
                tracing::warn!(?timeout, "statement exceeded timeout, abandoning");
                Err(StoreError::Timeout(timeout))
            }
        }
    }

    /// Close the pool: refuse new leases and close every idle connection.
    ///
    /// Connections leased at this point are closed when their lease drops.
    /// Only the first call does any work.
    pub async fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.permits.close();

        let idle: Vec<M::Connection> = std::mem::take(&mut *self.inner.idle.lock());
        let leased = self.inner.in_use.load(Ordering::SeqCst);
        tracing::info!(idle = idle.len(), leased, "closing connection pool");

        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut first_error = None;
            for conn in idle {
                if let Err(e) = inner.manager.close(conn) {
                    tracing::warn!(error = %e, "failed to close pooled connection");
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("close task failed: {e}")))?
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_connections: self.inner.config.max_connections,
            in_use: self.inner.in_use.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().len(),
            acquired_total: self.inner.acquired_total.load(Ordering::SeqCst),
            released_total: self.inner.released_total.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }
}

#[async_trait]
impl<M: ConnectionManager> StorePool for ConnectionPool<M> {
    async fn ping(&self) -> Result<(), StoreError> {
        let lease = self.acquire().await?;
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut lease = lease;
            inner.manager.ping(&mut *lease)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("ping task failed: {e}")))?
    }

    async fn close(&self) -> Result<(), StoreError> {
        ConnectionPool::close(self).await
    }

    fn stats(&self) -> PoolStats {
        ConnectionPool::stats(self)
    }
}

/// Exclusive claim on one pooled connection.
///
/// Returned to the pool on drop.
pub struct PoolLease<M: ConnectionManager> {
    conn: Option<M::Connection>,
    inner: Arc<PoolInner<M>>,
    // Released after `drop` has returned the connection.
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> Deref for PoolLease<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("lease holds a connection until dropped")
    }
}

impl<M: ConnectionManager> DerefMut for PoolLease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("lease holds a connection until dropped")
    }
}

impl<M: ConnectionManager> Drop for PoolLease<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.give_back(conn);
        }
        self.inner.in_use.fetch_sub(1, Ordering::SeqCst);
        self.inner.released_total.fetch_add(1, Ordering::SeqCst);
    }
}
