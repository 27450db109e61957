//! Store Pool Port
//!
//! The capability probes and the lifecycle coordinator need from the
//! connection pool: reachability, statistics and a single close.

use crate::error::StoreError;
use async_trait::async_trait;

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured upper bound on physical connections
    pub max_connections: usize,
    /// Leases currently held by callers
    pub in_use: usize,
    /// Open connections waiting in the pool
    pub idle: usize,
    /// Leases handed out since start
    pub acquired_total: u64,
    /// Leases returned since start
    pub released_total: u64,
    /// Whether `close` has been called
    pub closed: bool,
}

#[async_trait]
pub trait StorePool: Send + Sync {
    /// Minimal round trip against the store (`SELECT 1`).
    ///
    /// Callers bound this with their own timeout.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release every physical connection. Idempotent.
    async fn close(&self) -> Result<(), StoreError>;

    /// Current usage counters.
    fn stats(&self) -> PoolStats;
}
