//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod connection_pool;
pub mod metrics;
pub mod process_metrics;
pub mod shutdown;

pub use connection_pool::{ConnectionManager, ConnectionPool, PoolConfig, PoolLease};
pub use metrics::{MetricsRegistry, TEXT_CONTENT_TYPE};
pub use process_metrics::ProcessCollector;
pub use shutdown::{block_on_bounded, shutdown_signal, InFlightGuard, LifecycleController};
