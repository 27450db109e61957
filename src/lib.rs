//! Shipment API Library
//!
//! Exposes the service components for the binary and for integration tests.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{build_router, ApiServer, ApiState, ShutdownReport};
pub use adapters::outbound::{SqliteConnectionManager, SqliteShipmentRepository};
pub use config::{load_config, Config};
pub use domain::entities::{NewShipment, Shipment, ShipmentInput, ShipmentPatch};
pub use domain::ports::{PoolStats, ShipmentRepository, StorePool};
pub use domain::value_objects::{LifecycleState, MetricKind};
pub use error::{ApiError, ConfigError, MetricsError, StoreError};
pub use infrastructure::{ConnectionPool, LifecycleController, MetricsRegistry, PoolConfig};
