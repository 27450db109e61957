//! Shipment Repository Port
//!
//! Defines the interface handlers use to read and write shipments.
//! Implementations issue exactly one parameterized statement per call.

use crate::domain::entities::{NewShipment, Shipment, ShipmentPatch};
use crate::error::StoreError;
use async_trait::async_trait;

/// Repository for the shipment resource.
///
/// "Not found" is an expected outcome and is reported through `Option`/`bool`,
/// never as a `StoreError`.
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    /// List up to `LIST_LIMIT` shipments, most recently updated first,
    /// optionally filtered by exact status.
    async fn list(&self, status: Option<&str>) -> Result<Vec<Shipment>, StoreError>;

    /// Get a shipment by id.
    async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError>;

    /// Insert a new shipment and return the stored row.
    async fn create(&self, shipment: NewShipment) -> Result<Shipment, StoreError>;

    /// Apply a partial update and refresh `updated_at`.
    async fn update(&self, id: &str, patch: ShipmentPatch) -> Result<Option<Shipment>, StoreError>;

    /// Delete a shipment. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}
