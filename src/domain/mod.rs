//! Domain Layer
//!
//! Entities, value objects and the outbound ports the service depends on.

pub mod entities;
pub mod ports;
pub mod value_objects;

pub use entities::{NewShipment, Shipment, ShipmentInput, ShipmentPatch, DEFAULT_STATUS, LIST_LIMIT};
pub use value_objects::{LifecycleState, MetricKind};
