//! Domain Entities
//!
//! The shipment resource and the request shapes used to create and patch it.
//! Authoritative state lives in the store; these types only carry it.

use serde::{Deserialize, Serialize};

/// Status assigned when a create request does not name one.
pub const DEFAULT_STATUS: &str = "created";

/// Maximum number of shipments returned by a list query.
pub const LIST_LIMIT: u32 = 200;

/// A shipment as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    /// Server-generated unique identifier
    pub id: String,
    /// Free-text status ("created", "in_transit", ...)
    pub status: String,
    /// Estimated arrival, RFC 3339
    pub eta: Option<String>,
    /// Last modification time, RFC 3339 UTC
    pub updated_at: String,
}

/// Request body accepted by create and patch.
///
/// Both fields are optional; `null` and absent are treated the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ShipmentInput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
}

/// A shipment about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShipment {
    pub id: String,
    pub status: String,
    pub eta: Option<String>,
}

impl NewShipment {
    /// Build an insertable shipment with a freshly generated id.
    pub fn from_input(input: ShipmentInput) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: input.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            eta: input.eta,
        }
    }
}

/// Partial update. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipmentPatch {
    pub status: Option<String>,
    pub eta: Option<String>,
}

impl From<ShipmentInput> for ShipmentPatch {
    fn from(input: ShipmentInput) -> Self {
        Self {
            status: input.status,
            eta: input.eta,
        }
    }
}
