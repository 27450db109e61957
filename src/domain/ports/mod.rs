mod shipment_repository;
mod store_pool;

pub use shipment_repository::ShipmentRepository;
pub use store_pool::{PoolStats, StorePool};
