//! Adapters Layer
//!
//! Inbound (HTTP) and outbound (store) adapters around the domain ports.

pub mod inbound;
pub mod outbound;
