mod api_server;
mod handlers;
mod instrumentation;

pub use api_server::{build_router, ApiServer, ApiState, ShutdownReport};
pub use handlers::{HealthResponse, ReadyResponse};
pub use instrumentation::{instrument_requests, record_safely, RequestObservation, UNKNOWN_ROUTE};
