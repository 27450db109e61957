//! HTTP Handlers
//!
//! Probes, the metrics scrape endpoint and the shipment CRUD handlers.
//! Store errors are converted to status codes here and never escape.

use super::api_server::ApiState;
use crate::domain::entities::{NewShipment, Shipment, ShipmentInput, ShipmentPatch};
use crate::error::ApiError;
use crate::infrastructure::metrics::TEXT_CONTENT_TYPE;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Liveness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Readiness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub db: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// Parse an optional JSON body. Empty and `null` bodies mean "no fields".
fn parse_input(body: &Bytes) -> Result<ShipmentInput, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ShipmentInput::default());
    }
    serde_json::from_slice::<Option<ShipmentInput>>(body)
        .map(Option::unwrap_or_default)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Liveness: no dependencies, no I/O.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness: one bounded round trip against the store.
pub async fn ready_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let outcome = tokio::time::timeout(state.ready_timeout, state.store.ping()).await;

    match outcome {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready".to_string(),
                db: true,
            }),
        ),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "readiness check failed");
            not_ready()
        }
        Err(_) => {
            tracing::warn!(timeout = ?state.ready_timeout, "readiness check timed out");
            not_ready()
        }
    }
}

fn not_ready() -> (StatusCode, Json<ReadyResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadyResponse {
            status: "not_ready".to_string(),
            db: false,
        }),
    )
}

/// Scrape endpoint.
pub async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

pub async fn list_shipments(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Shipment>>, ApiError> {
    let status = query.status.as_deref().filter(|s| !s.is_empty());
    let shipments = state
        .shipments
        .list(status)
        .await
        .map_err(ApiError::store("list shipments"))?;
    Ok(Json(shipments))
}

pub async fn get_shipment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Shipment>, ApiError> {
    state
        .shipments
        .get(&id)
        .await
        .map_err(ApiError::store("get shipment"))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn create_shipment(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Shipment>), ApiError> {
    let input = parse_input(&body)?;
    let created = state
        .shipments
        .create(NewShipment::from_input(input))
        .await
        .map_err(ApiError::store("create shipment"))?;

    tracing::debug!(id = %created.id, "created shipment");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_shipment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Shipment>, ApiError> {
    let patch = ShipmentPatch::from(parse_input(&body)?);
    state
        .shipments
        .update(&id, patch)
        .await
        .map_err(ApiError::store("update shipment"))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_shipment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .shipments
        .delete(&id)
        .await
        .map_err(ApiError::store("delete shipment"))?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

/// Unmatched routes.
pub async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}
