use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{body, AppState};
use crate::db::Gateway;
use crate::error::Result;
use crate::models::{DriverId, PendingRideRequest};

#[derive(Debug, Deserialize)]
pub struct DriverBody {
    pub driver_id: DriverId,
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub expired: usize,
}

/// `GET /pending-rides/{id}`
pub async fn get<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
) -> Result<Json<PendingRideRequest>> {
    Ok(Json(state.services.matching.get(&id).await?))
}

/// `POST /pending-rides/{id}/accept`: 409 when another driver got there first.
pub async fn accept<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<DriverBody>, JsonRejection>,
) -> Result<Json<PendingRideRequest>> {
    let DriverBody { driver_id } = body(payload)?;
    Ok(Json(state.services.matching.accept(&id, driver_id).await?))
}

/// `POST /pending-rides/{id}/reject`
pub async fn reject<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<DriverBody>, JsonRejection>,
) -> Result<Json<PendingRideRequest>> {
    let DriverBody { driver_id } = body(payload)?;
    Ok(Json(state.services.matching.reject(&id, driver_id).await?))
}

/// `POST /pending-rides/{id}/cancel`
pub async fn cancel<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
) -> Result<Json<PendingRideRequest>> {
    Ok(Json(state.services.matching.cancel(&id).await?))
}

/// `POST /pending-rides/cleanup`
pub async fn cleanup<G: Gateway>(State(state): State<AppState<G>>) -> Result<Json<CleanupReport>> {
    let expired = state.services.matching.sweep_expired(Utc::now()).await?;
    Ok(Json(CleanupReport { expired }))
}
