use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::{body, AppState};
use crate::db::Gateway;
use crate::engine::{CreatedRide, LiveSnapshot, StatusUpdate, TripEvent};
use crate::error::{Error, Result};
use crate::models::{DriverId, Trip, TripDetailsPatch, TripDraft, UserId};

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub driver_id: DriverId,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
    pub driver_id: Option<DriverId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub driver_id: Option<DriverId>,
}

/// `POST /trips`
pub async fn create<G: Gateway>(
    State(state): State<AppState<G>>,
    payload: std::result::Result<Json<TripDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedRide>)> {
    let created = state.services.matching.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /trips/{id}`
pub async fn get<G: Gateway>(State(state): State<AppState<G>>, Path(id): Path<String>) -> Result<Json<Trip>> {
    Ok(Json(state.services.lifecycle.get(&id).await?))
}

/// `PATCH /trips/{id}`: only the allow-listed detail fields.
pub async fn update_details<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<TripDetailsPatch>, JsonRejection>,
) -> Result<Json<Trip>> {
    let patch = body(payload)?;
    Ok(Json(state.services.lifecycle.update_details(&id, patch).await?))
}

/// `GET /trips/{id}/live`
pub async fn live<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
) -> Result<Json<LiveSnapshot>> {
    Ok(Json(state.services.lifecycle.live_snapshot(&id).await?))
}

/// `PATCH /trips/{id}/assign`
pub async fn assign<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<AssignBody>, JsonRejection>,
) -> Result<Json<Trip>> {
    let AssignBody { driver_id } = body(payload)?;
    let trip = state
        .services
        .lifecycle
        .update_status(&id, TripEvent::Assign { driver_id })
        .await?;
    Ok(Json(trip))
}

/// `PATCH /trips/{id}/status`
pub async fn update_status<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Trip>> {
    let event = TripEvent::try_from(body(payload)?)?;
    Ok(Json(state.services.lifecycle.update_status(&id, event).await?))
}

/// `PATCH /trips/{id}/reject`
pub async fn reject<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<String>,
    raw: Bytes,
) -> Result<Json<Trip>> {
    // The body is optional here: an empty one means the assigned driver.
    let RejectBody { driver_id } = if raw.iter().all(u8::is_ascii_whitespace) {
        RejectBody::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| Error::validation(e.to_string()))?
    };
    let trip = state
        .services
        .lifecycle
        .update_status(&id, TripEvent::Reject { driver_id })
        .await?;
    Ok(Json(trip))
}

/// `GET /trips/pending/next`: 204 when nothing is waiting.
pub async fn next_pending<G: Gateway>(
    State(state): State<AppState<G>>,
    Query(query): Query<NextQuery>,
) -> Result<Response> {
    Ok(match state.services.matching.next_pending(query.driver_id).await? {
        Some(request) => Json(request).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// `GET /users/{id}/trips`
pub async fn list_for_passenger<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<Trip>>> {
    Ok(Json(state.services.gateway.list_trips_by_passenger(id).await?))
}
