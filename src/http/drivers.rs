use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{body, AppState};
use crate::db::Gateway;
use crate::engine::{DriverRideFilter, DriverStats, RideOffer};
use crate::error::Result;
use crate::geo::NearestDriver;
use crate::models::{Driver, DriverEarningsRecord, DriverId, DriverStatus, Trip};

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub car_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NearestResponse {
    /// Null when nobody eligible is within the search radius.
    pub driver: Option<NearestDriver>,
    pub radius_km: f64,
}

#[derive(Debug, Deserialize)]
pub struct EarningsQuery {
    /// Defaults to thirty days back.
    pub since: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: DriverStatus,
}

#[derive(Debug, Serialize)]
pub struct ResetReport {
    pub drivers_reset: u64,
}

/// `GET /drivers/nearest?lat=..&lng=..&car_type=..`
pub async fn nearest<G: Gateway>(
    State(state): State<AppState<G>>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<NearestResponse>> {
    let matching = &state.services.matching;
    let driver = matching
        .nearest_driver(query.lat, query.lng, query.car_type.as_deref())
        .await?;
    Ok(Json(NearestResponse {
        driver,
        radius_km: matching.search_radius_km(),
    }))
}

/// `GET /drivers/{id}/pending-rides`
pub async fn pending_rides<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<DriverId>,
    Query(filter): Query<DriverRideFilter>,
) -> Result<Json<Vec<RideOffer>>> {
    Ok(Json(state.services.matching.list_for_driver(id, filter).await?))
}

/// `GET /drivers/{id}/trips`
pub async fn trips<G: Gateway>(State(state): State<AppState<G>>, Path(id): Path<DriverId>) -> Result<Json<Vec<Trip>>> {
    Ok(Json(state.services.gateway.list_trips_by_driver(id).await?))
}

/// `GET /drivers/{id}/stats`: counters plus a drift check against history.
pub async fn stats<G: Gateway>(State(state): State<AppState<G>>, Path(id): Path<DriverId>) -> Result<Json<DriverStats>> {
    Ok(Json(state.services.earnings.stats(id).await?))
}

/// `GET /drivers/{id}/earnings?since=YYYY-MM-DD`
pub async fn earnings<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<DriverId>,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<Vec<DriverEarningsRecord>>> {
    let since = query
        .since
        .unwrap_or_else(|| (Utc::now() - Duration::days(30)).date_naive());
    Ok(Json(state.services.earnings.history(id, since).await?))
}

/// `POST /drivers/{id}/earnings/reconcile`
pub async fn reconcile<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<DriverId>,
) -> Result<Json<DriverEarningsRecord>> {
    Ok(Json(state.services.earnings.reconcile(id, Utc::now()).await?))
}

/// `POST /drivers/earnings/reset-daily`
pub async fn reset_daily<G: Gateway>(State(state): State<AppState<G>>) -> Result<Json<ResetReport>> {
    let drivers_reset = state.services.earnings.reset_daily(Utc::now()).await?;
    Ok(Json(ResetReport { drivers_reset }))
}

/// `PATCH /drivers/{id}/location`
pub async fn update_location<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<DriverId>,
    payload: std::result::Result<Json<LocationBody>, JsonRejection>,
) -> Result<Json<Driver>> {
    let LocationBody { lat, lng } = body(payload)?;
    Ok(Json(state.services.lifecycle.record_location(id, lat, lng).await?))
}

/// `PATCH /drivers/{id}/status`
pub async fn update_status<G: Gateway>(
    State(state): State<AppState<G>>,
    Path(id): Path<DriverId>,
    payload: std::result::Result<Json<StatusBody>, JsonRejection>,
) -> Result<Json<Driver>> {
    let StatusBody { status } = body(payload)?;
    Ok(Json(state.services.gateway.set_driver_status(id, status).await?))
}
