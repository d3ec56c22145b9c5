//! JSON-over-HTTP surface. Handlers are thin: parse, call one engine
//! operation, serialize.

use axum::extract::rejection::JsonRejection;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::db::Gateway;
use crate::engine::RideServices;
use crate::error::{Error, Result};
use crate::notify::BroadcastBridge;

mod drivers;
mod errors;
mod events;
mod rides;
mod trips;

/// Shared application state.
#[derive(Clone)]
pub struct AppState<G> {
    pub services: RideServices<G>,
    pub events: BroadcastBridge,
}

pub fn build_router<G: Gateway>(state: AppState<G>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events::stream::<G>))
        .route("/trips", post(trips::create::<G>))
        .route("/trips/pending/next", get(trips::next_pending::<G>))
        .route("/trips/{id}", get(trips::get::<G>).patch(trips::update_details::<G>))
        .route("/trips/{id}/live", get(trips::live::<G>))
        .route("/trips/{id}/assign", patch(trips::assign::<G>))
        .route("/trips/{id}/status", patch(trips::update_status::<G>))
        .route("/trips/{id}/reject", patch(trips::reject::<G>))
        .route("/users/{id}/trips", get(trips::list_for_passenger::<G>))
        .route("/pending-rides/cleanup", post(rides::cleanup::<G>))
        .route("/pending-rides/{id}", get(rides::get::<G>))
        .route("/pending-rides/{id}/accept", post(rides::accept::<G>))
        .route("/pending-rides/{id}/reject", post(rides::reject::<G>))
        .route("/pending-rides/{id}/cancel", post(rides::cancel::<G>))
        .route("/drivers/nearest", get(drivers::nearest::<G>))
        .route("/drivers/earnings/reset-daily", post(drivers::reset_daily::<G>))
        .route("/drivers/{id}/pending-rides", get(drivers::pending_rides::<G>))
        .route("/drivers/{id}/trips", get(drivers::trips::<G>))
        .route("/drivers/{id}/stats", get(drivers::stats::<G>))
        .route("/drivers/{id}/earnings", get(drivers::earnings::<G>))
        .route("/drivers/{id}/earnings/reconcile", post(drivers::reconcile::<G>))
        .route("/drivers/{id}/location", patch(drivers::update_location::<G>))
        .route("/drivers/{id}/status", patch(drivers::update_status::<G>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health`
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Unwraps a JSON body, reporting malformed input as a validation error
/// instead of axum's plain-text rejection.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::validation(rejection.body_text()))
}
