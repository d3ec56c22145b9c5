use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::geo::GeoPoint;

/// Location ping recorded while a trip is ongoing.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TripPoint {
    pub trip_id: String,
    pub driver_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
}

impl TripPoint {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}
