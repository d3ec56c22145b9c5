//! Straight-line distance math and nearest-driver lookup.
//!
//! There is no road graph here: every distance is a great-circle
//! (haversine) distance in kilometres. `GeoIndex` keeps no state of its own,
//! it scans the online drivers the gateway hands back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Gateway;
use crate::error::{Error, Result};
use crate::models::driver::{Driver, DriverId};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Builds a point from optional request fields, rejecting missing,
    /// non-finite or out-of-range coordinates.
    pub fn parse(field: &str, lat: Option<f64>, lng: Option<f64>) -> Result<Self> {
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return Err(Error::validation(format!("{field} coordinates are required")));
        };
        if !lat.is_finite() || !lng.is_finite() {
            return Err(Error::validation(format!("{field} coordinates must be finite")));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::validation(format!("{field} coordinates out of range")));
        }
        Ok(Self { lat, lng })
    }
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let sin_dlat = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon = ((lon2 - lon1) * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Length of a recorded route, summing consecutive legs.
pub fn path_length_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|leg| haversine_km(leg[0], leg[1]))
        .sum()
}

/// Picks the closest candidate within `radius_km`. Equal distances resolve to
/// the lowest id so repeated lookups give the same answer.
pub fn nearest<I>(origin: GeoPoint, candidates: I, radius_km: f64) -> Option<(i64, f64)>
where
    I: IntoIterator<Item = (i64, GeoPoint)>,
{
    candidates
        .into_iter()
        .map(|(id, point)| (id, haversine_km(origin, point)))
        .filter(|(_, distance)| *distance <= radius_km)
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearestDriver {
    pub driver_id: DriverId,
    pub distance_km: f64,
}

#[derive(Clone)]
pub struct GeoIndex<G> {
    gateway: G,
    radius_km: f64,
    freshness: Duration,
}

impl<G: Gateway> GeoIndex<G> {
    pub fn new(gateway: G, radius_km: f64, freshness: Duration) -> Self {
        Self {
            gateway,
            radius_km,
            freshness,
        }
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Nearest online driver with a fresh location, optionally restricted to
    /// one vehicle class.
    pub async fn nearest_driver(
        &self,
        origin: GeoPoint,
        car_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<NearestDriver>> {
        let drivers = self.gateway.list_online_drivers().await?;
        let fresh_since = now - self.freshness;

        let candidates = drivers
            .iter()
            .filter(|d| car_type.map_or(true, |c| d.car_type.eq_ignore_ascii_case(c)))
            .filter_map(|d| fresh_location(d, fresh_since).map(|p| (d.id, p)));

        Ok(nearest(origin, candidates, self.radius_km).map(|(driver_id, distance_km)| {
            NearestDriver {
                driver_id,
                distance_km,
            }
        }))
    }
}

fn fresh_location(driver: &Driver, fresh_since: DateTime<Utc>) -> Option<GeoPoint> {
    match driver.location_updated_at {
        Some(at) if at >= fresh_since => driver.location(),
        _ => None,
    }
}
