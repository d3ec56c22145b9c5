use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geo::GeoPoint;
use crate::models::driver::DriverId;
use crate::models::trip::{Trip, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Waiting,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Completed => "completed",
        }
    }

    /// Waiting and accepted requests still track a live ride.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Accepted)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "completed" => Ok(Self::Completed),
            other => Err(Error::Corrupt(format!("unknown request status {other:?}"))),
        }
    }
}

/// Driver-facing offer for one trip. Passenger and route details are copied
/// from the trip so listing never needs a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRideRequest {
    pub request_id: String,
    pub trip_id: String,
    pub passenger_id: UserId,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub pickup_location: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_location: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub car_type: String,
    pub estimated_cost: f64,
    pub estimated_distance: f64,
    pub estimated_duration: f64,
    pub payment_method: String,
    pub status: RequestStatus,
    pub assigned_driver_id: Option<DriverId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub rejected_by: Vec<DriverId>,
    pub rejection_count: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingRideRequest {
    /// Fresh waiting offer for `trip`.
    pub fn for_trip(
        request_id: String,
        trip: &Trip,
        passenger_phone: Option<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            trip_id: trip.id.clone(),
            passenger_id: trip.passenger_id,
            passenger_name: trip.passenger_name.clone(),
            passenger_phone,
            pickup_location: trip.pickup.label.clone(),
            pickup_lat: trip.pickup.point.lat,
            pickup_lng: trip.pickup.point.lng,
            dropoff_location: trip.dropoff.label.clone(),
            dropoff_lat: trip.dropoff.point.lat,
            dropoff_lng: trip.dropoff.point.lng,
            car_type: trip.car_type.clone(),
            estimated_cost: trip.cost,
            estimated_distance: trip.distance_km,
            estimated_duration: trip.duration_min,
            payment_method: trip.payment_method.clone(),
            status: RequestStatus::Waiting,
            assigned_driver_id: None,
            assigned_at: None,
            rejected_by: Vec::new(),
            rejection_count: 0,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Follow-up offer for the same trip after this one was handed back,
    /// keeping everyone who already declined out of it.
    pub fn reopened(&self, request_id: String, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            status: RequestStatus::Waiting,
            assigned_driver_id: None,
            assigned_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn pickup(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_lat, self.pickup_lng)
    }

    pub fn has_rejected(&self, driver_id: DriverId) -> bool {
        self.rejected_by.contains(&driver_id)
    }

    /// Adds `driver_id` to the rejection set. Returns false when already present.
    pub fn add_rejection(&mut self, driver_id: DriverId) -> bool {
        if self.has_rejected(driver_id) {
            return false;
        }
        self.rejected_by.push(driver_id);
        self.rejection_count = self.rejected_by.len() as i32;
        true
    }
}
