use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;

use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::driver::DriverId;

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub label: String,
    pub point: GeoPoint,
    /// GPS accuracy in metres as reported by the passenger's device.
    pub accuracy_m: Option<f64>,
    pub fixed_at: Option<DateTime<Utc>>,
}

/// Location as sent by a client; coordinates are validated into a `Place`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceInput {
    #[serde(default)]
    pub location: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PlaceInput {
    pub fn validate(self, field: &str) -> Result<Place> {
        let point = GeoPoint::parse(field, self.lat, self.lng)?;
        let accuracy_m = self.accuracy.filter(|a| a.is_finite() && *a >= 0.0);
        Ok(Place {
            label: self.location.trim().to_string(),
            point,
            accuracy_m,
            fixed_at: self.timestamp,
        })
    }
}

/// Passenger request body for a new trip.
#[derive(Debug, Clone, Deserialize)]
pub struct TripDraft {
    pub passenger_id: UserId,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub pickup: PlaceInput,
    pub dropoff: PlaceInput,
    pub car_type: Option<String>,
    pub cost: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rating {
    pub stars: u8,
    pub review: Option<String>,
}

impl Rating {
    pub fn new(stars: i64, review: Option<String>) -> Result<Self> {
        if !(1..=5).contains(&stars) {
            return Err(Error::validation("rating must be between 1 and 5"));
        }
        let review = review.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        Ok(Self {
            stars: stars as u8,
            review,
        })
    }
}

/// Coarse position of a trip in its lifecycle, used as the guard of every
/// conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripPhase {
    Pending,
    Assigned,
    Ongoing,
    Completed,
    Rated,
    Cancelled,
}

impl TripPhase {
    /// Value of the legacy `status` column.
    pub fn status(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Ongoing => "ongoing",
            Self::Completed | Self::Rated => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Value of the legacy `trip_status` column.
    pub fn trip_status(self) -> Option<&'static str> {
        match self {
            Self::Ongoing => Some("started"),
            Self::Completed => Some("completed"),
            Self::Rated => Some("rated"),
            Self::Pending | Self::Assigned | Self::Cancelled => None,
        }
    }

    pub fn from_columns(status: &str, trip_status: Option<&str>) -> Result<Self> {
        let phase = match (status, trip_status) {
            ("pending", None) => Self::Pending,
            ("assigned", None) => Self::Assigned,
            ("ongoing", Some("started")) => Self::Ongoing,
            ("completed", Some("completed")) => Self::Completed,
            ("completed", Some("rated")) => Self::Rated,
            ("cancelled", _) => Self::Cancelled,
            (s, t) => {
                return Err(Error::Corrupt(format!(
                    "trip status {s:?} with trip_status {t:?}"
                )))
            }
        };
        Ok(phase)
    }
}

impl fmt::Display for TripPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rated => f.write_str("rated"),
            other => f.write_str(other.status()),
        }
    }
}

/// Lifecycle state. Each variant carries only the timestamps that are
/// meaningful in it, so a trip can never be both completed and cancelled.
#[derive(Debug, Clone, PartialEq)]
pub enum TripState {
    Pending,
    Assigned,
    Ongoing {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
        rating: Option<Rating>,
    },
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: String,
    pub passenger_id: UserId,
    pub passenger_name: Option<String>,
    pub driver_id: Option<DriverId>,
    pub driver_name: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub pickup: Place,
    pub dropoff: Place,
    pub car_type: String,
    pub cost: f64,
    pub distance_km: f64,
    pub duration_min: f64,
    pub payment_method: String,
    pub state: TripState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn phase(&self) -> TripPhase {
        match &self.state {
            TripState::Pending => TripPhase::Pending,
            TripState::Assigned => TripPhase::Assigned,
            TripState::Ongoing { .. } => TripPhase::Ongoing,
            TripState::Completed { rating: None, .. } => TripPhase::Completed,
            TripState::Completed { rating: Some(_), .. } => TripPhase::Rated,
            TripState::Cancelled { .. } => TripPhase::Cancelled,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TripState::Ongoing { started_at } => Some(*started_at),
            TripState::Completed { started_at, .. } | TripState::Cancelled { started_at, .. } => {
                *started_at
            }
            TripState::Pending | TripState::Assigned => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TripState::Completed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TripState::Cancelled { cancelled_at, .. } => Some(*cancelled_at),
            _ => None,
        }
    }

    pub fn rating(&self) -> Option<&Rating> {
        match &self.state {
            TripState::Completed { rating, .. } => rating.as_ref(),
            _ => None,
        }
    }
}

/// Row shape of the `trips` table, also the JSON shape served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TripRecord {
    pub id: String,
    pub passenger_id: i64,
    pub passenger_name: Option<String>,
    pub driver_id: Option<i64>,
    pub driver_name: Option<String>,
    pub pickup_location: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_accuracy: Option<f64>,
    pub pickup_timestamp: Option<DateTime<Utc>>,
    pub dropoff_location: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_accuracy: Option<f64>,
    pub dropoff_timestamp: Option<DateTime<Utc>>,
    pub car_type: String,
    pub cost: f64,
    pub distance: f64,
    pub duration: f64,
    pub payment_method: String,
    pub status: String,
    pub trip_status: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub rating: Option<i16>,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Trip> for TripRecord {
    fn from(trip: &Trip) -> Self {
        let phase = trip.phase();
        let rating = trip.rating();
        Self {
            id: trip.id.clone(),
            passenger_id: trip.passenger_id,
            passenger_name: trip.passenger_name.clone(),
            driver_id: trip.driver_id,
            driver_name: trip.driver_name.clone(),
            pickup_location: trip.pickup.label.clone(),
            pickup_lat: trip.pickup.point.lat,
            pickup_lng: trip.pickup.point.lng,
            pickup_accuracy: trip.pickup.accuracy_m,
            pickup_timestamp: trip.pickup.fixed_at,
            dropoff_location: trip.dropoff.label.clone(),
            dropoff_lat: trip.dropoff.point.lat,
            dropoff_lng: trip.dropoff.point.lng,
            dropoff_accuracy: trip.dropoff.accuracy_m,
            dropoff_timestamp: trip.dropoff.fixed_at,
            car_type: trip.car_type.clone(),
            cost: trip.cost,
            distance: trip.distance_km,
            duration: trip.duration_min,
            payment_method: trip.payment_method.clone(),
            status: phase.status().to_string(),
            trip_status: phase.trip_status().map(str::to_string),
            assigned_at: trip.assigned_at,
            started_at: trip.started_at(),
            completed_at: trip.completed_at(),
            cancelled_at: trip.cancelled_at(),
            rating: rating.map(|r| i16::from(r.stars)),
            review: rating.and_then(|r| r.review.clone()),
            created_at: trip.created_at,
            updated_at: trip.updated_at,
        }
    }
}

impl TryFrom<TripRecord> for Trip {
    type Error = Error;

    fn try_from(row: TripRecord) -> Result<Self> {
        let phase = TripPhase::from_columns(&row.status, row.trip_status.as_deref())?;
        let missing = |column: &str| Error::Corrupt(format!("trip {} is {phase} without {column}", row.id));

        let state = match phase {
            TripPhase::Pending => TripState::Pending,
            TripPhase::Assigned => TripState::Assigned,
            TripPhase::Ongoing => TripState::Ongoing {
                started_at: row.started_at.ok_or_else(|| missing("started_at"))?,
            },
            TripPhase::Completed | TripPhase::Rated => {
                let rating = match (phase, row.rating) {
                    (TripPhase::Rated, Some(stars)) => Some(Rating {
                        stars: u8::try_from(stars).map_err(|_| missing("valid rating"))?,
                        review: row.review.clone(),
                    }),
                    (TripPhase::Rated, None) => return Err(missing("rating")),
                    _ => None,
                };
                TripState::Completed {
                    started_at: row.started_at,
                    completed_at: row.completed_at.ok_or_else(|| missing("completed_at"))?,
                    rating,
                }
            }
            TripPhase::Cancelled => TripState::Cancelled {
                started_at: row.started_at,
                cancelled_at: row.cancelled_at.ok_or_else(|| missing("cancelled_at"))?,
            },
        };
        if row.completed_at.is_some() && row.cancelled_at.is_some() {
            return Err(Error::Corrupt(format!(
                "trip {} has both completed_at and cancelled_at",
                row.id
            )));
        }

        Ok(Self {
            id: row.id,
            passenger_id: row.passenger_id,
            passenger_name: row.passenger_name,
            driver_id: row.driver_id,
            driver_name: row.driver_name,
            assigned_at: row.assigned_at,
            pickup: Place {
                label: row.pickup_location,
                point: GeoPoint::new(row.pickup_lat, row.pickup_lng),
                accuracy_m: row.pickup_accuracy,
                fixed_at: row.pickup_timestamp,
            },
            dropoff: Place {
                label: row.dropoff_location,
                point: GeoPoint::new(row.dropoff_lat, row.dropoff_lng),
                accuracy_m: row.dropoff_accuracy,
                fixed_at: row.dropoff_timestamp,
            },
            car_type: row.car_type,
            cost: row.cost,
            distance_km: row.distance,
            duration_min: row.duration,
            payment_method: row.payment_method,
            state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Serialize for Trip {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        TripRecord::from(self).serialize(serializer)
    }
}

/// Allow-listed editable fields of a pending trip. Unknown keys are refused
/// at deserialization so a request body can never reach other columns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TripDetailsPatch {
    pub pickup_location: Option<String>,
    pub dropoff_location: Option<String>,
    pub payment_method: Option<String>,
}

impl TripDetailsPatch {
    pub fn is_empty(&self) -> bool {
        self.pickup_location.is_none() && self.dropoff_location.is_none() && self.payment_method.is_none()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_trip() -> Trip {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        Trip {
            id: "trip-1".into(),
            passenger_id: 42,
            passenger_name: Some("Sara".into()),
            driver_id: None,
            driver_name: None,
            assigned_at: None,
            pickup: Place {
                label: "Olaya".into(),
                point: GeoPoint::new(24.7136, 46.6753),
                accuracy_m: Some(12.0),
                fixed_at: None,
            },
            dropoff: Place {
                label: "Malaz".into(),
                point: GeoPoint::new(24.6917, 46.6853),
                accuracy_m: None,
                fixed_at: None,
            },
            car_type: "economy".into(),
            cost: 35.5,
            distance_km: 2.6,
            duration_min: 6.0,
            payment_method: "cash".into(),
            state: TripState::Pending,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn record_round_trip_preserves_rated_state() {
        let mut trip = sample_trip();
        let at = trip.created_at;
        trip.driver_id = Some(7);
        trip.state = TripState::Completed {
            started_at: Some(at),
            completed_at: at,
            rating: Some(Rating::new(5, Some(" smooth ".into())).unwrap()),
        };

        let record = TripRecord::from(&trip);
        assert_eq!(record.status, "completed");
        assert_eq!(record.trip_status.as_deref(), Some("rated"));
        assert_eq!(record.review.as_deref(), Some("smooth"));

        let back = Trip::try_from(record).unwrap();
        assert_eq!(back, trip);
        assert_eq!(back.phase(), TripPhase::Rated);
    }

    #[test]
    fn contradictory_columns_are_rejected() {
        let mut record = TripRecord::from(&sample_trip());
        record.trip_status = Some("completed".into());
        assert!(matches!(Trip::try_from(record), Err(Error::Corrupt(_))));
    }

    #[test]
    fn rating_must_be_one_to_five() {
        assert!(Rating::new(0, None).is_err());
        assert!(Rating::new(6, None).is_err());
        assert_eq!(Rating::new(4, Some("  ".into())).unwrap().review, None);
    }

    #[test]
    fn details_patch_refuses_unknown_keys() {
        let parsed: std::result::Result<TripDetailsPatch, _> =
            serde_json::from_str(r#"{"payment_method":"card","cost":1}"#);
        assert!(parsed.is_err());
    }
}
