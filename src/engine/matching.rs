use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::lifecycle::{TripEvent, TripLifecycle};
use super::DispatchSettings;
use crate::db::{Gateway, RideChange, WaitingFilter};
use crate::error::{Error, Result};
use crate::geo::{haversine_km, GeoIndex, GeoPoint, NearestDriver};
use crate::models::{DriverId, PendingRideRequest, RequestStatus, Trip, TripDraft, TripState};
use crate::notify::{NotificationBridge, RideEvent};
use crate::pricing::round_money;

#[derive(Debug, Clone, Serialize)]
pub struct CreatedRide {
    pub trip: Trip,
    pub pending_request: PendingRideRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriverRideFilter {
    /// Overrides the driver's own vehicle class.
    pub car_type: Option<String>,
    pub max_distance_km: Option<f64>,
}

/// A waiting request as shown to one driver.
#[derive(Debug, Clone, Serialize)]
pub struct RideOffer {
    #[serde(flatten)]
    pub request: PendingRideRequest,
    /// Straight-line distance from the driver to the pickup, when the
    /// driver's position is known.
    pub distance_km: Option<f64>,
}

#[derive(Clone)]
pub struct MatchingEngine<G> {
    gateway: G,
    lifecycle: TripLifecycle<G>,
    geo: GeoIndex<G>,
    notifier: Arc<dyn NotificationBridge>,
    settings: Arc<DispatchSettings>,
}

impl<G: Gateway> MatchingEngine<G> {
    pub fn new(
        gateway: G,
        lifecycle: TripLifecycle<G>,
        geo: GeoIndex<G>,
        notifier: Arc<dyn NotificationBridge>,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        Self {
            gateway,
            lifecycle,
            geo,
            notifier,
            settings,
        }
    }

    /// Persists a pending trip and its waiting request together.
    pub async fn create(&self, draft: TripDraft) -> Result<CreatedRide> {
        let now = Utc::now();
        let passenger_phone = draft
            .passenger_phone
            .clone()
            .filter(|p| !p.trim().is_empty());
        let trip = self.build_trip(draft, now)?;
        let pending_request = PendingRideRequest::for_trip(
            Uuid::new_v4().to_string(),
            &trip,
            passenger_phone,
            now,
            now + self.settings.pending_ttl,
        );

        self.gateway
            .commit(
                RideChange::new()
                    .with_new_trip(trip.clone())
                    .with_new_request(pending_request.clone()),
            )
            .await?;

        info!(
            trip_id = %trip.id,
            request_id = %pending_request.request_id,
            car_type = %trip.car_type,
            "ride requested"
        );
        self.notifier.emit(RideEvent::RideRequested {
            trip_id: trip.id.clone(),
            request_id: pending_request.request_id.clone(),
            car_type: trip.car_type.clone(),
            pickup_lat: trip.pickup.point.lat,
            pickup_lng: trip.pickup.point.lng,
        });
        Ok(CreatedRide {
            trip,
            pending_request,
        })
    }

    fn build_trip(&self, draft: TripDraft, now: DateTime<Utc>) -> Result<Trip> {
        if draft.passenger_id <= 0 {
            return Err(Error::validation("passenger_id is required"));
        }
        let pickup = draft.pickup.validate("pickup")?;
        let dropoff = draft.dropoff.validate("dropoff")?;
        let car_type = draft
            .car_type
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::validation("car_type is required"))?;
        let cost = match draft.cost {
            Some(c) if c.is_finite() && c >= 0.0 => c,
            Some(_) => return Err(Error::validation("cost must be a non-negative number")),
            None => return Err(Error::validation("cost is required")),
        };

        let distance_km = draft
            .distance
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or_else(|| round_money(haversine_km(pickup.point, dropoff.point)));
        let duration_min = draft
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or_else(|| estimate_minutes(distance_km, self.settings.average_speed_kmh));
        let payment_method = draft
            .payment_method
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "cash".to_string());

        Ok(Trip {
            id: Uuid::new_v4().to_string(),
            passenger_id: draft.passenger_id,
            passenger_name: draft.passenger_name,
            driver_id: None,
            driver_name: None,
            assigned_at: None,
            pickup,
            dropoff,
            car_type,
            cost,
            distance_km,
            duration_min,
            payment_method,
            state: TripState::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, request_id: &str) -> Result<PendingRideRequest> {
        self.gateway.get_request(request_id).await
    }

    /// Live waiting requests for a driver's vehicle class, skipping anything
    /// they turned down. Nearest pickup first when the driver's position is
    /// known, oldest first otherwise.
    pub async fn list_for_driver(&self, driver_id: DriverId, filter: DriverRideFilter) -> Result<Vec<RideOffer>> {
        let driver = self.gateway.get_driver(driver_id).await?;
        let car_type = filter
            .car_type
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| driver.car_type.clone());

        let waiting = self
            .gateway
            .list_waiting(&WaitingFilter {
                car_type: Some(car_type),
                exclude_driver: Some(driver_id),
                live_at: Some(Utc::now()),
            })
            .await?;

        let Some(origin) = driver.location() else {
            return Ok(waiting
                .into_iter()
                .map(|request| RideOffer {
                    request,
                    distance_km: None,
                })
                .collect());
        };

        let mut offers: Vec<RideOffer> = waiting
            .into_iter()
            .map(|request| {
                let distance = haversine_km(origin, request.pickup());
                RideOffer {
                    request,
                    distance_km: Some(distance),
                }
            })
            .filter(|offer| match (filter.max_distance_km, offer.distance_km) {
                (Some(max), Some(d)) => d <= max,
                _ => true,
            })
            .collect();
        // Gateway order (created_at, request_id) is the tie-break.
        offers.sort_by(|a, b| {
            let da = a.distance_km.unwrap_or(f64::MAX);
            let db = b.distance_km.unwrap_or(f64::MAX);
            da.total_cmp(&db)
        });
        Ok(offers)
    }

    /// First offer for `driver_id`, or the oldest waiting request overall.
    pub async fn next_pending(&self, driver_id: Option<DriverId>) -> Result<Option<PendingRideRequest>> {
        match driver_id {
            Some(id) => Ok(self
                .list_for_driver(id, DriverRideFilter::default())
                .await?
                .into_iter()
                .next()
                .map(|offer| offer.request)),
            None => Ok(self
                .gateway
                .list_waiting(&WaitingFilter {
                    live_at: Some(Utc::now()),
                    ..WaitingFilter::default()
                })
                .await?
                .into_iter()
                .next()),
        }
    }

    /// First committed accept wins; everyone else gets `Conflict`.
    pub async fn accept(&self, request_id: &str, driver_id: DriverId) -> Result<PendingRideRequest> {
        let request = self.gateway.get_request(request_id).await?;
        let now = Utc::now();

        if request.status != RequestStatus::Waiting {
            return Err(Error::conflict(format!(
                "ride request {request_id} is {} and no longer available",
                request.status
            )));
        }
        if request.expires_at <= now {
            return Err(Error::conflict(format!("ride request {request_id} has expired")));
        }
        if request.has_rejected(driver_id) {
            return Err(Error::conflict(format!(
                "driver {driver_id} already declined ride request {request_id}"
            )));
        }

        let trip = self.gateway.get_trip(&request.trip_id).await?;
        let (_, accepted) = self
            .lifecycle
            .assign(trip, driver_id, Some(request), now)
            .await
            .map_err(|e| match e {
                Error::InvalidTransition { from, .. } => Error::conflict(format!(
                    "trip for ride request {request_id} is already {from}"
                )),
                other => other,
            })?;
        info!(request_id, driver_id, "ride request accepted");
        accepted.ok_or_else(|| Error::conflict(format!("ride request {request_id} is no longer available")))
    }

    /// Idempotent. A waiting request only gains a rejection; the driver who
    /// holds an accepted request hands the trip back to matching instead.
    pub async fn reject(&self, request_id: &str, driver_id: DriverId) -> Result<PendingRideRequest> {
        let request = self.gateway.get_request(request_id).await?;
        if request.has_rejected(driver_id) {
            debug!(request_id, driver_id, "rejection already recorded");
            return Ok(request);
        }

        match request.status {
            RequestStatus::Waiting => {
                let updated = self
                    .gateway
                    .record_rejection(request_id, driver_id, Utc::now())
                    .await?;
                info!(request_id, driver_id, rejections = updated.rejection_count, "ride request rejected");
                Ok(updated)
            }
            RequestStatus::Accepted if request.assigned_driver_id == Some(driver_id) => {
                self.lifecycle
                    .update_status(
                        &request.trip_id,
                        TripEvent::Reject {
                            driver_id: Some(driver_id),
                        },
                    )
                    .await?;
                self.gateway.get_request(request_id).await
            }
            status => Err(Error::conflict(format!(
                "ride request {request_id} is {status} and no longer takes rejections"
            ))),
        }
    }

    /// Cancels the request together with its trip.
    pub async fn cancel(&self, request_id: &str) -> Result<PendingRideRequest> {
        let request = self.gateway.get_request(request_id).await?;
        if !request.status.is_active() {
            return Err(Error::conflict(format!(
                "ride request {request_id} is already {}",
                request.status
            )));
        }
        self.lifecycle
            .update_status(&request.trip_id, TripEvent::Cancel)
            .await
            .map_err(|e| match e {
                Error::InvalidTransition { from, .. } => Error::conflict(format!(
                    "trip for ride request {request_id} is already {from}"
                )),
                other => other,
            })?;
        self.gateway.get_request(request_id).await
    }

    /// Expires waiting requests past their deadline. Running it twice, or
    /// from two processes at once, expires each row once.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.gateway.expire_waiting(now).await?;
        for request in &expired {
            debug!(request_id = %request.request_id, trip_id = %request.trip_id, "ride request expired");
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale ride requests");
        }
        Ok(expired.len())
    }

    pub async fn nearest_driver(
        &self,
        lat: Option<f64>,
        lng: Option<f64>,
        car_type: Option<&str>,
    ) -> Result<Option<NearestDriver>> {
        let origin = GeoPoint::parse("search", lat, lng)?;
        let car_type = car_type.map(str::trim).filter(|c| !c.is_empty());
        self.geo.nearest_driver(origin, car_type, Utc::now()).await
    }

    pub fn search_radius_km(&self) -> f64 {
        self.geo.radius_km()
    }
}

/// Travel time at `speed_kmh`; a non-positive speed yields no estimate.
fn estimate_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh.is_finite() && speed_kmh > 0.0 {
        round_money(distance_km / speed_kmh * 60.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryGateway;
    use crate::engine::RideServices;
    use crate::models::PlaceInput;
    use crate::notify::BroadcastBridge;
    use crate::pricing::EstimatedFare;

    fn services() -> RideServices<MemoryGateway> {
        RideServices::new(
            MemoryGateway::new(),
            DispatchSettings::default(),
            Arc::new(EstimatedFare),
            Arc::new(BroadcastBridge::default()),
        )
    }

    fn draft() -> TripDraft {
        TripDraft {
            passenger_id: 42,
            passenger_name: Some("Sara".into()),
            passenger_phone: None,
            pickup: PlaceInput {
                location: "Olaya".into(),
                lat: Some(24.7136),
                lng: Some(46.6753),
                ..PlaceInput::default()
            },
            dropoff: PlaceInput {
                location: "Malaz".into(),
                lat: Some(24.6917),
                lng: Some(46.6853),
                ..PlaceInput::default()
            },
            car_type: Some("economy".into()),
            cost: Some(35.5),
            distance: None,
            duration: None,
            payment_method: None,
        }
    }

    #[tokio::test]
    async fn create_fills_in_distance_and_duration() {
        let svc = services();
        let ride = svc.matching.create(draft()).await.unwrap();
        assert!((ride.trip.distance_km - 2.63).abs() < 0.05);
        // 30 km/h average speed.
        assert!((ride.trip.duration_min - ride.trip.distance_km * 2.0).abs() < 0.02);
        assert_eq!(ride.trip.payment_method, "cash");
        assert_ne!(ride.trip.id, ride.pending_request.request_id);
    }

    #[tokio::test]
    async fn zero_average_speed_never_yields_infinite_duration() {
        let svc = RideServices::new(
            MemoryGateway::new(),
            DispatchSettings {
                average_speed_kmh: 0.0,
                ..DispatchSettings::default()
            },
            Arc::new(EstimatedFare),
            Arc::new(BroadcastBridge::default()),
        );
        let ride = svc.matching.create(draft()).await.unwrap();
        assert!(ride.trip.duration_min.is_finite());
        assert_eq!(estimate_minutes(15.0, 30.0), 30.0);
        assert_eq!(estimate_minutes(15.0, -1.0), 0.0);
    }

    #[tokio::test]
    async fn create_rejects_missing_fields() {
        let svc = services();

        let mut no_geo = draft();
        no_geo.pickup.lat = None;
        assert!(matches!(svc.matching.create(no_geo).await, Err(Error::Validation(_))));

        let mut no_cost = draft();
        no_cost.cost = None;
        assert!(matches!(svc.matching.create(no_cost).await, Err(Error::Validation(_))));

        let mut nan_cost = draft();
        nan_cost.cost = Some(f64::NAN);
        assert!(matches!(svc.matching.create(nan_cost).await, Err(Error::Validation(_))));

        let mut blank_class = draft();
        blank_class.car_type = Some("  ".into());
        assert!(matches!(svc.matching.create(blank_class).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let svc = services();
        assert!(matches!(svc.matching.accept("nope", 1).await, Err(Error::NotFound(_))));
        assert!(matches!(svc.matching.reject("nope", 1).await, Err(Error::NotFound(_))));
        assert!(matches!(svc.matching.cancel("nope").await, Err(Error::NotFound(_))));
    }
}
