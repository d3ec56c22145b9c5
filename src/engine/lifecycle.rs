//! Trip state machine.
//!
//! ```text
//! pending --assign--> assigned --start--> ongoing --complete--> completed --rate--> rated
//!    ^                   |                   |
//!    +------reject-------+                   |
//! pending/assigned/ongoing --cancel--> cancelled
//! ```
//!
//! [`plan_transition`] is the pure table. [`TripLifecycle::update_status`]
//! applies a planned transition with a conditional write, moves the ride
//! request alongside it in the same commit, and only then runs side effects
//! (earnings, events).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::earnings::EarningsSync;
use super::DispatchSettings;
use crate::db::{Gateway, RideChange};
use crate::error::{Error, Result};
use crate::geo::{path_length_km, GeoPoint};
use crate::models::{
    Driver, DriverId, DriverStatus, PendingRideRequest, Rating, RequestStatus, Trip, TripDetailsPatch,
    TripPhase, TripPoint, TripState,
};
use crate::notify::{NotificationBridge, RideEvent};
use crate::pricing::{round_money, FarePolicy, TripActuals, TripMeasurement};

#[derive(Debug, Clone, PartialEq)]
pub enum TripEvent {
    Assign { driver_id: DriverId },
    Start,
    /// The driver backs out, or turns down a trip offered to them.
    Reject { driver_id: Option<DriverId> },
    Cancel,
    Complete,
    Rate { stars: i64, review: Option<String> },
}

impl TripEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::Start => "start",
            Self::Reject { .. } => "reject",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
            Self::Rate { .. } => "rate",
        }
    }
}

/// Body of `PATCH /trips/{id}/status`, in the legacy status vocabulary.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub driver_id: Option<DriverId>,
    pub rating: Option<i64>,
    pub review: Option<String>,
}

impl TryFrom<StatusUpdate> for TripEvent {
    type Error = Error;

    fn try_from(update: StatusUpdate) -> Result<Self> {
        let event = match update.status.trim().to_ascii_lowercase().as_str() {
            "assigned" => TripEvent::Assign {
                driver_id: update
                    .driver_id
                    .ok_or_else(|| Error::validation("driver_id is required to assign a trip"))?,
            },
            "ongoing" | "started" => TripEvent::Start,
            "pending" | "rejected" => TripEvent::Reject {
                driver_id: update.driver_id,
            },
            "cancelled" => TripEvent::Cancel,
            "completed" => TripEvent::Complete,
            "rated" => TripEvent::Rate {
                stars: update
                    .rating
                    .ok_or_else(|| Error::validation("rating is required"))?,
                review: update.review,
            },
            other => return Err(Error::validation(format!("unknown trip status {other:?}"))),
        };
        Ok(event)
    }
}

/// Next trip for `event`, or `InvalidTransition`. Touches nothing but the
/// trip value itself; request bookkeeping and actuals are layered on by the
/// caller.
pub fn plan_transition(trip: &Trip, event: &TripEvent, now: DateTime<Utc>) -> Result<Trip> {
    let illegal = || Error::invalid_transition(trip.phase(), event.name());
    let mut next = trip.clone();

    next.state = match (&trip.state, event) {
        (TripState::Pending, TripEvent::Assign { driver_id }) => {
            next.driver_id = Some(*driver_id);
            next.assigned_at = Some(now);
            TripState::Assigned
        }
        (TripState::Assigned, TripEvent::Start) => TripState::Ongoing { started_at: now },
        (TripState::Pending | TripState::Assigned, TripEvent::Reject { .. }) => {
            next.driver_id = None;
            next.driver_name = None;
            next.assigned_at = None;
            TripState::Pending
        }
        (TripState::Pending | TripState::Assigned | TripState::Ongoing { .. }, TripEvent::Cancel) => {
            TripState::Cancelled {
                started_at: trip.started_at(),
                cancelled_at: now,
            }
        }
        (TripState::Ongoing { started_at }, TripEvent::Complete) => TripState::Completed {
            started_at: Some(*started_at),
            completed_at: now,
            rating: None,
        },
        (
            TripState::Completed {
                started_at,
                completed_at,
                rating: None,
            },
            TripEvent::Rate { stars, review },
        ) => TripState::Completed {
            started_at: *started_at,
            completed_at: *completed_at,
            rating: Some(Rating::new(*stars, review.clone())?),
        },
        _ => return Err(illegal()),
    };
    next.updated_at = now;
    Ok(next)
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub trip: Trip,
    pub driver_last_lat: Option<f64>,
    pub driver_last_lng: Option<f64>,
    pub driver_location_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TripLifecycle<G> {
    gateway: G,
    earnings: EarningsSync<G>,
    fares: Arc<dyn FarePolicy>,
    notifier: Arc<dyn NotificationBridge>,
    settings: Arc<DispatchSettings>,
}

impl<G: Gateway> TripLifecycle<G> {
    pub fn new(
        gateway: G,
        earnings: EarningsSync<G>,
        fares: Arc<dyn FarePolicy>,
        notifier: Arc<dyn NotificationBridge>,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        Self {
            gateway,
            earnings,
            fares,
            notifier,
            settings,
        }
    }

    pub async fn get(&self, trip_id: &str) -> Result<Trip> {
        self.gateway.get_trip(trip_id).await
    }

    /// The single public mutator of trip state.
    pub async fn update_status(&self, trip_id: &str, event: TripEvent) -> Result<Trip> {
        let trip = self.gateway.get_trip(trip_id).await?;
        let now = Utc::now();

        match event {
            TripEvent::Assign { driver_id } => {
                let request = self.gateway.active_request_for_trip(trip_id).await?;
                let (trip, _) = self.assign(trip, driver_id, request, now).await?;
                Ok(trip)
            }
            TripEvent::Start => self.start(trip, now).await,
            TripEvent::Reject { driver_id } => self.reject(trip, driver_id, now).await,
            TripEvent::Cancel => self.cancel(trip, now).await,
            TripEvent::Complete => self.complete(trip, now).await,
            TripEvent::Rate { .. } => self.rate(trip, &event, now).await,
        }
    }

    /// Moves a pending trip to `driver_id`, accepting `request` in the same
    /// commit. The loser of a race gets `Conflict`.
    pub(crate) async fn assign(
        &self,
        trip: Trip,
        driver_id: DriverId,
        request: Option<PendingRideRequest>,
        now: DateTime<Utc>,
    ) -> Result<(Trip, Option<PendingRideRequest>)> {
        let event = TripEvent::Assign { driver_id };
        let mut next = plan_transition(&trip, &event, now)?;
        let driver = self.gateway.get_driver(driver_id).await?;
        if driver.status != DriverStatus::Online {
            return Err(Error::conflict(format!("driver {driver_id} is offline")));
        }
        if !driver.car_type.eq_ignore_ascii_case(&trip.car_type) {
            return Err(Error::conflict(format!(
                "driver {driver_id} drives {} but trip {} needs {}",
                driver.car_type, trip.id, trip.car_type
            )));
        }
        next.driver_name = Some(driver.name.clone());

        let mut change = RideChange::new().with_trip_update(trip.phase(), next.clone());
        let accepted = match request {
            Some(request) if request.status == RequestStatus::Waiting => {
                if request.has_rejected(driver_id) {
                    return Err(Error::conflict(format!(
                        "driver {driver_id} already declined ride request {}",
                        request.request_id
                    )));
                }
                let mut accepted = request.clone();
                accepted.status = RequestStatus::Accepted;
                accepted.assigned_driver_id = Some(driver_id);
                accepted.assigned_at = Some(now);
                accepted.updated_at = now;
                change = change.with_request_update(RequestStatus::Waiting, accepted.clone());
                Some(accepted)
            }
            Some(request) => {
                return Err(Error::conflict(format!(
                    "ride request {} is {} and no longer available",
                    request.request_id, request.status
                )))
            }
            None => {
                warn!(trip_id = %trip.id, driver_id, "assigning trip without an open ride request");
                None
            }
        };

        self.gateway.commit(change).await?;
        info!(trip_id = %next.id, driver_id, "trip assigned");
        self.notifier.emit(RideEvent::TripAssigned {
            trip_id: next.id.clone(),
            driver_id,
            driver_name: next.driver_name.clone(),
        });
        Ok((next, accepted))
    }

    async fn start(&self, trip: Trip, now: DateTime<Utc>) -> Result<Trip> {
        let next = plan_transition(&trip, &TripEvent::Start, now)?;
        let started = self.gateway.update_trip_if_phase(trip.phase(), &next).await?;
        info!(trip_id = %started.id, "trip started");
        self.notifier.emit(RideEvent::TripStarted {
            trip_id: started.id.clone(),
            driver_id: started.driver_id,
            started_at: now,
        });
        Ok(started)
    }

    /// Driver backs out of an assigned trip (or turns down an offered one).
    /// An assigned trip returns to pending: the accepted request is closed
    /// as rejected and a fresh waiting request, still excluding everyone who
    /// declined, takes its place in the same commit.
    async fn reject(&self, trip: Trip, driver_id: Option<DriverId>, now: DateTime<Utc>) -> Result<Trip> {
        let event = TripEvent::Reject { driver_id };
        let next = plan_transition(&trip, &event, now)?;
        let active = self.gateway.active_request_for_trip(&trip.id).await?;

        if trip.phase() == TripPhase::Pending {
            let driver_id =
                driver_id.ok_or_else(|| Error::validation("driver_id is required to reject a pending trip"))?;
            if let Some(request) = active {
                if request.status == RequestStatus::Waiting {
                    self.gateway
                        .record_rejection(&request.request_id, driver_id, now)
                        .await?;
                }
            }
            return Ok(trip);
        }

        let assigned = trip.driver_id;
        if let (Some(claimed), Some(assigned)) = (driver_id, assigned) {
            if claimed != assigned {
                return Err(Error::conflict(format!(
                    "driver {claimed} is not assigned to trip {}",
                    trip.id
                )));
            }
        }

        let expires_at = now + self.settings.pending_ttl;
        let mut change = RideChange::new().with_trip_update(trip.phase(), next.clone());
        let reopened = match active {
            Some(request) if request.status == RequestStatus::Accepted => {
                let mut closed = request.clone();
                closed.status = RequestStatus::Rejected;
                if let Some(driver) = assigned {
                    closed.add_rejection(driver);
                }
                closed.updated_at = now;
                let reopened = closed.reopened(Uuid::new_v4().to_string(), now, expires_at);
                change = change.with_request_update(RequestStatus::Accepted, closed);
                reopened
            }
            other => {
                if let Some(request) = &other {
                    warn!(
                        trip_id = %trip.id,
                        request_id = %request.request_id,
                        status = %request.status,
                        "assigned trip tracked by a request that is not accepted"
                    );
                    change = change.with_request_update(request.status, {
                        let mut closed = request.clone();
                        closed.status = RequestStatus::Rejected;
                        closed.updated_at = now;
                        closed
                    });
                }
                let mut fresh = PendingRideRequest::for_trip(Uuid::new_v4().to_string(), &next, None, now, expires_at);
                if let Some(driver) = assigned {
                    fresh.add_rejection(driver);
                }
                fresh
            }
        };
        let reopened_id = reopened.request_id.clone();
        change = change.with_new_request(reopened);

        self.gateway.commit(change).await?;
        info!(
            trip_id = %next.id,
            driver_id = ?assigned,
            request_id = %reopened_id,
            "driver backed out, trip back in matching"
        );
        Ok(next)
    }

    async fn cancel(&self, trip: Trip, now: DateTime<Utc>) -> Result<Trip> {
        let next = plan_transition(&trip, &TripEvent::Cancel, now)?;
        let mut change = RideChange::new().with_trip_update(trip.phase(), next.clone());

        if let Some(request) = self.gateway.active_request_for_trip(&trip.id).await? {
            let expected = request.status;
            let mut cancelled = request;
            cancelled.status = RequestStatus::Cancelled;
            cancelled.updated_at = now;
            change = change.with_request_update(expected, cancelled);
        }

        self.gateway.commit(change).await?;
        info!(trip_id = %next.id, "trip cancelled");
        self.notifier.emit(RideEvent::TripCancelled {
            trip_id: next.id.clone(),
            cancelled_at: now,
        });
        Ok(next)
    }

    /// Completing twice returns the completed trip unchanged; only the
    /// winning commit books earnings.
    async fn complete(&self, trip: Trip, now: DateTime<Utc>) -> Result<Trip> {
        if matches!(trip.phase(), TripPhase::Completed | TripPhase::Rated) {
            debug!(trip_id = %trip.id, "trip already completed");
            return Ok(trip);
        }
        let mut next = plan_transition(&trip, &TripEvent::Complete, now)?;

        let measured = self.measure(&trip, now).await?;
        let actuals = self.fares.settle(&trip, &measured);
        apply_actuals(&mut next, actuals);

        let mut change = RideChange::new().with_trip_update(trip.phase(), next.clone());
        match self.gateway.active_request_for_trip(&trip.id).await? {
            Some(request) if request.status == RequestStatus::Accepted => {
                let mut done = request;
                done.status = RequestStatus::Completed;
                done.updated_at = now;
                change = change.with_request_update(RequestStatus::Accepted, done);
            }
            Some(request) => warn!(
                trip_id = %trip.id,
                request_id = %request.request_id,
                status = %request.status,
                "completing trip whose request was never accepted"
            ),
            None => {}
        }

        if let Err(e) = self.gateway.commit(change).await {
            if let Error::Conflict(_) = e {
                let current = self.gateway.get_trip(&trip.id).await?;
                if matches!(current.phase(), TripPhase::Completed | TripPhase::Rated) {
                    debug!(trip_id = %trip.id, "lost completion race to a duplicate call");
                    return Ok(current);
                }
            }
            return Err(e);
        }
        info!(trip_id = %next.id, cost = next.cost, distance = next.distance_km, "trip completed");

        if let Some(driver_id) = next.driver_id {
            if let Err(e) = self.earnings.record_completion(driver_id, next.cost, now).await {
                error!(
                    trip_id = %next.id,
                    driver_id,
                    cost = next.cost,
                    error = %e,
                    "earnings sync failed after completion, counters are stale"
                );
            }
        } else {
            warn!(trip_id = %next.id, "completed trip has no driver, nothing to book");
        }

        self.notifier.emit(RideEvent::TripCompleted {
            trip_id: next.id.clone(),
            driver_id: next.driver_id,
            cost: next.cost,
            distance: next.distance_km,
            duration: next.duration_min,
            completed_at: now,
        });
        Ok(next)
    }

    async fn measure(&self, trip: &Trip, now: DateTime<Utc>) -> Result<TripMeasurement> {
        let points: Vec<GeoPoint> = self
            .gateway
            .list_trip_points(&trip.id)
            .await?
            .iter()
            .map(TripPoint::point)
            .collect();
        let distance_km = (points.len() >= 2).then(|| path_length_km(&points));
        let duration_min = trip
            .started_at()
            .map(|started| round_money((now - started).num_seconds().max(0) as f64 / 60.0));
        Ok(TripMeasurement {
            distance_km,
            duration_min,
        })
    }

    async fn rate(&self, trip: Trip, event: &TripEvent, now: DateTime<Utc>) -> Result<Trip> {
        let next = plan_transition(&trip, event, now)?;
        let rated = self.gateway.update_trip_if_phase(trip.phase(), &next).await?;
        if let Some(rating) = rated.rating() {
            info!(trip_id = %rated.id, stars = rating.stars, "trip rated");
            self.notifier.emit(RideEvent::TripRated {
                trip_id: rated.id.clone(),
                driver_id: rated.driver_id,
                rating: rating.stars,
                review: rating.review.clone(),
            });
        }
        Ok(rated)
    }

    pub async fn live_snapshot(&self, trip_id: &str) -> Result<LiveSnapshot> {
        let trip = self.gateway.get_trip(trip_id).await?;
        let driver = match trip.driver_id {
            Some(id) => match self.gateway.get_driver(id).await {
                Ok(driver) => Some(driver),
                Err(Error::NotFound(_)) => {
                    warn!(trip_id, driver_id = id, "trip references an unknown driver");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        Ok(LiveSnapshot {
            driver_last_lat: driver.as_ref().and_then(|d| d.last_lat),
            driver_last_lng: driver.as_ref().and_then(|d| d.last_lng),
            driver_location_at: driver.as_ref().and_then(|d| d.location_updated_at),
            trip,
        })
    }

    /// Stores a driver ping. While the driver is on a trip the ping also
    /// becomes part of the recorded route.
    pub async fn record_location(&self, driver_id: DriverId, lat: Option<f64>, lng: Option<f64>) -> Result<Driver> {
        let point = GeoPoint::parse("location", lat, lng)?;
        let now = Utc::now();
        let driver = self.gateway.update_driver_location(driver_id, point, now).await?;

        if let Some(trip) = self.gateway.ongoing_trip_for_driver(driver_id).await? {
            let ping = TripPoint {
                trip_id: trip.id.clone(),
                driver_id,
                recorded_at: now,
                lat: point.lat,
                lng: point.lng,
            };
            self.gateway.append_trip_point(&ping).await?;
            self.notifier.emit(RideEvent::DriverLiveLocation {
                trip_id: trip.id,
                driver_id,
                lat: point.lat,
                lng: point.lng,
                at: now,
            });
        }
        Ok(driver)
    }

    /// Edits the allow-listed details of a pending trip.
    pub async fn update_details(&self, trip_id: &str, patch: TripDetailsPatch) -> Result<Trip> {
        if patch.is_empty() {
            return Err(Error::validation("no editable fields supplied"));
        }
        let patch = TripDetailsPatch {
            pickup_location: non_blank(patch.pickup_location, "pickup_location")?,
            dropoff_location: non_blank(patch.dropoff_location, "dropoff_location")?,
            payment_method: non_blank(patch.payment_method, "payment_method")?,
        };
        self.gateway
            .update_trip_details(trip_id, &patch, Utc::now())
            .await
    }
}

fn non_blank(value: Option<String>, field: &str) -> Result<Option<String>> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => Err(Error::validation(format!("{field} must not be blank"))),
        other => Ok(other),
    }
}

fn apply_actuals(trip: &mut Trip, actuals: TripActuals) {
    trip.cost = actuals.cost;
    trip.distance_km = actuals.distance_km;
    trip.duration_min = actuals.duration_min;
}
