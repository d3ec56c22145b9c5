//! Process-local gateway for development and tests. One mutex guards all
//! tables, so each call observes and applies its guards atomically, the same
//! contract the Postgres backend gets from row locks and transactions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use super::{Gateway, RideChange, WaitingFilter};
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::{
    CounterDelta, Driver, DriverEarningsRecord, DriverId, DriverStatus, PendingRideRequest,
    RequestStatus, Trip, TripDetailsPatch, TripPhase, TripPoint, UserId,
};

#[derive(Default)]
struct Tables {
    trips: BTreeMap<String, Trip>,
    requests: BTreeMap<String, PendingRideRequest>,
    drivers: BTreeMap<DriverId, Driver>,
    earnings: BTreeMap<(DriverId, NaiveDate), DriverEarningsRecord>,
    points: Vec<TripPoint>,
}

impl Tables {
    fn trip(&self, id: &str) -> Result<&Trip> {
        self.trips.get(id).ok_or_else(|| Error::not_found("trip", id))
    }

    fn request(&self, id: &str) -> Result<&PendingRideRequest> {
        self.requests
            .get(id)
            .ok_or_else(|| Error::not_found("ride request", id))
    }

    fn driver_mut(&mut self, id: DriverId) -> Result<&mut Driver> {
        self.drivers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("driver", id))
    }

    fn active_request_for(&self, trip_id: &str) -> Option<&PendingRideRequest> {
        self.requests
            .values()
            .filter(|r| r.trip_id == trip_id && r.status.is_active())
            .max_by_key(|r| r.created_at)
    }

    fn check(&self, change: &RideChange) -> Result<()> {
        if let Some(trip) = &change.insert_trip {
            if self.trips.contains_key(&trip.id) {
                return Err(Error::conflict(format!("trip {} already exists", trip.id)));
            }
        }
        if let Some((expected, trip)) = &change.update_trip {
            if self.trip(&trip.id)?.phase() != *expected {
                return Err(Error::conflict(format!("trip {} is no longer {expected}", trip.id)));
            }
        }
        if let Some((expected, request)) = &change.update_request {
            if self.request(&request.request_id)?.status != *expected {
                return Err(Error::conflict(format!(
                    "ride request {} is no longer {expected}",
                    request.request_id
                )));
            }
        }
        if let Some(request) = &change.insert_request {
            let replaced = change
                .update_request
                .as_ref()
                .filter(|(_, r)| !r.status.is_active())
                .map(|(_, r)| r.request_id.as_str());
            let clash = self.requests.values().any(|r| {
                r.request_id == request.request_id
                    || (r.trip_id == request.trip_id
                        && r.status.is_active()
                        && Some(r.request_id.as_str()) != replaced)
            });
            if clash {
                return Err(Error::conflict(format!(
                    "active request for trip {} already exists",
                    request.trip_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    tables: Arc<Mutex<Tables>>,
    earnings_faults: Arc<AtomicU32>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a driver profile. Driver onboarding lives
    /// outside this service, so this is the only way drivers appear here.
    pub async fn insert_driver(&self, driver: Driver) {
        self.tables.lock().await.drivers.insert(driver.id, driver);
    }

    /// Makes the next `n` counter reconciliations fail with a transient error.
    pub fn inject_earnings_faults(&self, n: u32) {
        self.earnings_faults.store(n, Ordering::SeqCst);
    }

    fn take_earnings_fault(&self) -> bool {
        self.earnings_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Gateway for MemoryGateway {
    async fn commit(&self, change: RideChange) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check(&change)?;

        if let Some(trip) = change.insert_trip {
            tables.trips.insert(trip.id.clone(), trip);
        }
        if let Some((_, trip)) = change.update_trip {
            tables.trips.insert(trip.id.clone(), trip);
        }
        if let Some((_, request)) = change.update_request {
            tables.requests.insert(request.request_id.clone(), request);
        }
        if let Some(request) = change.insert_request {
            tables.requests.insert(request.request_id.clone(), request);
        }
        Ok(())
    }

    async fn get_trip(&self, id: &str) -> Result<Trip> {
        self.tables.lock().await.trip(id).cloned()
    }

    async fn list_trips_by_passenger(&self, passenger_id: UserId) -> Result<Vec<Trip>> {
        let tables = self.tables.lock().await;
        let mut trips: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| t.passenger_id == passenger_id)
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn list_trips_by_driver(&self, driver_id: DriverId) -> Result<Vec<Trip>> {
        let tables = self.tables.lock().await;
        let mut trips: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| t.driver_id == Some(driver_id))
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trips)
    }

    async fn ongoing_trip_for_driver(&self, driver_id: DriverId) -> Result<Option<Trip>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .trips
            .values()
            .filter(|t| t.driver_id == Some(driver_id) && t.phase() == TripPhase::Ongoing)
            .max_by_key(|t| t.started_at())
            .cloned())
    }

    async fn update_trip_if_phase(&self, expected: TripPhase, trip: &Trip) -> Result<Trip> {
        let mut tables = self.tables.lock().await;
        if tables.trip(&trip.id)?.phase() != expected {
            return Err(Error::conflict(format!("trip {} is no longer {expected}", trip.id)));
        }
        tables.trips.insert(trip.id.clone(), trip.clone());
        Ok(trip.clone())
    }

    async fn update_trip_details(&self, id: &str, patch: &TripDetailsPatch, now: DateTime<Utc>) -> Result<Trip> {
        let mut tables = self.tables.lock().await;
        let mut trip = tables.trip(id)?.clone();
        if trip.phase() != TripPhase::Pending {
            return Err(Error::conflict(format!("trip {id} can only be edited while pending")));
        }
        if let Some(label) = &patch.pickup_location {
            trip.pickup.label = label.clone();
        }
        if let Some(label) = &patch.dropoff_location {
            trip.dropoff.label = label.clone();
        }
        if let Some(method) = &patch.payment_method {
            trip.payment_method = method.clone();
        }
        trip.updated_at = now;

        for request in tables
            .requests
            .values_mut()
            .filter(|r| r.trip_id == id && r.status.is_active())
        {
            request.pickup_location = trip.pickup.label.clone();
            request.dropoff_location = trip.dropoff.label.clone();
            request.payment_method = trip.payment_method.clone();
            request.updated_at = now;
        }
        tables.trips.insert(trip.id.clone(), trip.clone());
        Ok(trip)
    }

    async fn append_trip_point(&self, point: &TripPoint) -> Result<()> {
        self.tables.lock().await.points.push(point.clone());
        Ok(())
    }

    async fn list_trip_points(&self, trip_id: &str) -> Result<Vec<TripPoint>> {
        let tables = self.tables.lock().await;
        let mut points: Vec<TripPoint> = tables
            .points
            .iter()
            .filter(|p| p.trip_id == trip_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.recorded_at);
        Ok(points)
    }

    async fn get_request(&self, request_id: &str) -> Result<PendingRideRequest> {
        self.tables.lock().await.request(request_id).cloned()
    }

    async fn active_request_for_trip(&self, trip_id: &str) -> Result<Option<PendingRideRequest>> {
        Ok(self.tables.lock().await.active_request_for(trip_id).cloned())
    }

    async fn list_waiting(&self, filter: &WaitingFilter) -> Result<Vec<PendingRideRequest>> {
        let tables = self.tables.lock().await;
        let mut waiting: Vec<PendingRideRequest> = tables
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Waiting)
            .filter(|r| {
                filter
                    .car_type
                    .as_deref()
                    .map_or(true, |c| r.car_type.eq_ignore_ascii_case(c))
            })
            .filter(|r| filter.exclude_driver.map_or(true, |d| !r.has_rejected(d)))
            .filter(|r| filter.live_at.map_or(true, |at| r.expires_at > at))
            .cloned()
            .collect();
        waiting.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(waiting)
    }

    async fn record_rejection(
        &self,
        request_id: &str,
        driver_id: DriverId,
        now: DateTime<Utc>,
    ) -> Result<PendingRideRequest> {
        let mut tables = self.tables.lock().await;
        let current = tables.request(request_id)?;
        if current.has_rejected(driver_id) {
            return Ok(current.clone());
        }
        if current.status != RequestStatus::Waiting {
            return Err(Error::conflict(format!(
                "ride request {request_id} is {} and no longer takes rejections",
                current.status
            )));
        }
        let mut next = current.clone();
        next.add_rejection(driver_id);
        next.updated_at = now;
        tables.requests.insert(next.request_id.clone(), next.clone());
        Ok(next)
    }

    async fn expire_waiting(&self, now: DateTime<Utc>) -> Result<Vec<PendingRideRequest>> {
        let mut tables = self.tables.lock().await;
        let mut expired = Vec::new();
        for request in tables
            .requests
            .values_mut()
            .filter(|r| r.status == RequestStatus::Waiting && r.expires_at < now)
        {
            request.status = RequestStatus::Expired;
            request.updated_at = now;
            expired.push(request.clone());
        }
        Ok(expired)
    }

    async fn get_driver(&self, id: DriverId) -> Result<Driver> {
        self.tables
            .lock()
            .await
            .drivers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("driver", id))
    }

    async fn list_online_drivers(&self) -> Result<Vec<Driver>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .drivers
            .values()
            .filter(|d| d.status == DriverStatus::Online && d.location().is_some())
            .cloned()
            .collect())
    }

    async fn update_driver_location(&self, id: DriverId, point: GeoPoint, at: DateTime<Utc>) -> Result<Driver> {
        let mut tables = self.tables.lock().await;
        let driver = tables.driver_mut(id)?;
        driver.last_lat = Some(point.lat);
        driver.last_lng = Some(point.lng);
        driver.location_updated_at = Some(at);
        Ok(driver.clone())
    }

    async fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<Driver> {
        let mut tables = self.tables.lock().await;
        let driver = tables.driver_mut(id)?;
        driver.status = status;
        Ok(driver.clone())
    }

    async fn reconcile_counters(
        &self,
        driver_id: DriverId,
        delta: CounterDelta,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(Driver, DriverEarningsRecord)> {
        if self.take_earnings_fault() {
            return Err(Error::Unavailable("injected earnings fault".into()));
        }
        let mut tables = self.tables.lock().await;
        let driver = tables.driver_mut(driver_id)?;
        driver.book(delta, date);
        let driver = driver.clone();
        let record = DriverEarningsRecord::snapshot(&driver, date, now);
        tables.earnings.insert((driver_id, date), record.clone());
        Ok((driver, record))
    }

    async fn earnings_history(&self, driver_id: DriverId, since: NaiveDate) -> Result<Vec<DriverEarningsRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .earnings
            .range((driver_id, since)..=(driver_id, NaiveDate::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn reset_daily_counters(&self, date: NaiveDate) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut reset = 0;
        for driver in tables.drivers.values_mut() {
            if driver.reset_for(date) {
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn close(&self) {}
}
