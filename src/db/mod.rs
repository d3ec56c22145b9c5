use std::future::Future;
use std::time::Duration;

use anyhow::Result as AnyResult;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::warn;

use crate::error::Result;
use crate::geo::GeoPoint;
use crate::models::{
    CounterDelta, Driver, DriverEarningsRecord, DriverId, DriverStatus, PendingRideRequest,
    RequestStatus, Trip, TripDetailsPatch, TripPhase, TripPoint, UserId,
};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryGateway;
pub use postgres::PgGateway;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> AnyResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> AnyResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Writes that must land together. Applied in field order (trip before
/// request) inside one transaction; any guard mismatch aborts the whole
/// change with `Error::Conflict`.
#[derive(Debug, Clone, Default)]
pub struct RideChange {
    pub insert_trip: Option<Trip>,
    pub update_trip: Option<(TripPhase, Trip)>,
    pub update_request: Option<(RequestStatus, PendingRideRequest)>,
    pub insert_request: Option<PendingRideRequest>,
}

impl RideChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_new_trip(mut self, trip: Trip) -> Self {
        self.insert_trip = Some(trip);
        self
    }

    /// Overwrite the trip only if it is still in `expected`.
    pub fn with_trip_update(mut self, expected: TripPhase, trip: Trip) -> Self {
        self.update_trip = Some((expected, trip));
        self
    }

    /// Overwrite the request only if it is still `expected`.
    pub fn with_request_update(mut self, expected: RequestStatus, request: PendingRideRequest) -> Self {
        self.update_request = Some((expected, request));
        self
    }

    pub fn with_new_request(mut self, request: PendingRideRequest) -> Self {
        self.insert_request = Some(request);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaitingFilter {
    pub car_type: Option<String>,
    /// Hide requests this driver has already turned down.
    pub exclude_driver: Option<DriverId>,
    /// Hide requests whose `expires_at` is not after this instant.
    pub live_at: Option<DateTime<Utc>>,
}

/// Persistence contract consumed by the engines. Every call is async I/O;
/// conditional writes return `Error::Conflict` when the guard no longer holds.
pub trait Gateway: Clone + Send + Sync + 'static {
    fn commit(&self, change: RideChange) -> impl Future<Output = Result<()>> + Send;

    fn get_trip(&self, id: &str) -> impl Future<Output = Result<Trip>> + Send;

    fn list_trips_by_passenger(&self, passenger_id: UserId) -> impl Future<Output = Result<Vec<Trip>>> + Send;

    fn list_trips_by_driver(&self, driver_id: DriverId) -> impl Future<Output = Result<Vec<Trip>>> + Send;

    fn ongoing_trip_for_driver(&self, driver_id: DriverId) -> impl Future<Output = Result<Option<Trip>>> + Send;

    fn update_trip_if_phase(&self, expected: TripPhase, trip: &Trip) -> impl Future<Output = Result<Trip>> + Send;

    /// Applies allow-listed detail edits to a pending trip and its active request.
    fn update_trip_details(
        &self,
        id: &str,
        patch: &TripDetailsPatch,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Trip>> + Send;

    fn append_trip_point(&self, point: &TripPoint) -> impl Future<Output = Result<()>> + Send;

    fn list_trip_points(&self, trip_id: &str) -> impl Future<Output = Result<Vec<TripPoint>>> + Send;

    fn get_request(&self, request_id: &str) -> impl Future<Output = Result<PendingRideRequest>> + Send;

    /// The waiting or accepted request currently tracking `trip_id`, if any.
    fn active_request_for_trip(&self, trip_id: &str) -> impl Future<Output = Result<Option<PendingRideRequest>>> + Send;

    /// Waiting requests, oldest first.
    fn list_waiting(&self, filter: &WaitingFilter) -> impl Future<Output = Result<Vec<PendingRideRequest>>> + Send;

    /// Adds `driver_id` to a waiting request's rejection set. Idempotent.
    fn record_rejection(
        &self,
        request_id: &str,
        driver_id: DriverId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<PendingRideRequest>> + Send;

    /// Moves every waiting request with `expires_at < now` to expired.
    fn expire_waiting(&self, now: DateTime<Utc>) -> impl Future<Output = Result<Vec<PendingRideRequest>>> + Send;

    fn get_driver(&self, id: DriverId) -> impl Future<Output = Result<Driver>> + Send;

    /// Online drivers that have reported a location at least once.
    fn list_online_drivers(&self) -> impl Future<Output = Result<Vec<Driver>>> + Send;

    fn update_driver_location(
        &self,
        id: DriverId,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Driver>> + Send;

    fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> impl Future<Output = Result<Driver>> + Send;

    /// Under a row lock on the driver: add `delta` to the running counters,
    /// then upsert the `date` ledger row from the resulting counters.
    fn reconcile_counters(
        &self,
        driver_id: DriverId,
        delta: CounterDelta,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(Driver, DriverEarningsRecord)>> + Send;

    fn earnings_history(
        &self,
        driver_id: DriverId,
        since: NaiveDate,
    ) -> impl Future<Output = Result<Vec<DriverEarningsRecord>>> + Send;

    /// Starts `date` for every driver whose today counters belong to an
    /// earlier day. Running it twice for the same date touches nothing.
    fn reset_daily_counters(&self, date: NaiveDate) -> impl Future<Output = Result<u64>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

const READ_ATTEMPTS: u32 = 3;

/// Re-runs an idempotent read on transient failures with exponential
/// backoff. Writes never go through here.
pub(crate) async fn retry_read<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < READ_ATTEMPTS => {
                warn!(attempt, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(Duration::from_millis(25 * 2u64.pow(attempt - 1))).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_read_recovers_from_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = retry_read("lookup", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Unavailable("blip".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_read_gives_up_on_permanent_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_read("lookup", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::not_found("trip", "x"))
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
