//! Postgres-backed gateway. Cross-entity writes share one transaction and
//! every state change is a conditional `UPDATE ... WHERE status = ...`, so
//! row-level locking decides races between drivers.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::info;

use super::{queries, retry_read, DbPool, Gateway, RideChange, WaitingFilter};
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::models::{
    CounterDelta, Driver, DriverEarningsRecord, DriverId, DriverStatus, PendingRideRequest,
    RequestStatus, Trip, TripDetailsPatch, TripPhase, TripPoint, TripRecord, UserId,
};

#[derive(Clone)]
pub struct PgGateway {
    pool: DbPool,
}

impl PgGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn fetch_trip(&self, id: &str) -> Result<Trip> {
        let record: Option<TripRecord> = sqlx::query_as(queries::SELECT_TRIP)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        record
            .ok_or_else(|| Error::not_found("trip", id))
            .and_then(Trip::try_from)
    }

    async fn fetch_trips(&self, sql: &str, key: i64) -> Result<Vec<Trip>> {
        let records: Vec<TripRecord> = sqlx::query_as(sql).bind(key).fetch_all(&self.pool).await?;
        records.into_iter().map(Trip::try_from).collect()
    }

    async fn fetch_request(&self, request_id: &str) -> Result<PendingRideRequest> {
        let row = sqlx::query(queries::SELECT_PENDING_REQUEST)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => request_from_row(&row),
            None => Err(Error::not_found("ride request", request_id)),
        }
    }

    async fn fetch_driver(&self, id: DriverId) -> Result<Driver> {
        let row = sqlx::query(queries::SELECT_DRIVER)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => driver_from_row(&row),
            None => Err(Error::not_found("driver", id)),
        }
    }
}

fn bind_trip_insert<'q>(query: Query<'q, Postgres, PgArguments>, r: &'q TripRecord) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(&r.id)
        .bind(r.passenger_id)
        .bind(&r.passenger_name)
        .bind(r.driver_id)
        .bind(&r.driver_name)
        .bind(&r.pickup_location)
        .bind(r.pickup_lat)
        .bind(r.pickup_lng)
        .bind(r.pickup_accuracy)
        .bind(r.pickup_timestamp)
        .bind(&r.dropoff_location)
        .bind(r.dropoff_lat)
        .bind(r.dropoff_lng)
        .bind(r.dropoff_accuracy)
        .bind(r.dropoff_timestamp)
        .bind(&r.car_type)
        .bind(r.cost)
        .bind(r.distance)
        .bind(r.duration)
        .bind(&r.payment_method)
        .bind(&r.status)
        .bind(&r.trip_status)
        .bind(r.assigned_at)
        .bind(r.started_at)
        .bind(r.completed_at)
        .bind(r.cancelled_at)
        .bind(r.rating)
        .bind(&r.review)
        .bind(r.created_at)
        .bind(r.updated_at)
}

fn bind_trip_update<'q>(
    r: &'q TripRecord,
    expected: TripPhase,
) -> sqlx::query::QueryAs<'q, Postgres, TripRecord, PgArguments> {
    sqlx::query_as(queries::UPDATE_TRIP_IF_PHASE)
        .bind(&r.id)
        .bind(r.driver_id)
        .bind(&r.driver_name)
        .bind(r.cost)
        .bind(r.distance)
        .bind(r.duration)
        .bind(&r.status)
        .bind(&r.trip_status)
        .bind(r.assigned_at)
        .bind(r.started_at)
        .bind(r.completed_at)
        .bind(r.cancelled_at)
        .bind(r.rating)
        .bind(&r.review)
        .bind(r.updated_at)
        .bind(expected.status())
        .bind(expected.trip_status())
}

fn bind_request_insert<'q>(r: &'q PendingRideRequest) -> Query<'q, Postgres, PgArguments> {
    sqlx::query(queries::INSERT_PENDING_REQUEST)
        .bind(&r.request_id)
        .bind(&r.trip_id)
        .bind(r.passenger_id)
        .bind(&r.passenger_name)
        .bind(&r.passenger_phone)
        .bind(&r.pickup_location)
        .bind(r.pickup_lat)
        .bind(r.pickup_lng)
        .bind(&r.dropoff_location)
        .bind(r.dropoff_lat)
        .bind(r.dropoff_lng)
        .bind(&r.car_type)
        .bind(r.estimated_cost)
        .bind(r.estimated_distance)
        .bind(r.estimated_duration)
        .bind(&r.payment_method)
        .bind(r.status.as_str())
        .bind(r.assigned_driver_id)
        .bind(r.assigned_at)
        .bind(&r.rejected_by)
        .bind(r.rejection_count)
        .bind(r.expires_at)
        .bind(r.created_at)
        .bind(r.updated_at)
}

fn bind_request_update<'q>(r: &'q PendingRideRequest, expected: RequestStatus) -> Query<'q, Postgres, PgArguments> {
    sqlx::query(queries::UPDATE_REQUEST_IF_STATUS)
        .bind(&r.request_id)
        .bind(r.status.as_str())
        .bind(r.assigned_driver_id)
        .bind(r.assigned_at)
        .bind(&r.rejected_by)
        .bind(r.rejection_count)
        .bind(r.expires_at)
        .bind(r.updated_at)
        .bind(expected.as_str())
}

fn request_from_row(row: &PgRow) -> Result<PendingRideRequest> {
    let status: String = row.try_get("status")?;
    Ok(PendingRideRequest {
        request_id: row.try_get("request_id")?,
        trip_id: row.try_get("trip_id")?,
        passenger_id: row.try_get("passenger_id")?,
        passenger_name: row.try_get("passenger_name")?,
        passenger_phone: row.try_get("passenger_phone")?,
        pickup_location: row.try_get("pickup_location")?,
        pickup_lat: row.try_get("pickup_lat")?,
        pickup_lng: row.try_get("pickup_lng")?,
        dropoff_location: row.try_get("dropoff_location")?,
        dropoff_lat: row.try_get("dropoff_lat")?,
        dropoff_lng: row.try_get("dropoff_lng")?,
        car_type: row.try_get("car_type")?,
        estimated_cost: row.try_get("estimated_cost")?,
        estimated_distance: row.try_get("estimated_distance")?,
        estimated_duration: row.try_get("estimated_duration")?,
        payment_method: row.try_get("payment_method")?,
        status: status.parse()?,
        assigned_driver_id: row.try_get("assigned_driver_id")?,
        assigned_at: row.try_get("assigned_at")?,
        rejected_by: row.try_get("rejected_by")?,
        rejection_count: row.try_get("rejection_count")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn driver_from_row(row: &PgRow) -> Result<Driver> {
    let status: String = row.try_get("status")?;
    Ok(Driver {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        status: status.parse()?,
        car_type: row.try_get("car_type")?,
        last_lat: row.try_get("last_lat")?,
        last_lng: row.try_get("last_lng")?,
        location_updated_at: row.try_get("location_updated_at")?,
        today_trips_count: row.try_get("today_trips_count")?,
        today_earnings: row.try_get("today_earnings")?,
        counters_date: row.try_get("counters_date")?,
        total_trips: row.try_get("total_trips")?,
        total_earnings: row.try_get("total_earnings")?,
        balance: row.try_get("balance")?,
    })
}

/// Unique-index violations mean another writer created the same row first.
fn conflict_on_duplicate(e: sqlx::Error, what: &str) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::conflict(format!("{what} already exists"))
        }
        _ => Error::Database(e),
    }
}

impl Gateway for PgGateway {
    async fn commit(&self, change: RideChange) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(trip) = &change.insert_trip {
            let record = TripRecord::from(trip);
            bind_trip_insert(sqlx::query(queries::INSERT_TRIP), &record)
                .execute(&mut *tx)
                .await
                .map_err(|e| conflict_on_duplicate(e, &format!("trip {}", trip.id)))?;
        }

        if let Some((expected, trip)) = &change.update_trip {
            let record = TripRecord::from(trip);
            let updated = bind_trip_update(&record, *expected)
                .fetch_optional(&mut *tx)
                .await?;
            if updated.is_none() {
                tx.rollback().await?;
                return Err(Error::conflict(format!("trip {} is no longer {expected}", trip.id)));
            }
        }

        if let Some((expected, request)) = &change.update_request {
            let updated = bind_request_update(request, *expected)
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(Error::conflict(format!(
                    "ride request {} is no longer {expected}",
                    request.request_id
                )));
            }
        }

        if let Some(request) = &change.insert_request {
            bind_request_insert(request)
                .execute(&mut *tx)
                .await
                .map_err(|e| conflict_on_duplicate(e, &format!("active request for trip {}", request.trip_id)))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_trip(&self, id: &str) -> Result<Trip> {
        retry_read("get_trip", || self.fetch_trip(id)).await
    }

    async fn list_trips_by_passenger(&self, passenger_id: UserId) -> Result<Vec<Trip>> {
        retry_read("list_trips_by_passenger", || {
            self.fetch_trips(queries::SELECT_TRIPS_BY_PASSENGER, passenger_id)
        })
        .await
    }

    async fn list_trips_by_driver(&self, driver_id: DriverId) -> Result<Vec<Trip>> {
        retry_read("list_trips_by_driver", || {
            self.fetch_trips(queries::SELECT_TRIPS_BY_DRIVER, driver_id)
        })
        .await
    }

    async fn ongoing_trip_for_driver(&self, driver_id: DriverId) -> Result<Option<Trip>> {
        let record: Option<TripRecord> = sqlx::query_as(queries::SELECT_ONGOING_TRIP_FOR_DRIVER)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
        record.map(Trip::try_from).transpose()
    }

    async fn update_trip_if_phase(&self, expected: TripPhase, trip: &Trip) -> Result<Trip> {
        let record = TripRecord::from(trip);
        let updated = bind_trip_update(&record, expected)
            .fetch_optional(&self.pool)
            .await?;
        match updated {
            Some(record) => Trip::try_from(record),
            None => Err(Error::conflict(format!("trip {} is no longer {expected}", trip.id))),
        }
    }

    async fn update_trip_details(&self, id: &str, patch: &TripDetailsPatch, now: DateTime<Utc>) -> Result<Trip> {
        let mut tx = self.pool.begin().await?;
        let updated: Option<TripRecord> = sqlx::query_as(queries::UPDATE_TRIP_DETAILS)
            .bind(id)
            .bind(&patch.pickup_location)
            .bind(&patch.dropoff_location)
            .bind(&patch.payment_method)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(record) = updated else {
            tx.rollback().await?;
            // Distinguish a missing trip from one that already left pending.
            self.fetch_trip(id).await?;
            return Err(Error::conflict(format!("trip {id} can only be edited while pending")));
        };
        sqlx::query(queries::UPDATE_ACTIVE_REQUEST_DETAILS)
            .bind(id)
            .bind(&patch.pickup_location)
            .bind(&patch.dropoff_location)
            .bind(&patch.payment_method)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Trip::try_from(record)
    }

    async fn append_trip_point(&self, point: &TripPoint) -> Result<()> {
        sqlx::query(queries::INSERT_TRIP_POINT)
            .bind(&point.trip_id)
            .bind(point.driver_id)
            .bind(point.recorded_at)
            .bind(point.lat)
            .bind(point.lng)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_trip_points(&self, trip_id: &str) -> Result<Vec<TripPoint>> {
        retry_read("list_trip_points", || async move {
            let points: Vec<TripPoint> = sqlx::query_as(queries::SELECT_TRIP_POINTS)
                .bind(trip_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(points)
        })
        .await
    }

    async fn get_request(&self, request_id: &str) -> Result<PendingRideRequest> {
        retry_read("get_request", || self.fetch_request(request_id)).await
    }

    async fn active_request_for_trip(&self, trip_id: &str) -> Result<Option<PendingRideRequest>> {
        let row = sqlx::query(queries::SELECT_ACTIVE_REQUEST_FOR_TRIP)
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_waiting(&self, filter: &WaitingFilter) -> Result<Vec<PendingRideRequest>> {
        retry_read("list_waiting", || async move {
            let rows = sqlx::query(queries::SELECT_WAITING_REQUESTS)
                .bind(&filter.car_type)
                .bind(filter.exclude_driver)
                .bind(filter.live_at)
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(request_from_row).collect()
        })
        .await
    }

    async fn record_rejection(
        &self,
        request_id: &str,
        driver_id: DriverId,
        now: DateTime<Utc>,
    ) -> Result<PendingRideRequest> {
        let row = sqlx::query(queries::RECORD_REJECTION)
            .bind(request_id)
            .bind(driver_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return request_from_row(&row);
        }
        let current = self.fetch_request(request_id).await?;
        if current.has_rejected(driver_id) {
            Ok(current)
        } else {
            Err(Error::conflict(format!(
                "ride request {request_id} is {} and no longer takes rejections",
                current.status
            )))
        }
    }

    async fn expire_waiting(&self, now: DateTime<Utc>) -> Result<Vec<PendingRideRequest>> {
        let rows = sqlx::query(queries::EXPIRE_WAITING_REQUESTS)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn get_driver(&self, id: DriverId) -> Result<Driver> {
        retry_read("get_driver", || self.fetch_driver(id)).await
    }

    async fn list_online_drivers(&self) -> Result<Vec<Driver>> {
        retry_read("list_online_drivers", || async move {
            let rows = sqlx::query(queries::SELECT_ONLINE_DRIVERS)
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(driver_from_row).collect()
        })
        .await
    }

    async fn update_driver_location(&self, id: DriverId, point: GeoPoint, at: DateTime<Utc>) -> Result<Driver> {
        let row = sqlx::query(queries::UPDATE_DRIVER_LOCATION)
            .bind(id)
            .bind(point.lat)
            .bind(point.lng)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => driver_from_row(&row),
            None => Err(Error::not_found("driver", id)),
        }
    }

    async fn set_driver_status(&self, id: DriverId, status: DriverStatus) -> Result<Driver> {
        let row = sqlx::query(queries::UPDATE_DRIVER_STATUS)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => driver_from_row(&row),
            None => Err(Error::not_found("driver", id)),
        }
    }

    async fn reconcile_counters(
        &self,
        driver_id: DriverId,
        delta: CounterDelta,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(Driver, DriverEarningsRecord)> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(queries::SELECT_DRIVER_FOR_UPDATE)
            .bind(driver_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(Error::not_found("driver", driver_id));
        }

        let row = sqlx::query(queries::INCREMENT_DRIVER_COUNTERS)
            .bind(driver_id)
            .bind(delta.trips)
            .bind(delta.earnings)
            .bind(date)
            .fetch_one(&mut *tx)
            .await?;
        let driver = driver_from_row(&row)?;

        let snapshot = DriverEarningsRecord::snapshot(&driver, date, now);
        let record: DriverEarningsRecord = sqlx::query_as(queries::UPSERT_DRIVER_EARNINGS)
            .bind(snapshot.driver_id)
            .bind(snapshot.date)
            .bind(snapshot.today_trips)
            .bind(snapshot.today_earnings)
            .bind(snapshot.total_trips)
            .bind(snapshot.total_earnings)
            .bind(snapshot.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((driver, record))
    }

    async fn earnings_history(&self, driver_id: DriverId, since: NaiveDate) -> Result<Vec<DriverEarningsRecord>> {
        retry_read("earnings_history", || async move {
            let records: Vec<DriverEarningsRecord> = sqlx::query_as(queries::SELECT_EARNINGS_HISTORY)
                .bind(driver_id)
                .bind(since)
                .fetch_all(&self.pool)
                .await?;
            Ok(records)
        })
        .await
    }

    async fn reset_daily_counters(&self, date: NaiveDate) -> Result<u64> {
        let done = sqlx::query(queries::RESET_DAILY_COUNTERS)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}
