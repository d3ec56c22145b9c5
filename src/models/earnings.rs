use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::driver::{Driver, DriverId};

/// One ledger row per driver and calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DriverEarningsRecord {
    pub driver_id: DriverId,
    pub date: NaiveDate,
    pub today_trips: i64,
    pub today_earnings: f64,
    pub total_trips: i64,
    pub total_earnings: f64,
    pub updated_at: DateTime<Utc>,
}

impl DriverEarningsRecord {
    pub fn snapshot(driver: &Driver, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            driver_id: driver.id,
            date,
            today_trips: driver.today_trips_count,
            today_earnings: driver.today_earnings,
            total_trips: driver.total_trips,
            total_earnings: driver.total_earnings,
            updated_at: now,
        }
    }
}

/// Comparison of a driver's running counters against their trip history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarningsAudit {
    pub driver_id: DriverId,
    pub recorded_trips: i64,
    pub recorded_earnings: f64,
    pub completed_trips: i64,
    pub completed_earnings: f64,
    pub consistent: bool,
}

impl EarningsAudit {
    pub fn compare(driver: &Driver, completed_trips: i64, completed_earnings: f64) -> Self {
        let consistent = driver.total_trips == completed_trips
            && (driver.total_earnings - completed_earnings).abs() < 0.005;
        Self {
            driver_id: driver.id,
            recorded_trips: driver.total_trips,
            recorded_earnings: driver.total_earnings,
            completed_trips,
            completed_earnings,
            consistent,
        }
    }
}
