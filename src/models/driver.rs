use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geo::GeoPoint;
use crate::models::trip::UserId;

pub type DriverId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Online,
    Offline,
}

impl DriverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(Error::Corrupt(format!("unknown driver status {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub phone: Option<String>,
    pub status: DriverStatus,
    pub car_type: String,
    pub last_lat: Option<f64>,
    pub last_lng: Option<f64>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub today_trips_count: i64,
    pub today_earnings: f64,
    /// Day the today counters belong to. `None` until first booked or reset.
    #[serde(default)]
    pub counters_date: Option<NaiveDate>,
    pub total_trips: i64,
    pub total_earnings: f64,
    pub balance: f64,
}

impl Driver {
    /// Blank offline profile with zeroed counters.
    pub fn new(id: DriverId, name: impl Into<String>, car_type: impl Into<String>) -> Self {
        Self {
            id,
            user_id: None,
            name: name.into(),
            phone: None,
            status: DriverStatus::Offline,
            car_type: car_type.into(),
            last_lat: None,
            last_lng: None,
            location_updated_at: None,
            today_trips_count: 0,
            today_earnings: 0.0,
            counters_date: None,
            total_trips: 0,
            total_earnings: 0.0,
            balance: 0.0,
        }
    }

    pub fn location(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.last_lat?, self.last_lng?))
    }

    /// Adds `delta` to the counters of `date`, rolling today's counters
    /// over first when they belong to an earlier day.
    pub fn book(&mut self, delta: CounterDelta, date: NaiveDate) {
        if self.counters_date.map_or(true, |d| d < date) {
            self.today_trips_count = 0;
            self.today_earnings = 0.0;
            self.counters_date = Some(date);
        }
        self.today_trips_count += delta.trips;
        self.today_earnings += delta.earnings;
        self.total_trips += delta.trips;
        self.total_earnings += delta.earnings;
        self.balance += delta.earnings;
    }

    /// Zeroes today's counters unless they already belong to `date` or a
    /// later day. Returns whether anything was reset.
    pub fn reset_for(&mut self, date: NaiveDate) -> bool {
        if self.counters_date.is_some_and(|d| d >= date) {
            return false;
        }
        self.today_trips_count = 0;
        self.today_earnings = 0.0;
        self.counters_date = Some(date);
        true
    }
}

/// Increment applied to a driver's running counters. Never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterDelta {
    pub trips: i64,
    pub earnings: f64,
}

impl CounterDelta {
    pub fn completed_trip(earnings: f64) -> Self {
        Self {
            trips: 1,
            earnings: earnings.max(0.0),
        }
    }
}
