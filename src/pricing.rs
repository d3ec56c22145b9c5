//! Fare rates and the completion-time pricing policy.
//!
//! Formula: `fare = max(minimum, (base + km * per_km + min * per_minute) * multiplier)`
//! where the multiplier depends on the vehicle class.

use std::collections::HashMap;

use anyhow::{anyhow, Result as AnyResult};

use crate::models::Trip;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
    pub minimum_fare: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            base_fare: 5.0,
            per_km: 1.5,
            per_minute: 0.3,
            minimum_fare: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    pub rates: Rates,
    multipliers: HashMap<String, f64>,
}

impl RateTable {
    pub fn new(rates: Rates, multipliers: HashMap<String, f64>) -> Self {
        let multipliers = multipliers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { rates, multipliers }
    }

    /// Parses `economy=1.0,premium=1.8` style lists.
    pub fn parse_multipliers(raw: &str) -> AnyResult<HashMap<String, f64>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (class, factor) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow!("fare multiplier {entry:?} is not class=factor"))?;
                let factor: f64 = factor
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("fare multiplier {entry:?} has a non-numeric factor"))?;
                if !factor.is_finite() || factor <= 0.0 {
                    return Err(anyhow!("fare multiplier {entry:?} must be positive"));
                }
                Ok((class.trim().to_ascii_lowercase(), factor))
            })
            .collect()
    }

    pub fn multiplier(&self, car_type: &str) -> f64 {
        self.multipliers
            .get(&car_type.to_ascii_lowercase())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn fare(&self, car_type: &str, distance_km: f64, duration_min: f64) -> f64 {
        let r = &self.rates;
        let raw = (r.base_fare + distance_km * r.per_km + duration_min * r.per_minute)
            * self.multiplier(car_type);
        round_money(raw.max(r.minimum_fare))
    }
}

impl Default for RateTable {
    fn default() -> Self {
        let multipliers = [("economy", 1.0), ("comfort", 1.3), ("premium", 1.8), ("van", 1.5)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self::new(Rates::default(), multipliers)
    }
}

pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// What the server observed between start and completion.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TripMeasurement {
    /// Path length over recorded pings; absent with fewer than two pings.
    pub distance_km: Option<f64>,
    pub duration_min: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripActuals {
    pub cost: f64,
    pub distance_km: f64,
    pub duration_min: f64,
}

/// Decides the final cost, distance and duration when a trip completes.
pub trait FarePolicy: Send + Sync {
    fn settle(&self, trip: &Trip, measured: &TripMeasurement) -> TripActuals;
}

/// Keeps the passenger-side estimate as the charged cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedFare;

impl FarePolicy for EstimatedFare {
    fn settle(&self, trip: &Trip, measured: &TripMeasurement) -> TripActuals {
        TripActuals {
            cost: trip.cost,
            distance_km: measured.distance_km.unwrap_or(trip.distance_km),
            duration_min: measured.duration_min.unwrap_or(trip.duration_min),
        }
    }
}

/// Re-prices from the rate table whenever a route was recorded; otherwise
/// falls back to the estimate.
#[derive(Debug, Clone, Default)]
pub struct MeteredFare {
    pub table: RateTable,
}

impl FarePolicy for MeteredFare {
    fn settle(&self, trip: &Trip, measured: &TripMeasurement) -> TripActuals {
        let duration_min = measured.duration_min.unwrap_or(trip.duration_min);
        match measured.distance_km {
            Some(distance_km) => TripActuals {
                cost: self.table.fare(&trip.car_type, distance_km, duration_min),
                distance_km: round_money(distance_km),
                duration_min,
            },
            None => TripActuals {
                cost: trip.cost,
                distance_km: trip.distance_km,
                duration_min,
            },
        }
    }
}
