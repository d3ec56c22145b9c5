use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::Gateway;
use crate::error::Result;
use crate::models::{CounterDelta, Driver, DriverEarningsRecord, DriverId, EarningsAudit, TripPhase};

/// Keeps driver running counters and the dated ledger in step.
#[derive(Clone)]
pub struct EarningsSync<G> {
    gateway: G,
    attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverStats {
    pub driver: Driver,
    pub audit: EarningsAudit,
}

impl<G: Gateway> EarningsSync<G> {
    pub fn new(gateway: G, attempts: u32, backoff: Duration) -> Self {
        Self {
            gateway,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Books one completed trip: increments the driver's counters and
    /// upserts today's ledger row under the same row lock. Transient
    /// failures are retried; the last error is returned to the caller.
    pub async fn record_completion(
        &self,
        driver_id: DriverId,
        earnings: f64,
        now: DateTime<Utc>,
    ) -> Result<DriverEarningsRecord> {
        self.with_retry(driver_id, CounterDelta::completed_trip(earnings), now)
            .await
    }

    /// Rewrites today's ledger row from the driver's current counters.
    pub async fn reconcile(&self, driver_id: DriverId, now: DateTime<Utc>) -> Result<DriverEarningsRecord> {
        self.with_retry(driver_id, CounterDelta::default(), now).await
    }

    async fn with_retry(
        &self,
        driver_id: DriverId,
        delta: CounterDelta,
        now: DateTime<Utc>,
    ) -> Result<DriverEarningsRecord> {
        let mut attempt = 1;
        loop {
            match self
                .gateway
                .reconcile_counters(driver_id, delta, now.date_naive(), now)
                .await
            {
                Ok((_, record)) => return Ok(record),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(driver_id, attempt, error = %e, "earnings sync failed, retrying");
                    tokio::time::sleep(self.backoff * 2u32.pow(attempt - 1)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Zeroes today's counters for every driver. Safe to repeat within a day.
    pub async fn reset_daily(&self, now: DateTime<Utc>) -> Result<u64> {
        let reset = self.gateway.reset_daily_counters(now.date_naive()).await?;
        info!(drivers = reset, day = %now.date_naive(), "daily earnings counters reset");
        Ok(reset)
    }

    pub async fn history(&self, driver_id: DriverId, since: NaiveDate) -> Result<Vec<DriverEarningsRecord>> {
        self.gateway.get_driver(driver_id).await?;
        self.gateway.earnings_history(driver_id, since).await
    }

    /// Compares lifetime counters against the driver's completed trips.
    pub async fn audit(&self, driver_id: DriverId) -> Result<EarningsAudit> {
        Ok(self.stats(driver_id).await?.audit)
    }

    pub async fn stats(&self, driver_id: DriverId) -> Result<DriverStats> {
        let driver = self.gateway.get_driver(driver_id).await?;
        let trips = self.gateway.list_trips_by_driver(driver_id).await?;
        let (count, sum) = trips
            .iter()
            .filter(|t| matches!(t.phase(), TripPhase::Completed | TripPhase::Rated))
            .fold((0i64, 0.0f64), |(n, total), t| (n + 1, total + t.cost));

        let audit = EarningsAudit::compare(&driver, count, sum);
        if !audit.consistent {
            warn!(
                driver_id,
                recorded_trips = audit.recorded_trips,
                completed_trips = audit.completed_trips,
                "driver counters drifted from trip history"
            );
        }
        Ok(DriverStats { driver, audit })
    }
}
