//! Ride logic on top of a [`Gateway`]: matching drivers to requests, the trip
//! state machine and driver earnings bookkeeping.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::db::Gateway;
use crate::geo::GeoIndex;
use crate::notify::NotificationBridge;
use crate::pricing::FarePolicy;

pub mod earnings;
pub mod lifecycle;
pub mod matching;

pub use earnings::{DriverStats, EarningsSync};
pub use lifecycle::{plan_transition, LiveSnapshot, StatusUpdate, TripEvent, TripLifecycle};
pub use matching::{CreatedRide, DriverRideFilter, MatchingEngine, RideOffer};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// How long a new request stays visible to drivers.
    pub pending_ttl: Duration,
    pub search_radius_km: f64,
    /// Drivers whose last ping is older than this are skipped by nearest lookups.
    pub driver_freshness: Duration,
    /// Used to estimate a duration when the passenger app sends none.
    pub average_speed_kmh: f64,
    pub earnings_retry_attempts: u32,
    pub earnings_retry_backoff: StdDuration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::minutes(15),
            search_radius_km: 10.0,
            driver_freshness: Duration::minutes(5),
            average_speed_kmh: 30.0,
            earnings_retry_attempts: 3,
            earnings_retry_backoff: StdDuration::from_millis(100),
        }
    }
}

/// Everything the HTTP layer and the background jobs call into, wired to
/// one gateway.
#[derive(Clone)]
pub struct RideServices<G> {
    pub matching: MatchingEngine<G>,
    pub lifecycle: TripLifecycle<G>,
    pub earnings: EarningsSync<G>,
    pub gateway: G,
}

impl<G: Gateway> RideServices<G> {
    pub fn new(
        gateway: G,
        settings: DispatchSettings,
        fares: Arc<dyn FarePolicy>,
        notifier: Arc<dyn NotificationBridge>,
    ) -> Self {
        let settings = Arc::new(settings);
        let earnings = EarningsSync::new(
            gateway.clone(),
            settings.earnings_retry_attempts,
            settings.earnings_retry_backoff,
        );
        let lifecycle = TripLifecycle::new(
            gateway.clone(),
            earnings.clone(),
            fares,
            notifier.clone(),
            settings.clone(),
        );
        let geo = GeoIndex::new(gateway.clone(), settings.search_radius_km, settings.driver_freshness);
        let matching = MatchingEngine::new(gateway.clone(), lifecycle.clone(), geo, notifier, settings);

        Self {
            matching,
            lifecycle,
            earnings,
            gateway,
        }
    }
}
