//! Lifecycle events pushed to realtime listeners. Delivery is best-effort:
//! emitting never blocks and never fails the operation that produced it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::DriverId;

#[cfg(feature = "kafka")]
pub mod kafka;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RideEvent {
    RideRequested {
        trip_id: String,
        request_id: String,
        car_type: String,
        pickup_lat: f64,
        pickup_lng: f64,
    },
    TripAssigned {
        trip_id: String,
        driver_id: DriverId,
        driver_name: Option<String>,
    },
    TripStarted {
        trip_id: String,
        driver_id: Option<DriverId>,
        started_at: DateTime<Utc>,
    },
    DriverLiveLocation {
        trip_id: String,
        driver_id: DriverId,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    },
    TripCompleted {
        trip_id: String,
        driver_id: Option<DriverId>,
        cost: f64,
        distance: f64,
        duration: f64,
        completed_at: DateTime<Utc>,
    },
    TripCancelled {
        trip_id: String,
        cancelled_at: DateTime<Utc>,
    },
    TripRated {
        trip_id: String,
        driver_id: Option<DriverId>,
        rating: u8,
        review: Option<String>,
    },
}

impl RideEvent {
    pub fn trip_id(&self) -> &str {
        match self {
            Self::RideRequested { trip_id, .. }
            | Self::TripAssigned { trip_id, .. }
            | Self::TripStarted { trip_id, .. }
            | Self::DriverLiveLocation { trip_id, .. }
            | Self::TripCompleted { trip_id, .. }
            | Self::TripCancelled { trip_id, .. }
            | Self::TripRated { trip_id, .. } => trip_id,
        }
    }

    /// Same string as the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RideRequested { .. } => "ride_requested",
            Self::TripAssigned { .. } => "trip_assigned",
            Self::TripStarted { .. } => "trip_started",
            Self::DriverLiveLocation { .. } => "driver_live_location",
            Self::TripCompleted { .. } => "trip_completed",
            Self::TripCancelled { .. } => "trip_cancelled",
            Self::TripRated { .. } => "trip_rated",
        }
    }
}

pub trait NotificationBridge: Send + Sync {
    fn emit(&self, event: RideEvent);
}

/// In-process fan-out consumed by the `/events` stream. Slow subscribers
/// drop old events rather than hold anything up.
#[derive(Clone)]
pub struct BroadcastBridge {
    tx: broadcast::Sender<RideEvent>,
}

impl BroadcastBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBridge {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationBridge for BroadcastBridge {
    fn emit(&self, event: RideEvent) {
        // Err only means nobody is listening right now.
        if self.tx.send(event).is_err() {
            debug!("no realtime subscribers");
        }
    }
}

/// Forwards every event to several bridges.
#[derive(Default)]
pub struct Fanout {
    bridges: Vec<Arc<dyn NotificationBridge>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, bridge: Arc<dyn NotificationBridge>) -> Self {
        self.bridges.push(bridge);
        self
    }
}

impl NotificationBridge for Fanout {
    fn emit(&self, event: RideEvent) {
        for bridge in &self.bridges {
            bridge.emit(event.clone());
        }
    }
}
