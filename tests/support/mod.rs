#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use ride_dispatch::db::MemoryGateway;
use ride_dispatch::engine::{DispatchSettings, RideServices};
use ride_dispatch::models::{Driver, DriverStatus, PlaceInput, TripDraft};
use ride_dispatch::notify::BroadcastBridge;
use ride_dispatch::pricing::{EstimatedFare, FarePolicy};

pub const PICKUP: (f64, f64) = (24.7136, 46.6753);
pub const DROPOFF: (f64, f64) = (24.6917, 46.6853);

pub struct Harness {
    pub gateway: MemoryGateway,
    pub services: RideServices<MemoryGateway>,
    pub events: BroadcastBridge,
}

pub fn settings() -> DispatchSettings {
    DispatchSettings {
        earnings_retry_backoff: StdDuration::from_millis(1),
        ..DispatchSettings::default()
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(EstimatedFare))
}

pub fn harness_with(fares: Arc<dyn FarePolicy>) -> Harness {
    let gateway = MemoryGateway::new();
    let events = BroadcastBridge::new(64);
    let services = RideServices::new(gateway.clone(), settings(), fares, Arc::new(events.clone()));
    Harness {
        gateway,
        services,
        events,
    }
}

/// Online driver with a fresh fix at `at`, or without a position.
pub async fn seed_driver(gateway: &MemoryGateway, id: i64, car_type: &str, at: Option<(f64, f64)>) -> Driver {
    let mut driver = Driver::new(id, format!("Driver {id}"), car_type);
    driver.status = DriverStatus::Online;
    if let Some((lat, lng)) = at {
        driver.last_lat = Some(lat);
        driver.last_lng = Some(lng);
        driver.location_updated_at = Some(Utc::now());
    }
    gateway.insert_driver(driver.clone()).await;
    driver
}

pub async fn seed_stale_driver(gateway: &MemoryGateway, id: i64, car_type: &str, at: (f64, f64)) {
    let mut driver = Driver::new(id, format!("Driver {id}"), car_type);
    driver.status = DriverStatus::Online;
    driver.last_lat = Some(at.0);
    driver.last_lng = Some(at.1);
    driver.location_updated_at = Some(Utc::now() - Duration::hours(1));
    gateway.insert_driver(driver).await;
}

pub fn draft() -> TripDraft {
    draft_from(PICKUP, "economy", 35.5)
}

pub fn draft_from(pickup: (f64, f64), car_type: &str, cost: f64) -> TripDraft {
    TripDraft {
        passenger_id: 42,
        passenger_name: Some("Sara".into()),
        passenger_phone: Some("+966500000000".into()),
        pickup: PlaceInput {
            location: "Olaya".into(),
            lat: Some(pickup.0),
            lng: Some(pickup.1),
            accuracy: Some(10.0),
            timestamp: None,
        },
        dropoff: PlaceInput {
            location: "Malaz".into(),
            lat: Some(DROPOFF.0),
            lng: Some(DROPOFF.1),
            accuracy: None,
            timestamp: None,
        },
        car_type: Some(car_type.into()),
        cost: Some(cost),
        distance: None,
        duration: None,
        payment_method: Some("cash".into()),
    }
}

/// Creates a ride and drives it to `ongoing` with `driver_id`.
pub async fn ongoing_trip(h: &Harness, driver_id: i64, cost: f64) -> String {
    use ride_dispatch::engine::TripEvent;

    let ride = h
        .services
        .matching
        .create(draft_from(PICKUP, "economy", cost))
        .await
        .unwrap();
    h.services
        .matching
        .accept(&ride.pending_request.request_id, driver_id)
        .await
        .unwrap();
    h.services
        .lifecycle
        .update_status(&ride.trip.id, TripEvent::Start)
        .await
        .unwrap();
    ride.trip.id
}
