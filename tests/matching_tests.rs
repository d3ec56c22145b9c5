mod support;

use chrono::{Duration, Utc};

use ride_dispatch::db::Gateway;
use ride_dispatch::engine::DriverRideFilter;
use ride_dispatch::error::Error;
use ride_dispatch::models::{Driver, RequestStatus, TripPhase};
use support::{draft, draft_from, harness, seed_driver, seed_stale_driver, PICKUP};

#[tokio::test]
async fn create_persists_pending_trip_and_waiting_request() {
    let h = harness();
    let before = Utc::now();
    let ride = h.services.matching.create(draft()).await.unwrap();

    assert_eq!(ride.trip.phase(), TripPhase::Pending);
    assert_eq!(ride.trip.driver_id, None);
    assert_eq!(ride.pending_request.status, RequestStatus::Waiting);
    assert_eq!(ride.pending_request.estimated_cost, 35.5);
    assert_eq!(ride.pending_request.trip_id, ride.trip.id);

    let fetched = h
        .services
        .matching
        .get(&ride.pending_request.request_id)
        .await
        .unwrap();
    assert_eq!(fetched.status, RequestStatus::Waiting);
    assert!(fetched.rejected_by.is_empty());
    assert_eq!(fetched.rejection_count, 0);
    assert!(fetched.expires_at > before);

    let trip = h.gateway.get_trip(&ride.trip.id).await.unwrap();
    assert_eq!(trip, ride.trip);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_accept_wins() {
    let h = harness();
    for id in 1..=8 {
        seed_driver(&h.gateway, id, "economy", Some(PICKUP)).await;
    }
    let ride = h.services.matching.create(draft()).await.unwrap();
    let request_id = ride.pending_request.request_id.clone();

    let mut tasks = Vec::new();
    for driver_id in 1..=8 {
        let matching = h.services.matching.clone();
        let request_id = request_id.clone();
        tasks.push(tokio::spawn(async move {
            (driver_id, matching.accept(&request_id, driver_id).await)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (driver_id, outcome) = task.await.unwrap();
        match outcome {
            Ok(_) => winners.push(driver_id),
            Err(Error::Conflict(_)) => {}
            Err(other) => panic!("unexpected error for driver {driver_id}: {other}"),
        }
    }
    assert_eq!(winners.len(), 1, "winners: {winners:?}");

    let request = h.services.matching.get(&request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);
    assert_eq!(request.assigned_driver_id, Some(winners[0]));
    let trip = h.gateway.get_trip(&ride.trip.id).await.unwrap();
    assert_eq!(trip.phase(), TripPhase::Assigned);
    assert_eq!(trip.driver_id, Some(winners[0]));
}

#[tokio::test]
async fn repeated_rejection_counts_once_and_hides_the_request() {
    let h = harness();
    seed_driver(&h.gateway, 5, "economy", Some(PICKUP)).await;
    seed_driver(&h.gateway, 6, "economy", Some(PICKUP)).await;
    let ride = h.services.matching.create(draft()).await.unwrap();
    let request_id = ride.pending_request.request_id;

    for _ in 0..3 {
        let request = h.services.matching.reject(&request_id, 5).await.unwrap();
        assert_eq!(request.rejected_by, vec![5]);
        assert_eq!(request.rejection_count, 1);
        assert_eq!(request.status, RequestStatus::Waiting);
    }

    let for_five = h
        .services
        .matching
        .list_for_driver(5, DriverRideFilter::default())
        .await
        .unwrap();
    assert!(for_five.is_empty());

    let for_six = h
        .services
        .matching
        .list_for_driver(6, DriverRideFilter::default())
        .await
        .unwrap();
    assert_eq!(for_six.len(), 1);
    assert_eq!(for_six[0].request.request_id, request_id);

    let err = h.services.matching.accept(&request_id, 5).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn requests_never_return_to_waiting() {
    let h = harness();
    seed_driver(&h.gateway, 1, "economy", Some(PICKUP)).await;
    seed_driver(&h.gateway, 2, "economy", Some(PICKUP)).await;
    let ride = h.services.matching.create(draft()).await.unwrap();
    let request_id = ride.pending_request.request_id;

    h.services.matching.accept(&request_id, 1).await.unwrap();
    assert!(matches!(
        h.services.matching.accept(&request_id, 2).await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        h.services.matching.reject(&request_id, 2).await,
        Err(Error::Conflict(_))
    ));

    let cancelled = h.services.matching.cancel(&request_id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(matches!(
        h.services.matching.cancel(&request_id).await,
        Err(Error::Conflict(_))
    ));
    assert!(h.services.matching.accept(&request_id, 2).await.is_err());
    assert!(h.services.matching.reject(&request_id, 2).await.is_err());

    let request = h.services.matching.get(&request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Cancelled);
    let trip = h.gateway.get_trip(&ride.trip.id).await.unwrap();
    assert_eq!(trip.phase(), TripPhase::Cancelled);
    assert!(trip.completed_at().is_none());
}

#[tokio::test]
async fn sweep_expires_stale_requests_once() {
    let h = harness();
    let ride = h.services.matching.create(draft()).await.unwrap();
    let request_id = ride.pending_request.request_id.clone();
    let after_deadline = ride.pending_request.expires_at + Duration::seconds(1);

    assert_eq!(h.services.matching.sweep_expired(Utc::now()).await.unwrap(), 0);
    assert_eq!(h.services.matching.sweep_expired(after_deadline).await.unwrap(), 1);
    assert_eq!(h.services.matching.sweep_expired(after_deadline).await.unwrap(), 0);

    let request = h.services.matching.get(&request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Expired);

    // The trip itself stays pending until someone cancels it.
    let trip = h.gateway.get_trip(&ride.trip.id).await.unwrap();
    assert_eq!(trip.phase(), TripPhase::Pending);

    seed_driver(&h.gateway, 3, "economy", None).await;
    assert!(matches!(
        h.services.matching.accept(&request_id, 3).await,
        Err(Error::Conflict(_))
    ));
}

#[tokio::test]
async fn offers_are_nearest_first_and_filtered_by_class() {
    let h = harness();
    let driver_at = (24.70, 46.68);
    seed_driver(&h.gateway, 9, "economy", Some(driver_at)).await;

    let far = h
        .services
        .matching
        .create(draft_from((24.80, 46.75), "economy", 40.0))
        .await
        .unwrap();
    let near = h
        .services
        .matching
        .create(draft_from((24.705, 46.681), "economy", 20.0))
        .await
        .unwrap();
    h.services
        .matching
        .create(draft_from((24.701, 46.680), "premium", 90.0))
        .await
        .unwrap();

    let offers = h
        .services
        .matching
        .list_for_driver(9, DriverRideFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = offers.iter().map(|o| o.request.trip_id.as_str()).collect();
    assert_eq!(ids, vec![near.trip.id.as_str(), far.trip.id.as_str()]);
    assert!(offers[0].distance_km.unwrap() < offers[1].distance_km.unwrap());

    let close_only = h
        .services
        .matching
        .list_for_driver(
            9,
            DriverRideFilter {
                car_type: None,
                max_distance_km: Some(2.0),
            },
        )
        .await
        .unwrap();
    assert_eq!(close_only.len(), 1);

    let premium = h
        .services
        .matching
        .list_for_driver(
            9,
            DriverRideFilter {
                car_type: Some("premium".into()),
                max_distance_km: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(premium.len(), 1);
    assert_eq!(premium[0].request.car_type, "premium");
}

#[tokio::test]
async fn nearest_driver_skips_stale_and_other_classes() {
    let h = harness();
    seed_driver(&h.gateway, 1, "economy", Some((24.72, 46.68))).await;
    seed_driver(&h.gateway, 2, "premium", Some((24.714, 46.676))).await;
    seed_stale_driver(&h.gateway, 3, "economy", PICKUP).await;

    let economy = h
        .services
        .matching
        .nearest_driver(Some(PICKUP.0), Some(PICKUP.1), Some("economy"))
        .await
        .unwrap();
    assert_eq!(economy.map(|d| d.driver_id), Some(1));

    let any = h
        .services
        .matching
        .nearest_driver(Some(PICKUP.0), Some(PICKUP.1), None)
        .await
        .unwrap();
    assert_eq!(any.map(|d| d.driver_id), Some(2));

    let nobody = h
        .services
        .matching
        .nearest_driver(Some(10.0), Some(10.0), None)
        .await
        .unwrap();
    assert!(nobody.is_none());

    assert!(matches!(
        h.services.matching.nearest_driver(None, Some(1.0), None).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn assigned_driver_backing_out_reopens_matching() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;
    seed_driver(&h.gateway, 8, "economy", Some(PICKUP)).await;
    let ride = h.services.matching.create(draft()).await.unwrap();
    let first = ride.pending_request.request_id.clone();

    h.services.matching.accept(&first, 7).await.unwrap();
    let closed = h.services.matching.reject(&first, 7).await.unwrap();
    assert_eq!(closed.status, RequestStatus::Rejected);
    assert_eq!(closed.rejected_by, vec![7]);

    let trip = h.gateway.get_trip(&ride.trip.id).await.unwrap();
    assert_eq!(trip.phase(), TripPhase::Pending);
    assert_eq!(trip.driver_id, None);

    let reopened = h
        .gateway
        .active_request_for_trip(&ride.trip.id)
        .await
        .unwrap()
        .expect("a fresh request is waiting");
    assert_ne!(reopened.request_id, first);
    assert_eq!(reopened.status, RequestStatus::Waiting);
    assert_eq!(reopened.rejected_by, vec![7]);
    assert_eq!(reopened.rejection_count, 1);

    let for_seven = h
        .services
        .matching
        .list_for_driver(7, DriverRideFilter::default())
        .await
        .unwrap();
    assert!(for_seven.is_empty());

    let accepted = h.services.matching.accept(&reopened.request_id, 8).await.unwrap();
    assert_eq!(accepted.assigned_driver_id, Some(8));
}

#[tokio::test]
async fn next_pending_prefers_driver_view() {
    let h = harness();
    seed_driver(&h.gateway, 4, "economy", Some(PICKUP)).await;
    assert!(h.services.matching.next_pending(None).await.unwrap().is_none());

    let ride = h.services.matching.create(draft()).await.unwrap();
    let any = h.services.matching.next_pending(None).await.unwrap().unwrap();
    assert_eq!(any.request_id, ride.pending_request.request_id);

    h.services
        .matching
        .reject(&ride.pending_request.request_id, 4)
        .await
        .unwrap();
    assert!(h.services.matching.next_pending(Some(4)).await.unwrap().is_none());
}

#[tokio::test]
async fn ineligible_drivers_cannot_accept_by_id() {
    let h = harness();
    seed_driver(&h.gateway, 1, "premium", Some(PICKUP)).await;
    h.gateway
        .insert_driver(Driver::new(2, "Driver 2", "economy"))
        .await;
    seed_driver(&h.gateway, 3, "Economy", Some(PICKUP)).await;
    let ride = h.services.matching.create(draft()).await.unwrap();
    let request_id = ride.pending_request.request_id;

    for driver_id in [1, 2] {
        assert!(matches!(
            h.services.matching.accept(&request_id, driver_id).await,
            Err(Error::Conflict(_))
        ));
    }
    let request = h.services.matching.get(&request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Waiting);
    assert_eq!(request.assigned_driver_id, None);

    let accepted = h.services.matching.accept(&request_id, 3).await.unwrap();
    assert_eq!(accepted.assigned_driver_id, Some(3));
}
