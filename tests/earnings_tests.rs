mod support;

use chrono::{Duration, Utc};

use ride_dispatch::db::Gateway;
use ride_dispatch::engine::TripEvent;
use ride_dispatch::error::Error;
use support::{harness, ongoing_trip, seed_driver, PICKUP};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_lose_no_updates() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;

    let costs = [12.5, 20.0, 7.25, 31.0, 18.75, 9.5];
    let mut trip_ids = Vec::new();
    for cost in costs {
        trip_ids.push(ongoing_trip(&h, 7, cost).await);
    }

    let tasks: Vec<_> = trip_ids
        .into_iter()
        .map(|trip_id| {
            let lifecycle = h.services.lifecycle.clone();
            tokio::spawn(async move { lifecycle.update_status(&trip_id, TripEvent::Complete).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let expected: f64 = costs.iter().sum();
    let driver = h.gateway.get_driver(7).await.unwrap();
    assert_eq!(driver.total_trips, costs.len() as i64);
    assert_eq!(driver.today_trips_count, costs.len() as i64);
    assert!((driver.total_earnings - expected).abs() < 1e-9);
    assert!((driver.today_earnings - expected).abs() < 1e-9);

    let stats = h.services.earnings.stats(7).await.unwrap();
    assert!(stats.audit.consistent);
    assert_eq!(stats.audit.completed_trips, costs.len() as i64);
}

#[tokio::test]
async fn totals_only_grow_across_completions() {
    let h = harness();
    seed_driver(&h.gateway, 3, "economy", Some(PICKUP)).await;

    let mut last_trips = 0;
    let mut last_earnings = 0.0;
    for cost in [15.0, 0.0, 22.5] {
        let trip_id = ongoing_trip(&h, 3, cost).await;
        h.services
            .lifecycle
            .update_status(&trip_id, TripEvent::Complete)
            .await
            .unwrap();

        let driver = h.gateway.get_driver(3).await.unwrap();
        assert_eq!(driver.total_trips, last_trips + 1);
        assert!(driver.total_earnings >= last_earnings);
        last_trips = driver.total_trips;
        last_earnings = driver.total_earnings;
    }
    assert_eq!(last_earnings, 37.5);
}

#[tokio::test]
async fn cancelled_trips_earn_nothing() {
    let h = harness();
    seed_driver(&h.gateway, 5, "economy", Some(PICKUP)).await;
    let trip_id = ongoing_trip(&h, 5, 44.0).await;
    h.services
        .lifecycle
        .update_status(&trip_id, TripEvent::Cancel)
        .await
        .unwrap();

    let driver = h.gateway.get_driver(5).await.unwrap();
    assert_eq!(driver.total_trips, 0);
    assert_eq!(driver.total_earnings, 0.0);
    assert!(h.services.earnings.audit(5).await.unwrap().consistent);
}

#[tokio::test]
async fn history_lists_the_daily_ledger() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;
    for cost in [10.0, 15.0] {
        let trip_id = ongoing_trip(&h, 7, cost).await;
        h.services
            .lifecycle
            .update_status(&trip_id, TripEvent::Complete)
            .await
            .unwrap();
    }

    let since = (Utc::now() - Duration::days(30)).date_naive();
    let history = h.services.earnings.history(7, since).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].today_trips, 2);
    assert_eq!(history[0].total_earnings, 25.0);

    assert!(matches!(
        h.services.earnings.history(404, since).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn daily_reset_keeps_lifetime_totals() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;
    seed_driver(&h.gateway, 8, "economy", Some(PICKUP)).await;
    let trip_id = ongoing_trip(&h, 7, 28.0).await;
    h.services
        .lifecycle
        .update_status(&trip_id, TripEvent::Complete)
        .await
        .unwrap();

    let tomorrow = Utc::now() + Duration::days(1);
    let reset = h.services.earnings.reset_daily(tomorrow).await.unwrap();
    assert_eq!(reset, 2);
    assert_eq!(h.services.earnings.reset_daily(tomorrow).await.unwrap(), 0);

    let driver = h.gateway.get_driver(7).await.unwrap();
    assert_eq!(driver.today_trips_count, 0);
    assert_eq!(driver.today_earnings, 0.0);
    assert_eq!(driver.total_trips, 1);
    assert_eq!(driver.total_earnings, 28.0);
}

#[tokio::test]
async fn reset_after_midnight_spares_later_completions() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;
    h.services.earnings.reset_daily(Utc::now()).await.unwrap();

    let trip_id = ongoing_trip(&h, 7, 28.0).await;
    h.services
        .lifecycle
        .update_status(&trip_id, TripEvent::Complete)
        .await
        .unwrap();

    let reset = h.services.earnings.reset_daily(Utc::now()).await.unwrap();
    assert_eq!(reset, 0);

    let driver = h.gateway.get_driver(7).await.unwrap();
    assert_eq!(driver.today_trips_count, 1);
    assert_eq!(driver.today_earnings, 28.0);
    assert!(h.services.earnings.audit(7).await.unwrap().consistent);
}

#[tokio::test]
async fn reconcile_repairs_nothing_but_refreshes_the_ledger() {
    let h = harness();
    seed_driver(&h.gateway, 9, "economy", None).await;

    let record = h.services.earnings.reconcile(9, Utc::now()).await.unwrap();
    assert_eq!(record.driver_id, 9);
    assert_eq!(record.total_trips, 0);
    assert_eq!(record.total_earnings, 0.0);

    assert!(matches!(
        h.services.earnings.reconcile(404, Utc::now()).await,
        Err(Error::NotFound(_))
    ));
}
