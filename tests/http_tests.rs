mod support;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ride_dispatch::http::{build_router, AppState};
use support::{harness, seed_driver, Harness, DROPOFF, PICKUP};

fn router(h: &Harness) -> Router {
    build_router(AppState {
        services: h.services.clone(),
        events: h.events.clone(),
    })
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn trip_body() -> Value {
    json!({
        "passenger_id": 42,
        "passenger_name": "Sara",
        "pickup": { "location": "Olaya", "lat": PICKUP.0, "lng": PICKUP.1 },
        "dropoff": { "location": "Malaz", "lat": DROPOFF.0, "lng": DROPOFF.1 },
        "car_type": "economy",
        "cost": 35.5
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness();
    let (status, body) = send(&router(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_returns_trip_and_request() {
    let h = harness();
    let app = router(&h);
    let (status, body) = send(&app, Method::POST, "/trips", Some(trip_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["trip"]["status"], "pending");
    assert_eq!(body["trip"]["payment_method"], "cash");
    assert_eq!(body["pending_request"]["status"], "waiting");

    let trip_id = body["trip"]["id"].as_str().unwrap().to_string();
    let (status, fetched) = send(&app, Method::GET, &format!("/trips/{trip_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], trip_id.as_str());

    let (status, listed) = send(&app, Method::GET, "/users/42/trips", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, Method::POST, "/trips", Some(json!({ "passenger_id": 42 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let mut missing_cost = trip_body();
    missing_cost.as_object_mut().unwrap().remove("cost");
    let (status, _) = send(&app, Method::POST, "/trips", Some(missing_cost)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, created) = send(&app, Method::POST, "/trips", Some(trip_body())).await;
    let trip_id = created["trip"]["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/trips/{trip_id}"),
        Some(json!({ "cost": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, patched) = send(
        &app,
        Method::PATCH,
        &format!("/trips/{trip_id}"),
        Some(json!({ "payment_method": "card" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["payment_method"], "card");
}

#[tokio::test]
async fn second_accept_is_a_conflict() {
    let h = harness();
    seed_driver(&h.gateway, 1, "economy", Some(PICKUP)).await;
    seed_driver(&h.gateway, 2, "economy", Some(PICKUP)).await;
    let app = router(&h);

    let (_, created) = send(&app, Method::POST, "/trips", Some(trip_body())).await;
    let request_id = created["pending_request"]["request_id"].as_str().unwrap();
    let uri = format!("/pending-rides/{request_id}/accept");

    let (status, accepted) = send(&app, Method::POST, &uri, Some(json!({ "driver_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["assigned_driver_id"], 1);

    let (status, body) = send(&app, Method::POST, &uri, Some(json!({ "driver_id": 2 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn illegal_transition_is_unprocessable() {
    let h = harness();
    let app = router(&h);
    let (_, created) = send(&app, Method::POST, "/trips", Some(trip_body())).await;
    let trip_id = created["trip"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/trips/{trip_id}/status"),
        Some(json!({ "status": "rated", "rating": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "invalid_transition");

    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/trips/{trip_id}/status"),
        Some(json!({ "status": "teleported" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    let app = router(&h);
    for uri in ["/trips/missing", "/pending-rides/missing", "/drivers/404/stats"] {
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"]["code"], "not_found");
    }
}

#[tokio::test]
async fn next_pending_is_empty_until_a_ride_arrives() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, Method::GET, "/trips/pending/next", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    send(&app, Method::POST, "/trips", Some(trip_body())).await;
    let (status, body) = send(&app, Method::GET, "/trips/pending/next", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "waiting");
}

#[tokio::test]
async fn cleanup_reports_nothing_fresh_expired() {
    let h = harness();
    let app = router(&h);
    send(&app, Method::POST, "/trips", Some(trip_body())).await;

    let (status, body) = send(&app, Method::POST, "/pending-rides/cleanup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], 0);
}

#[tokio::test]
async fn nearest_driver_lookup() {
    let h = harness();
    seed_driver(&h.gateway, 5, "economy", Some(PICKUP)).await;
    let app = router(&h);

    let uri = format!("/drivers/nearest?lat={}&lng={}&car_type=economy", PICKUP.0, PICKUP.1);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["driver"]["driver_id"], 5);
    assert_eq!(body["radius_km"], 10.0);

    let (status, _) = send(&app, Method::GET, "/drivers/nearest?lng=46.6", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn driver_flow_over_http() {
    let h = harness();
    seed_driver(&h.gateway, 7, "economy", Some(PICKUP)).await;
    let app = router(&h);

    let (_, created) = send(&app, Method::POST, "/trips", Some(trip_body())).await;
    let trip_id = created["trip"]["id"].as_str().unwrap().to_string();

    let (status, offers) = send(&app, Method::GET, "/drivers/7/pending-rides", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offers.as_array().unwrap().len(), 1);

    let (status, assigned) = send(
        &app,
        Method::PATCH,
        &format!("/trips/{trip_id}/assign"),
        Some(json!({ "driver_id": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["status"], "assigned");

    for status_body in [json!({ "status": "started" }), json!({ "status": "completed" })] {
        let (status, _) = send(
            &app,
            Method::PATCH,
            &format!("/trips/{trip_id}/status"),
            Some(status_body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, stats) = send(&app, Method::GET, "/drivers/7/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["driver"]["total_trips"], 1);
    assert_eq!(stats["audit"]["consistent"], true);

    let (status, reset) = send(&app, Method::POST, "/drivers/earnings/reset-daily", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["drivers_reset"], 0);

    let (_, stats) = send(&app, Method::GET, "/drivers/7/stats", None).await;
    assert_eq!(stats["driver"]["today_trips_count"], 1);
}
