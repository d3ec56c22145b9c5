pub const INSERT_TRIP: &str = r#"
INSERT INTO trips (
    id, passenger_id, passenger_name, driver_id, driver_name,
    pickup_location, pickup_lat, pickup_lng, pickup_accuracy, pickup_timestamp,
    dropoff_location, dropoff_lat, dropoff_lng, dropoff_accuracy, dropoff_timestamp,
    car_type, cost, distance, duration, payment_method,
    status, trip_status, assigned_at, started_at, completed_at, cancelled_at,
    rating, review, created_at, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20,
    $21, $22, $23, $24, $25, $26, $27, $28, $29, $30
);
"#;

pub const SELECT_TRIP: &str = r#"
SELECT * FROM trips WHERE id = $1;
"#;

pub const SELECT_TRIPS_BY_PASSENGER: &str = r#"
SELECT * FROM trips WHERE passenger_id = $1 ORDER BY created_at DESC;
"#;

pub const SELECT_TRIPS_BY_DRIVER: &str = r#"
SELECT * FROM trips WHERE driver_id = $1 ORDER BY created_at DESC;
"#;

pub const SELECT_ONGOING_TRIP_FOR_DRIVER: &str = r#"
SELECT * FROM trips
WHERE driver_id = $1 AND status = 'ongoing'
ORDER BY started_at DESC
LIMIT 1;
"#;

// Guarded on both legacy status columns so `completed` and `rated` are
// distinct pre-states.
pub const UPDATE_TRIP_IF_PHASE: &str = r#"
UPDATE trips
SET driver_id = $2,
    driver_name = $3,
    cost = $4,
    distance = $5,
    duration = $6,
    status = $7,
    trip_status = $8,
    assigned_at = $9,
    started_at = $10,
    completed_at = $11,
    cancelled_at = $12,
    rating = $13,
    review = $14,
    updated_at = $15
WHERE id = $1
  AND status = $16
  AND trip_status IS NOT DISTINCT FROM $17
RETURNING *;
"#;

pub const UPDATE_TRIP_DETAILS: &str = r#"
UPDATE trips
SET pickup_location = COALESCE($2, pickup_location),
    dropoff_location = COALESCE($3, dropoff_location),
    payment_method = COALESCE($4, payment_method),
    updated_at = $5
WHERE id = $1 AND status = 'pending'
RETURNING *;
"#;

pub const UPDATE_ACTIVE_REQUEST_DETAILS: &str = r#"
UPDATE pending_ride_requests
SET pickup_location = COALESCE($2, pickup_location),
    dropoff_location = COALESCE($3, dropoff_location),
    payment_method = COALESCE($4, payment_method),
    updated_at = $5
WHERE trip_id = $1 AND status IN ('waiting', 'accepted');
"#;

pub const INSERT_TRIP_POINT: &str = r#"
INSERT INTO trip_points (trip_id, driver_id, recorded_at, lat, lng)
VALUES ($1, $2, $3, $4, $5);
"#;

pub const SELECT_TRIP_POINTS: &str = r#"
SELECT trip_id, driver_id, recorded_at, lat, lng
FROM trip_points
WHERE trip_id = $1
ORDER BY recorded_at ASC, point_id ASC;
"#;

pub const INSERT_PENDING_REQUEST: &str = r#"
INSERT INTO pending_ride_requests (
    request_id, trip_id, passenger_id, passenger_name, passenger_phone,
    pickup_location, pickup_lat, pickup_lng,
    dropoff_location, dropoff_lat, dropoff_lng,
    car_type, estimated_cost, estimated_distance, estimated_duration, payment_method,
    status, assigned_driver_id, assigned_at, rejected_by, rejection_count,
    expires_at, created_at, updated_at
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
);
"#;

pub const SELECT_PENDING_REQUEST: &str = r#"
SELECT * FROM pending_ride_requests WHERE request_id = $1;
"#;

pub const SELECT_ACTIVE_REQUEST_FOR_TRIP: &str = r#"
SELECT * FROM pending_ride_requests
WHERE trip_id = $1 AND status IN ('waiting', 'accepted')
ORDER BY created_at DESC
LIMIT 1;
"#;

pub const SELECT_WAITING_REQUESTS: &str = r#"
SELECT * FROM pending_ride_requests
WHERE status = 'waiting'
  AND ($1::text IS NULL OR lower(car_type) = lower($1::text))
  AND ($2::bigint IS NULL OR NOT ($2::bigint = ANY(rejected_by)))
  AND ($3::timestamptz IS NULL OR expires_at > $3::timestamptz)
ORDER BY created_at ASC, request_id ASC;
"#;

pub const UPDATE_REQUEST_IF_STATUS: &str = r#"
UPDATE pending_ride_requests
SET status = $2,
    assigned_driver_id = $3,
    assigned_at = $4,
    rejected_by = $5,
    rejection_count = $6,
    expires_at = $7,
    updated_at = $8
WHERE request_id = $1 AND status = $9
RETURNING *;
"#;

pub const RECORD_REJECTION: &str = r#"
UPDATE pending_ride_requests
SET rejected_by = array_append(rejected_by, $2),
    rejection_count = rejection_count + 1,
    updated_at = $3
WHERE request_id = $1
  AND status = 'waiting'
  AND NOT ($2 = ANY(rejected_by))
RETURNING *;
"#;

pub const EXPIRE_WAITING_REQUESTS: &str = r#"
UPDATE pending_ride_requests
SET status = 'expired',
    updated_at = $1
WHERE status = 'waiting' AND expires_at < $1
RETURNING *;
"#;

pub const SELECT_DRIVER: &str = r#"
SELECT * FROM drivers WHERE id = $1;
"#;

pub const SELECT_DRIVER_FOR_UPDATE: &str = r#"
SELECT id FROM drivers WHERE id = $1 FOR UPDATE;
"#;

pub const SELECT_ONLINE_DRIVERS: &str = r#"
SELECT * FROM drivers
WHERE status = 'online' AND last_lat IS NOT NULL AND last_lng IS NOT NULL
ORDER BY id ASC;
"#;

pub const UPDATE_DRIVER_LOCATION: &str = r#"
UPDATE drivers
SET last_lat = $2,
    last_lng = $3,
    location_updated_at = $4
WHERE id = $1
RETURNING *;
"#;

pub const UPDATE_DRIVER_STATUS: &str = r#"
UPDATE drivers SET status = $2 WHERE id = $1 RETURNING *;
"#;

pub const INCREMENT_DRIVER_COUNTERS: &str = r#"
UPDATE drivers
SET today_trips_count = CASE
        WHEN counters_date IS NULL OR counters_date < $4 THEN $2
        ELSE today_trips_count + $2
    END,
    today_earnings = CASE
        WHEN counters_date IS NULL OR counters_date < $4 THEN $3
        ELSE today_earnings + $3
    END,
    counters_date = GREATEST(counters_date, $4),
    total_trips = total_trips + $2,
    total_earnings = total_earnings + $3,
    balance = balance + $3
WHERE id = $1
RETURNING *;
"#;

pub const RESET_DAILY_COUNTERS: &str = r#"
UPDATE drivers
SET today_trips_count = 0,
    today_earnings = 0,
    counters_date = $1
WHERE counters_date IS NULL OR counters_date < $1;
"#;

pub const UPSERT_DRIVER_EARNINGS: &str = r#"
INSERT INTO driver_earnings (driver_id, date, today_trips, today_earnings, total_trips, total_earnings, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (driver_id, date) DO UPDATE
SET today_trips = EXCLUDED.today_trips,
    today_earnings = EXCLUDED.today_earnings,
    total_trips = EXCLUDED.total_trips,
    total_earnings = EXCLUDED.total_earnings,
    updated_at = EXCLUDED.updated_at
RETURNING driver_id, date, today_trips, today_earnings, total_trips, total_earnings, updated_at;
"#;

pub const SELECT_EARNINGS_HISTORY: &str = r#"
SELECT driver_id, date, today_trips, today_earnings, total_trips, total_earnings, updated_at
FROM driver_earnings
WHERE driver_id = $1 AND date >= $2
ORDER BY date ASC;
"#;
