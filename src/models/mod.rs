pub mod driver;
pub mod earnings;
pub mod pending_request;
pub mod trip;
pub mod trip_points;

pub use driver::{CounterDelta, Driver, DriverId, DriverStatus};
pub use earnings::{DriverEarningsRecord, EarningsAudit};
pub use pending_request::{PendingRideRequest, RequestStatus};
pub use trip::{Place, PlaceInput, Rating, Trip, TripDetailsPatch, TripDraft, TripPhase, TripRecord, TripState, UserId};
pub use trip_points::TripPoint;
