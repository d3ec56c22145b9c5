use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::AppState;
use crate::db::Gateway;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub trip_id: Option<String>,
}

/// `GET /events?trip_id=..`: realtime ride events as Server-Sent Events.
/// Best-effort: a subscriber that falls behind skips what it missed.
pub async fn stream<G: Gateway>(
    State(state): State<AppState<G>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let trip_filter = query.trip_id;
    let events = BroadcastStream::new(state.events.subscribe()).filter_map(move |received| {
        let event = match received {
            Ok(event) => event,
            Err(lagged) => {
                warn!(error = %lagged, "event subscriber lagged");
                return futures::future::ready(None);
            }
        };
        if trip_filter
            .as_deref()
            .is_some_and(|trip_id| trip_id != event.trip_id())
        {
            return futures::future::ready(None);
        }
        let sse = Event::default()
            .event(event.name())
            .json_data(&event)
            .map_err(|e| warn!(error = %e, "could not encode ride event"))
            .ok()
            .map(Ok);
        futures::future::ready(sse)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
