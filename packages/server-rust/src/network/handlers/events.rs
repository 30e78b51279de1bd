//! Server-sent event stream of completed classifications.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use super::AppState;

/// `GET /api/v1/events`: one `classification` event per completed call,
/// starting from the moment of connection.
///
/// The stream ends when the client disconnects (the subscription is dropped
/// with the response body) or when the service shuts down.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.service.subscribe();
    debug!(subscriber = subscription.id().0, "event stream opened");

    let stream = subscription.filter_map(|response| async move {
        match Event::default().event("classification").json_data(&*response) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, id = response.id, "failed to encode event");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.sse_keep_alive))
}
