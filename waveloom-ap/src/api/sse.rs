//! `/events`: republishes the shared event bus as Server-Sent Events.

use crate::state::SharedState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use waveloom_common::events::PlayerEvent;

pub async fn event_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(to_sse_event(&event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber lagged; some events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("event bus closed, ending SSE stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

fn to_sse_event(event: &PlayerEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event("PlayerError").data("serialization failed"))
}
