use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tracing::{debug, warn};

use super::Listener;

/// Turn a listener into an SSE response. Each event is named after its kind
/// and carries the JSON body; the stream ends when the listener is dropped.
pub fn event_stream(
    mut listener: Listener,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        debug!(listener = listener.id(), "sse stream started");
        while let Some(ev) = listener.recv().await {
            match Event::default().event(ev.kind()).json_data(&ev) {
                Ok(e) => yield Ok(e),
                Err(err) => warn!(error = %err, kind = ev.kind(), "sse encode failed"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}
