//! Server-sent event encoding for stream frames.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;

use threadline_runtime::frames::StreamFrame;

pub fn encode(frame: &StreamFrame) -> Event {
    let name = frame.event_name();
    Event::default()
        .event(name)
        .json_data(frame.payload())
        .unwrap_or_else(|e| {
            warn!(error = %e, event = name, "failed to encode frame");
            Event::default().event(name).data("{}")
        })
}

/// One SSE event per frame, in order. The response body owns the receiver,
/// so a dropped connection closes the channel.
pub fn frame_stream(
    rx: mpsc::Receiver<StreamFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(ReceiverStream::new(rx).map(|frame| Ok(encode(&frame))))
}
