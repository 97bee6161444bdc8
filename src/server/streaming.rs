//! Plain-text streaming of upstream text deltas.
//!
//! Converts a channel of [`UpstreamEvent`]s into the raw byte stream served by
//! `POST /api/llm`: no framing, the concatenation of all chunks is the answer.

use bytes::Bytes;
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::upstream::UpstreamEvent;

/// Convert an upstream event receiver into a text body stream.
///
/// Text deltas are forwarded in arrival order. The stream ends at the first
/// `Completed` event or when the upstream closes; an `Error` event is yielded
/// as `Err` and ends the stream, which aborts the HTTP body.
pub fn relay_text_stream(
    rx: mpsc::Receiver<UpstreamEvent>,
    request_id: String,
) -> impl Stream<Item = Result<Bytes, RelayError>> {
    let mut failed = false;

    ReceiverStream::new(rx)
        .map_while(move |event| {
            if failed {
                return None;
            }
            match event {
                UpstreamEvent::TextDelta(text) if text.is_empty() => Some(None),
                UpstreamEvent::TextDelta(text) => Some(Some(Ok(Bytes::from(text)))),
                UpstreamEvent::Other(kind) => {
                    debug!(request_id = %request_id, kind = %kind, "Ignoring upstream event");
                    Some(None)
                }
                UpstreamEvent::Completed => {
                    debug!(request_id = %request_id, "Upstream completed");
                    None
                }
                UpstreamEvent::Error(e) => {
                    warn!(request_id = %request_id, error = %e, "Upstream failed mid-stream");
                    failed = true;
                    Some(Some(Err(RelayError::Upstream(e))))
                }
            }
        })
        .filter_map(|item| item)
}
