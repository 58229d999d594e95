use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;

use dreamcut_analysis::progress::ProgressEvent;

/// Comment frames keep idle proxies from cutting a long analysis.
const KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Data of the frame that ends every progress stream.
pub const END_OF_STREAM: &str = "[DONE]";

pub type SseItem = Result<Event, Infallible>;

pub fn progress_response<S>(stream: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = SseItem> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keepalive"))
}

/// Frames progress events for one query's stream.
///
/// Each frame is named after its stage so browsers can attach
/// `addEventListener("complete", ...)`, and carries a per-stream sequence
/// id starting at 1.
#[derive(Debug, Default)]
pub struct ProgressEncoder {
    sent: u64,
}

impl ProgressEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: &ProgressEvent) -> SseItem {
        let frame = self.next_frame().event(event.stage.as_str());
        Ok(match serde_json::to_string(event) {
            Ok(json) => frame.data(json),
            Err(e) => {
                tracing::warn!(query_id = %event.query_id, error = %e, "unencodable progress event");
                frame.comment("unencodable event")
            }
        })
    }

    pub fn end(&mut self) -> SseItem {
        Ok(self.next_frame().event("end").data(END_OF_STREAM))
    }

    fn next_frame(&mut self) -> Event {
        self.sent += 1;
        Event::default().id(self.sent.to_string())
    }
}
