//! One broadcast channel per streaming Run (spec §5: "Stream Bus"). The
//! engine is the sole writer; SSE pumps (possibly several, possibly zero)
//! are readers. The channel closes when the Run reaches a terminal state —
//! a disconnected/lagging reader never blocks the Run's own progress.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::response::sse::Event;
use futures_util::Stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;

/// The exact SSE event vocabulary of spec §4.5/§6: `thread.run.*` and
/// `thread.message.*` named events carrying the current entity snapshot,
/// terminated by a literal `done` / `[DONE]` frame.
#[derive(Debug, Clone)]
pub enum SseEvent {
    Named { event: &'static str, data: serde_json::Value },
    Done,
}

impl SseEvent {
    pub fn named(event: &'static str, data: impl serde::Serialize) -> Self {
        Self::Named {
            event,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    fn into_axum_event(self) -> Event {
        match self {
            Self::Named { event, data } => Event::default().event(event).data(data.to_string()),
            Self::Done => Event::default().event("done").data("[DONE]"),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

const CHANNEL_CAPACITY: usize = 256;

pub struct StreamBus {
    channels: RwLock<HashMap<String, broadcast::Sender<SseEvent>>>,
}

impl StreamBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open (or re-open) the channel for a Run. Called once at Run start by
    /// the engine; a second call (e.g. resuming after `submit_tool_outputs`)
    /// replaces the sender, dropping any stale subscribers.
    pub fn open(&self, run_id: &str) -> broadcast::Sender<SseEvent> {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        self.channels.write().insert(run_id.to_string(), tx.clone());
        tx
    }

    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<SseEvent>> {
        self.channels.read().get(run_id).map(|tx| tx.subscribe())
    }

    /// Best-effort publish — a Run with no live subscribers still emits
    /// events so a pump that attaches mid-run catches up from its next read,
    /// but a `send` with zero receivers is itself a benign no-op (`broadcast`
    /// returns an error in that case, which we ignore).
    pub fn publish(&self, run_id: &str, event: SseEvent) {
        if let Some(tx) = self.channels.read().get(run_id) {
            let _ = tx.send(event);
        }
    }

    pub fn close(&self, run_id: &str) {
        self.channels.write().remove(run_id);
    }
}

impl Default for StreamBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapt a broadcast receiver into the `Stream<Item = Result<Event, _>>`
/// axum's `Sse` response wants, handling `Lagged`/`Closed` the way a
/// long-lived SSE pump must (spec §5: slow readers drop events, they never
/// stall the Run).
pub fn sse_stream(
    mut rx: broadcast::Receiver<SseEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    yield Ok(event.into_axum_event());
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    tracing::warn!("sse subscriber lagged, skipping ahead");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_subscribe_sees_published_event() {
        let bus = StreamBus::new();
        bus.open("run_1");
        let mut rx = bus.subscribe("run_1").unwrap();
        bus.publish("run_1", SseEvent::Done);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn subscribe_unknown_run_is_none() {
        let bus = StreamBus::new();
        assert!(bus.subscribe("run_missing").is_none());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = StreamBus::new();
        bus.open("run_1");
        bus.publish("run_1", SseEvent::Done);
    }

    #[test]
    fn close_removes_the_channel() {
        let bus = StreamBus::new();
        bus.open("run_1");
        bus.close("run_1");
        assert!(bus.subscribe("run_1").is_none());
    }
}
