//! Event sink handed to each step of a run.

use tokio::sync::mpsc;
use tracing::debug;

use crate::stream_event::AgentStreamEvent;

/// Where a run's events go.
///
/// A synchronous run uses a detached sink that discards everything. A
/// streamed run wraps the sending half of a bounded channel: `emit` waits for
/// capacity, so a slow subscriber applies backpressure to the loop instead of
/// losing events. Once the receiver is gone the sink reports itself closed and
/// later events are discarded.
#[derive(Debug)]
pub struct EventSink {
    tx: Option<mpsc::Sender<AgentStreamEvent>>,
    closed: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentStreamEvent>) -> Self {
        Self { tx: Some(tx), closed: false }
    }

    /// A sink that drops every event.
    pub fn detached() -> Self {
        Self { tx: None, closed: false }
    }

    /// Deliver one event. Returns `false` when nobody is listening anymore.
    pub async fn emit(&mut self, event: AgentStreamEvent) -> bool {
        if self.closed {
            return false;
        }
        let Some(tx) = &self.tx else {
            return true;
        };
        if tx.send(event).await.is_err() {
            debug!("Event subscriber went away, dropping further events");
            self.closed = true;
            self.tx = None;
            return false;
        }
        true
    }

    /// True once the subscriber disconnected.
    pub fn is_closed(&self) -> bool {
        self.closed || self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }
}
