//! Server-sent events transport with an inactivity timeout.
//!
//! An [`SseEmitter`] writes [`SseFrame`]s into a bounded channel whose
//! receiving half becomes the HTTP response body. A watchdog task owns the
//! inactivity timer: every successful send restarts it, and when it fires
//! the emitter writes one `timeout` frame, notifies the timeout observer and
//! closes.
//!
//! ```text
//! Idle ──send──▶ Sending ──complete──▶ Completed
//!   │              │  └────on_error──▶ Error
//!   └──────────────┴──(no send for `timeout`)──▶ Timeout
//! ```
//!
//! `Completed` and `Error` are terminal: later sends are dropped with a
//! warning, and `complete`/`on_error` become no-ops. Closing is idempotent
//! and also happens when the client disconnects.

use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use futures::Stream;
use tokio::sync::{Notify, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const DEFAULT_SSE_TIMEOUT: Duration = Duration::from_secs(180);

/// Frames buffered between the emitter and the HTTP body.
const FRAME_BUFFER: usize = 64;

/// Data of the `complete` frame.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Sending,
    Completed,
    Error,
    Timeout,
}

impl EmitterState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for EmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Sending => "SENDING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// A frame without an event name (clients see it as `message`).
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn into_event(self) -> Event {
        let event = Event::default();
        let event = match self.event {
            Some(name) => event.event(name),
            None => event,
        };
        event.data(self.data)
    }
}

type Observer = Box<dyn FnOnce() + Send>;
type ErrorObserver = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
struct Observers {
    on_timeout: Option<Observer>,
    on_completion: Option<Observer>,
    on_error: Option<ErrorObserver>,
}

struct Inner {
    state: EmitterState,
    tx: Option<mpsc::Sender<SseFrame>>,
    observers: Observers,
    ended: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    /// Signalled on every successful send.
    activity: Notify,
    /// Signalled once by `end`.
    closed: Notify,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one SSE response. Cheap to clone.
#[derive(Clone)]
pub struct SseEmitter {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl SseEmitter {
    /// Create an emitter and the frame receiver that feeds the response.
    ///
    /// Must be called inside a Tokio runtime: the inactivity watchdog is
    /// spawned immediately, so the timer starts before the first send.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<SseFrame>) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: EmitterState::Idle,
                tx: Some(tx.clone()),
                observers: Observers::default(),
                ended: false,
            }),
            activity: Notify::new(),
            closed: Notify::new(),
        });

        let emitter = Self { shared, timeout };
        tokio::spawn(emitter.clone().watchdog(tx));
        (emitter, rx)
    }

    pub fn state(&self) -> EmitterState {
        self.shared.lock().state
    }

    /// True once the emitter has closed its side of the stream.
    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout_observer(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.lock().observers.on_timeout = Some(Box::new(f));
    }

    pub fn set_completion_observer(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.lock().observers.on_completion = Some(Box::new(f));
    }

    pub fn set_error_observer(&self, f: impl FnOnce(&str) + Send + 'static) {
        self.shared.lock().observers.on_error = Some(Box::new(f));
    }

    /// Send one frame and restart the inactivity timer.
    ///
    /// Returns `false` if the frame was not delivered: the emitter is in a
    /// terminal state, already closed, or the client went away.
    pub async fn send(&self, frame: SseFrame) -> bool {
        let tx = {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                warn!(state = %inner.state, "Cannot send data after completion or error");
                return false;
            }
            let Some(tx) = inner.tx.clone() else {
                debug!("SSE emitter already closed, dropping frame");
                return false;
            };
            inner.state = EmitterState::Sending;
            tx
        };

        if tx.send(frame).await.is_err() {
            debug!("SSE client disconnected");
            self.end();
            return false;
        }
        self.shared.activity.notify_one();
        true
    }

    /// Send the `complete` frame and close. No-op after a terminal state.
    pub async fn complete(&self) {
        let tx = {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = EmitterState::Completed;
            inner.tx.clone()
        };
        debug!("SSE emitter completed");

        if let Some(tx) = tx {
            let _ = tx.send(SseFrame::new("complete", DONE_MARKER)).await;
        }
        let observer = self.shared.lock().observers.on_completion.take();
        if let Some(observer) = observer {
            observer();
        }
        self.end();
    }

    /// Send an `error` frame carrying `message` and close. No-op after a
    /// terminal state.
    pub async fn on_error(&self, message: impl Into<String>) {
        let message = message.into();
        let tx = {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = EmitterState::Error;
            inner.tx.clone()
        };
        warn!(error = %message, "SSE emitter error");

        if let Some(tx) = tx {
            let data = serde_json::json!({ "type": "error", "message": message }).to_string();
            let _ = tx.send(SseFrame::new("error", data)).await;
        }
        let observer = self.shared.lock().observers.on_error.take();
        if let Some(observer) = observer {
            observer(&message);
        }
        self.end();
    }

    /// Close the stream: stop the timer and release observers. Idempotent.
    pub fn end(&self) {
        let released = {
            let mut inner = self.shared.lock();
            if inner.ended {
                return;
            }
            inner.ended = true;
            inner.tx = None;
            std::mem::take(&mut inner.observers)
        };
        drop(released);
        self.shared.closed.notify_one();
    }

    async fn handle_timeout(&self) {
        let tx = {
            let mut inner = self.shared.lock();
            if inner.ended {
                return;
            }
            if matches!(inner.state, EmitterState::Idle | EmitterState::Sending) {
                inner.state = EmitterState::Timeout;
            }
            inner.tx.clone()
        };
        warn!(timeout_ms = self.timeout.as_millis() as u64, "SSE emitter timeout");

        if let Some(tx) = tx {
            let data = serde_json::json!({ "type": "timeout", "message": "Connection timeout" }).to_string();
            // A full buffer means the client stopped reading; don't wait on it
            let _ = tx.try_send(SseFrame::new("timeout", data));
        }
        let observer = self.shared.lock().observers.on_timeout.take();
        if let Some(observer) = observer {
            observer();
        }
        self.end();
    }

    /// Owns the inactivity timer and watches for client disconnects.
    ///
    /// `client` is a sender clone used only to detect a dropped receiver; it
    /// is released when the watchdog exits, which lets the body stream end.
    async fn watchdog(self, client: mpsc::Sender<SseFrame>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.closed.notified() => return,
                _ = client.closed() => {
                    debug!("SSE client disconnected");
                    self.end();
                    return;
                }
                _ = self.shared.activity.notified() => continue,
                _ = tokio::time::sleep(self.timeout) => {
                    self.handle_timeout().await;
                    return;
                }
            }
        }
    }
}

/// Turn a frame receiver into an axum SSE response body.
pub fn sse_body(
    frames: mpsc::Receiver<SseFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(ReceiverStream::new(frames).map(|frame| Ok(frame.into_event())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn drain(rx: &mut mpsc::Receiver<SseFrame>) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn send_then_complete() {
        let (emitter, mut rx) = SseEmitter::new(DEFAULT_SSE_TIMEOUT);
        assert_eq!(emitter.state(), EmitterState::Idle);

        assert!(emitter.send(SseFrame::new("message", "hello")).await);
        assert_eq!(emitter.state(), EmitterState::Sending);
        emitter.complete().await;

        assert_eq!(
            drain(&mut rx).await,
            vec![
                SseFrame::new("message", "hello"),
                SseFrame::new("complete", DONE_MARKER),
            ]
        );
        assert_eq!(emitter.state(), EmitterState::Completed);
        assert!(emitter.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_after_complete_are_dropped() {
        let (emitter, mut rx) = SseEmitter::new(DEFAULT_SSE_TIMEOUT);
        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        emitter.set_completion_observer(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.complete().await;
        assert!(!emitter.send(SseFrame::new("message", "late")).await);
        emitter.complete().await;
        emitter.on_error("also late").await;

        assert_eq!(drain(&mut rx).await, vec![SseFrame::new("complete", DONE_MARKER)]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.state(), EmitterState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn error_frame_then_closed() {
        let (emitter, mut rx) = SseEmitter::new(DEFAULT_SSE_TIMEOUT);
        let seen = Arc::new(Mutex::new(String::new()));
        let s = seen.clone();
        emitter.set_error_observer(move |msg| *s.lock().unwrap() = msg.to_string());

        emitter.on_error("boom").await;
        emitter.complete().await;

        let frames = drain(&mut rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("error"));
        let data: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(data, serde_json::json!({"type": "error", "message": "boom"}));
        assert_eq!(*seen.lock().unwrap(), "boom");
        assert_eq!(emitter.state(), EmitterState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_emits_one_timeout_frame() {
        let (emitter, mut rx) = SseEmitter::new(Duration::from_secs(5));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let t = timeouts.clone();
        emitter.set_timeout_observer(move || {
            t.fetch_add(1, Ordering::SeqCst);
        });

        let frames = drain(&mut rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("timeout"));
        let data: serde_json::Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(data["message"], "Connection timeout");

        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.state(), EmitterState::Timeout);
        assert!(emitter.is_ended());
        assert!(!emitter.send(SseFrame::data("late")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn each_send_restarts_the_timer() {
        let (emitter, mut rx) = SseEmitter::new(Duration::from_secs(5));
        let start = tokio::time::Instant::now();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            assert!(emitter.send(SseFrame::data("tick")).await);
            tokio::task::yield_now().await;
        }

        let frames = drain(&mut rx).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3].event.as_deref(), Some("timeout"));
        // last send at 12s, timeout 5s after it
        assert!(start.elapsed() >= Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_releases_observers() {
        let (emitter, rx) = SseEmitter::new(DEFAULT_SSE_TIMEOUT);
        let token = Arc::new(());
        let held = token.clone();
        emitter.set_timeout_observer(move || drop(held));
        assert_eq!(Arc::strong_count(&token), 2);

        drop(rx);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(emitter.is_ended());
        assert_eq!(Arc::strong_count(&token), 1);
        assert!(!emitter.send(SseFrame::data("nobody")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn end_is_idempotent() {
        let (emitter, mut rx) = SseEmitter::new(DEFAULT_SSE_TIMEOUT);
        emitter.end();
        emitter.end();
        assert!(drain(&mut rx).await.is_empty());
        assert_eq!(emitter.state(), EmitterState::Idle);
    }
}
