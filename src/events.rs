//! Server-push event routing.
//!
//! [`EventListener`] owns the per-user push channel and dispatches named
//! server events to registered handlers. The server uses two wire shapes for
//! the same notification:
//!
//! - a **named event** — the frame carries the event name directly
//! - a **generic message** — the frame is unnamed and its JSON data carries a
//!   `type` field
//!
//! Both shapes resolve to one handler lookup per frame, never two, so a
//! handler cannot be double-invoked for one notification. Unknown event names
//! are dropped silently (forward compatibility with newer servers).
//!
//! Auto-reconnect is a collaborator concern; when the stream ends the
//! dispatch loop exits and the owner decides whether to open a new listener.
//!
//! # Example
//!
//! ```rust,ignore
//! let stream = SseStream::connect("https://quiz.example.com", user_id).await?;
//! let handlers = EventHandlers::new()
//!     .on(events::INVITE_NEW, |payload| { /* refresh inbox */ })
//!     .on(events::INVITE_ACCEPTED, |payload| { /* enter match */ });
//! let mut listener = EventListener::open(stream, user_id, handlers)?;
//! // ...
//! listener.close();
//! ```

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DuelloError, Result};
use crate::protocol::UserId;
use crate::transport::{PushFrame, PushStream};

/// Readiness flag changed for a visible user.
pub const READY: &str = "ready";
/// A new invite arrived in the inbox.
pub const INVITE_NEW: &str = "invite:new";
/// An outbound invite was accepted; a match now exists.
pub const INVITE_ACCEPTED: &str = "invite:accepted";
/// An outbound invite was rejected.
pub const INVITE_REJECTED: &str = "invite:rejected";
/// An inbound invite was cancelled by its sender.
pub const INVITE_CANCELLED: &str = "invite:cancelled";

/// The SSE default event name; frames carrying it are generic messages and
/// route by their embedded `type` field instead.
const GENERIC_EVENT: &str = "message";

/// Callback invoked with the frame's parsed JSON payload.
pub type EventHandler = Box<dyn FnMut(Value) + Send>;

/// Handler-by-name registry consumed by [`EventListener::open`].
#[derive(Default)]
pub struct EventHandlers {
    map: HashMap<String, EventHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a named event. A second registration for the
    /// same name replaces the first.
    #[must_use]
    pub fn on(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(Value) + Send + 'static,
    ) -> Self {
        self.map.insert(name.into(), Box::new(handler));
        self
    }

    /// Invoke the handler for `name`, if one is registered.
    fn dispatch(&mut self, name: &str, payload: Value) -> bool {
        match self.map.get_mut(name) {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("names", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Handle to a running push-event dispatch loop.
///
/// Created via [`EventListener::open`], which spawns the loop as a background
/// task. Dropping the handle closes the channel.
#[derive(Debug)]
pub struct EventListener {
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl EventListener {
    /// Open a listener over a connected [`PushStream`] scoped to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DuelloError::Validation`] when `user_id` is absent
    /// (non-positive) — the push channel is strictly per-user.
    pub fn open(
        stream: impl PushStream,
        user_id: UserId,
        handlers: EventHandlers,
    ) -> Result<Self> {
        if user_id <= 0 {
            return Err(DuelloError::Validation(
                "event stream requires a user id".into(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(dispatch_loop(stream, handlers, shutdown_rx));

        Ok(Self {
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Release the push channel. Idempotent; never panics.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// True while the dispatch loop is still running.
    pub fn is_open(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        // Graceful close may not get scheduled again once the handle is
        // gone, so abort outright.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Background loop: read frames, route each to at most one handler.
async fn dispatch_loop(
    mut stream: impl PushStream,
    mut handlers: EventHandlers,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!("event dispatch loop started");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("event listener closed");
                stream.close().await;
                break;
            }

            incoming = stream.recv() => {
                match incoming {
                    Some(Ok(frame)) => dispatch_frame(&mut handlers, frame),
                    Some(Err(e)) => {
                        warn!("push channel error: {e}");
                        stream.close().await;
                        break;
                    }
                    None => {
                        debug!("push channel closed by server");
                        break;
                    }
                }
            }
        }
    }

    debug!("event dispatch loop exited");
}

/// Resolve a frame to one event name and invoke its handler once.
fn dispatch_frame(handlers: &mut EventHandlers, frame: PushFrame) {
    let payload = serde_json::from_str::<Value>(&frame.data).unwrap_or(Value::Null);

    let name = match frame.event.as_deref() {
        // Native named event: the name wins even when the payload also
        // carries a `type` field, so one notification routes exactly once.
        Some(name) if name != GENERIC_EVENT => name.to_string(),
        // Generic envelope: route by the embedded `type`.
        _ => match payload.get("type").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                debug!("untyped push message dropped");
                return;
            }
        },
    };

    if !handlers.dispatch(&name, payload) {
        debug!(event = %name, "no handler registered, dropping");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted push stream; hangs once the script is exhausted so the
    /// dispatch loop stays alive until close.
    struct MockStream {
        incoming: VecDeque<Option<std::result::Result<PushFrame, DuelloError>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockStream {
        fn new(
            incoming: Vec<Option<std::result::Result<PushFrame, DuelloError>>>,
        ) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    incoming: VecDeque::from(incoming),
                    closed: Arc::clone(&closed),
                },
                closed,
            )
        }
    }

    #[async_trait]
    impl PushStream for MockStream {
        async fn recv(&mut self) -> Option<std::result::Result<PushFrame, DuelloError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    fn named(event: &str, data: &str) -> Option<std::result::Result<PushFrame, DuelloError>> {
        Some(Ok(PushFrame {
            event: Some(event.into()),
            data: data.into(),
        }))
    }

    fn generic(data: &str) -> Option<std::result::Result<PushFrame, DuelloError>> {
        Some(Ok(PushFrame {
            event: None,
            data: data.into(),
        }))
    }

    fn recording_handlers(names: &[&str]) -> (EventHandlers, Arc<Mutex<Vec<(String, Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = EventHandlers::new();
        for name in names {
            let name = name.to_string();
            let sink = Arc::clone(&seen);
            handlers = handlers.on(name.clone(), move |payload| {
                sink.lock().unwrap().push((name.clone(), payload));
            });
        }
        (handlers, seen)
    }

    #[tokio::test]
    async fn named_event_routes_by_name() {
        let (stream, _closed) = MockStream::new(vec![named(INVITE_NEW, r#"{"invite_id":7}"#)]);
        let (handlers, seen) = recording_handlers(&[INVITE_NEW]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, INVITE_NEW);
        assert_eq!(seen[0].1["invite_id"], 7);
        drop(seen);

        listener.close();
    }

    #[tokio::test]
    async fn generic_message_routes_by_type_field() {
        let (stream, _closed) =
            MockStream::new(vec![generic(r#"{"type":"invite:cancelled","invite_id":3}"#)]);
        let (handlers, seen) = recording_handlers(&[INVITE_CANCELLED]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["invite_id"], 3);
        drop(seen);

        listener.close();
    }

    #[tokio::test]
    async fn named_event_with_embedded_type_dispatches_once() {
        // The payload's `type` names a different registered event; the frame
        // name must win and the type handler must not also fire.
        let (stream, _closed) =
            MockStream::new(vec![named(INVITE_NEW, r#"{"type":"invite:cancelled"}"#)]);
        let (handlers, seen) = recording_handlers(&[INVITE_NEW, INVITE_CANCELLED]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, INVITE_NEW);
        drop(seen);

        listener.close();
    }

    #[tokio::test]
    async fn default_message_name_is_treated_as_generic() {
        let (stream, _closed) = MockStream::new(vec![named("message", r#"{"type":"ready"}"#)]);
        let (handlers, seen) = recording_handlers(&[READY]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        listener.close();
    }

    #[tokio::test]
    async fn unknown_event_is_dropped() {
        let (stream, _closed) = MockStream::new(vec![
            named("leaderboard:rebuilt", "{}"),
            named(READY, r#"{"user_id":5}"#),
        ]);
        let (handlers, seen) = recording_handlers(&[READY]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "unknown event must be dropped silently");
        assert_eq!(seen[0].0, READY);
        drop(seen);

        listener.close();
    }

    #[tokio::test]
    async fn non_json_payload_dispatches_null() {
        let (stream, _closed) = MockStream::new(vec![named(READY, "not json")]);
        let (handlers, seen) = recording_handlers(&[READY]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, Value::Null);
        drop(seen);

        listener.close();
    }

    #[tokio::test]
    async fn open_without_user_fails_fast() {
        let (stream, _closed) = MockStream::new(vec![]);
        let err = EventListener::open(stream, 0, EventHandlers::new()).unwrap_err();
        assert!(matches!(err, DuelloError::Validation(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_stream() {
        let (stream, closed) = MockStream::new(vec![]);
        let mut listener = EventListener::open(stream, 1, EventHandlers::new()).unwrap();

        listener.close();
        listener.close(); // second close is a no-op

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(closed.load(Ordering::Relaxed));
        assert!(!listener.is_open());
    }

    #[tokio::test]
    async fn loop_exits_when_server_closes() {
        let (stream, _closed) = MockStream::new(vec![named(READY, "{}"), None]);
        let (handlers, seen) = recording_handlers(&[READY]);

        let listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!listener.is_open());
    }

    #[tokio::test]
    async fn delivery_order_matches_send_order() {
        let (stream, _closed) = MockStream::new(vec![
            named(INVITE_NEW, r#"{"invite_id":1}"#),
            named(INVITE_NEW, r#"{"invite_id":2}"#),
            named(INVITE_NEW, r#"{"invite_id":3}"#),
        ]);
        let (handlers, seen) = recording_handlers(&[INVITE_NEW]);

        let mut listener = EventListener::open(stream, 1, handlers).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let ids: Vec<i64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload["invite_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        listener.close();
    }
}
