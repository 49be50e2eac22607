//! Match synchronization engine.
//!
//! [`MatchEngine`] is a thin handle that drives one live duel match from a
//! background loop task. The loop owns all mutable match state and multiplexes
//! four inputs via `tokio::select!`:
//!
//! - a fixed-interval **status poll** against the authoritative server state
//! - an independent one-second **countdown tick** (cosmetic, never
//!   authoritative for scoring)
//! - **commands** from the handle (answer submission)
//! - the **shutdown** signal
//!
//! Typed [`MatchEvent`]s are emitted on a bounded channel returned from
//! [`MatchEngine::start`]. Status responses are reduced to a
//! [`StatusFingerprint`]; unchanged responses are discarded so frequent
//! polling cannot cause flicker or duplicate timer resets, and stale poll
//! results arriving after a local mutation are neutralized the same way.
//!
//! # Example
//!
//! ```rust,ignore
//! let (engine, mut events) = MatchEngine::start(transport, match_id, user_id,
//!     EngineConfig::new());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         MatchEvent::QuestionChanged { index, seconds } => { /* render */ }
//!         MatchEvent::Countdown { remaining } => { /* tick UI */ }
//!         MatchEvent::Finished => break,
//!         _ => {}
//!     }
//! }
//! let summary = fetch_summary(&*transport, match_id, user_id).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DuelloError, Result};
use crate::protocol::{
    ensure_success, AnswerOutcome, AnswerRequest, AnswerValue, MatchId, MatchStatus,
    RevealRequest, StatusFingerprint, UserId,
};
use crate::transport::{Method, Transport};

/// Default interval of the authoritative status poll.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval of the visible countdown tick.
const DEFAULT_COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay between a resolved reveal call and the forced status fetch.
const DEFAULT_REVEAL_REFRESH_DELAY: Duration = Duration::from_millis(250);

/// Default per-question duration when the server declares none.
const DEFAULT_QUESTION_SECONDS: u32 = 24;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`MatchEngine`].
///
/// All fields have protocol defaults; tests shrink the intervals.
///
/// # Example
///
/// ```
/// use duello_client::engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::new()
///     .with_poll_interval(Duration::from_millis(500))
///     .with_default_question_seconds(30);
/// assert_eq!(config.default_question_seconds, 30);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Status poll interval. Defaults to **1 second**.
    pub poll_interval: Duration,
    /// Countdown tick interval. Defaults to **1 second**.
    pub countdown_interval: Duration,
    /// Delay between a resolved reveal call and the forced out-of-cadence
    /// status fetch. Defaults to **250 ms**.
    pub reveal_refresh_delay: Duration,
    /// Per-question duration when the status payload carries no
    /// `ui.per_question_seconds` hint. Defaults to **24**.
    pub default_question_seconds: u32,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the loop. The `Finished` event is always
    /// delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown before the loop task is aborted.
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            countdown_interval: DEFAULT_COUNTDOWN_INTERVAL,
            reveal_refresh_delay: DEFAULT_REVEAL_REFRESH_DELAY,
            default_question_seconds: DEFAULT_QUESTION_SECONDS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_countdown_interval(mut self, interval: Duration) -> Self {
        self.countdown_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reveal_refresh_delay(mut self, delay: Duration) -> Self {
        self.reveal_refresh_delay = delay;
        self
    }

    #[must_use]
    pub fn with_default_question_seconds(mut self, seconds: u32) -> Self {
        self.default_question_seconds = seconds;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Events emitted by the engine loop.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    /// First authoritative status observed; the loading state is over.
    Loaded(Box<MatchStatus>),
    /// A meaningfully changed status (fingerprint differs from the last).
    StatusChanged(Box<MatchStatus>),
    /// The current question index changed; the countdown was reset to
    /// `seconds` and the answered/locked flags cleared.
    QuestionChanged { index: u32, seconds: u32 },
    /// Visible countdown tick. Cosmetic only.
    Countdown { remaining: u32 },
    /// The countdown reached zero with no answer recorded. The engine takes
    /// no local action; timeout handling is server-driven via later polls.
    TimeUp,
    /// The server accepted this client's answer.
    AnswerAccepted {
        is_correct: Option<bool>,
        /// Speed-mode lockout; forecloses further interaction with this
        /// question regardless of remaining countdown.
        locked: bool,
    },
    /// The server rejected the answer submission (primary action, surfaced).
    AnswerRejected { message: String },
    /// Terminal state observed; both timers are stopped. Fetch the summary
    /// next via [`fetch_summary`](crate::summary::fetch_summary).
    Finished,
}

/// Commands from the handle to the loop.
#[derive(Debug)]
enum EngineCommand {
    SubmitAnswer(AnswerValue),
}

// ── Shared state ────────────────────────────────────────────────────

/// Flags shared between the handle and the loop.
struct EngineShared {
    loaded: AtomicBool,
    finished: AtomicBool,
}

// ── Engine handle ───────────────────────────────────────────────────

/// Handle to a running match synchronization loop.
///
/// Created via [`MatchEngine::start`]. Dropping the handle aborts the loop;
/// prefer [`shutdown`](MatchEngine::shutdown) for a graceful stop.
pub struct MatchEngine {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    shared: Arc<EngineShared>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl MatchEngine {
    /// Take ownership of `match_id` and start the synchronization loop.
    ///
    /// The loop fetches status once immediately (the loading state), then
    /// polls on the configured interval for the lifetime of the match. A
    /// match that is already finished on entry emits its terminal events and
    /// never starts either timer.
    #[must_use = "the event receiver must be used to observe the match"]
    pub fn start(
        transport: Arc<dyn Transport>,
        match_id: MatchId,
        user_id: UserId,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<MatchEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<EngineCommand>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<MatchEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let shared = Arc::new(EngineShared {
            loaded: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });
        let shutdown_timeout = config.shutdown_timeout;

        let engine_loop = EngineLoop {
            transport,
            match_id,
            user_id,
            config,
            event_tx,
            shared: Arc::clone(&shared),
            state: LoopState::new(),
        };
        let task = tokio::spawn(engine_loop.run(cmd_rx, shutdown_rx));

        let engine = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (engine, event_rx)
    }

    /// Submit an answer for the current question.
    ///
    /// The loop enforces the submission preconditions (status loaded, not
    /// answered, not locked, countdown running, match unfinished); a call
    /// that violates them is a logged no-op, so callers may attempt under
    /// race without producing duplicate network submissions.
    ///
    /// # Errors
    ///
    /// Returns [`DuelloError::Closed`] if the loop has been shut down.
    pub fn submit_answer(&self, value: AnswerValue) -> Result<()> {
        self.cmd_tx
            .send(EngineCommand::SubmitAnswer(value))
            .map_err(|_| DuelloError::Closed)
    }

    /// True once the first authoritative status has been observed.
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    /// True once the terminal state has been observed.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Stop the loop, cancelling both timers.
    ///
    /// Safe to call multiple times and from any state, including before the
    /// first successful fetch. After the configured timeout the loop task is
    /// aborted.
    pub async fn shutdown(&mut self) {
        debug!("MatchEngine: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("engine loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("engine loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("engine loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("loaded", &self.is_loaded())
            .field("finished", &self.is_finished())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for MatchEngine {
    fn drop(&mut self) {
        // `Drop` is synchronous, so the graceful path (which awaits the loop)
        // is unavailable; abort so the task cannot detach and keep polling.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Loop state ──────────────────────────────────────────────────────

/// Mutable per-match state owned by the loop task.
///
/// Guard state is per-engine-instance; a new engine for the same match
/// starts clean.
struct LoopState {
    answered: bool,
    locked: bool,
    last_index: Option<u32>,
    last_fingerprint: Option<StatusFingerprint>,
    remaining: u32,
    question_seconds: u32,
    finished: bool,
    /// Last observed normalized "can advance" signal.
    pending_advance: bool,
    /// Single-flight guard over reveal calls for this match. Held from the
    /// moment a reveal is issued until the post-reveal forced refresh
    /// completes, so a stale "can advance" inside the delay window cannot
    /// double-fire.
    reveal_in_flight: bool,
}

impl LoopState {
    fn new() -> Self {
        Self {
            answered: false,
            locked: false,
            last_index: None,
            last_fingerprint: None,
            remaining: 0,
            question_seconds: 0,
            finished: false,
            pending_advance: false,
            reveal_in_flight: false,
        }
    }
}

// ── Engine loop ─────────────────────────────────────────────────────

struct EngineLoop {
    transport: Arc<dyn Transport>,
    match_id: MatchId,
    user_id: UserId,
    config: EngineConfig,
    event_tx: mpsc::Sender<MatchEvent>,
    shared: Arc<EngineShared>,
    state: LoopState,
}

impl EngineLoop {
    /// Run the synchronization loop until the match finishes or shutdown.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        debug!(match_id = self.match_id, "engine loop started");

        // Reveal subtasks report completion here; the loop reacts with the
        // forced out-of-cadence refresh and releases the guard.
        let (reveal_tx, mut reveal_rx) = mpsc::unbounded_channel::<()>();

        // Entry fetch resolves the loading state before any timer starts.
        match self.fetch_status().await {
            Ok(status) => self.apply_status(status).await,
            Err(e) => warn!("initial status fetch failed: {e}"),
        }
        self.maybe_reveal(&reveal_tx);
        if self.state.finished {
            debug!(match_id = self.match_id, "match already finished on entry");
            return;
        }

        // Both timers start one period out; the entry fetch already covered
        // "now". They run independently and are cancelled together when the
        // loop exits.
        let start = tokio::time::Instant::now();
        let mut poll =
            tokio::time::interval_at(start + self.config.poll_interval, self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut countdown = tokio::time::interval_at(
            start + self.config.countdown_interval,
            self.config.countdown_interval,
        );
        countdown.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }

                _ = poll.tick() => {
                    // A failed tick never stops subsequent ticks.
                    match self.fetch_status().await {
                        Ok(status) => self.apply_status(status).await,
                        Err(e) => warn!("status poll failed: {e}"),
                    }
                    self.maybe_reveal(&reveal_tx);
                    if self.state.finished {
                        break;
                    }
                }

                _ = countdown.tick() => {
                    self.tick_countdown().await;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::SubmitAnswer(value)) => {
                            self.submit_answer(value).await;
                        }
                        // Command channel closed: handle dropped.
                        None => {
                            debug!("command channel closed, stopping engine loop");
                            break;
                        }
                    }
                }

                Some(()) = reveal_rx.recv() => {
                    // Forced refresh outside the poll cadence picks up the
                    // post-reveal state quickly.
                    match self.fetch_status().await {
                        Ok(status) => self.apply_status(status).await,
                        Err(e) => warn!("post-reveal refresh failed: {e}"),
                    }
                    self.state.reveal_in_flight = false;
                    self.maybe_reveal(&reveal_tx);
                    if self.state.finished {
                        break;
                    }
                }
            }
        }

        debug!(match_id = self.match_id, "engine loop exited");
    }

    async fn fetch_status(&self) -> Result<MatchStatus> {
        let body = self
            .transport
            .call(
                Method::Get,
                &format!("/api/duello/match/{}/status", self.match_id),
                None,
                &[("user_id", self.user_id.to_string())],
            )
            .await?;
        ensure_success(&body)?;
        Ok(serde_json::from_value(body)?)
    }

    /// Reduce a status response to its fingerprint and apply it if changed.
    async fn apply_status(&mut self, status: MatchStatus) {
        // Every response is inspected for the reveal signal, changed or not.
        self.state.pending_advance = status.can_advance() && !status.is_finished();

        let fingerprint = status.fingerprint();
        if self.state.last_fingerprint.as_ref() == Some(&fingerprint) {
            // No meaningful change: no event, no timer reset.
            return;
        }
        self.state.last_fingerprint = Some(fingerprint);

        let first = !self.shared.loaded.swap(true, Ordering::AcqRel);

        let index = status.match_info.current_index;
        let index_changed = self.state.last_index != Some(index);
        if index_changed {
            // Unconditional reset, including when this client triggered the
            // advance.
            self.state.last_index = Some(index);
            self.state.question_seconds =
                status.question_seconds(self.config.default_question_seconds);
            self.state.remaining = self.state.question_seconds;
            self.state.answered = false;
            self.state.locked = false;
        }

        let finished = status.is_finished();
        let seconds = self.state.question_seconds;

        if first {
            self.emit(MatchEvent::Loaded(Box::new(status))).await;
        } else {
            self.emit(MatchEvent::StatusChanged(Box::new(status))).await;
        }
        if index_changed && !finished {
            self.emit(MatchEvent::QuestionChanged { index, seconds }).await;
        }

        if finished && !self.state.finished {
            self.state.finished = true;
            self.shared.finished.store(true, Ordering::Release);
            self.emit_finished().await;
        }
    }

    /// Synchronous decrement of the visible countdown; holds at zero.
    async fn tick_countdown(&mut self) {
        if !self.shared.loaded.load(Ordering::Acquire) || self.state.finished {
            return;
        }
        if self.state.remaining == 0 {
            return;
        }
        self.state.remaining -= 1;
        let remaining = self.state.remaining;
        self.emit(MatchEvent::Countdown { remaining }).await;

        if remaining == 0 && !self.state.answered {
            // Timeout is server-enforced; no local fallback submission in
            // duel mode.
            self.emit(MatchEvent::TimeUp).await;
        }
    }

    /// Submit an answer, at most once per question instance.
    async fn submit_answer(&mut self, value: AnswerValue) {
        let allowed = self.shared.loaded.load(Ordering::Acquire)
            && !self.state.answered
            && !self.state.locked
            && self.state.remaining > 0
            && !self.state.finished;
        if !allowed {
            // Defined no-op: callers may attempt under race.
            debug!(?value, "answer submission skipped by guard");
            return;
        }

        let request = AnswerRequest {
            user_id: self.user_id,
            answer: value,
            time_left_seconds: self.state.remaining,
            max_time_seconds: self.state.question_seconds,
        };
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize answer request: {e}");
                return;
            }
        };

        let outcome = self
            .transport
            .call(
                Method::Post,
                &format!("/api/duello/match/{}/answer", self.match_id),
                Some(body),
                &[],
            )
            .await
            .and_then(|response| {
                ensure_success(&response)?;
                Ok(serde_json::from_value::<AnswerOutcome>(response)?)
            });

        match outcome {
            Ok(outcome) => {
                self.state.answered = true;
                if outcome.locked() {
                    self.state.locked = true;
                }
                self.emit(MatchEvent::AnswerAccepted {
                    is_correct: outcome.is_correct,
                    locked: outcome.locked(),
                })
                .await;
            }
            Err(e) => {
                // Primary action: surfaced, not swallowed.
                self.emit(MatchEvent::AnswerRejected {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    /// Issue a reveal call when licensed and not already in flight.
    fn maybe_reveal(&mut self, reveal_tx: &mpsc::UnboundedSender<()>) {
        if !self.state.pending_advance || self.state.finished || self.state.reveal_in_flight {
            return;
        }
        let body = match serde_json::to_value(RevealRequest {
            user_id: self.user_id,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize reveal request: {e}");
                return;
            }
        };
        self.state.reveal_in_flight = true;
        debug!(match_id = self.match_id, "issuing reveal");

        let transport = Arc::clone(&self.transport);
        let match_id = self.match_id;
        let delay = self.config.reveal_refresh_delay;
        let done_tx = reveal_tx.clone();
        tokio::spawn(async move {
            let result = transport
                .call(
                    Method::Post,
                    &format!("/api/duello/match/{match_id}/reveal"),
                    Some(body),
                    &[],
                )
                .await
                .and_then(|body| ensure_success(&body));
            if let Err(e) = result {
                // Reveal failures never halt polling.
                warn!("reveal failed: {e}");
            }
            tokio::time::sleep(delay).await;
            let _ = done_tx.send(());
        });
    }

    /// Emit an event; if the channel is full, drop it with a warning so the
    /// loop never blocks on a slow consumer.
    async fn emit(&self, event: MatchEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "event channel full, dropping event: {:?}",
                    std::mem::discriminant(&dropped)
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// `Finished` is always the last event and must never be dropped, so it
    /// uses a blocking send.
    async fn emit_finished(&self) {
        if self.event_tx.send(MatchEvent::Finished).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Scripted transport ──────────────────────────────────────────

    /// Transport that replays scripted status payloads and records every
    /// call. When one scripted status remains it repeats forever, so the
    /// poll loop always has something to fetch.
    struct ScriptedTransport {
        statuses: StdMutex<VecDeque<Value>>,
        answer_response: StdMutex<Value>,
        /// Status to switch to when a reveal call lands, emulating the
        /// server-side advance. Consumed once.
        on_reveal: StdMutex<Option<Value>>,
        calls: StdMutex<Vec<String>>,
        answer_bodies: StdMutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                statuses: StdMutex::new(VecDeque::from(statuses)),
                answer_response: StdMutex::new(json!({ "success": true })),
                on_reveal: StdMutex::new(None),
                calls: StdMutex::new(Vec::new()),
                answer_bodies: StdMutex::new(Vec::new()),
            })
        }

        fn push_status(&self, status: Value) {
            self.statuses.lock().unwrap().push_back(status);
        }

        fn set_status(&self, status: Value) {
            *self.statuses.lock().unwrap() = VecDeque::from(vec![status]);
        }

        fn set_on_reveal(&self, status: Value) {
            *self.on_reveal.lock().unwrap() = Some(status);
        }

        fn set_answer_response(&self, response: Value) {
            *self.answer_response.lock().unwrap() = response;
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count_calls(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &self,
            method: Method,
            path: &str,
            body: Option<Value>,
            _query: &[(&str, String)],
        ) -> std::result::Result<Value, DuelloError> {
            self.calls.lock().unwrap().push(format!("{method} {path}"));

            if path.ends_with("/status") {
                let mut statuses = self.statuses.lock().unwrap();
                let next = if statuses.len() > 1 {
                    statuses.pop_front()
                } else {
                    statuses.front().cloned()
                };
                return next.ok_or(DuelloError::Http {
                    status: 404,
                    message: "no scripted status".into(),
                });
            }
            if path.ends_with("/answer") {
                if let Some(body) = body {
                    self.answer_bodies.lock().unwrap().push(body);
                }
                return Ok(self.answer_response.lock().unwrap().clone());
            }
            if path.ends_with("/reveal") {
                if let Some(next) = self.on_reveal.lock().unwrap().take() {
                    *self.statuses.lock().unwrap() = VecDeque::from(vec![next]);
                }
            }
            Ok(json!({ "success": true }))
        }
    }

    // ── Status payload builders ─────────────────────────────────────

    fn status(index: u32, finished: bool) -> Value {
        json!({
            "success": true,
            "match": { "id": 9, "current_index": index, "total_questions": 5 },
            "question": { "text": format!("question {index}") },
            "scores": { "score_a": 0, "score_b": 0 },
            "you": { "answered": false },
            "opponent": { "answered": false },
            "finished": finished,
            "ui": { "per_question_seconds": 3 },
        })
    }

    fn status_both_answered(index: u32) -> Value {
        json!({
            "success": true,
            "match": { "id": 9, "current_index": index, "total_questions": 5 },
            "scores": { "score_a": 1, "score_b": 1 },
            "you": { "answered": true },
            "opponent": { "answered": true },
            "finished": false,
            "both_answered": true,
            "ui": { "per_question_seconds": 3 },
        })
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_countdown_interval(Duration::from_millis(15))
            .with_reveal_refresh_delay(Duration::from_millis(30))
            .with_shutdown_timeout(Duration::from_millis(200))
    }

    fn start(
        transport: &Arc<ScriptedTransport>,
        config: EngineConfig,
    ) -> (MatchEngine, mpsc::Receiver<MatchEvent>) {
        let dynamic: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
        MatchEngine::start(dynamic, 9, 1, config)
    }

    async fn drain(events: &mut mpsc::Receiver<MatchEvent>) -> Vec<MatchEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    // ── Entry & change detection ────────────────────────────────────

    #[tokio::test]
    async fn entry_fetch_emits_loaded_then_question() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, MatchEvent::Loaded(_)), "got {first:?}");
        let second = events.recv().await.unwrap();
        assert!(
            matches!(second, MatchEvent::QuestionChanged { index: 0, seconds: 3 }),
            "got {second:?}"
        );
        assert!(engine.is_loaded());
        assert!(!engine.is_finished());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn identical_statuses_apply_once() {
        // The same payload repeats; only the first poll updates.
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.shutdown().await;

        let status_updates = drain(&mut events)
            .await
            .into_iter()
            .filter(|e| matches!(e, MatchEvent::Loaded(_) | MatchEvent::StatusChanged(_)))
            .count();
        assert_eq!(status_updates, 1, "identical fingerprints must be discarded");
        assert!(
            transport.count_calls("/status") > 2,
            "polling must have continued"
        );
    }

    #[tokio::test]
    async fn question_payload_change_alone_is_discarded() {
        // Same fingerprint, different opaque question rendering.
        let mut second = status(0, false);
        second["question"] = json!({ "text": "rephrased" });
        let transport = ScriptedTransport::new(vec![status(0, false), second]);
        let (mut engine, mut events) = start(&transport, fast_config());

        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.shutdown().await;

        let updates = drain(&mut events)
            .await
            .into_iter()
            .filter(|e| matches!(e, MatchEvent::Loaded(_) | MatchEvent::StatusChanged(_)))
            .count();
        assert_eq!(updates, 1);
    }

    // ── Answer submission ───────────────────────────────────────────

    #[tokio::test]
    async fn answer_submits_at_most_once_per_question() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        transport.set_answer_response(json!({
            "success": true, "is_correct": 1, "locked": false
        }));
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged

        engine.submit_answer(AnswerValue::Evet).unwrap();
        engine.submit_answer(AnswerValue::Evet).unwrap();
        engine.submit_answer(AnswerValue::Hayir).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            transport.count_calls("/answer"),
            1,
            "duplicate submissions must be guarded"
        );

        let accepted: Vec<_> = drain(&mut events)
            .await
            .into_iter()
            .filter(|e| matches!(e, MatchEvent::AnswerAccepted { .. }))
            .collect();
        assert_eq!(accepted.len(), 1);
        if let Some(MatchEvent::AnswerAccepted { is_correct, locked }) = accepted.first() {
            assert_eq!(*is_correct, Some(true));
            assert!(!locked);
        }

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn answer_body_reports_countdown_state() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged
        engine.submit_answer(AnswerValue::Bilmem).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let bodies = transport.answer_bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["answer"], "bilmem");
        assert_eq!(bodies[0]["max_time_seconds"], 3);
        assert!(bodies[0]["time_left_seconds"].as_u64().unwrap() <= 3);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn locked_outcome_forecloses_further_submission() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        transport.set_answer_response(json!({
            "success": true, "is_correct": false, "locked": true
        }));
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged
        engine.submit_answer(AnswerValue::Evet).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.submit_answer(AnswerValue::Evet).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(transport.count_calls("/answer"), 1);
        let locked = drain(&mut events).await.into_iter().any(
            |e| matches!(e, MatchEvent::AnswerAccepted { locked: true, .. }),
        );
        assert!(locked);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_answer_is_surfaced_and_not_marked() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        transport.set_answer_response(json!({
            "success": false, "message": "already answered"
        }));
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged
        engine.submit_answer(AnswerValue::Evet).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let rejected = drain(&mut events)
            .await
            .into_iter()
            .find(|e| matches!(e, MatchEvent::AnswerRejected { .. }));
        match rejected {
            Some(MatchEvent::AnswerRejected { message }) => {
                assert!(message.contains("already answered"));
            }
            other => panic!("expected AnswerRejected, got {other:?}"),
        }

        engine.shutdown().await;
    }

    // ── Countdown ───────────────────────────────────────────────────

    #[tokio::test]
    async fn countdown_reaches_zero_without_auto_submit() {
        // Time runs out, UI learns about it, but the engine
        // never submits a fallback answer client-side.
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.shutdown().await;

        let emitted = drain(&mut events).await;
        let time_up = emitted.iter().filter(|e| matches!(e, MatchEvent::TimeUp)).count();
        assert_eq!(time_up, 1, "TimeUp fires exactly once");

        let last_countdown = emitted
            .iter()
            .filter_map(|e| match e {
                MatchEvent::Countdown { remaining } => Some(*remaining),
                _ => None,
            })
            .last();
        assert_eq!(last_countdown, Some(0), "countdown holds at zero");

        assert_eq!(transport.count_calls("/answer"), 0);
    }

    #[tokio::test]
    async fn submission_after_timeout_is_a_no_op() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        // Let the 3-second (3-tick) countdown run dry.
        tokio::time::sleep(Duration::from_millis(120)).await;
        engine.submit_answer(AnswerValue::Evet).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(transport.count_calls("/answer"), 0);
        drain(&mut events).await;
        engine.shutdown().await;
    }

    // ── Question advance ────────────────────────────────────────────

    #[tokio::test]
    async fn index_change_resets_countdown_and_flags() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        transport.set_answer_response(json!({ "success": true, "is_correct": true }));
        // Slow countdown so the second question's timer cannot run dry
        // before the test submits against it.
        let config = fast_config().with_countdown_interval(Duration::from_millis(100));
        let (mut engine, mut events) = start(&transport, config);

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged(0)
        engine.submit_answer(AnswerValue::Evet).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Server advances to the next question.
        transport.push_status(status(1, false));
        tokio::time::sleep(Duration::from_millis(80)).await;

        let emitted = drain(&mut events).await;
        assert!(
            emitted
                .iter()
                .any(|e| matches!(e, MatchEvent::QuestionChanged { index: 1, seconds: 3 })),
            "index change must reset the countdown"
        );

        // Cleared flags allow exactly one submission for the new index.
        engine.submit_answer(AnswerValue::Hayir).unwrap();
        engine.submit_answer(AnswerValue::Hayir).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.count_calls("/answer"), 2, "one submission per index");

        engine.shutdown().await;
    }

    // ── Reveal single-flight ────────────────────────────────────────

    #[tokio::test]
    async fn reveal_fires_once_despite_repeated_polls() {
        // Several poll ticks observe "can advance" while the
        // reveal and its delay window are outstanding.
        let transport = ScriptedTransport::new(vec![status_both_answered(0)]);
        let config = fast_config().with_reveal_refresh_delay(Duration::from_millis(120));
        let (mut engine, mut events) = start(&transport, config);

        // Poll every 20 ms against a 120 ms delay window.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            transport.count_calls("/reveal"),
            1,
            "single-flight guard must hold through the delay window"
        );

        drain(&mut events).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn reveal_guard_releases_after_forced_refresh() {
        // The reveal advances the server state, the forced refresh observes
        // it, and the guard is released for the next round.
        let transport = ScriptedTransport::new(vec![status_both_answered(0)]);
        transport.set_on_reveal(status(1, false));
        let (mut engine, mut events) = start(&transport, fast_config());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count_calls("/reveal"), 1);

        // Both sides answer the next question; a second reveal round fires.
        transport.set_on_reveal(status(2, false));
        transport.set_status(status_both_answered(1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.count_calls("/reveal"), 2);

        drain(&mut events).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn reveal_failure_is_swallowed_and_polling_continues() {
        struct FailingReveal {
            inner: Arc<ScriptedTransport>,
        }

        #[async_trait]
        impl Transport for FailingReveal {
            async fn call(
                &self,
                method: Method,
                path: &str,
                body: Option<Value>,
                query: &[(&str, String)],
            ) -> std::result::Result<Value, DuelloError> {
                if path.ends_with("/reveal") {
                    self.inner
                        .calls
                        .lock()
                        .unwrap()
                        .push(format!("{method} {path}"));
                    return Err(DuelloError::Http {
                        status: 500,
                        message: "boom".into(),
                    });
                }
                self.inner.call(method, path, body, query).await
            }
        }

        let inner = ScriptedTransport::new(vec![status_both_answered(0)]);
        let transport: Arc<dyn Transport> = Arc::new(FailingReveal {
            inner: Arc::clone(&inner),
        });
        let (mut engine, mut events) = MatchEngine::start(transport, 9, 1, fast_config());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let polls_so_far = inner.count_calls("/status");
        assert!(inner.count_calls("/reveal") >= 1);
        assert!(polls_so_far >= 3, "polling must survive reveal failures");

        drain(&mut events).await;
        engine.shutdown().await;
    }

    // ── Termination ─────────────────────────────────────────────────

    #[tokio::test]
    async fn finished_stops_both_timers() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // QuestionChanged
        transport.push_status(status(3, true));

        // Wait for the Finished event.
        loop {
            match events.recv().await {
                Some(MatchEvent::Finished) => break,
                Some(_) => {}
                None => panic!("channel closed before Finished"),
            }
        }
        assert!(engine.is_finished());

        let calls_at_finish = transport.calls().len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            transport.calls().len(),
            calls_at_finish,
            "no poll or countdown activity after the terminal state"
        );
    }

    #[tokio::test]
    async fn already_finished_match_starts_with_timers_cold() {
        let transport = ScriptedTransport::new(vec![status(5, true)]);
        let (engine, mut events) = start(&transport, fast_config());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, MatchEvent::Loaded(_)));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, MatchEvent::Finished), "got {second:?}");
        assert!(engine.is_finished());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count_calls("/status"), 1, "entry fetch only");
    }

    #[tokio::test]
    async fn submit_after_finish_is_a_no_op_or_closed() {
        let transport = ScriptedTransport::new(vec![status(5, true)]);
        let (engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        let _ = events.recv().await; // Finished
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The loop has exited; submission either queues nowhere or errors
        // with Closed. Never a network call.
        let _ = engine.submit_answer(AnswerValue::Evet);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.count_calls("/answer"), 0);
    }

    // ── Teardown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_cancels_both_timers() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        engine.shutdown().await;

        let calls_after_shutdown = transport.calls().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls().len(), calls_after_shutdown);
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await;
        engine.shutdown().await;
        engine.shutdown().await; // second call is a no-op
    }

    #[tokio::test]
    async fn shutdown_before_first_fetch_is_safe() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (mut engine, _events) = start(&transport, fast_config());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn drop_aborts_the_loop() {
        let transport = ScriptedTransport::new(vec![status(0, false)]);
        let (engine, mut events) = start(&transport, fast_config());

        let _ = events.recv().await; // Loaded
        drop(engine);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let calls_after_drop = transport.calls().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls().len(), calls_after_drop);
    }

    // ── Config ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.countdown_interval, Duration::from_secs(1));
        assert_eq!(config.reveal_refresh_delay, Duration::from_millis(250));
        assert_eq!(config.default_question_seconds, 24);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = EngineConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn default_question_seconds_used_without_ui_hint() {
        let mut payload = status(0, false);
        payload.as_object_mut().unwrap().remove("ui");
        let transport = ScriptedTransport::new(vec![payload]);
        let config = fast_config().with_default_question_seconds(24);
        let (mut engine, mut events) = start(&transport, config);

        let _ = events.recv().await; // Loaded
        let second = events.recv().await.unwrap();
        assert!(
            matches!(second, MatchEvent::QuestionChanged { seconds: 24, .. }),
            "got {second:?}"
        );

        engine.shutdown().await;
    }
}
