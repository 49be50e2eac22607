//! Server-sent-events push stream implementation using `reqwest`.
//!
//! [`SseStream`] consumes the `GET /api/duello/events/{userId}` endpoint and
//! incrementally parses the `text/event-stream` body into
//! [`PushFrame`]s: `event:` names the frame, `data:` lines accumulate, a
//! blank line completes the frame. Comment lines (`:`) and the `id:`/`retry:`
//! fields are ignored.
//!
//! Reconnection is deliberately NOT handled here — the owner of the
//! [`EventListener`](crate::events::EventListener) decides whether and when
//! to open a fresh stream, matching the collaborator-provided reconnect
//! behavior of browser event sources.
//!
//! # Feature gate
//!
//! Only available when the `transport-http` feature is enabled.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::error::DuelloError;
use crate::protocol::UserId;
use crate::transport::{PushFrame, PushStream};

/// Boxed chunk stream feeding the parser.
///
/// Public so callers with custom connection setups can build an
/// [`SseStream`] from any byte-chunk source via
/// [`SseStream::from_byte_stream`].
pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Vec<u8>, DuelloError>> + Send + 'static>>;

/// A [`PushStream`] implementation over a server-sent-events response body.
pub struct SseStream {
    chunks: Option<ByteStream>,
    /// Undecoded tail of the last chunk (no terminating newline yet).
    buffer: String,
    /// Parsed frames not yet handed out.
    ready: VecDeque<PushFrame>,
    /// `event:` field of the frame being assembled.
    event_name: Option<String>,
    /// `data:` lines of the frame being assembled.
    data_lines: Vec<String>,
}

impl SseStream {
    /// Open the per-user event stream.
    ///
    /// # Errors
    ///
    /// Returns [`DuelloError::Validation`] for a non-positive `user_id`
    /// before any network activity, [`DuelloError::Network`] when the
    /// connection fails, and [`DuelloError::Http`] on a non-2xx response.
    pub async fn connect(base_url: &str, user_id: UserId) -> Result<Self, DuelloError> {
        if user_id <= 0 {
            return Err(DuelloError::Validation(
                "event stream requires a user id".into(),
            ));
        }

        let url = format!(
            "{}/api/duello/events/{user_id}",
            base_url.trim_end_matches('/')
        );
        tracing::debug!(%url, "connecting to event stream");

        let response = reqwest::Client::new()
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| DuelloError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DuelloError::Http {
                status: status.as_u16(),
                message: status.as_u16().to_string(),
            });
        }

        tracing::info!(%url, "event stream established");

        let chunks = response
            .bytes_stream()
            .map(|r| {
                r.map(|b| b.to_vec())
                    .map_err(|e| DuelloError::Network(e.to_string()))
            })
            .boxed();
        Ok(Self::from_byte_stream(chunks))
    }

    /// Open the per-user event stream, failing with
    /// [`DuelloError::Timeout`] if the connection is not established within
    /// the given duration.
    pub async fn connect_with_timeout(
        base_url: &str,
        user_id: UserId,
        timeout: std::time::Duration,
    ) -> Result<Self, DuelloError> {
        tokio::time::timeout(timeout, Self::connect(base_url, user_id))
            .await
            .map_err(|_| DuelloError::Timeout)?
    }

    /// Build a stream from an already-established chunk source.
    pub fn from_byte_stream(chunks: ByteStream) -> Self {
        Self {
            chunks: Some(chunks),
            buffer: String::new(),
            ready: VecDeque::new(),
            event_name: None,
            data_lines: Vec::new(),
        }
    }

    /// Consume a chunk, queueing any frames it completes.
    fn feed(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.feed_line(line);
        }
    }

    fn feed_line(&mut self, line: &str) {
        if line.is_empty() {
            // Blank line completes the frame; an empty accumulator is just
            // a keep-alive separator.
            let event = self.event_name.take();
            if !self.data_lines.is_empty() {
                let data = self.data_lines.join("\n");
                self.data_lines.clear();
                self.ready.push_back(PushFrame { event, data });
            }
            return;
        }
        if line.starts_with(':') {
            return; // comment / keep-alive
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // Last-event-id resumption and retry hints are collaborator
            // concerns.
            "id" | "retry" => {}
            _ => tracing::debug!(field, "unknown SSE field ignored"),
        }
    }
}

#[async_trait]
impl PushStream for SseStream {
    async fn recv(&mut self) -> Option<Result<PushFrame, DuelloError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }
            let chunks = self.chunks.as_mut()?;
            match chunks.next().await {
                Some(Ok(chunk)) => self.feed(&chunk),
                Some(Err(e)) => {
                    self.chunks = None;
                    return Some(Err(e));
                }
                // Server closed; a partial frame without its blank line is
                // dropped, per the SSE processing model.
                None => {
                    self.chunks = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the response stream tears down the connection.
        self.chunks = None;
        self.ready.clear();
    }
}

impl std::fmt::Debug for SseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseStream")
            .field("connected", &self.chunks.is_some())
            .field("ready", &self.ready.len())
            .finish()
    }
}
