//! Transport abstractions for the Duello match service.
//!
//! Two traits cover the two channels the protocol uses:
//!
//! - [`Transport`] — outbound request/response calls against the REST
//!   endpoints. One `call` per operation, uniform error translation, and no
//!   retries at this layer (retry policy belongs to the match engine).
//! - [`PushStream`] — the long-lived server-push channel delivering named
//!   events. Receive-only; the [`EventListener`](crate::events::EventListener)
//!   owns dispatch.
//!
//! Connection setup is intentionally NOT part of either trait — construct a
//! connected implementation externally (for the default HTTP/SSE pair see
//! [`HttpTransport`](crate::transports::HttpTransport) and
//! [`SseStream`](crate::transports::SseStream)) and hand it to the component
//! that needs it.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use duello_client::error::DuelloError;
//! use duello_client::transport::{Method, Transport};
//! use serde_json::Value;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn call(
//!         &self,
//!         method: Method,
//!         path: &str,
//!         body: Option<Value>,
//!         query: &[(&str, String)],
//!     ) -> Result<Value, DuelloError> {
//!         // Perform the request and return the parsed JSON body
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DuelloError;

/// HTTP method for a [`Transport::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// Request/response channel to the Duello REST endpoints.
///
/// Implementors resolve `path` against their configured base URL, attach the
/// JSON `body` (POST) and `query` pairs, and return the parsed JSON response
/// body.
///
/// # Errors
///
/// - [`DuelloError::Network`] — the request never produced a response.
/// - [`DuelloError::Http`] — a non-2xx status; the message carries the
///   server-supplied error body field when present, else the status code.
///
/// Domain-level failures reported inside a 200 body (`success: false`) are
/// the caller's concern, not the transport's.
///
/// # Object Safety
///
/// The trait is object-safe and `call` takes `&self`, so one
/// `Arc<dyn Transport>` is shared between the matchmaking component, the
/// match engine, and the invite watch.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one request and return the parsed JSON response body.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> Result<Value, DuelloError>;
}

/// One server-push frame.
///
/// Frames arrive in two wire shapes: a *named* event (`event` is the server's
/// event name) and a *generic* message whose JSON data carries a `type`
/// field. [`EventListener`](crate::events::EventListener) normalizes both to
/// one handler lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    /// Event name, when the server sent a named event.
    pub event: Option<String>,
    /// Raw data payload (usually JSON text).
    pub data: String,
}

/// Receive side of the per-user server-push channel.
///
/// # Cancel Safety
///
/// [`recv`](PushStream::recv) **MUST** be cancel-safe: the dispatch task
/// polls it inside `tokio::select!`, and a cancelled `recv` must not lose a
/// frame. Channel-backed implementations are naturally cancel-safe.
#[async_trait]
pub trait PushStream: Send + 'static {
    /// Receive the next push frame.
    ///
    /// Returns:
    /// - `Some(Ok(frame))` — a complete frame was received
    /// - `Some(Err(e))` — the channel failed (e.g. [`DuelloError::Network`])
    /// - `None` — the channel was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<PushFrame, DuelloError>>;

    /// Close the channel. Must be idempotent; implementations release
    /// resources even when the close handshake fails.
    async fn close(&mut self);
}
