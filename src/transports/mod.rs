//! Transport implementations for the Duello match service.
//!
//! This module provides concrete [`Transport`](crate::Transport) and
//! [`PushStream`](crate::transport::PushStream) implementations behind
//! feature gates. Enable the corresponding Cargo feature to pull one in:
//!
//! | Feature          | Implementation                    |
//! |------------------|-----------------------------------|
//! | `transport-http` | [`HttpTransport`], [`SseStream`]  |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), duello_client::DuelloError> {
//! use duello_client::transport::{Method, Transport};
//! use duello_client::{HttpTransport, SseStream};
//!
//! let http = HttpTransport::new("https://quiz.example.com");
//! let inbox = http.call(Method::Get, "/api/duello/inbox/42", None, &[]).await?;
//!
//! let events = SseStream::connect("https://quiz.example.com", 42).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-http")]
pub mod http;

#[cfg(feature = "transport-http")]
pub mod sse;

#[cfg(feature = "transport-http")]
pub use http::HttpTransport;

#[cfg(feature = "transport-http")]
pub use sse::SseStream;
