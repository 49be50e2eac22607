//! # Duello Client
//!
//! Async Rust client for the Duello head-to-head trivia match protocol.
//!
//! This crate drives a client through the duel lifecycle: profile and invite
//! management, the synchronized per-question answer/reveal/advance protocol
//! of a live match, and the terminal summary. Match state is
//! server-authoritative; the client polls it, mirrors it behind a
//! change-detecting fingerprint, predicts a cosmetic countdown, and reacts
//! to push events for invite invalidation.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait (REST calls)
//!   and [`PushStream`](transport::PushStream) (server-push frames) for any
//!   backend
//! - **HTTP/SSE built-in** — the default `transport-http` feature provides
//!   [`HttpTransport`] and [`SseStream`]
//! - **Event-driven** — observe a live match as typed [`MatchEvent`]s on a
//!   channel; route push notifications by name via [`EventListener`]
//!
//! ## Lifecycle
//!
//! ```text
//! Matchmaking ──invite accepted──▶ MatchEngine ──finished──▶ fetch_summary
//!      ▲                               ▲
//!      └── EventListener (push)        └── status poll + countdown
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod matchmaking;
pub mod protocol;
pub mod summary;
pub mod transport;
#[cfg(feature = "transport-http")]
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use engine::{EngineConfig, MatchEngine, MatchEvent};
pub use error::DuelloError;
pub use events::{EventHandlers, EventListener};
pub use matchmaking::{MatchWatch, MatchWatchConfig, Matchmaking};
pub use protocol::{
    AnswerValue, DuelMode, DuelProfile, Invite, InviteAction, InviteStatus, MatchStatus,
    MatchSummary, Visibility,
};
pub use summary::fetch_summary;
pub use transport::{Method, PushFrame, PushStream, Transport};

#[cfg(feature = "transport-http")]
pub use transports::{HttpTransport, SseStream};
