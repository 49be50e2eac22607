#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Duello client integration tests.
//!
//! Provides a route-scripted [`MockTransport`] and helper functions for
//! constructing common response payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use duello_client::transport::{Method, Transport};
use duello_client::DuelloError;

// ── MockTransport ───────────────────────────────────────────────────

/// One scripted response for a route.
#[derive(Debug, Clone)]
enum Scripted {
    Ok(Value),
    Http(u16, String),
    Network(String),
}

/// Every call made through the transport, as recorded.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

/// A route-scripted mock transport.
///
/// Responses are registered per `"METHOD path"` route and consumed in order;
/// when one response remains for a route it repeats forever, which keeps
/// polling loops fed. Unrouted calls fail with a 404 so a test notices an
/// unexpected request.
pub struct MockTransport {
    routes: StdMutex<HashMap<String, VecDeque<Scripted>>>,
    calls: StdMutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: StdMutex::new(HashMap::new()),
            calls: StdMutex::new(Vec::new()),
        })
    }

    /// Script a successful JSON response for a route.
    pub fn on(&self, method: &str, path: &str, response: Value) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back(Scripted::Ok(response));
    }

    /// Script an HTTP-level failure for a route.
    pub fn fail(&self, method: &str, path: &str, status: u16, message: &str) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back(Scripted::Http(status, message.to_string()));
    }

    /// Script a network-level failure for a route.
    pub fn fail_network(&self, method: &str, path: &str, message: &str) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back(Scripted::Network(message.to_string()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose path contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path.contains(needle))
            .count()
    }

    /// Upcast helper: components take `Arc<dyn Transport>`.
    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::clone(self) as Arc<dyn Transport>
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, String)],
    ) -> Result<Value, DuelloError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            path: path.to_string(),
            body,
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        let scripted = {
            let mut routes = self.routes.lock().unwrap();
            let queue = routes.get_mut(&format!("{method} {path}"));
            match queue {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Scripted::Ok(value)) => Ok(value),
            Some(Scripted::Http(status, message)) => Err(DuelloError::Http { status, message }),
            Some(Scripted::Network(message)) => Err(DuelloError::Network(message)),
            None => Err(DuelloError::Http {
                status: 404,
                message: format!("no scripted route for {method} {path}"),
            }),
        }
    }
}

// ── Payload builders ────────────────────────────────────────────────

/// A `{success, profile}` body.
pub fn profile_json(ready: bool, visibility: &str) -> Value {
    json!({
        "success": true,
        "profile": { "ready": ready, "visibility_mode": visibility },
    })
}

/// One invite entry for an inbox/outbox payload.
pub fn invite_json(id: i64, from: i64, to_code: &str, mode: &str, status: &str) -> Value {
    json!({
        "id": id,
        "from_user_id": from,
        "to_user_code": to_code,
        "mode": mode,
        "status": status,
    })
}

/// A `{success, invites}` body.
pub fn invites_json(invites: Vec<Value>) -> Value {
    json!({ "success": true, "invites": invites })
}

/// A full match status payload.
pub fn status_json(index: u32, finished: bool) -> Value {
    json!({
        "success": true,
        "match": { "id": 9, "current_index": index, "total_questions": 5 },
        "question": { "text": format!("soru {index}") },
        "scores": { "score_a": 0, "score_b": 0 },
        "you": { "answered": false },
        "opponent": { "answered": false },
        "finished": finished,
        "ui": { "per_question_seconds": 3 },
    })
}

/// A status payload where both sides answered and the reveal is licensed.
pub fn both_answered_json(index: u32) -> Value {
    json!({
        "success": true,
        "match": { "id": 9, "current_index": index, "total_questions": 5 },
        "scores": { "score_a": 10, "score_b": 10 },
        "you": { "answered": true },
        "opponent": { "answered": true },
        "finished": false,
        "can_reveal": true,
        "ui": { "per_question_seconds": 3 },
    })
}

/// A `{success, match: {id}}` body, as returned by an accepted invite.
pub fn accept_json(match_id: i64) -> Value {
    json!({ "success": true, "match": { "id": match_id } })
}

/// A match summary body.
pub fn summary_json() -> Value {
    json!({
        "users": {
            "a": { "user_id": 1, "name": "ayşe", "score": 40, "correct": 4, "wrong": 1 },
            "b": { "user_id": 2, "name": "mehmet", "score": 30, "correct": 3, "wrong": 2 },
        },
        "result": { "code": "a_wins" },
    })
}
