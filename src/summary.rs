//! Terminal match summary.
//!
//! Once the engine observes the finished state it stops itself; the caller
//! fetches the final score sheet here. One request, no retry — a failure is
//! surfaced to the user as a message, never silently ignored.

use crate::error::Result;
use crate::protocol::{ensure_success, MatchId, MatchSummary, UserId};
use crate::transport::{Method, Transport};

/// Fetch the final score/result for a finished match.
pub async fn fetch_summary(
    transport: &dyn Transport,
    match_id: MatchId,
    user_id: UserId,
) -> Result<MatchSummary> {
    let body = transport
        .call(
            Method::Get,
            &format!("/api/duello/match/{match_id}/summary"),
            None,
            &[("user_id", user_id.to_string())],
        )
        .await?;
    ensure_success(&body)?;
    Ok(serde_json::from_value(body)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::DuelloError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct OneShot {
        response: Value,
    }

    #[async_trait]
    impl Transport for OneShot {
        async fn call(
            &self,
            _method: Method,
            path: &str,
            _body: Option<Value>,
            query: &[(&str, String)],
        ) -> std::result::Result<Value, DuelloError> {
            assert_eq!(path, "/api/duello/match/7/summary");
            assert_eq!(query, &[("user_id", "3".to_string())]);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn parses_summary_payload() {
        let transport = OneShot {
            response: json!({
                "users": {
                    "a": { "user_id": 3, "name": "ayşe", "score": 40, "correct": 4, "wrong": 1 },
                    "b": { "user_id": 5, "name": "mehmet", "score": 30, "correct": 3, "wrong": 2 },
                },
                "result": { "code": "a_wins" },
            }),
        };

        let summary = fetch_summary(&transport, 7, 3).await.unwrap();
        assert_eq!(summary.users.a.score, 40);
        assert_eq!(summary.users.b.name.as_deref(), Some("mehmet"));
        assert_eq!(summary.result.code, "a_wins");
    }

    #[tokio::test]
    async fn server_rejection_is_surfaced() {
        let transport = OneShot {
            response: json!({ "success": false, "message": "match not finished" }),
        };

        let err = fetch_summary(&transport, 7, 3).await.unwrap_err();
        assert!(matches!(err, DuelloError::Api { .. }));
    }
}
