//! Wire-compatible protocol types for the Duello match service.
//!
//! Every type in this module produces the exact JSON field names the server's
//! REST endpoints speak. Key conventions:
//!
//! - Answer values serialize as the literal strings `"evet"`, `"hayır"`,
//!   `"bilmem"`.
//! - Optional response fields use `#[serde(default)]` so older servers that
//!   omit them still parse.
//! - The reveal-readiness flag arrives under several synonymous spellings;
//!   [`MatchStatus::can_advance`] is the single normalization point.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DuelloError, Result};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned user identifier.
pub type UserId = i64;

/// Server-assigned invite identifier.
pub type InviteId = i64;

/// Server-assigned match identifier.
pub type MatchId = i64;

// ── Enums ───────────────────────────────────────────────────────────

/// Who may see this user in duel matchmaking lists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone.
    #[default]
    Public,
    /// Visible to friends only.
    Friends,
    /// Hidden from matchmaking lists.
    None,
}

/// Duel mode variant.
///
/// `Speed` locks a participant out on a late answer, with a system-assigned
/// fallback answer; `Info` has no lockout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuelMode {
    Info,
    Speed,
}

/// A participant's answer to a question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerValue {
    /// "Yes".
    Evet,
    /// "No".
    #[serde(rename = "hayır")]
    Hayir,
    /// "Don't know".
    Bilmem,
}

/// Lifecycle state of an invite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl InviteStatus {
    /// Terminal invites cannot be mutated again; the server rejects attempts.
    pub fn is_terminal(self) -> bool {
        !matches!(self, InviteStatus::Pending)
    }
}

/// Recipient response to a pending invite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteAction {
    Accept,
    Reject,
}

// ── Profile & invites ───────────────────────────────────────────────

/// Duel-scoped profile state for one user.
///
/// Created lazily server-side on first fetch; visibility defaults to public.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DuelProfile {
    /// Whether the user is flagged ready for matchmaking.
    #[serde(default)]
    pub ready: bool,
    /// Matchmaking visibility mode.
    #[serde(rename = "visibility_mode", default)]
    pub visibility: Visibility,
}

/// A duel proposal from one user to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invite {
    pub id: InviteId,
    pub from_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_code: Option<String>,
    pub mode: DuelMode,
    pub status: InviteStatus,
}

// ── Request bodies ──────────────────────────────────────────────────

/// Body for `POST /api/duello/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyRequest {
    pub user_id: UserId,
    pub ready: bool,
}

/// Body for `POST /api/duello/visibility`.
#[derive(Debug, Clone, Serialize)]
pub struct VisibilityRequest {
    pub user_id: UserId,
    pub visibility_mode: Visibility,
}

/// Body for `POST /api/duello/invite`.
#[derive(Debug, Clone, Serialize)]
pub struct InviteRequest {
    pub from_user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user_code: Option<String>,
    pub mode: DuelMode,
}

/// Body for `POST /api/duello/invite/respond`.
#[derive(Debug, Clone, Serialize)]
pub struct RespondRequest {
    pub invite_id: InviteId,
    pub user_id: UserId,
    pub action: InviteAction,
}

/// Body for `POST /api/duello/invite/cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct CancelRequest {
    pub invite_id: InviteId,
    pub user_id: UserId,
}

/// Body for `POST /api/duello/match/{id}/answer`.
///
/// `time_left_seconds` reports the client's visible countdown at submission
/// time; it is informational for scoring, never authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRequest {
    pub user_id: UserId,
    pub answer: AnswerValue,
    pub time_left_seconds: u32,
    pub max_time_seconds: u32,
}

/// Body for `POST /api/duello/match/{id}/reveal`.
#[derive(Debug, Clone, Serialize)]
pub struct RevealRequest {
    pub user_id: UserId,
}

// ── Match status ────────────────────────────────────────────────────

/// Match-level fields inside a status payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchInfo {
    #[serde(default)]
    pub id: Option<MatchId>,
    #[serde(default)]
    pub current_index: u32,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub finished: bool,
}

/// Both participants' running scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Scores {
    #[serde(default)]
    pub score_a: i64,
    #[serde(default)]
    pub score_b: i64,
}

/// Per-question answered flag for one participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ParticipantState {
    #[serde(default)]
    pub answered: bool,
}

/// Presentation hints attached to a status payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct UiHints {
    #[serde(default)]
    pub per_question_seconds: Option<u32>,
}

/// Authoritative match status as polled from
/// `GET /api/duello/match/{id}/status`.
///
/// The client never mutates these fields; it only observes them and derives
/// a [`StatusFingerprint`] for change detection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchStatus {
    #[serde(rename = "match", default)]
    pub match_info: MatchInfo,
    /// Opaque question payload, rendered by the caller.
    #[serde(default)]
    pub question: Option<Value>,
    #[serde(default)]
    pub scores: Scores,
    /// The polling participant's own per-question state.
    #[serde(default)]
    pub you: ParticipantState,
    #[serde(default)]
    pub opponent: ParticipantState,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiHints>,
    // Reveal readiness has shipped under three spellings; accept them all
    // and normalize through `can_advance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_reveal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub everyone_answered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub both_answered: Option<bool>,
}

impl MatchStatus {
    /// True when every participant has an accepted answer for the current
    /// question, whichever field spelling the server used.
    pub fn can_advance(&self) -> bool {
        [self.can_reveal, self.everyone_answered, self.both_answered]
            .iter()
            .any(|flag| flag.unwrap_or(false))
    }

    /// Terminal-state flag, wherever the server placed it.
    pub fn is_finished(&self) -> bool {
        self.finished || self.match_info.finished
    }

    /// Per-question duration in seconds, falling back to `default_seconds`
    /// when the payload carries no hint.
    pub fn question_seconds(&self, default_seconds: u32) -> u32 {
        self.ui
            .and_then(|ui| ui.per_question_seconds)
            .unwrap_or(default_seconds)
    }

    /// Reduce this status to its compact change-detection fingerprint.
    pub fn fingerprint(&self) -> StatusFingerprint {
        StatusFingerprint {
            current_index: self.match_info.current_index,
            scores: self.scores,
            you_answered: self.you.answered,
            opponent_answered: self.opponent.answered,
            finished: self.is_finished(),
        }
    }
}

/// Compact digest of a status payload.
///
/// Two payloads with equal fingerprints represent no meaningful change:
/// the engine discards the later one without emitting events or resetting
/// timers, so frequent polling cannot cause flicker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFingerprint {
    pub current_index: u32,
    pub scores: Scores,
    pub you_answered: bool,
    pub opponent_answered: bool,
    pub finished: bool,
}

// ── Answer outcome ──────────────────────────────────────────────────

/// Response to an answer submission.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerOutcome {
    #[serde(default)]
    pub success: bool,
    /// Whether the answer was correct. Some server builds send `0`/`1`
    /// instead of a bool; both forms parse.
    #[serde(default, deserialize_with = "lenient_bool::deserialize")]
    pub is_correct: Option<bool>,
    /// Speed-mode lockout: a true value forecloses further interaction with
    /// this question regardless of remaining countdown.
    #[serde(default)]
    pub locked: Option<bool>,
}

impl AnswerOutcome {
    pub fn locked(&self) -> bool {
        self.locked.unwrap_or(false)
    }
}

/// Accepts `true`/`false`, `1`/`0`, or null for an optional bool field.
mod lenient_bool {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::Number(n)) => Ok(Some(n.as_i64().unwrap_or(0) != 0)),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected bool or integer, got {other}"
            ))),
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────────

/// Final per-participant stats in a match summary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummaryParticipant {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub correct: u32,
    #[serde(default)]
    pub wrong: u32,
}

/// The two participants' final stats.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummaryUsers {
    #[serde(default)]
    pub a: SummaryParticipant,
    #[serde(default)]
    pub b: SummaryParticipant,
}

/// Result code for a completed match (e.g. which side won, or a draw).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummaryResult {
    #[serde(default)]
    pub code: String,
}

/// Terminal summary fetched once a match finishes, via
/// `GET /api/duello/match/{id}/summary`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MatchSummary {
    #[serde(default)]
    pub users: SummaryUsers,
    #[serde(default)]
    pub result: SummaryResult,
}

// ── Response envelope helpers ───────────────────────────────────────

/// Reject a 200 response whose body declares `success: false`.
///
/// The server reports most domain failures (invite already terminal, not the
/// recipient, duplicate answer) this way rather than with an HTTP status.
pub(crate) fn ensure_success(body: &Value) -> Result<()> {
    match body.get("success") {
        Some(Value::Bool(false)) => {
            let message = body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("request rejected by server")
                .to_string();
            Err(DuelloError::Api { message })
        }
        _ => Ok(()),
    }
}

/// Extract `match.id` from a response body, if present.
pub(crate) fn match_id_of(body: &Value) -> Option<MatchId> {
    body.get("match")
        .and_then(|m| m.get("id"))
        .and_then(Value::as_i64)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_values_use_wire_strings() {
        assert_eq!(serde_json::to_value(AnswerValue::Evet).unwrap(), "evet");
        assert_eq!(serde_json::to_value(AnswerValue::Hayir).unwrap(), "hayır");
        assert_eq!(serde_json::to_value(AnswerValue::Bilmem).unwrap(), "bilmem");
    }

    #[test]
    fn visibility_defaults_to_public() {
        let profile: DuelProfile = serde_json::from_value(json!({})).unwrap();
        assert_eq!(profile.visibility, Visibility::Public);
        assert!(!profile.ready);
    }

    #[test]
    fn can_advance_accepts_all_spellings() {
        for field in ["can_reveal", "everyone_answered", "both_answered"] {
            let status: MatchStatus =
                serde_json::from_value(json!({ "match": {}, field: true })).unwrap();
            assert!(status.can_advance(), "spelling {field} should normalize");
        }
        let status: MatchStatus = serde_json::from_value(json!({ "match": {} })).unwrap();
        assert!(!status.can_advance());
    }

    #[test]
    fn fingerprint_ignores_question_payload() {
        let a: MatchStatus = serde_json::from_value(json!({
            "match": { "current_index": 2 },
            "question": { "text": "one" },
            "scores": { "score_a": 10, "score_b": 20 },
        }))
        .unwrap();
        let b: MatchStatus = serde_json::from_value(json!({
            "match": { "current_index": 2 },
            "question": { "text": "another rendering of the same question" },
            "scores": { "score_a": 10, "score_b": 20 },
        }))
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn is_correct_parses_integer_form() {
        let outcome: AnswerOutcome =
            serde_json::from_value(json!({ "success": true, "is_correct": 1, "locked": false }))
                .unwrap();
        assert_eq!(outcome.is_correct, Some(true));
        assert!(!outcome.locked());

        let outcome: AnswerOutcome =
            serde_json::from_value(json!({ "success": true, "is_correct": false })).unwrap();
        assert_eq!(outcome.is_correct, Some(false));
    }

    #[test]
    fn ensure_success_surfaces_server_message() {
        let err = ensure_success(&json!({ "success": false, "message": "invite not pending" }))
            .unwrap_err();
        match err {
            DuelloError::Api { message } => assert_eq!(message, "invite not pending"),
            other => panic!("expected Api error, got {other:?}"),
        }
        assert!(ensure_success(&json!({ "success": true })).is_ok());
        assert!(ensure_success(&json!({ "invites": [] })).is_ok());
    }
}
