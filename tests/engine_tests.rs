#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the match synchronization engine.
//!
//! Uses the shared `MockTransport` from `tests/common` to script status
//! responses and verify the full duel flow: invite acceptance hands a match
//! id to the engine, the engine drives answer/reveal/advance, and the
//! terminal state hands off to the summary fetch.

mod common;

use std::time::Duration;

use duello_client::{
    fetch_summary, AnswerValue, EngineConfig, InviteAction, MatchEngine, MatchEvent, Matchmaking,
};

use common::{
    accept_json, both_answered_json, invites_json, status_json, summary_json, MockTransport,
};

fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_poll_interval(Duration::from_millis(20))
        .with_countdown_interval(Duration::from_millis(50))
        .with_reveal_refresh_delay(Duration::from_millis(30))
        .with_shutdown_timeout(Duration::from_millis(200))
}

/// Wait for a specific event, failing on channel close or timeout.
async fn wait_for(
    events: &mut tokio::sync::mpsc::Receiver<MatchEvent>,
    mut predicate: impl FnMut(&MatchEvent) -> bool,
) -> MatchEvent {
    let deadline = Duration::from_millis(2000);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => {}
                None => panic!("event channel closed while waiting"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ════════════════════════════════════════════════════════════════════
// Invite acceptance → engine → summary, end to end
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn accepted_invite_flows_through_match_to_summary() {
    let transport = MockTransport::new();

    // Invite side: user 2 accepts invite 5 and receives match 9.
    transport.on("POST", "/api/duello/invite/respond", accept_json(9));
    transport.on("GET", "/api/duello/inbox/2", invites_json(vec![]));

    // Match side: one question, both answer, reveal advances, match ends.
    // The status script plays out in poll order: loading state, both sides
    // answered, then (picked up by the post-reveal forced refresh) finished.
    transport.on("GET", "/api/duello/match/9/status", status_json(0, false));
    transport.on("GET", "/api/duello/match/9/status", both_answered_json(0));
    transport.on("GET", "/api/duello/match/9/status", status_json(0, true));
    transport.on(
        "POST",
        "/api/duello/match/9/answer",
        serde_json::json!({ "success": true, "is_correct": 1, "locked": false }),
    );
    transport.on(
        "POST",
        "/api/duello/match/9/reveal",
        serde_json::json!({ "success": true }),
    );
    transport.on("GET", "/api/duello/match/9/summary", summary_json());

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let match_id = matchmaking
        .respond_invite(5, 2, InviteAction::Accept)
        .await
        .unwrap()
        .expect("accept carries the match id");

    let (mut engine, mut events) = MatchEngine::start(transport.as_dyn(), match_id, 2, fast_config());

    let loaded = wait_for(&mut events, |e| matches!(e, MatchEvent::Loaded(_))).await;
    if let MatchEvent::Loaded(status) = loaded {
        assert_eq!(status.match_info.current_index, 0);
        assert_eq!(status.match_info.total_questions, 5);
    }
    wait_for(&mut events, |e| {
        matches!(e, MatchEvent::QuestionChanged { index: 0, .. })
    })
    .await;

    engine.submit_answer(AnswerValue::Evet).unwrap();
    let accepted = wait_for(&mut events, |e| matches!(e, MatchEvent::AnswerAccepted { .. })).await;
    if let MatchEvent::AnswerAccepted { is_correct, locked } = accepted {
        assert_eq!(is_correct, Some(true));
        assert!(!locked);
    }

    // Both sides answered; the engine reveals once and the forced refresh
    // observes the terminal state.
    wait_for(&mut events, |e| matches!(e, MatchEvent::StatusChanged(_))).await;
    wait_for(&mut events, |e| matches!(e, MatchEvent::Finished)).await;
    assert!(engine.is_finished());
    assert_eq!(transport.count("/reveal"), 1);

    let summary = fetch_summary(&*transport.as_dyn(), match_id, 2).await.unwrap();
    assert_eq!(summary.result.code, "a_wins");
    assert_eq!(summary.users.a.score, 40);

    engine.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Stale poll tolerance
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stale_poll_after_local_mutation_is_discarded() {
    // A poll snapshotted before the answer submission arrives afterwards:
    // its fingerprint matches the last applied one, so it must not disturb
    // the engine's answered state or timers.
    let transport = MockTransport::new();
    transport.on("GET", "/api/duello/match/9/status", status_json(0, false));
    transport.on(
        "POST",
        "/api/duello/match/9/answer",
        serde_json::json!({ "success": true }),
    );

    let (mut engine, mut events) = MatchEngine::start(transport.as_dyn(), 9, 2, fast_config());
    wait_for(&mut events, |e| matches!(e, MatchEvent::Loaded(_))).await;
    wait_for(&mut events, |e| {
        matches!(e, MatchEvent::QuestionChanged { .. })
    })
    .await;

    engine.submit_answer(AnswerValue::Hayir).unwrap();
    wait_for(&mut events, |e| matches!(e, MatchEvent::AnswerAccepted { .. })).await;

    // Several more polls of the pre-answer payload land; none may reset the
    // question or allow a second submission.
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.submit_answer(AnswerValue::Hayir).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.count("/answer"), 1);

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, MatchEvent::QuestionChanged { .. }),
            "stale polls must not reset the question"
        );
    }

    engine.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Poll resilience
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failed_polls_do_not_stop_the_loop() {
    let transport = MockTransport::new();
    transport.fail_network("GET", "/api/duello/match/9/status", "connection reset");
    transport.fail_network("GET", "/api/duello/match/9/status", "connection reset");
    transport.on("GET", "/api/duello/match/9/status", status_json(0, false));

    let (mut engine, mut events) = MatchEngine::start(transport.as_dyn(), 9, 2, fast_config());

    // Entry fetch and the first poll fail; the next poll succeeds and the
    // match loads anyway.
    let loaded = wait_for(&mut events, |e| matches!(e, MatchEvent::Loaded(_))).await;
    assert!(matches!(loaded, MatchEvent::Loaded(_)));
    assert!(engine.is_loaded());

    engine.shutdown().await;
}
