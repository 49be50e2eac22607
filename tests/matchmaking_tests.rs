#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the invite/matchmaking component.
//!
//! Uses the shared `MockTransport` from `tests/common` to script endpoint
//! responses and verify state mirroring, invite lifecycle transitions, and
//! the pending-invite match watch.

mod common;

use std::time::Duration;

use duello_client::{
    DuelMode, DuelloError, InviteAction, InviteStatus, MatchWatch, MatchWatchConfig, Matchmaking,
    Visibility,
};

use common::{accept_json, invite_json, invites_json, profile_json, MockTransport};

// ════════════════════════════════════════════════════════════════════
// Profile mirroring
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn profile_fetch_updates_mirror() {
    let transport = MockTransport::new();
    transport.on("GET", "/api/duello/profile/1", profile_json(true, "friends"));

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let profile = matchmaking.profile(1).await.unwrap();

    assert!(profile.ready);
    assert_eq!(profile.visibility, Visibility::Friends);
    assert_eq!(matchmaking.profile_snapshot().await, Some(profile));
}

#[tokio::test]
async fn set_ready_confirms_before_mirroring() {
    let transport = MockTransport::new();
    transport.on("GET", "/api/duello/profile/1", profile_json(false, "public"));
    transport.fail("POST", "/api/duello/ready", 500, "storage down");

    let matchmaking = Matchmaking::new(transport.as_dyn());
    matchmaking.profile(1).await.unwrap();

    // Readiness gates matchmaking eligibility server-side: a failed request
    // must leave the mirror untouched.
    let err = matchmaking.set_ready(1, true).await.unwrap_err();
    assert!(matches!(err, DuelloError::Http { status: 500, .. }));
    assert_eq!(
        matchmaking.profile_snapshot().await.map(|p| p.ready),
        Some(false)
    );
}

#[tokio::test]
async fn set_ready_success_updates_mirror() {
    let transport = MockTransport::new();
    transport.on("POST", "/api/duello/ready", profile_json(true, "public"));

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let profile = matchmaking.set_ready(1, true).await.unwrap();

    assert!(profile.ready);
    assert_eq!(
        matchmaking.profile_snapshot().await.map(|p| p.ready),
        Some(true)
    );
}

#[tokio::test]
async fn set_visibility_reverts_on_failure() {
    let transport = MockTransport::new();
    transport.on("GET", "/api/duello/profile/1", profile_json(false, "public"));
    transport.fail("POST", "/api/duello/visibility", 500, "storage down");

    let matchmaking = Matchmaking::new(transport.as_dyn());
    matchmaking.profile(1).await.unwrap();

    // Optimistic update applies immediately, then rolls back when the
    // request fails.
    let err = matchmaking.set_visibility(1, Visibility::None).await.unwrap_err();
    assert!(matches!(err, DuelloError::Http { .. }));
    assert_eq!(
        matchmaking.profile_snapshot().await.map(|p| p.visibility),
        Some(Visibility::Public)
    );
}

#[tokio::test]
async fn set_visibility_reconciles_with_server_echo() {
    let transport = MockTransport::new();
    transport.on(
        "POST",
        "/api/duello/visibility",
        profile_json(true, "friends"),
    );

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let profile = matchmaking
        .set_visibility(1, Visibility::Friends)
        .await
        .unwrap();

    // The server's echoed profile wins over the optimistic guess (it also
    // carries the ready flag the mirror did not know yet).
    assert_eq!(profile.visibility, Visibility::Friends);
    assert!(profile.ready);
}

// ════════════════════════════════════════════════════════════════════
// Invite lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_invite_rejects_empty_code_without_network() {
    let transport = MockTransport::new();
    let matchmaking = Matchmaking::new(transport.as_dyn());

    let err = matchmaking
        .create_invite(1, "   ", DuelMode::Speed)
        .await
        .unwrap_err();
    assert!(matches!(err, DuelloError::Validation(_)));
    assert!(transport.calls().is_empty(), "no network call may be made");
}

#[tokio::test]
async fn create_invite_refreshes_both_lists() {
    // A successful invite triggers the inbox/outbox refresh.
    let transport = MockTransport::new();
    transport.on("POST", "/api/duello/invite", serde_json::json!({ "success": true }));
    transport.on("GET", "/api/duello/inbox/1", invites_json(vec![]));
    transport.on(
        "GET",
        "/api/duello/outbox/1",
        invites_json(vec![invite_json(11, 1, "ABC123", "speed", "pending")]),
    );

    let matchmaking = Matchmaking::new(transport.as_dyn());
    matchmaking
        .create_invite(1, "ABC123", DuelMode::Speed)
        .await
        .unwrap();

    assert_eq!(transport.count("/inbox/1"), 1);
    assert_eq!(transport.count("/outbox/1"), 1);

    let outbox = matchmaking.cached_outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].status, InviteStatus::Pending);

    let sent = transport.calls();
    let invite_call = sent.iter().find(|c| c.path == "/api/duello/invite").unwrap();
    let body = invite_call.body.as_ref().unwrap();
    assert_eq!(body["from_user_id"], 1);
    assert_eq!(body["to_user_code"], "ABC123");
    assert_eq!(body["mode"], "speed");
}

#[tokio::test]
async fn create_invite_swallows_refresh_failures() {
    let transport = MockTransport::new();
    transport.on("POST", "/api/duello/invite", serde_json::json!({ "success": true }));
    transport.fail("GET", "/api/duello/inbox/1", 500, "boom");
    transport.fail("GET", "/api/duello/outbox/1", 500, "boom");

    let matchmaking = Matchmaking::new(transport.as_dyn());
    // List refreshes are best-effort; the invite itself succeeded.
    assert!(matchmaking
        .create_invite(1, "ABC123", DuelMode::Info)
        .await
        .is_ok());
}

#[tokio::test]
async fn inbox_preserves_server_order() {
    let transport = MockTransport::new();
    transport.on(
        "GET",
        "/api/duello/inbox/2",
        invites_json(vec![
            invite_json(5, 9, "X", "info", "pending"),
            invite_json(3, 8, "X", "speed", "pending"),
            invite_json(7, 4, "X", "info", "rejected"),
        ]),
    );

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let inbox = matchmaking.inbox(2).await.unwrap();
    let ids: Vec<i64> = inbox.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![5, 3, 7], "no reordering or dedup beyond the server's");
}

#[tokio::test]
async fn accept_returns_match_id_without_extra_fetch() {
    let transport = MockTransport::new();
    transport.on("POST", "/api/duello/invite/respond", accept_json(42));
    transport.on("GET", "/api/duello/inbox/2", invites_json(vec![]));

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let match_id = matchmaking
        .respond_invite(5, 2, InviteAction::Accept)
        .await
        .unwrap();

    assert_eq!(match_id, Some(42));
    assert_eq!(
        transport.count("/active-match"),
        0,
        "the response itself carries the match id"
    );
}

#[tokio::test]
async fn responding_to_terminal_invite_surfaces_error() {
    let transport = MockTransport::new();
    transport.on(
        "POST",
        "/api/duello/invite/respond",
        serde_json::json!({ "success": false, "message": "invite is not pending" }),
    );

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let err = matchmaking
        .respond_invite(5, 2, InviteAction::Reject)
        .await
        .unwrap_err();
    match err {
        DuelloError::Api { message } => assert!(message.contains("not pending")),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_surfaces_error_but_swallows_refresh() {
    let transport = MockTransport::new();
    transport.fail("POST", "/api/duello/invite/cancel", 403, "not the sender");

    let matchmaking = Matchmaking::new(transport.as_dyn());
    let err = matchmaking.cancel_invite(11, 3).await.unwrap_err();
    assert!(matches!(err, DuelloError::Http { status: 403, .. }));

    // Successful cancel with a failing outbox refresh still succeeds.
    let transport = MockTransport::new();
    transport.on(
        "POST",
        "/api/duello/invite/cancel",
        serde_json::json!({ "success": true }),
    );
    transport.fail("GET", "/api/duello/outbox/1", 500, "boom");
    let matchmaking = Matchmaking::new(transport.as_dyn());
    assert!(matchmaking.cancel_invite(11, 1).await.is_ok());
}

// ════════════════════════════════════════════════════════════════════
// Pending-invite match watch
// ════════════════════════════════════════════════════════════════════

fn fast_watch() -> MatchWatchConfig {
    MatchWatchConfig::new().with_interval(Duration::from_millis(20))
}

#[tokio::test]
async fn watch_delivers_match_id_and_stops() {
    let transport = MockTransport::new();
    transport.on(
        "GET",
        "/api/duello/outbox/1",
        invites_json(vec![invite_json(11, 1, "ABC123", "speed", "pending")]),
    );
    // First check: nothing yet. Second check: the invite was accepted.
    transport.on("GET", "/api/duello/active-match/1", serde_json::json!({ "success": true }));
    transport.on("GET", "/api/duello/active-match/1", accept_json(42));

    let (mut watch, found) = MatchWatch::start(transport.as_dyn(), 1, fast_watch());
    let match_id = tokio::time::timeout(Duration::from_millis(500), found)
        .await
        .expect("watch should find the match")
        .unwrap();
    assert_eq!(match_id, 42);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!watch.is_running(), "watch stops after delivering the id");
    let calls_after = transport.calls().len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.calls().len(), calls_after, "no polling after stop");
}

#[tokio::test]
async fn watch_stops_when_no_pending_outbound_invite_remains() {
    let transport = MockTransport::new();
    transport.on(
        "GET",
        "/api/duello/outbox/1",
        invites_json(vec![invite_json(11, 1, "ABC123", "speed", "cancelled")]),
    );

    let (watch, found) = MatchWatch::start(transport.as_dyn(), 1, fast_watch());
    // The sender side dropped: no match will ever be delivered.
    assert!(found.await.is_err());
    assert!(!watch.is_running());
    assert_eq!(transport.count("/active-match"), 0);
}

#[tokio::test]
async fn watch_survives_per_tick_failures() {
    let transport = MockTransport::new();
    transport.fail("GET", "/api/duello/outbox/1", 500, "boom");
    transport.on(
        "GET",
        "/api/duello/outbox/1",
        invites_json(vec![invite_json(11, 1, "ABC123", "info", "pending")]),
    );
    transport.on("GET", "/api/duello/active-match/1", accept_json(7));

    let (mut watch, found) = MatchWatch::start(transport.as_dyn(), 1, fast_watch());
    let match_id = tokio::time::timeout(Duration::from_millis(500), found)
        .await
        .expect("watch should survive the failed tick")
        .unwrap();
    assert_eq!(match_id, 7);
    watch.stop();
}

#[tokio::test]
async fn watch_stop_is_idempotent() {
    let transport = MockTransport::new();
    transport.on(
        "GET",
        "/api/duello/outbox/1",
        invites_json(vec![invite_json(11, 1, "ABC123", "speed", "pending")]),
    );
    transport.on("GET", "/api/duello/active-match/1", serde_json::json!({ "success": true }));

    let (mut watch, _found) = MatchWatch::start(transport.as_dyn(), 1, fast_watch());
    watch.stop();
    watch.stop();
    assert!(!watch.is_running());
}
