//! Invite and matchmaking state.
//!
//! [`Matchmaking`] mirrors the duel-scoped profile and invite lists and turns
//! an accepted invite into a match id for the
//! [`MatchEngine`](crate::engine::MatchEngine) to take over. All operations
//! are request/response pairs against one shared [`Transport`].
//!
//! Two update policies coexist and the asymmetry is deliberate:
//!
//! - **visibility** updates optimistically (apply locally, reconcile on
//!   response, revert on failure) — it only affects listing.
//! - **ready** waits for server confirmation — readiness gates matchmaking
//!   eligibility server-side, so the mirror must never run ahead of it.
//!
//! [`MatchWatch`] is the polling safety net for missed push events: while an
//! outbound invite is pending it checks for an active match on a fixed
//! interval and stops as soon as a match is found or no pending outbound
//! invite remains.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DuelloError, Result};
use crate::protocol::{
    ensure_success, match_id_of, CancelRequest, DuelMode, DuelProfile, Invite, InviteAction,
    InviteId, InviteRequest, InviteStatus, MatchId, ReadyRequest, RespondRequest, UserId,
    Visibility, VisibilityRequest,
};
use crate::transport::{Method, Transport};

/// Default interval for the pending-invite match watch.
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

// ── Matchmaking ─────────────────────────────────────────────────────

/// Client-side mirror of profile and invite state for one user.
pub struct Matchmaking {
    transport: Arc<dyn Transport>,
    profile: Mutex<Option<DuelProfile>>,
    inbox: Mutex<Vec<Invite>>,
    outbox: Mutex<Vec<Invite>>,
}

impl Matchmaking {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            profile: Mutex::new(None),
            inbox: Mutex::new(Vec::new()),
            outbox: Mutex::new(Vec::new()),
        }
    }

    // ── Profile ─────────────────────────────────────────────────────

    /// Fetch the duel profile and refresh the local mirror.
    ///
    /// The server creates the profile lazily on first fetch, so this never
    /// 404s for a known user.
    pub async fn profile(&self, user_id: UserId) -> Result<DuelProfile> {
        let body = self
            .transport
            .call(
                Method::Get,
                &format!("/api/duello/profile/{user_id}"),
                None,
                &[],
            )
            .await?;
        ensure_success(&body)?;
        let profile = parse_profile(&body).unwrap_or_default();
        *self.profile.lock().await = Some(profile);
        Ok(profile)
    }

    /// Last profile state observed from the server, if any.
    pub async fn profile_snapshot(&self) -> Option<DuelProfile> {
        *self.profile.lock().await
    }

    /// Set the readiness flag.
    ///
    /// The local mirror changes only after the server confirms.
    pub async fn set_ready(&self, user_id: UserId, ready: bool) -> Result<DuelProfile> {
        let body = self
            .transport
            .call(
                Method::Post,
                "/api/duello/ready",
                Some(serde_json::to_value(ReadyRequest { user_id, ready })?),
                &[],
            )
            .await?;
        ensure_success(&body)?;

        let mut mirror = self.profile.lock().await;
        let confirmed = parse_profile(&body).unwrap_or(DuelProfile {
            ready,
            visibility: mirror.unwrap_or_default().visibility,
        });
        *mirror = Some(confirmed);
        Ok(confirmed)
    }

    /// Set the visibility mode, optimistically.
    ///
    /// The mirror updates before the request goes out and reverts if the
    /// request fails.
    pub async fn set_visibility(
        &self,
        user_id: UserId,
        visibility: Visibility,
    ) -> Result<DuelProfile> {
        let previous = {
            let mut mirror = self.profile.lock().await;
            let previous = *mirror;
            let mut optimistic = previous.unwrap_or_default();
            optimistic.visibility = visibility;
            *mirror = Some(optimistic);
            previous
        };

        let result = self
            .transport
            .call(
                Method::Post,
                "/api/duello/visibility",
                Some(serde_json::to_value(VisibilityRequest {
                    user_id,
                    visibility_mode: visibility,
                })?),
                &[],
            )
            .await
            .and_then(|body| {
                ensure_success(&body)?;
                Ok(body)
            });

        let mut mirror = self.profile.lock().await;
        match result {
            Ok(body) => {
                // Reconcile with the server's view when it echoes one back.
                if let Some(confirmed) = parse_profile(&body) {
                    *mirror = Some(confirmed);
                }
                Ok(mirror.unwrap_or_default())
            }
            Err(e) => {
                *mirror = previous;
                Err(e)
            }
        }
    }

    // ── Invites ─────────────────────────────────────────────────────

    /// Send a duel invite to the user identified by `to_user_code`.
    ///
    /// On success both invite lists refresh automatically (best effort).
    ///
    /// # Errors
    ///
    /// Returns [`DuelloError::Validation`] without any network call when the
    /// target code is empty.
    pub async fn create_invite(
        &self,
        from_user_id: UserId,
        to_user_code: &str,
        mode: DuelMode,
    ) -> Result<()> {
        let code = to_user_code.trim();
        if code.is_empty() {
            return Err(DuelloError::Validation("target user code is empty".into()));
        }

        let body = self
            .transport
            .call(
                Method::Post,
                "/api/duello/invite",
                Some(serde_json::to_value(InviteRequest {
                    from_user_id,
                    to_user_id: None,
                    to_user_code: Some(code.to_string()),
                    mode,
                })?),
                &[],
            )
            .await?;
        ensure_success(&body)?;

        self.refresh_lists(from_user_id).await;
        Ok(())
    }

    /// Fetch the ordered inbound invite list and refresh the cache.
    pub async fn inbox(&self, user_id: UserId) -> Result<Vec<Invite>> {
        let invites = self
            .fetch_invites(&format!("/api/duello/inbox/{user_id}"))
            .await?;
        *self.inbox.lock().await = invites.clone();
        Ok(invites)
    }

    /// Fetch the ordered outbound invite list and refresh the cache.
    pub async fn outbox(&self, user_id: UserId) -> Result<Vec<Invite>> {
        let invites = self
            .fetch_invites(&format!("/api/duello/outbox/{user_id}"))
            .await?;
        *self.outbox.lock().await = invites.clone();
        Ok(invites)
    }

    /// Last inbox state observed from the server.
    pub async fn cached_inbox(&self) -> Vec<Invite> {
        self.inbox.lock().await.clone()
    }

    /// Last outbox state observed from the server.
    pub async fn cached_outbox(&self) -> Vec<Invite> {
        self.outbox.lock().await.clone()
    }

    /// Accept or reject an inbound invite (recipient only).
    ///
    /// On accept, the response carries the newly created match id — hand it
    /// straight to [`MatchEngine::start`](crate::engine::MatchEngine::start),
    /// no extra fetch needed. Mutating a non-pending invite fails with the
    /// server's error, never silently.
    pub async fn respond_invite(
        &self,
        invite_id: InviteId,
        user_id: UserId,
        action: InviteAction,
    ) -> Result<Option<MatchId>> {
        let body = self
            .transport
            .call(
                Method::Post,
                "/api/duello/invite/respond",
                Some(serde_json::to_value(RespondRequest {
                    invite_id,
                    user_id,
                    action,
                })?),
                &[],
            )
            .await?;
        ensure_success(&body)?;

        let match_id = match_id_of(&body);
        if action == InviteAction::Accept && match_id.is_none() {
            warn!(invite_id, "accepted invite response carried no match id");
        }

        if let Err(e) = self.inbox(user_id).await {
            warn!("inbox refresh after respond failed: {e}");
        }
        Ok(match_id)
    }

    /// Cancel an outbound invite (sender only).
    ///
    /// Server-side failures (already accepted, not the sender) surface to the
    /// caller; only the follow-up outbox refresh is best-effort.
    pub async fn cancel_invite(&self, invite_id: InviteId, user_id: UserId) -> Result<()> {
        let body = self
            .transport
            .call(
                Method::Post,
                "/api/duello/invite/cancel",
                Some(serde_json::to_value(CancelRequest { invite_id, user_id })?),
                &[],
            )
            .await?;
        ensure_success(&body)?;

        if let Err(e) = self.outbox(user_id).await {
            warn!("outbox refresh after cancel failed: {e}");
        }
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn fetch_invites(&self, path: &str) -> Result<Vec<Invite>> {
        let body = self.transport.call(Method::Get, path, None, &[]).await?;
        ensure_success(&body)?;
        let invites = body
            .get("invites")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(invites)
    }

    /// Best-effort refresh of both lists after a mutating action.
    async fn refresh_lists(&self, user_id: UserId) {
        if let Err(e) = self.inbox(user_id).await {
            warn!("inbox refresh failed: {e}");
        }
        if let Err(e) = self.outbox(user_id).await {
            warn!("outbox refresh failed: {e}");
        }
    }
}

impl std::fmt::Debug for Matchmaking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matchmaking").finish_non_exhaustive()
    }
}

fn parse_profile(body: &Value) -> Option<DuelProfile> {
    body.get("profile")
        .cloned()
        .and_then(|p| serde_json::from_value(p).ok())
}

// ── MatchWatch ──────────────────────────────────────────────────────

/// Configuration for [`MatchWatch`].
#[derive(Debug, Clone)]
pub struct MatchWatchConfig {
    /// Poll interval. Defaults to **2 seconds**.
    pub interval: Duration,
}

impl MatchWatchConfig {
    pub fn new() -> Self {
        Self {
            interval: DEFAULT_WATCH_INTERVAL,
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for MatchWatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Polling fallback that notices an accepted outbound invite even when the
/// push event announcing it was missed.
///
/// Each tick checks the outbox; with no pending outbound invite left the
/// watch stops. Otherwise it asks the active-match endpoint and delivers the
/// match id once, then stops. Per-tick failures are logged and the watch
/// keeps going.
#[derive(Debug)]
pub struct MatchWatch {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MatchWatch {
    /// Start watching. The receiver yields the match id when one appears;
    /// it yields an error (sender dropped) when the watch stopped because no
    /// pending outbound invite remained.
    #[must_use = "the receiver must be awaited to learn about the match"]
    pub fn start(
        transport: Arc<dyn Transport>,
        user_id: UserId,
        config: MatchWatchConfig,
    ) -> (Self, tokio::sync::oneshot::Receiver<MatchId>) {
        let (found_tx, found_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(watch_loop(transport, user_id, config.interval, found_tx));
        (Self { task: Some(task) }, found_rx)
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True while the watch loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for MatchWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch_loop(
    transport: Arc<dyn Transport>,
    user_id: UserId,
    interval: Duration,
    found_tx: tokio::sync::oneshot::Sender<MatchId>,
) {
    debug!(user_id, "match watch started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        // Stop condition: nothing pending in the outbox any more.
        match fetch_pending_outbox(&*transport, user_id).await {
            Ok(false) => {
                debug!(user_id, "no pending outbound invite, match watch stopping");
                break;
            }
            Ok(true) => {}
            Err(e) => {
                warn!("match watch outbox check failed: {e}");
                continue;
            }
        }

        match transport
            .call(
                Method::Get,
                &format!("/api/duello/active-match/{user_id}"),
                None,
                &[],
            )
            .await
        {
            Ok(body) => {
                if let Some(match_id) = match_id_of(&body) {
                    debug!(user_id, match_id, "match watch found an active match");
                    let _ = found_tx.send(match_id);
                    break;
                }
            }
            Err(e) => warn!("match watch active-match check failed: {e}"),
        }
    }

    debug!(user_id, "match watch exited");
}

async fn fetch_pending_outbox(transport: &dyn Transport, user_id: UserId) -> Result<bool> {
    let body = transport
        .call(
            Method::Get,
            &format!("/api/duello/outbox/{user_id}"),
            None,
            &[],
        )
        .await?;
    ensure_success(&body)?;
    let invites: Vec<Invite> = body
        .get("invites")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    Ok(invites.iter().any(|i| i.status == InviteStatus::Pending))
}
