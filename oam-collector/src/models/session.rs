//! Per-user authentication session.
//!
//! A session is mutated only by the session manager. Every API call waits on
//! the session gate before reading the access token, and the manager holds
//! the gate exclusively while it rotates the token, so a caller never sees a
//! half-installed token.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock, RwLockWriteGuard};

/// How long before expiry a token is refreshed.
pub const REFRESH_LEAD: Duration = Duration::seconds(30);

/// Access/refresh token pair plus the absolute expiry of the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.expires_at - REFRESH_LEAD
    }

    /// Time left until the token should be refreshed; negative when overdue.
    pub fn refresh_delay(&self, now: DateTime<Utc>) -> Duration {
        self.refresh_at() - now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    LoggedOut,
    Authenticating,
    Active,
    Refreshing,
    BackoffRetry,
    Terminated,
}

#[derive(Debug)]
struct SessionState {
    token: Option<SessionToken>,
    alive: bool,
    phase: SessionPhase,
}

#[derive(Debug)]
pub struct Session {
    gate: RwLock<()>,
    state: RwLock<SessionState>,
    wake: Notify,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            gate: RwLock::new(()),
            state: RwLock::new(SessionState {
                token: None,
                alive: false,
                phase: SessionPhase::LoggedOut,
            }),
            wake: Notify::new(),
        }
    }

    /// Access token for an outbound call. Waits while a refresh is in
    /// progress; `None` when the session is not alive.
    pub async fn bearer(&self) -> Option<String> {
        let _calling = self.gate.read().await;
        let state = self.state.read().await;
        if !state.alive {
            return None;
        }
        state.token.as_ref().map(|t| t.access_token.clone())
    }

    pub async fn token(&self) -> Option<SessionToken> {
        self.state.read().await.token.clone()
    }

    pub async fn is_alive(&self) -> bool {
        self.state.read().await.alive
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.read().await.phase
    }

    pub async fn refresh_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.state
            .read()
            .await
            .token
            .as_ref()
            .map(|t| t.refresh_delay(now))
    }

    /// Mark the session unusable and wake the refresh loop so it
    /// re-authenticates immediately.
    pub async fn invalidate(&self) {
        self.state.write().await.alive = false;
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    /// Raise the gate. API callers block until the guard is dropped.
    pub(crate) async fn begin_refresh(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    pub(crate) async fn install(&self, token: SessionToken) {
        let mut state = self.state.write().await;
        state.token = Some(token);
        state.alive = true;
        state.phase = SessionPhase::Active;
    }

    pub(crate) async fn set_phase(&self, phase: SessionPhase) {
        self.state.write().await.phase = phase;
    }

    pub(crate) async fn mark_not_alive(&self) {
        self.state.write().await.alive = false;
    }

    pub(crate) async fn terminate(&self) {
        let mut state = self.state.write().await;
        state.alive = false;
        state.phase = SessionPhase::Terminated;
    }

    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        state.token = None;
        state.alive = false;
        state.phase = SessionPhase::LoggedOut;
    }
}

#[cfg(test)]
pub(crate) fn token_expiring_in(seconds: i64) -> SessionToken {
    SessionToken {
        access_token: format!("access-{seconds}"),
        refresh_token: format!("refresh-{seconds}"),
        expires_at: Utc::now() + Duration::seconds(seconds),
    }
}
