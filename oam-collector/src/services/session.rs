//! Session lifecycle: login, silent refresh before expiry, backoff retry and
//! logout, for both RBAC and federated (ADTOKEN) users.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::error::AuthError;
use super::metrics::record_session_refresh;
use super::token_store::TokenStore;
use crate::models::{AuthMode, SessionPhase, SessionToken, User};

/// A token whose next refresh is due sooner than this right after it was
/// installed is treated as already expired.
pub const NEAR_EXPIRY: chrono::Duration = chrono::Duration::seconds(10);

/// Authentication endpoints of the OAM API.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<SessionToken, AuthError>;
    async fn refresh(&self, token: &SessionToken) -> Result<SessionToken, AuthError>;
    async fn refresh_federated(&self, token: &SessionToken) -> Result<SessionToken, AuthError>;
    async fn logout(&self, token: &SessionToken) -> Result<(), AuthError>;
}

/// Re-authentication backoff: starts at `initial`, doubles up to `max`, then
/// starts over from `initial`.
#[derive(Debug, Clone)]
pub struct SessionBackoff {
    pub initial: Duration,
    pub max: Duration,
    /// Attempts after which the session is terminated; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for SessionBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
            max_attempts: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    auth: Arc<dyn AuthApi>,
    tokens: Arc<dyn TokenStore>,
    backoff: SessionBackoff,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthApi>, tokens: Arc<dyn TokenStore>, backoff: SessionBackoff) -> Self {
        Self {
            auth,
            tokens,
            backoff,
        }
    }

    /// Password login. Installs the new token and marks the session alive.
    #[instrument(skip_all, fields(user = %user.email))]
    pub async fn login(&self, user: &User) -> Result<(), AuthError> {
        user.session.set_phase(SessionPhase::Authenticating).await;
        match self.authenticate(user).await {
            Ok(token) => {
                self.install(user, token).await;
                info!("User logged in");
                Ok(())
            }
            Err(e) => {
                user.session.set_phase(SessionPhase::LoggedOut).await;
                record_session_refresh(user.mode.as_str(), "login_failed");
                Err(e)
            }
        }
    }

    /// Bring a session up at startup. RBAC users log in; federated users
    /// resume their persisted token since they have no interactive login.
    #[instrument(skip_all, fields(user = %user.email, mode = user.mode.as_str()))]
    pub async fn start(&self, user: &User) -> Result<(), AuthError> {
        match user.mode {
            AuthMode::Rbac => self.login(user).await,
            AuthMode::AdToken => {
                let token = self
                    .tokens
                    .load(&user.email)
                    .await?
                    .ok_or_else(|| AuthError::NoToken(user.email.clone()))?;
                user.session.install(token).await;
                info!("Resumed persisted federated token");
                Ok(())
            }
        }
    }

    /// Background refresh loop. Runs for the lifetime of the session and
    /// only returns when a configured retry ceiling is exhausted.
    #[instrument(skip_all, fields(user = %user.email, mode = user.mode.as_str()))]
    pub async fn refresh_token(&self, user: Arc<User>) -> Result<(), AuthError> {
        let mut forced_streak = 0u32;

        loop {
            let delay = user.session.refresh_delay(Utc::now()).await;
            let alive = user.session.is_alive().await;

            match delay {
                Some(delay) if alive && delay >= NEAR_EXPIRY => {
                    forced_streak = 0;
                    debug!(refresh_in_secs = delay.num_seconds(), "Next token refresh scheduled");
                    tokio::select! {
                        _ = tokio::time::sleep(delay.to_std().unwrap_or_default()) => {}
                        _ = user.session.woken() => {
                            // a wake left over from an invalidation already handled
                            if user.session.is_alive().await {
                                debug!("Stale session wake-up ignored");
                                continue;
                            }
                            info!("Session invalidated, re-authenticating now");
                        }
                    }
                }
                delay => {
                    forced_streak += 1;
                    warn!(
                        refresh_in_secs = delay.map(|d| d.num_seconds()),
                        "Session near expiry, forcing immediate re-authentication"
                    );
                    user.session.mark_not_alive().await;
                    if forced_streak > 1 {
                        tokio::time::sleep(self.backoff.initial).await;
                    }
                }
            }

            let gate = user.session.begin_refresh().await;
            user.session.set_phase(SessionPhase::Refreshing).await;

            let renewed = match self.renew(&user).await {
                Ok(token) => Ok(token),
                Err(e) => {
                    warn!(error = %e, "Re-authentication failed, entering backoff");
                    record_session_refresh(user.mode.as_str(), "failed");
                    user.session.set_phase(SessionPhase::BackoffRetry).await;

                    let manager = self.clone();
                    let retry_user = user.clone();
                    match tokio::spawn(async move { manager.retry_with_backoff(&retry_user).await })
                        .await
                    {
                        Ok(result) => result,
                        Err(e) => Err(AuthError::Task(e.to_string())),
                    }
                }
            };

            match renewed {
                Ok(token) => {
                    self.install(&user, token).await;
                    record_session_refresh(user.mode.as_str(), "success");
                    info!("Session token renewed");
                }
                Err(e) => {
                    user.session.terminate().await;
                    drop(gate);
                    error!(error = %e, "Session terminated");
                    return Err(e);
                }
            }

            drop(gate);
        }
    }

    /// RBAC sessions are logged out remotely; federated tokens are kept
    /// valid for the next process and only dropped from memory.
    #[instrument(skip_all, fields(user = %user.email))]
    pub async fn logout(&self, user: &User) -> Result<(), AuthError> {
        let _gate = user.session.begin_refresh().await;
        let token = user.session.token().await;

        let result = match (user.mode, token) {
            (AuthMode::Rbac, Some(token)) => self.auth.logout(&token).await,
            (AuthMode::Rbac, None) => Err(AuthError::NoToken(user.email.clone())),
            (AuthMode::AdToken, _) => Ok(()),
        };

        user.session.clear().await;
        result
    }

    async fn authenticate(&self, user: &User) -> Result<SessionToken, AuthError> {
        self.auth
            .login(&user.email, user.password().expose_secret())
            .await
    }

    /// One renewal: refresh, with the mode-specific fallback.
    async fn renew(&self, user: &User) -> Result<SessionToken, AuthError> {
        let current = user.session.token().await;

        match user.mode {
            AuthMode::Rbac => {
                if let Some(token) = current.as_ref() {
                    match self.auth.refresh(token).await {
                        Ok(token) => return Ok(token),
                        Err(e) => warn!(error = %e, "Token refresh failed, falling back to login"),
                    }
                }
                self.authenticate(user).await
            }
            AuthMode::AdToken => {
                let token = current.ok_or_else(|| AuthError::NoToken(user.email.clone()))?;
                match self.auth.refresh_federated(&token).await {
                    Ok(token) => Ok(token),
                    Err(e) => {
                        warn!(error = %e, "Federated token refresh failed, retrying");
                        self.auth.refresh_federated(&token).await
                    }
                }
            }
        }
    }

    /// The call repeated under backoff: login for RBAC, federated refresh
    /// for ADTOKEN.
    async fn reattempt(&self, user: &User) -> Result<SessionToken, AuthError> {
        match user.mode {
            AuthMode::Rbac => self.authenticate(user).await,
            AuthMode::AdToken => {
                let token = user
                    .session
                    .token()
                    .await
                    .ok_or_else(|| AuthError::NoToken(user.email.clone()))?;
                self.auth.refresh_federated(&token).await
            }
        }
    }

    async fn retry_with_backoff(&self, user: &User) -> Result<SessionToken, AuthError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff.initial)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.backoff.max)
            .with_max_elapsed_time(None)
            .build();
        let mut attempts = 0u32;

        loop {
            let delay = backoff.next_backoff().unwrap_or(self.backoff.max);
            if delay >= self.backoff.max {
                backoff.reset();
            }

            warn!(
                user = %user.email,
                attempt = attempts + 1,
                delay_secs = delay.as_secs_f64(),
                "Re-authentication retry scheduled"
            );
            tokio::time::sleep(delay).await;
            attempts += 1;

            match self.reattempt(user).await {
                Ok(token) => {
                    info!(user = %user.email, attempts, "Re-authentication succeeded after backoff");
                    return Ok(token);
                }
                Err(e) => {
                    warn!(user = %user.email, attempt = attempts, error = %e, "Re-authentication retry failed");
                    if self.backoff.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(AuthError::RetriesExhausted(attempts));
                    }
                }
            }
        }
    }

    async fn install(&self, user: &User, token: SessionToken) {
        user.session.install(token.clone()).await;
        if user.mode == AuthMode::AdToken {
            if let Err(e) = self.tokens.save(&user.email, &token).await {
                error!(user = %user.email, error = %e, "Failed to persist federated token");
            }
        }
    }
}
