//! Collector wiring and the read-only health/metrics listener.
//!
//! Every component is built once here from the loaded configuration and
//! handed to the scheduler; nothing lives in global state apart from the
//! metrics recorder.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::retry::RetryConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::models::{AuthMode, User};
use crate::services::metrics::get_metrics;
use crate::services::{
    AlarmNotifier, CheckpointStore, CollectorError, FileTokenStore, GroupDiscovery, OamClient,
    ResponseWriter, SessionBackoff, SessionManager, TokenStore,
};
use crate::workers::{FetchOrchestrator, FetchSettings, Scheduler};

pub struct CollectorContext {
    pub config: CollectorConfig,
    pub users: Vec<Arc<User>>,
    pub sessions: SessionManager,
    pub scheduler: Scheduler,
}

impl CollectorContext {
    pub async fn build(config: CollectorConfig) -> Result<Self, CollectorError> {
        let http = OamClient::build_http_client(config.request_timeout())?;
        let client = OamClient::new(
            http.clone(),
            &config.base_url,
            config.auth.clone(),
            RetryConfig::from(&config.http_retry),
        );

        let tokens = Arc::new(FileTokenStore::new(&config.token_dir));
        let users = load_users(&config, tokens.as_ref()).await?;

        let sessions = SessionManager::new(
            Arc::new(client.clone()),
            tokens,
            SessionBackoff::from(&config.session_backoff),
        );

        let notifier = AlarmNotifier::from_file(config.alarm_notifier_config.as_deref(), http).await?;
        if notifier.is_enabled() {
            info!("Alarm notifications enabled");
        }

        let orchestrator = FetchOrchestrator::new(
            client.clone(),
            CheckpointStore::new(&config.checkpoint_dir, config.start_delay_minutes),
            ResponseWriter::new(&config.response_dir, config.pretty_print),
            Arc::new(notifier),
            FetchSettings {
                max_concurrent_process: config.max_concurrent_process,
                page_limit: config.page_limit,
                page_retries: config.page_retries,
                allowed_slice_ids: Arc::new(config.allowed_slice_ids.clone()),
            },
        );

        let groups = GroupDiscovery::new(
            client,
            config.network_apis.clone(),
            config.page_limit,
            config.page_retries,
        );

        let scheduler = Scheduler::new(
            users.clone(),
            config.metric_apis.iter().cloned().map(Arc::new).collect(),
            config.sim_apis.iter().cloned().map(Arc::new).collect(),
            sessions.clone(),
            groups,
            orchestrator,
            config.start_delay_minutes,
        );

        Ok(Self {
            config,
            users,
            sessions,
            scheduler,
        })
    }

    pub fn health_port(&self) -> u16 {
        self.config.metrics_port.unwrap_or(self.config.common.port)
    }

    /// Log every RBAC session out; failures are only logged.
    pub async fn logout_all(&self) {
        for user in &self.users {
            if !user.session.is_alive().await {
                continue;
            }
            match self.sessions.logout(user).await {
                Ok(()) => info!(user = %user.email, "Logged out"),
                Err(e) => warn!(user = %user.email, error = %e, "Logout failed"),
            }
        }
    }
}

/// Users from the configuration. A federated user's seed token is written
/// to the store unless a newer one has already been persisted.
async fn load_users(
    config: &CollectorConfig,
    tokens: &dyn TokenStore,
) -> Result<Vec<Arc<User>>, CollectorError> {
    let mut users = Vec::with_capacity(config.users.len());

    for entry in &config.users {
        let user = entry
            .to_user()
            .map_err(|e| CollectorError::Config(e.to_string()))?;

        if user.mode == AuthMode::AdToken {
            let seed = entry
                .seed_token()
                .map_err(|e| CollectorError::Config(e.to_string()))?;
            if let Some(seed) = seed {
                if tokens.load(&user.email).await?.is_none() {
                    tokens.save(&user.email, &seed).await?;
                    info!(user = %user.email, "Seeded federated token from configuration");
                }
            }
        }

        users.push(Arc::new(user));
    }

    Ok(users)
}

#[derive(Clone)]
struct HealthState {
    users: Arc<Vec<Arc<User>>>,
}

async fn session_summary(users: &[Arc<User>]) -> (usize, Vec<serde_json::Value>) {
    let mut alive = 0;
    let mut sessions = Vec::with_capacity(users.len());
    for user in users {
        let is_alive = user.session.is_alive().await;
        if is_alive {
            alive += 1;
        }
        sessions.push(json!({
            "user": user.email,
            "mode": user.mode.as_str(),
            "phase": user.session.phase().await,
            "alive": is_alive,
            "groups": user.group_count().await,
            "hardware": user.hardware_count().await,
        }));
    }
    (alive, sessions)
}

/// Liveness: the process answers; the body reports per-user sessions.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let (alive, sessions) = session_summary(&state.users).await;
    let status = if alive == state.users.len() { "ok" } else { "degraded" };
    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "service": "oam-collector",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": sessions,
        })),
    )
}

/// Readiness: every user holds a live session.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    let (alive, _) = session_summary(&state.users).await;
    if alive == state.users.len() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub fn health_router(users: Vec<Arc<User>>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(HealthState {
            users: Arc::new(users),
        })
}

/// Serve the health router until the process exits.
pub async fn serve_health(port: u16, router: Router) -> Result<(), CollectorError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = listener.local_addr()?.port(), "Health endpoint listening");
    axum::serve(listener, router).await?;
    Ok(())
}
