use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use super::orchestrator::{FetchOrchestrator, FetchOutcome};
use crate::models::{ApiConfig, AuthMode, SessionPhase, User};
use crate::services::{AuthError, GroupDiscovery, SessionManager};
use crate::utils::next_boundary;

/// Fire `tick` on clean `interval_minutes` boundaries (shifted by
/// `delay_minutes`), forever. Each tick runs as its own task so a slow tick
/// never delays the next one.
pub async fn run_aligned<F, Fut>(name: String, interval_minutes: u32, delay_minutes: u32, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let now = Utc::now();
    let first = next_boundary(now, interval_minutes, delay_minutes);
    let wait = (first - now).to_std().unwrap_or_default();
    let period = Duration::from_secs(u64::from(interval_minutes.max(1)) * 60);

    info!(schedule = %name, first_run = %first, interval_minutes, "Schedule armed");

    let mut ticker = interval_at(Instant::now() + wait, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        tokio::spawn(tick());
    }
}

#[derive(Clone)]
pub struct Scheduler {
    users: Vec<Arc<User>>,
    metric_apis: Vec<Arc<ApiConfig>>,
    sim_apis: Vec<Arc<ApiConfig>>,
    sessions: SessionManager,
    groups: GroupDiscovery,
    orchestrator: FetchOrchestrator,
    start_delay_minutes: u32,
}

impl Scheduler {
    pub fn new(
        users: Vec<Arc<User>>,
        metric_apis: Vec<Arc<ApiConfig>>,
        sim_apis: Vec<Arc<ApiConfig>>,
        sessions: SessionManager,
        groups: GroupDiscovery,
        orchestrator: FetchOrchestrator,
        start_delay_minutes: u32,
    ) -> Self {
        Self {
            users,
            metric_apis,
            sim_apis,
            sessions,
            groups,
            orchestrator,
            start_delay_minutes,
        }
    }

    /// Bring every session up, then poll for the lifetime of the process.
    #[instrument(skip_all, fields(users = self.users.len()))]
    pub async fn start_data_collection(&self) {
        let mut tasks = JoinSet::new();
        let mut active = Vec::new();

        for user in &self.users {
            match self.sessions.start(user).await {
                Ok(()) => {}
                Err(AuthError::NoToken(_)) if user.mode == AuthMode::AdToken => {
                    error!(user = %user.email, "No federated token available, user will not be polled");
                    continue;
                }
                Err(e) => {
                    warn!(user = %user.email, error = %e, "Initial authentication failed, the refresh loop will retry");
                }
            }

            let sessions = self.sessions.clone();
            let refresh_user = user.clone();
            tasks.spawn(async move {
                if let Err(e) = sessions.refresh_token(refresh_user.clone()).await {
                    error!(user = %refresh_user.email, error = %e, "Session refresh loop stopped");
                }
            });
            active.push(user.clone());
        }

        for user in &active {
            if let Err(e) = self.groups.refresh_groups(user).await {
                warn!(user = %user.email, error = %e, "Initial group discovery failed");
            }
        }

        for user in &active {
            self.schedule_group_discovery(&mut tasks, user);
            for api in &self.metric_apis {
                self.schedule_api(&mut tasks, user, api, false);
            }
            for api in &self.sim_apis {
                self.schedule_api(&mut tasks, user, api, true);
            }
        }

        info!(
            users = active.len(),
            metric_apis = self.metric_apis.len(),
            sim_apis = self.sim_apis.len(),
            "Data collection started"
        );

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Collector task panicked");
            }
        }
    }

    fn schedule_group_discovery(&self, tasks: &mut JoinSet<()>, user: &Arc<User>) {
        let groups = self.groups.clone();
        let user = user.clone();
        let name = format!("{}_groups", user.email);
        let interval = groups.interval_minutes();
        let delay = self.start_delay_minutes;

        tasks.spawn(run_aligned(name, interval, delay, move || {
            let groups = groups.clone();
            let user = user.clone();
            async move {
                if is_terminated(&user).await {
                    return;
                }
                if let Err(e) = groups.refresh_groups(&user).await {
                    warn!(user = %user.email, error = %e, "Group discovery failed, keeping previous membership");
                }
            }
        }));
    }

    fn schedule_api(&self, tasks: &mut JoinSet<()>, user: &Arc<User>, api: &Arc<ApiConfig>, sims: bool) {
        let orchestrator = self.orchestrator.clone();
        let user = user.clone();
        let api = api.clone();
        let name = api.stream_key(&user.email);
        let interval = api.interval_minutes;
        let delay = self.start_delay_minutes;

        tasks.spawn(run_aligned(name, interval, delay, move || {
            let orchestrator = orchestrator.clone();
            let user = user.clone();
            let api = api.clone();
            async move {
                if is_terminated(&user).await {
                    return;
                }
                let outcome = if sims {
                    orchestrator.fetch_sims(&api, &user).await
                } else {
                    orchestrator.fetch_metrics(&api, &user).await
                };
                if let FetchOutcome::Completed(summary) = outcome {
                    if summary.failed > 0 {
                        warn!(
                            user = %user.email,
                            api = %api.name,
                            failed = summary.failed,
                            targets = summary.targets,
                            "Some groups failed this tick"
                        );
                    }
                }
            }
        }));
    }
}

async fn is_terminated(user: &User) -> bool {
    user.session.phase().await == SessionPhase::Terminated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_aligned_schedule_fires_every_interval() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        let handle = tokio::spawn(run_aligned("test".into(), 1, 0, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let first = ticks.load(Ordering::SeqCst);
        assert!(first >= 1, "first tick lands within one interval");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), first + 2);

        handle.abort();
    }
}
