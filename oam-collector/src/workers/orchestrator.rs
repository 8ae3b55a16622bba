use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashSet;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::models::{ApiConfig, ApiKind, Target, User};
use crate::services::metrics::{record_fetch, record_skipped};
use crate::services::{AlarmNotifier, ApiRequest, CheckpointStore, OamClient, ResponseDocument, ResponseWriter};

/// Streams with a fetch currently running, keyed by
/// user + API + sub-type + metric-type.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<DashSet<String>>,
}

impl InFlight {
    /// `None` when the key is already taken.
    pub fn try_acquire(&self, key: String) -> Option<InFlightGuard> {
        if self.keys.insert(key.clone()) {
            Some(InFlightGuard {
                keys: self.keys.clone(),
                key,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Releases its in-flight key when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_concurrent_process: usize,
    pub page_limit: u32,
    pub page_retries: u32,
    pub allowed_slice_ids: Arc<HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Metrics,
    Sims,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetOutcome {
    Written(usize),
    Empty,
    WindowClosed,
    Failed,
}

/// Result of one orchestrated fetch across a user's groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub targets: usize,
    pub written: usize,
    pub empty: usize,
    pub failed: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed(FetchSummary),
    /// The previous fetch of the same stream is still running.
    AlreadyRunning,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    client: OamClient,
    checkpoints: CheckpointStore,
    writer: ResponseWriter,
    notifier: Arc<AlarmNotifier>,
    in_flight: InFlight,
    settings: FetchSettings,
}

impl FetchOrchestrator {
    pub fn new(
        client: OamClient,
        checkpoints: CheckpointStore,
        writer: ResponseWriter,
        notifier: Arc<AlarmNotifier>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            client,
            checkpoints,
            writer,
            notifier,
            in_flight: InFlight::default(),
            settings,
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Windowed PM/FM fetch of one API for every group of the user.
    pub async fn fetch_metrics(&self, api: &Arc<ApiConfig>, user: &Arc<User>) -> FetchOutcome {
        self.run(api, user, FetchMode::Metrics).await
    }

    /// SIM inventory fetch: no window, no checkpoint.
    pub async fn fetch_sims(&self, api: &Arc<ApiConfig>, user: &Arc<User>) -> FetchOutcome {
        self.run(api, user, FetchMode::Sims).await
    }

    async fn run(&self, api: &Arc<ApiConfig>, user: &Arc<User>, mode: FetchMode) -> FetchOutcome {
        let key = api.stream_key(&user.email);
        let Some(_guard) = self.in_flight.try_acquire(key.clone()) else {
            debug!(key = %key, "Previous fetch still running, skipping tick");
            record_skipped(&api.name);
            return FetchOutcome::AlreadyRunning;
        };

        let targets = user.targets(&self.settings.allowed_slice_ids).await;
        if targets.is_empty() {
            debug!(user = %user.email, api = %api.name, "No groups to fetch");
            return FetchOutcome::Completed(FetchSummary::default());
        }

        let started = Instant::now();
        let summary = self.fan_out(api, user, targets, mode).await;

        info!(
            user = %user.email,
            api = %api.name,
            sub_type = api.sub_type_label(),
            metric_type = api.metric_type_label(),
            targets = summary.targets,
            written = summary.written,
            failed = summary.failed,
            records = summary.records,
            duration_ms = started.elapsed().as_millis() as u64,
            "Fetch completed"
        );
        FetchOutcome::Completed(summary)
    }

    async fn fan_out(
        &self,
        api: &Arc<ApiConfig>,
        user: &Arc<User>,
        targets: Vec<Target>,
        mode: FetchMode,
    ) -> FetchSummary {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_process.max(1)));
        let mut tasks = JoinSet::new();
        let mut summary = FetchSummary {
            targets: targets.len(),
            ..FetchSummary::default()
        };

        for target in targets {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let api = api.clone();
            let user = user.clone();

            tasks.spawn(async move {
                let _permit = permit;
                match mode {
                    FetchMode::Metrics => this.fetch_window(&api, &user, &target).await,
                    FetchMode::Sims => this.fetch_inventory(&api, &user, &target).await,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TargetOutcome::Written(records)) => {
                    summary.written += 1;
                    summary.records += records;
                }
                Ok(TargetOutcome::Empty) | Ok(TargetOutcome::WindowClosed) => summary.empty += 1,
                Ok(TargetOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(api = %api.name, error = %e, "Group fetch task panicked");
                }
            }
        }

        summary
    }

    /// Common query of one target; the window is added by the caller.
    fn request_for(&self, api: &ApiConfig, target: &Target) -> ApiRequest {
        let mut request = ApiRequest::new(api.path_for(&target.nhg_id))
            .param("limit", self.settings.page_limit)
            .param_opt("type", api.sub_type.as_deref())
            .param_opt("metric_type", api.metric_type.as_deref())
            .param_opt("aggregation", api.aggregation.as_deref());

        if !api.has_group_placeholder() {
            request = request.param("nhg_id", &target.nhg_id);
        }
        if let Some(identity) = &target.identity {
            request = request
                .param("org_uuid", &identity.org_uuid)
                .param("account_uuid", &identity.account_uuid);
        }
        request
    }

    async fn fetch_window(&self, api: &ApiConfig, user: &User, target: &Target) -> TargetOutcome {
        let started = Instant::now();
        let group = target.label();

        let (start, end) = match self
            .checkpoints
            .get_time_interval(&user.email, api, &group, Utc::now())
            .await
        {
            Ok(window) => window,
            Err(e) => {
                error!(user = %user.email, api = %api.name, nhg_id = %group, error = %e, "Cannot compute fetch window");
                record_fetch(&api.name, "failed", 0, started.elapsed());
                return TargetOutcome::Failed;
            }
        };

        if start >= end {
            debug!(user = %user.email, api = %api.name, nhg_id = %group, start = %start, end = %end, "Window already covered");
            return TargetOutcome::WindowClosed;
        }

        let request = self
            .request_for(api, target)
            .param("start_timestamp", timestamp(start))
            .param("end_timestamp", timestamp(end));

        let page = match self
            .client
            .fetch_all_pages(user, &request, self.settings.page_retries)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!(
                    user = %user.email,
                    api = %api.name,
                    nhg_id = %group,
                    start = %start,
                    end = %end,
                    error = %e,
                    "Fetch failed, abandoning window and keeping checkpoint"
                );
                record_fetch(&api.name, "failed", 0, started.elapsed());
                return TargetOutcome::Failed;
            }
        };

        if page.records.is_empty() {
            record_fetch(&api.name, "empty", 0, started.elapsed());
            return TargetOutcome::Empty;
        }

        if let Err(e) = self
            .checkpoints
            .store_last_received_data_time(&user.email, api, &group, &page.records)
            .await
        {
            error!(user = %user.email, api = %api.name, nhg_id = %group, error = %e, "Failed to store checkpoint");
        }

        let document = ResponseDocument {
            user: &user.email,
            target: &group,
            api: &api.name,
            sub_type: api.sub_type_label(),
            metric_type: api.metric_type_label(),
            start_time: Some(start),
            end_time: Some(end),
            total_num_records: page.total_num_records,
            data: &page.records,
        };
        if let Err(e) = self.writer.write(api, &document, Utc::now()).await {
            error!(user = %user.email, api = %api.name, nhg_id = %group, error = %e, "Failed to write response");
            record_fetch(&api.name, "failed", 0, started.elapsed());
            return TargetOutcome::Failed;
        }

        let records = page.records.len();
        if api.kind == ApiKind::Fault && self.notifier.is_enabled() {
            let notifier = self.notifier.clone();
            let metric_type = api.metric_type_label().to_string();
            let sub_type = api.sub_type_label().to_string();
            let alarms = page.records;
            tokio::spawn(async move {
                notifier
                    .raise_alarm_notification(&alarms, &metric_type, &sub_type)
                    .await;
            });
        }

        record_fetch(&api.name, "success", records, started.elapsed());
        TargetOutcome::Written(records)
    }

    async fn fetch_inventory(&self, api: &ApiConfig, user: &User, target: &Target) -> TargetOutcome {
        let started = Instant::now();
        let group = target.label();
        let request = self.request_for(api, target);

        let page = match self
            .client
            .fetch_all_pages(user, &request, self.settings.page_retries)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(user = %user.email, api = %api.name, nhg_id = %group, error = %e, "SIM fetch failed");
                record_fetch(&api.name, "failed", 0, started.elapsed());
                return TargetOutcome::Failed;
            }
        };

        if page.records.is_empty() {
            record_fetch(&api.name, "empty", 0, started.elapsed());
            return TargetOutcome::Empty;
        }

        let document = ResponseDocument {
            user: &user.email,
            target: &group,
            api: &api.name,
            sub_type: api.sub_type_label(),
            metric_type: api.metric_type_label(),
            start_time: None,
            end_time: None,
            total_num_records: page.total_num_records,
            data: &page.records,
        };
        if let Err(e) = self.writer.write(api, &document, Utc::now()).await {
            error!(user = %user.email, api = %api.name, nhg_id = %group, error = %e, "Failed to write response");
            record_fetch(&api.name, "failed", 0, started.elapsed());
            return TargetOutcome::Failed;
        }

        record_fetch(&api.name, "success", page.records.len(), started.elapsed());
        TargetOutcome::Written(page.records.len())
    }
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
