//! Checkpoint store: the last ingested event time per logical stream and
//! target group, which turns absolute API windows into an incremental feed.
//!
//! Files are plain text holding one RFC3339 timestamp, laid out as
//! `<root>/<api>/<sub_type>_<metric_type>/<email>/<group>.checkpoint`.
//!
//! The stored value only ever moves forward. The next window starts at the
//! checkpoint, unless the API declares a minimum sync duration, in which case
//! the window is widened backwards to at least that duration.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::error::CheckpointError;
use crate::models::{ApiConfig, ApiKind, FmRecord, PmRecord};
use crate::utils::{parse_event_time, path_component, truncate_to_minute, window_end, write_atomic};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    start_delay_minutes: u32,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, start_delay_minutes: u32) -> Self {
        Self {
            root: root.into(),
            start_delay_minutes,
        }
    }

    pub fn path(&self, user: &str, api: &ApiConfig, group: &str) -> PathBuf {
        self.root
            .join(path_component(&api.name))
            .join(format!(
                "{}_{}",
                path_component(api.sub_type_label()),
                path_component(api.metric_type_label())
            ))
            .join(path_component(user))
            .join(format!("{}.checkpoint", path_component(group)))
    }

    pub async fn read(&self, path: &Path) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        DateTime::parse_from_rfc3339(contents.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| CheckpointError::Parse {
                path: path.display().to_string(),
                value: contents.trim().to_string(),
            })
    }

    async fn write(&self, path: &Path, value: DateTime<Utc>) -> Result<(), CheckpointError> {
        let contents = value.to_rfc3339_opts(SecondsFormat::Secs, true);
        write_atomic(path, contents.as_bytes())
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// A malformed file is reported and treated as absent, so one bad file
    /// costs a default window instead of stopping the stream.
    async fn read_lenient(&self, path: &Path) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        match self.read(path).await {
            Err(CheckpointError::Parse { path, value }) => {
                warn!(path = %path, value = %value, "Ignoring malformed checkpoint");
                Ok(None)
            }
            other => other,
        }
    }

    /// Fetch window for one target: `end` is the latest aligned boundary,
    /// `start` the checkpoint or one interval back, widened to the API's
    /// minimum sync duration.
    pub async fn get_time_interval(
        &self,
        user: &str,
        api: &ApiConfig,
        group: &str,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), CheckpointError> {
        let end = window_end(now, api.interval_minutes, self.start_delay_minutes);
        let path = self.path(user, api, group);

        let mut start = match self.read_lenient(&path).await? {
            Some(checkpoint) => checkpoint,
            None => end - Duration::minutes(i64::from(api.interval_minutes)),
        };

        if let Some(sync) = api.sync_duration_minutes.filter(|m| *m > 0) {
            let floor = end - Duration::minutes(i64::from(sync));
            if start > floor {
                start = floor;
            }
        }

        Ok((start, end))
    }

    /// Advance the checkpoint to the newest event time in `records`.
    ///
    /// Records whose time is missing or unparsable are logged and skipped.
    /// Returns the stored value, or `None` when no record carried a usable
    /// time and nothing was written.
    pub async fn store_last_received_data_time(
        &self,
        user: &str,
        api: &ApiConfig,
        group: &str,
        records: &[Value],
    ) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let mut latest: Option<DateTime<Utc>> = None;
        let mut skipped = 0usize;

        for (index, record) in records.iter().enumerate() {
            match record_event_time(api, record) {
                Ok(time) => latest = latest.max(Some(time)),
                Err(reason) => {
                    skipped += 1;
                    warn!(
                        user = %user,
                        api = %api.name,
                        nhg_id = %group,
                        index,
                        reason = %reason,
                        "Skipping record with unusable event time"
                    );
                }
            }
        }

        let Some(latest) = latest else {
            return Ok(None);
        };

        let path = self.path(user, api, group);
        let previous = self.read_lenient(&path).await?;
        let value = truncate_to_minute(previous.map_or(latest, |p| p.max(latest)));

        if previous != Some(value) {
            self.write(&path, value).await?;
        }
        debug!(
            user = %user,
            api = %api.name,
            nhg_id = %group,
            checkpoint = %value,
            skipped,
            "Checkpoint stored"
        );
        Ok(Some(value))
    }
}

fn record_event_time(api: &ApiConfig, record: &Value) -> Result<DateTime<Utc>, String> {
    let raw = match api.kind {
        ApiKind::Fault => FmRecord::deserialize(record)
            .map_err(|e| e.to_string())?
            .event_time,
        ApiKind::Performance | ApiKind::Sim => PmRecord::deserialize(record)
            .map_err(|e| e.to_string())?
            .event_time(api.is_radio())
            .map(str::to_string),
    };

    let raw = raw.ok_or_else(|| "no event time".to_string())?;
    parse_event_time(&raw).ok_or_else(|| format!("unparsable event time {raw:?}"))
}
