//! Prometheus metrics for the collector.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Calling it twice is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_fetch(api: &str, status: &'static str, records: usize, elapsed: Duration) {
    counter!("oam_fetch_total", "api" => api.to_string(), "status" => status).increment(1);
    counter!("oam_fetch_records_total", "api" => api.to_string()).increment(records as u64);
    histogram!("oam_fetch_duration_seconds", "api" => api.to_string()).record(elapsed.as_secs_f64());
}

/// A tick found the previous fetch of the same stream still running.
pub fn record_skipped(api: &str) {
    counter!("oam_fetch_skipped_total", "api" => api.to_string()).increment(1);
}

pub fn record_session_refresh(mode: &'static str, status: &'static str) {
    counter!("oam_session_refresh_total", "mode" => mode, "status" => status).increment(1);
}

pub fn record_notification(status: &'static str, alarms: usize) {
    counter!("oam_alarm_notifications_total", "status" => status).increment(alarms as u64);
}
