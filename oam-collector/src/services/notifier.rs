//! Alarm notifier: filters fault records, suppresses repeats within a TTL and
//! pushes the remainder to a chat webhook.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info, warn};

use super::error::NotifierError;
use super::metrics::record_notification;
use crate::models::FmRecord;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Markdown,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: String,
    /// De-duplication window.
    #[serde(default = "default_sync_duration_minutes")]
    pub sync_duration_minutes: u32,
    /// One message per NHG instead of one per alarm.
    #[serde(default)]
    pub group_alarms: bool,
    /// Cleared alarms are dropped unless set.
    #[serde(default)]
    pub notify_cleared: bool,
    #[serde(default)]
    pub message_format: MessageFormat,
    #[serde(default)]
    pub filters: AlarmFilters,
}

fn default_sync_duration_minutes() -> u32 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmFilters {
    #[serde(rename = "RADIO", default)]
    pub radio: Option<RadioFilter>,
    #[serde(rename = "DAC", default)]
    pub dac: Option<AlarmIdFilter>,
    #[serde(rename = "CORE", default)]
    pub core: Option<AlarmIdFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadioFilter {
    #[serde(default)]
    pub specific_problems: Vec<String>,
    /// specific problem -> fault ids allowed for it. Specific problems
    /// without an entry pass regardless of fault id.
    #[serde(default)]
    pub fault_ids: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmIdFilter {
    #[serde(default)]
    pub alarm_ids: Vec<String>,
}

fn allows(list: &[String], value: Option<&str>) -> bool {
    list.iter()
        .any(|entry| entry == WILDCARD || Some(entry.as_str()) == value)
}

impl NotifierConfig {
    pub async fn load(path: &Path) -> Result<Option<Self>, NotifierError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(NotifierError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Some(serde_yaml::from_str(&contents)?))
    }

    /// Whether an alarm of this metric type is worth a notification.
    pub fn is_relevant(&self, metric_type: &str, alarm: &FmRecord) -> bool {
        match metric_type.to_ascii_uppercase().as_str() {
            "RADIO" => self.filters.radio.as_ref().is_some_and(|filter| {
                let problem = alarm.specific_problem.as_deref();
                if !allows(&filter.specific_problems, problem) {
                    return false;
                }
                match problem.and_then(|p| filter.fault_ids.get(p)) {
                    Some(ids) if !ids.is_empty() => allows(ids, alarm.fault_id()),
                    _ => true,
                }
            }),
            "DAC" => self
                .filters
                .dac
                .as_ref()
                .is_some_and(|f| allows(&f.alarm_ids, alarm.alarm_identifier.as_deref())),
            "CORE" => self
                .filters
                .core
                .as_ref()
                .is_some_and(|f| allows(&f.alarm_ids, alarm.alarm_identifier.as_deref())),
            _ => false,
        }
    }
}

/// De-duplication key of an alarm occurrence, scoped to its NHG.
pub fn fingerprint(metric_type: &str, alarm: &FmRecord) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    if metric_type.eq_ignore_ascii_case("CORE") {
        [
            field(&alarm.nhg_id),
            field(&alarm.edge_name),
            field(&alarm.alarm_identifier),
            field(&alarm.event_time),
        ]
        .join("|")
    } else {
        [
            field(&alarm.nhg_id),
            field(&alarm.hw_id),
            field(&alarm.dn),
            field(&alarm.alarm_identifier),
            field(&alarm.specific_problem),
            field(&alarm.event_time),
        ]
        .join("|")
    }
}

#[derive(Debug, Clone)]
pub struct RaisedNotification {
    pub alarm: FmRecord,
    pub notified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct WebhookMessage {
    text: String,
    #[serde(rename = "textFormat", skip_serializing_if = "Option::is_none")]
    text_format: Option<&'static str>,
}

pub struct AlarmNotifier {
    config: Option<NotifierConfig>,
    http: Client,
    raised: DashMap<String, RaisedNotification>,
}

impl AlarmNotifier {
    pub fn new(config: Option<NotifierConfig>, http: Client) -> Self {
        Self {
            config,
            http,
            raised: DashMap::new(),
        }
    }

    /// Build from an optional YAML file; a missing file disables notifications.
    pub async fn from_file(path: Option<&Path>, http: Client) -> Result<Self, NotifierError> {
        let config = match path {
            Some(path) => {
                let config = NotifierConfig::load(path).await?;
                if config.is_none() {
                    info!(path = %path.display(), "No alarm notifier config, notifications disabled");
                }
                config
            }
            None => None,
        };
        Ok(Self::new(config, http))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn pending_dedup_entries(&self) -> usize {
        self.raised.len()
    }

    /// Filter, de-duplicate and send. Returns how many alarms were notified.
    pub async fn raise_alarm_notification(
        &self,
        records: &[Value],
        metric_type: &str,
        sub_type: &str,
    ) -> usize {
        self.raise_at(records, metric_type, sub_type, Utc::now()).await
    }

    pub(crate) async fn raise_at(
        &self,
        records: &[Value],
        metric_type: &str,
        sub_type: &str,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(config) = &self.config else {
            return 0;
        };

        let ttl = Duration::minutes(i64::from(config.sync_duration_minutes));
        self.raised.retain(|_, raised| now - raised.notified_at < ttl);

        let mut fresh: Vec<(FmRecord, &Value)> = Vec::new();
        for record in records {
            let alarm = match FmRecord::deserialize(record) {
                Ok(alarm) => alarm,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed alarm record");
                    continue;
                }
            };
            if !config.is_relevant(metric_type, &alarm) {
                continue;
            }
            if alarm.is_cleared() && !config.notify_cleared {
                continue;
            }

            match self.raised.entry(fingerprint(metric_type, &alarm)) {
                Entry::Occupied(entry) => {
                    debug!(fingerprint = %entry.key(), "Alarm already notified");
                }
                Entry::Vacant(entry) => {
                    entry.insert(RaisedNotification {
                        alarm: alarm.clone(),
                        notified_at: now,
                    });
                    fresh.push((alarm, record));
                }
            }
        }

        if fresh.is_empty() {
            return 0;
        }

        let messages = match config.message_format {
            MessageFormat::Markdown => {
                render_markdown(&fresh, metric_type, sub_type, config.group_alarms)
            }
            MessageFormat::Json => vec![render_json(&fresh, metric_type, sub_type)],
        };

        for message in &messages {
            match self.post(&config.webhook_url, message).await {
                Ok(()) => record_notification("sent", 1),
                Err(e) => {
                    record_notification("failed", 1);
                    warn!(error = %e, metric_type, sub_type, "Alarm notification failed");
                }
            }
        }

        info!(
            metric_type,
            sub_type,
            alarms = fresh.len(),
            messages = messages.len(),
            "Alarm notifications sent"
        );
        fresh.len()
    }

    async fn post(&self, url: &str, message: &WebhookMessage) -> Result<(), NotifierError> {
        let response = self.http.post(url).json(message).send().await?;
        if !response.status().is_success() {
            return Err(NotifierError::WebhookStatus(response.status()));
        }
        Ok(())
    }
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

fn alarm_line(out: &mut String, alarm: &FmRecord) {
    let _ = writeln!(
        out,
        "- **{}** alarm {} / problem {}: {}",
        or_dash(&alarm.severity),
        or_dash(&alarm.alarm_identifier),
        or_dash(&alarm.specific_problem),
        or_dash(&alarm.alarm_text)
    );
    let _ = writeln!(
        out,
        "  hw `{}` dn `{}` at {}{}",
        or_dash(&alarm.hw_id),
        or_dash(&alarm.dn),
        or_dash(&alarm.event_time),
        alarm
            .fault_id()
            .map(|id| format!(" (fault {id})"))
            .unwrap_or_default()
    );
}

fn render_markdown(
    alarms: &[(FmRecord, &Value)],
    metric_type: &str,
    sub_type: &str,
    group: bool,
) -> Vec<WebhookMessage> {
    let markdown = |text: String| WebhookMessage {
        text,
        text_format: Some("markdown"),
    };

    if !group {
        return alarms
            .iter()
            .map(|(alarm, _)| {
                let mut text = format!(
                    "### {} {} alarm on NHG `{}`\n",
                    metric_type,
                    sub_type,
                    or_dash(&alarm.nhg_id)
                );
                alarm_line(&mut text, alarm);
                markdown(text)
            })
            .collect();
    }

    let mut by_group: BTreeMap<&str, Vec<&FmRecord>> = BTreeMap::new();
    for (alarm, _) in alarms {
        by_group.entry(or_dash(&alarm.nhg_id)).or_default().push(alarm);
    }

    by_group
        .into_iter()
        .map(|(nhg, group)| {
            let mut text = format!(
                "### {} {} alarm(s) on NHG `{}` ({})\n",
                group.len(),
                metric_type,
                nhg,
                sub_type
            );
            for alarm in group {
                alarm_line(&mut text, alarm);
            }
            markdown(text)
        })
        .collect()
}

fn render_json(alarms: &[(FmRecord, &Value)], metric_type: &str, sub_type: &str) -> WebhookMessage {
    let body = json!({
        "metric_type": metric_type,
        "sub_type": sub_type,
        "count": alarms.len(),
        "alarms": alarms.iter().map(|(_, raw)| *raw).collect::<Vec<_>>(),
    });
    WebhookMessage {
        text: body.to_string(),
        text_format: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(webhook_url: &str) -> NotifierConfig {
        serde_yaml::from_str(&format!(
            r#"
webhook_url: "{webhook_url}"
sync_duration_minutes: 30
filters:
  RADIO:
    specific_problems: ["111", "222"]
    fault_ids:
      "222": ["1907"]
  DAC:
    alarm_ids: ["*"]
  CORE:
    alarm_ids: ["5001"]
"#
        ))
        .unwrap()
    }

    fn alarm(value: Value) -> FmRecord {
        FmRecord::deserialize(&value).unwrap()
    }

    #[test]
    fn test_radio_filter_and_fault_id_subfilter() {
        let config = config("http://localhost");
        assert!(config.is_relevant("RADIO", &alarm(json!({"specific_problem": "111"}))));
        assert!(!config.is_relevant("RADIO", &alarm(json!({"specific_problem": "333"}))));
        assert!(config.is_relevant(
            "RADIO",
            &alarm(json!({"specific_problem": "222", "additional_text": "Unit:1;FaultId:1907"}))
        ));
        assert!(!config.is_relevant(
            "RADIO",
            &alarm(json!({"specific_problem": "222", "additional_text": "FaultId:4000"}))
        ));
    }

    #[test]
    fn test_alarm_id_filters() {
        let config = config("http://localhost");
        assert!(config.is_relevant("DAC", &alarm(json!({"alarm_identifier": "anything"}))));
        assert!(config.is_relevant("core", &alarm(json!({"alarm_identifier": 5001}))));
        assert!(!config.is_relevant("CORE", &alarm(json!({"alarm_identifier": "5002"}))));
        assert!(!config.is_relevant("TRANSPORT", &alarm(json!({"alarm_identifier": "5001"}))));
    }

    #[test]
    fn test_core_fingerprint_uses_group_and_edge() {
        let record = alarm(json!({
            "nhg_id": "nhg-1", "edge_name": "edge-a", "alarm_identifier": "5001",
            "event_time": "2024-03-01T10:00:00Z", "dn": "ignored"
        }));
        assert_eq!(
            fingerprint("CORE", &record),
            "nhg-1|edge-a|5001|2024-03-01T10:00:00Z"
        );
        assert_eq!(
            fingerprint("RADIO", &record),
            "nhg-1||ignored|5001||2024-03-01T10:00:00Z"
        );
    }

    #[tokio::test]
    async fn test_same_alarm_on_two_groups_is_notified_for_each() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = AlarmNotifier::new(Some(config(&server.uri())), Client::new());
        let payload = [
            json!({"nhg_id": "nhg-1", "alarm_identifier": "1", "event_time": "t1"}),
            json!({"nhg_id": "nhg-2", "alarm_identifier": "1", "event_time": "t1"}),
        ];
        let now = Utc::now();
        assert_eq!(notifier.raise_at(&payload, "DAC", "ACTIVE", now).await, 2);
        assert_eq!(notifier.pending_dedup_entries(), 2);

        // the same occurrence again is still suppressed per group
        assert_eq!(notifier.raise_at(&payload, "DAC", "ACTIVE", now).await, 0);
    }

    #[tokio::test]
    async fn test_missing_config_file_disables_notifier() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = AlarmNotifier::from_file(Some(dir.path().join("absent.yaml").as_path()), Client::new())
            .await
            .unwrap();
        assert!(!notifier.is_enabled());
        assert_eq!(
            notifier
                .raise_alarm_notification(&[json!({"specific_problem": "111"})], "RADIO", "ACTIVE")
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_repeat_within_ttl_is_suppressed_then_renotified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"textFormat": "markdown"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = AlarmNotifier::new(Some(config(&format!("{}/hook", server.uri()))), Client::new());
        let payload = [json!({
            "alarm_identifier": "2",
            "specific_problem": "111",
            "event_time": "2024-03-01T10:00:00Z",
            "hw_id": "hw-1"
        })];
        let now = Utc::now();

        assert_eq!(notifier.raise_at(&payload, "RADIO", "ACTIVE", now).await, 1);
        assert_eq!(
            notifier
                .raise_at(&payload, "RADIO", "ACTIVE", now + Duration::minutes(10))
                .await,
            0
        );
        assert_eq!(
            notifier
                .raise_at(&payload, "RADIO", "ACTIVE", now + Duration::minutes(31))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_cleared_alarms_follow_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = AlarmNotifier::new(Some(config(&server.uri())), Client::new());
        let payload = [json!({"alarm_identifier": "7", "severity": "cleared"})];
        assert_eq!(notifier.raise_alarm_notification(&payload, "DAC", "HISTORY").await, 0);
    }

    #[tokio::test]
    async fn test_grouped_markdown_sends_one_message_per_group() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = config(&server.uri());
        config.group_alarms = true;
        let notifier = AlarmNotifier::new(Some(config), Client::new());
        let payload = [
            json!({"nhg_id": "nhg-1", "alarm_identifier": "1", "event_time": "t1"}),
            json!({"nhg_id": "nhg-1", "alarm_identifier": "2", "event_time": "t1"}),
            json!({"nhg_id": "nhg-2", "alarm_identifier": "1", "event_time": "t1"}),
        ];
        assert_eq!(notifier.raise_alarm_notification(&payload, "DAC", "ACTIVE").await, 3);
    }

    #[tokio::test]
    async fn test_json_format_sends_single_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server.uri());
        config.message_format = MessageFormat::Json;
        let notifier = AlarmNotifier::new(Some(config), Client::new());
        let payload = [
            json!({"alarm_identifier": "1", "event_time": "t1"}),
            json!({"alarm_identifier": "2", "event_time": "t1"}),
        ];
        // a failing webhook is logged, not retried
        assert_eq!(notifier.raise_alarm_notification(&payload, "DAC", "ACTIVE").await, 2);
        assert_eq!(notifier.pending_dedup_entries(), 2);
    }
}
