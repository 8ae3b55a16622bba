use serde::{Deserialize, Serialize};
use validator::Validate;

/// Placeholder substituted with the target group id in API path templates.
pub const NHG_PLACEHOLDER: &str = "{nhg_id}";

/// Which payload family an endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApiKind {
    #[default]
    #[serde(rename = "PM")]
    Performance,
    #[serde(rename = "FM")]
    Fault,
    #[serde(rename = "SIM")]
    Sim,
}

/// Static descriptor of one polled endpoint. Immutable after load.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ApiConfig {
    /// Base name, used for output directories, checkpoint paths and in-flight keys.
    #[validate(length(min = 1))]
    pub name: String,
    /// Path template relative to the base URL, may contain `{nhg_id}`.
    #[validate(length(min = 1))]
    pub path: String,
    #[serde(default)]
    pub kind: ApiKind,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub metric_type: Option<String>,
    #[validate(range(min = 1, max = 1440))]
    pub interval_minutes: u32,
    /// Minimum look-back of every fetch window.
    #[serde(default)]
    pub sync_duration_minutes: Option<u32>,
    #[serde(default)]
    pub aggregation: Option<String>,
}

impl ApiConfig {
    pub fn sub_type_label(&self) -> &str {
        self.sub_type.as_deref().unwrap_or("default")
    }

    pub fn metric_type_label(&self) -> &str {
        self.metric_type.as_deref().unwrap_or("default")
    }

    pub fn is_radio(&self) -> bool {
        self.metric_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("RADIO"))
    }

    pub fn has_group_placeholder(&self) -> bool {
        self.path.contains(NHG_PLACEHOLDER)
    }

    /// Path with the group placeholder substituted.
    pub fn path_for(&self, nhg_id: &str) -> String {
        self.path.replace(NHG_PLACEHOLDER, nhg_id)
    }

    /// Identity of the logical stream a user polls through this API.
    pub fn stream_key(&self, user_email: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            user_email,
            self.name,
            self.sub_type_label(),
            self.metric_type_label()
        )
    }
}

#[cfg(test)]
pub(crate) fn sample_api(kind: ApiKind, metric_type: Option<&str>) -> ApiConfig {
    ApiConfig {
        name: "pmdata".to_string(),
        path: "/api/v2/nhg/{nhg_id}/pmdata".to_string(),
        kind,
        sub_type: Some("HISTORY".to_string()),
        metric_type: metric_type.map(str::to_string),
        interval_minutes: 15,
        sync_duration_minutes: None,
        aggregation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_substitution() {
        let api = sample_api(ApiKind::Performance, Some("RADIO"));
        assert!(api.has_group_placeholder());
        assert_eq!(api.path_for("nhg-7"), "/api/v2/nhg/nhg-7/pmdata");
    }

    #[test]
    fn test_stream_key_distinguishes_sub_and_metric_type() {
        let radio = sample_api(ApiKind::Performance, Some("RADIO"));
        let core = sample_api(ApiKind::Performance, Some("CORE"));
        assert_eq!(
            radio.stream_key("ops@example.com"),
            "ops@example.com_pmdata_HISTORY_RADIO"
        );
        assert_ne!(
            radio.stream_key("ops@example.com"),
            core.stream_key("ops@example.com")
        );
    }

    #[test]
    fn test_kind_deserializes_from_short_names() {
        let api: ApiConfig = serde_json::from_value(serde_json::json!({
            "name": "fmdata",
            "path": "/api/v2/fmdata",
            "kind": "FM",
            "interval_minutes": 5
        }))
        .unwrap();
        assert_eq!(api.kind, ApiKind::Fault);
        assert_eq!(api.sub_type_label(), "default");
        assert!(!api.is_radio());
    }
}
