//! Wire schemas of the remote OAM REST API.
//!
//! Envelopes are decoded strictly. Records inside `data` stay as raw JSON for
//! the output files and are decoded into the per-family schemas below one at
//! a time, so one malformed record never fails a batch.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const STATUS_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiStatus {
    pub status_code: String,
    #[serde(default)]
    pub status_description: Option<String>,
}

impl ApiStatus {
    pub fn is_success(&self) -> bool {
        self.status_code.eq_ignore_ascii_case(STATUS_SUCCESS)
    }
}

/// Envelope of every GET endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub status: ApiStatus,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<Value>,
    #[serde(default)]
    pub num_of_records: u64,
    #[serde(default)]
    pub total_num_records: u64,
    /// Index of the next page; zero when exhausted.
    #[serde(default)]
    pub next_record: u64,
    #[serde(default)]
    pub search_after_key: Option<Value>,
}

impl ApiEnvelope {
    pub fn empty() -> Self {
        Self {
            status: ApiStatus {
                status_code: STATUS_SUCCESS.to_string(),
                status_description: Some("no records".to_string()),
            },
            data: Vec::new(),
            num_of_records: 0,
            total_num_records: 0,
            next_record: 0,
            search_after_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshToken {
    pub refresh_token: String,
}

/// Envelope of login, refresh and logout calls.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthEnvelope {
    pub status: ApiStatus,
    #[serde(default)]
    pub uat: Option<AccessToken>,
    #[serde(default)]
    pub rt: Option<RefreshToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FederatedToken {
    pub access_token: String,
    pub refresh_token: String,
}

/// Envelope of the federated token refresh call.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedTokenEnvelope {
    pub status: ApiStatus,
    #[serde(default)]
    pub token: Option<FederatedToken>,
}

/// Fault-management record.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FmRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alarm_identifier: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub specific_problem: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dn: Option<String>,
    #[serde(default, alias = "hw_alias", deserialize_with = "lenient_string")]
    pub hw_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nhg_id: Option<String>,
    #[serde(default, alias = "edge_id", deserialize_with = "lenient_string")]
    pub edge_name: Option<String>,
    #[serde(default, alias = "perceived_severity", deserialize_with = "lenient_string")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alarm_text: Option<String>,
    /// Semicolon-delimited free text, e.g. `FaultId:1907;Unit:RMOD_1`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub additional_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alarm_state: Option<String>,
}

impl FmRecord {
    pub fn is_cleared(&self) -> bool {
        let cleared = |v: &Option<String>| {
            v.as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("cleared"))
        };
        cleared(&self.severity) || cleared(&self.alarm_state)
    }

    /// Fault id carried in the additional text, if any.
    pub fn fault_id(&self) -> Option<&str> {
        self.additional_text.as_deref()?.split(';').find_map(|token| {
            let (key, value) = token.split_once(':').or_else(|| token.split_once('='))?;
            key.trim()
                .eq_ignore_ascii_case("faultid")
                .then(|| value.trim())
                .filter(|v| !v.is_empty())
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmDataSource {
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
}

/// Performance-management record; only the fields the collector reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PmRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_time: Option<String>,
    #[serde(default)]
    pub pm_data_source: Option<PmDataSource>,
}

impl PmRecord {
    /// RADIO records carry their time in `pm_data_source.timestamp`.
    pub fn event_time(&self, radio: bool) -> Option<&str> {
        if radio {
            self.pm_data_source.as_ref()?.timestamp.as_deref()
        } else {
            self.event_time.as_deref()
        }
    }
}

/// Entry of the NHG listing and of the federated generic-network-group listing.
#[derive(Debug, Clone, Deserialize)]
pub struct NhgRecord {
    #[serde(alias = "id", deserialize_with = "required_string")]
    pub nhg_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slice_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub hw_ids: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts strings and numbers; ids arrive as either depending on the endpoint.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Optional id list: null is empty, numeric ids are stringified and entries
/// of any other shape are dropped.
fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s],
        Some(Value::Number(n)) => vec![n.to_string()],
        _ => Vec::new(),
    };
    Ok(ids)
}

fn required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing value"))
}
