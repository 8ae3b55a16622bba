#![allow(dead_code)]

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use oam_collector::config::AuthPaths;
use oam_collector::models::{ApiConfig, ApiKind, AuthMode, GroupMembership, OrgAccount, User};
use oam_collector::services::{
    AlarmNotifier, CheckpointStore, FileTokenStore, OamClient, ResponseWriter, SessionBackoff,
    SessionManager,
};
use oam_collector::workers::{FetchOrchestrator, FetchSettings};
use secrecy::SecretString;
use serde_json::{json, Value};
use service_core::retry::RetryConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const RBAC_USER: &str = "ops@example.com";
pub const FED_USER: &str = "fed@example.com";
pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const FEDERATED_REFRESH_PATH: &str = "/api/v1/auth/federated/refresh";

/// A JWT whose `exp` is `seconds` from now.
pub fn jwt(seconds: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": "collector-test", "exp": Utc::now().timestamp() + seconds }),
        &EncodingKey::from_secret(b"integration"),
    )
    .expect("Failed to mint test token")
}

pub fn success() -> Value {
    json!({ "status_code": "SUCCESS", "status_description": "ok" })
}

/// One page of a GET endpoint.
pub fn page(data: Vec<Value>, next_record: u64, total: u64) -> Value {
    let received = data.len();
    json!({
        "status": success(),
        "data": data,
        "num_of_records": received,
        "total_num_records": total,
        "next_record": next_record,
    })
}

pub fn auth_response(access_token: &str, refresh_token: &str) -> Value {
    json!({
        "status": success(),
        "uat": { "access_token": access_token },
        "rt": { "refresh_token": refresh_token },
    })
}

pub async fn mount_login(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_response(access_token, "refresh-1")))
        .mount(server)
        .await;
}

pub fn client(server: &MockServer) -> OamClient {
    OamClient::new(
        OamClient::build_http_client(Duration::from_secs(5)).expect("Failed to build HTTP client"),
        &server.uri(),
        AuthPaths::default(),
        RetryConfig::quick(),
    )
}

pub fn rbac_user() -> Arc<User> {
    Arc::new(User::new(
        RBAC_USER,
        AuthMode::Rbac,
        SecretString::new("secret".into()),
        vec![],
    ))
}

pub fn federated_user() -> Arc<User> {
    Arc::new(User::new(
        FED_USER,
        AuthMode::AdToken,
        SecretString::new(String::new()),
        vec![OrgAccount {
            org_uuid: "org-1".into(),
            account_uuid: "acc-1".into(),
        }],
    ))
}

pub fn sessions(client: &OamClient, token_dir: &Path) -> SessionManager {
    SessionManager::new(
        Arc::new(client.clone()),
        Arc::new(FileTokenStore::new(token_dir)),
        SessionBackoff {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(200),
            max_attempts: Some(3),
        },
    )
}

/// RBAC user logged in against the mock server, member of `groups`.
pub async fn logged_in_user(server: &MockServer, dir: &Path, groups: &[&str]) -> Arc<User> {
    mount_login(server, &jwt(3600)).await;
    let user = rbac_user();
    sessions(&client(server), dir)
        .login(&user)
        .await
        .expect("Login against mock server failed");

    user.replace_groups(GroupMembership {
        nhg_ids: groups.iter().map(|g| g.to_string()).collect(),
        ..GroupMembership::default()
    })
    .await;
    user
}

pub fn api(kind: ApiKind, name: &str, path: &str, metric_type: Option<&str>) -> Arc<ApiConfig> {
    Arc::new(ApiConfig {
        name: name.to_string(),
        path: path.to_string(),
        kind,
        sub_type: Some("HISTORY".to_string()),
        metric_type: metric_type.map(str::to_string),
        interval_minutes: 15,
        sync_duration_minutes: None,
        aggregation: None,
    })
}

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.dir.path().join("checkpoints"), 0)
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.dir.path().join("responses")
    }

    pub fn orchestrator(&self, client: OamClient, notifier: AlarmNotifier) -> FetchOrchestrator {
        FetchOrchestrator::new(
            client,
            self.checkpoints(),
            ResponseWriter::new(self.responses_dir(), false),
            Arc::new(notifier),
            FetchSettings {
                max_concurrent_process: 4,
                page_limit: 100,
                page_retries: 1,
                allowed_slice_ids: Arc::new(HashSet::new()),
            },
        )
    }

    /// Every response file written so far.
    pub fn response_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }

        let mut files = Vec::new();
        walk(&self.responses_dir(), &mut files);
        files.sort();
        files
    }
}
