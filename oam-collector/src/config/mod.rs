use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::config::{self as core_config, load_json_file};
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::models::{ApiConfig, AuthMode, OrgAccount, SessionToken, User};
use crate::services::jwt::access_token_expiry;
use crate::services::session::SessionBackoff;

/// Environment variable naming the collector config file.
pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "collector.json";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CollectorConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[validate(url)]
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthPaths,
    #[validate(length(min = 1), nested)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub metric_apis: Vec<ApiConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub sim_apis: Vec<ApiConfig>,
    #[validate(nested)]
    pub network_apis: NetworkApis,
    #[serde(default = "default_max_concurrent_process")]
    #[validate(range(min = 1))]
    pub max_concurrent_process: usize,
    #[serde(default)]
    pub pretty_print: bool,
    #[serde(default = "default_response_dir")]
    pub response_dir: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_token_dir")]
    pub token_dir: PathBuf,
    /// Empty means every slice is collected.
    #[serde(default)]
    pub allowed_slice_ids: HashSet<String>,
    #[serde(default = "default_start_delay_minutes")]
    pub start_delay_minutes: u32,
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    #[validate(range(min = 1))]
    pub page_limit: u32,
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,
    #[serde(default)]
    pub http_retry: HttpRetryConfig,
    #[serde(default)]
    #[validate(nested)]
    pub session_backoff: SessionBackoffConfig,
    /// Optional YAML file enabling alarm notifications.
    #[serde(default)]
    pub alarm_notifier_config: Option<PathBuf>,
    /// Port of the health and metrics listener; defaults to `port`.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Authentication endpoints, relative to `base_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPaths {
    pub login: String,
    pub refresh: String,
    pub federated_refresh: String,
    pub logout: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login: "/api/v1/auth/login".to_string(),
            refresh: "/api/v1/auth/refresh".to_string(),
            federated_refresh: "/api/v1/auth/federated/refresh".to_string(),
            logout: "/api/v1/auth/logout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UserConfig {
    #[validate(email)]
    pub email: String,
    /// Base64 encoded.
    #[serde(skip_serializing)]
    pub password: SecretString,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    /// Federated token pair used when nothing has been persisted yet.
    #[serde(default, skip_serializing)]
    pub token: Option<SeedToken>,
    #[serde(default)]
    pub org_accounts: Vec<OrgAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedToken {
    pub access_token: String,
    pub refresh_token: String,
}

impl UserConfig {
    pub fn decode_password(&self) -> Result<SecretString, AppError> {
        let bytes = STANDARD
            .decode(self.password.expose_secret().trim())
            .map_err(|e| config_error(format!("password of {} is not base64: {}", self.email, e)))?;
        let password = String::from_utf8(bytes)
            .map_err(|_| config_error(format!("password of {} is not UTF-8", self.email)))?;
        Ok(SecretString::new(password))
    }

    pub fn to_user(&self) -> Result<User, AppError> {
        Ok(User::new(
            self.email.clone(),
            self.auth_mode,
            self.decode_password()?,
            self.org_accounts.clone(),
        ))
    }

    /// Seed token with its expiry read from the access token.
    pub fn seed_token(&self) -> Result<Option<SessionToken>, AppError> {
        let Some(seed) = &self.token else {
            return Ok(None);
        };
        let expires_at = access_token_expiry(&seed.access_token)
            .map_err(|e| config_error(format!("seed token of {}: {}", self.email, e)))?;
        Ok(Some(SessionToken {
            access_token: seed.access_token.clone(),
            refresh_token: seed.refresh_token.clone(),
            expires_at,
        }))
    }
}

/// Group listing endpoints and how often membership is refreshed.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NetworkApis {
    /// NHG listing for RBAC users.
    pub nhg_list_path: String,
    /// Generic network group listing for ADTOKEN users, queried per org/account.
    pub network_group_path: String,
    #[serde(default = "default_group_interval_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpRetryConfig {
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_http_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_http_max_retries(),
            initial_backoff_ms: default_http_initial_backoff_ms(),
            max_backoff_ms: default_http_max_backoff_ms(),
        }
    }
}

impl From<&HttpRetryConfig> for RetryConfig {
    fn from(config: &HttpRetryConfig) -> Self {
        RetryConfig {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionBackoffConfig {
    #[serde(default = "default_backoff_initial_secs")]
    #[validate(range(min = 1))]
    pub initial_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    #[validate(range(min = 1))]
    pub max_secs: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for SessionBackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial_secs(),
            max_secs: default_backoff_max_secs(),
            max_attempts: None,
        }
    }
}

impl From<&SessionBackoffConfig> for SessionBackoff {
    fn from(config: &SessionBackoffConfig) -> Self {
        SessionBackoff {
            initial: Duration::from_secs(config.initial_secs),
            max: Duration::from_secs(config.max_secs.max(config.initial_secs)),
            max_attempts: config.max_attempts,
        }
    }
}

impl CollectorConfig {
    /// Load from the given path, else `APP_CONFIG_FILE`, else `collector.json`.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let path = config_path(path, std::env::var(CONFIG_FILE_ENV).ok());

        let config: CollectorConfig = load_json_file(&path)?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;

        let mut seen = HashSet::new();
        for user in &self.users {
            if !seen.insert(user.email.as_str()) {
                return Err(config_error(format!("duplicate user {}", user.email)));
            }
            if user.auth_mode == AuthMode::AdToken && user.org_accounts.is_empty() {
                return Err(config_error(format!(
                    "ADTOKEN user {} needs at least one org_accounts entry",
                    user.email
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn config_path(cli: Option<&str>, env: Option<String>) -> String {
    cli.map(str::to_string)
        .or(env)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string())
}

fn config_error(message: String) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message))
}

fn default_service_name() -> String {
    "oam-collector".to_string()
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Rbac
}

fn default_max_concurrent_process() -> usize {
    10
}

fn default_response_dir() -> PathBuf {
    PathBuf::from("data/responses")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/checkpoints")
}

fn default_token_dir() -> PathBuf {
    PathBuf::from("data/tokens")
}

fn default_start_delay_minutes() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_page_limit() -> u32 {
    1000
}

fn default_page_retries() -> u32 {
    3
}

fn default_http_max_retries() -> u32 {
    3
}

fn default_http_initial_backoff_ms() -> u64 {
    500
}

fn default_http_max_backoff_ms() -> u64 {
    10_000
}

fn default_backoff_initial_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_group_interval_minutes() -> u32 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"{
        "base_url": "https://oam.example.com",
        "users": [
            {"email": "ops@example.com", "password": "c2VjcmV0"},
            {"email": "fed@example.com", "password": "eA==", "auth_mode": "ABAC",
             "org_accounts": [{"org_uuid": "o1", "account_uuid": "a1"}]}
        ],
        "metric_apis": [
            {"name": "pmdata", "path": "/api/v2/nhg/{nhg_id}/pmdata", "kind": "PM",
             "sub_type": "HISTORY", "metric_type": "RADIO", "interval_minutes": 15,
             "sync_duration_minutes": 60}
        ],
        "network_apis": {"nhg_list_path": "/api/v1/nhgs", "network_group_path": "/api/v1/groups"}
    }"#;

    #[test]
    fn test_loads_with_defaults() {
        let file = write_config(MINIMAL);
        let config = CollectorConfig::load(file.path().to_str()).unwrap();

        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[1].auth_mode, AuthMode::AdToken);
        assert_eq!(config.max_concurrent_process, 10);
        assert_eq!(config.page_retries, 3);
        assert_eq!(config.network_apis.interval_minutes, 60);
        assert_eq!(config.auth.login, "/api/v1/auth/login");
        assert!(config.alarm_notifier_config.is_none());
    }

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(config_path(Some("cli.json"), Some("env.json".into())), "cli.json");
        assert_eq!(config_path(None, Some("env.json".into())), "env.json");
        assert_eq!(config_path(None, None), DEFAULT_CONFIG_FILE);
    }

    #[test]
    fn test_explicit_path_wins_over_environment() {
        let file = write_config(MINIMAL);
        std::env::set_var(CONFIG_FILE_ENV, "/nonexistent/collector.json");
        let loaded = CollectorConfig::load(file.path().to_str());
        std::env::remove_var(CONFIG_FILE_ENV);

        assert_eq!(loaded.unwrap().users.len(), 2);
    }

    #[test]
    fn test_password_is_base64_decoded() {
        let file = write_config(MINIMAL);
        let config = CollectorConfig::load(file.path().to_str()).unwrap();
        let user = config.users[0].to_user().unwrap();
        assert_eq!(user.password().expose_secret(), "secret");
    }

    #[test]
    fn test_rejects_non_base64_password() {
        let user = UserConfig {
            email: "ops@example.com".into(),
            password: SecretString::new("not base64!".into()),
            auth_mode: AuthMode::Rbac,
            token: None,
            org_accounts: vec![],
        };
        assert!(matches!(user.decode_password(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let body = MINIMAL.replacen('{', r#"{"max_concurrent_process": 0,"#, 1);
        let file = write_config(&body);
        assert!(matches!(
            CollectorConfig::load(file.path().to_str()),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_federated_user_needs_org_account() {
        let body = MINIMAL.replace(
            r#""org_accounts": [{"org_uuid": "o1", "account_uuid": "a1"}]"#,
            r#""org_accounts": []"#,
        );
        let file = write_config(&body);
        assert!(matches!(
            CollectorConfig::load(file.path().to_str()),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_session_backoff_conversion() {
        let backoff = SessionBackoff::from(&SessionBackoffConfig {
            initial_secs: 10,
            max_secs: 5,
            max_attempts: Some(4),
        });
        assert_eq!(backoff.initial, Duration::from_secs(10));
        assert_eq!(backoff.max, Duration::from_secs(10));
        assert_eq!(backoff.max_attempts, Some(4));
    }
}
