use service_core::error::AppError;
use service_core::retry::{is_retryable_status, Retryable};
use thiserror::Error;

/// Failure of one call to the OAM REST API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
        body: String,
    },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("API status {code} from {url}: {description}")]
    Protocol {
        url: String,
        code: String,
        description: String,
    },

    #[error("session for {0} is not alive")]
    SessionUnavailable(String),
}

impl ApiError {
    /// 401/403: the token was rejected.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Status { status, .. }
                if *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
        )
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if is_retryable_status(*status))
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("failed to decode auth response: {0}")]
    Decode(String),

    #[error("authentication rejected: {code} {description}")]
    Rejected { code: String, description: String },

    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("no session token available for {0}")]
    NoToken(String),

    #[error("gave up after {0} re-authentication attempts")]
    RetriesExhausted(u32),

    #[error("token store error: {0}")]
    Store(String),

    #[error("refresh task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint at {path}: {value}")]
    Parse { path: String, value: String },
}

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("failed to read notifier config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid notifier config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("webhook call failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook returned HTTP {0}")]
    WebhookStatus(reqwest::StatusCode),
}

/// Startup failures of the collector.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CollectorError> for AppError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Config(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            CollectorError::Http(e) => AppError::from(e),
            CollectorError::Notifier(e) => AppError::ConfigError(anyhow::Error::new(e)),
            CollectorError::Auth(e) => AppError::AuthError(anyhow::Error::new(e)),
            CollectorError::Io(e) => AppError::from(e),
        }
    }
}
