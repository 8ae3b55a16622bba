use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Authentication error: {0}")]
    AuthError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::ServiceUnavailable
        } else {
            AppError::BadGateway(err.to_string())
        }
    }
}

impl AppError {
    /// Process exit code used by service binaries when bootstrap fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ConfigError(_) | AppError::ValidationError(_) => 78,
            AppError::AuthError(_) => 77,
            AppError::ServiceUnavailable | AppError::BadGateway(_) => 69,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_map_to_config_exit_code() {
        let err: AppError = config::ConfigError::NotFound("base_url".to_string()).into();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn test_auth_errors_map_to_permission_exit_code() {
        let err = AppError::AuthError(anyhow::anyhow!("login rejected"));
        assert_eq!(err.exit_code(), 77);
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: AppError = std::io::Error::other("disk full").into();
        assert!(matches!(err, AppError::InternalError(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
