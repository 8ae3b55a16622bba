use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use super::error::AuthError;
use crate::models::SessionToken;
use crate::utils::{path_component, write_atomic};

/// Durable storage for federated tokens, which must survive restarts.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, email: &str) -> Result<Option<SessionToken>, AuthError>;
    async fn save(&self, email: &str, token: &SessionToken) -> Result<(), AuthError>;
}

/// One JSON file per user under a directory: `<dir>/<email>.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{}.json", path_component(email)))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, email: &str) -> Result<Option<SessionToken>, AuthError> {
        let path = self.path(email);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Store(format!("{}: {}", path.display(), e))),
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))
    }

    async fn save(&self, email: &str, token: &SessionToken) -> Result<(), AuthError> {
        let path = self.path(email);
        let contents = serde_json::to_vec_pretty(token)
            .map_err(|e| AuthError::Store(e.to_string()))?;

        write_atomic(&path, &contents)
            .await
            .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;

        debug!(user = %email, path = %path.display(), "Persisted session token");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::token_expiring_in;

    #[tokio::test]
    async fn test_missing_token_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(store.load("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        let token = token_expiring_in(600);

        store.save("fed@example.com", &token).await.unwrap();
        assert!(dir.path().join("fed@example.com.json").exists());
        assert_eq!(store.load("fed@example.com").await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fed@example.com.json"), b"{oops").unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(matches!(
            store.load("fed@example.com").await,
            Err(AuthError::Store(_))
        ));
    }
}
