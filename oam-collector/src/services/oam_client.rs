//! Client for the remote OAM REST API.
//!
//! Builds requests, applies the session's bearer token, decodes the typed
//! envelopes and classifies HTTP status codes. Pagination is driven here as
//! well; per-group orchestration lives in `workers::orchestrator`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use service_core::retry::{retry_http_call, RetryConfig};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::error::{ApiError, AuthError};
use super::jwt::access_token_expiry;
use super::session::AuthApi;
use crate::config::AuthPaths;
use crate::models::{
    ApiEnvelope, AuthEnvelope, FederatedTokenEnvelope, SessionToken, User,
};

/// Longest response body kept in error values and logs.
const MAX_ERROR_BODY: usize = 512;

/// One logical GET request; page parameters are added per call.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn param_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    fn page(&self, index: u64, search_after_key: Option<&Value>) -> Self {
        let mut page = self.clone().param("index", index);
        if let Some(key) = search_after_key {
            let key = match key {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            page = page.param("search_after_key", key);
        }
        page
    }
}

/// All pages of one window, concatenated.
#[derive(Debug, Clone, Default)]
pub struct PagedResponse {
    pub records: Vec<Value>,
    pub total_num_records: u64,
    pub received: u64,
    pub pages: u32,
}

#[derive(Clone)]
pub struct OamClient {
    http: Client,
    base_url: String,
    auth_paths: AuthPaths,
    retry: RetryConfig,
}

impl OamClient {
    pub fn new(http: Client, base_url: &str, auth_paths: AuthPaths, retry: RetryConfig) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_paths,
            retry,
        }
    }

    /// Shared HTTP client: fixed timeout, gzip responses.
    pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("oam-collector/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// One GET with the user's token. 5xx responses are retried up to the
    /// configured ceiling.
    pub async fn call_api(&self, user: &User, request: &ApiRequest) -> Result<ApiEnvelope, ApiError> {
        let client = self;
        let url = client.url(&request.path);
        let url = url.as_str();
        let params = request.params.as_slice();

        retry_http_call(&self.retry, &request.path, move || async move {
            let token = user
                .session
                .bearer()
                .await
                .ok_or_else(|| ApiError::SessionUnavailable(user.email.clone()))?;
            client.get_once(&token, url, params).await
        })
        .await
    }

    async fn get_once(
        &self,
        token: &str,
        url: &str,
        params: &[(String, String)],
    ) -> Result<ApiEnvelope, ApiError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        if status == StatusCode::NOT_FOUND && body.to_ascii_lowercase().contains("no record") {
            debug!(url = %url, "No records for request");
            return Ok(ApiEnvelope::empty());
        }

        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                url: url.to_string(),
                body: truncate(&body),
            });
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !envelope.status.is_success() {
            return Err(ApiError::Protocol {
                url: url.to_string(),
                code: envelope.status.status_code,
                description: envelope.status.status_description.unwrap_or_default(),
            });
        }

        Ok(envelope)
    }

    /// Follow `next_record` until exhausted. A failing page is retried up to
    /// `page_retries` times; after that the whole window is abandoned.
    #[instrument(skip(self, user, request), fields(user = %user.email, path = %request.path))]
    pub async fn fetch_all_pages(
        &self,
        user: &User,
        request: &ApiRequest,
        page_retries: u32,
    ) -> Result<PagedResponse, ApiError> {
        let mut result = PagedResponse::default();
        let mut index = 0u64;
        let mut search_after_key: Option<Value> = None;

        loop {
            let page_request = request.page(index, search_after_key.as_ref());
            let page = self.call_page(user, &page_request, page_retries).await?;

            result.received += if page.num_of_records > 0 {
                page.num_of_records
            } else {
                page.data.len() as u64
            };
            result.total_num_records = result.total_num_records.max(page.total_num_records);
            result.pages += 1;
            result.records.extend(page.data);

            if page.next_record == 0 {
                break;
            }
            if page.next_record <= index && page.search_after_key.is_none() {
                return Err(ApiError::Protocol {
                    url: self.url(&request.path),
                    code: "PAGINATION".to_string(),
                    description: format!(
                        "next_record {} does not advance past {}",
                        page.next_record, index
                    ),
                });
            }
            index = page.next_record;
            search_after_key = page.search_after_key;
        }

        if result.total_num_records > 0 && result.received < result.total_num_records {
            warn!(
                received = result.received,
                total = result.total_num_records,
                "Received fewer records than announced"
            );
        }

        Ok(result)
    }

    async fn call_page(
        &self,
        user: &User,
        request: &ApiRequest,
        page_retries: u32,
    ) -> Result<ApiEnvelope, ApiError> {
        let mut attempt = 0;
        loop {
            match self.call_api(user, request).await {
                Ok(page) => return Ok(page),
                Err(e @ ApiError::SessionUnavailable(_)) => return Err(e),
                Err(e) if attempt >= page_retries => return Err(e),
                Err(e) => {
                    warn!(
                        user = %user.email,
                        path = %request.path,
                        attempt = attempt + 1,
                        error = %e,
                        "Page request failed, retrying current page"
                    );
                    tokio::time::sleep(self.retry.backoff_duration(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_auth<T: DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> Result<T, AuthError> {
        let url = self.url(path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status { status, url });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| AuthError::Decode(format!("{}: {}", url, e)))
    }
}

fn check_status(status: &crate::models::ApiStatus) -> Result<(), AuthError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AuthError::Rejected {
            code: status.status_code.clone(),
            description: status.status_description.clone().unwrap_or_default(),
        })
    }
}

fn session_token(access_token: String, refresh_token: String) -> Result<SessionToken, AuthError> {
    let expires_at = access_token_expiry(&access_token)?;
    Ok(SessionToken {
        access_token,
        refresh_token,
        expires_at,
    })
}

fn token_from_envelope(envelope: AuthEnvelope) -> Result<SessionToken, AuthError> {
    check_status(&envelope.status)?;
    let access = envelope
        .uat
        .ok_or_else(|| AuthError::Decode("response has no uat.access_token".to_string()))?;
    let refresh = envelope
        .rt
        .ok_or_else(|| AuthError::Decode("response has no rt.refresh_token".to_string()))?;
    session_token(access.access_token, refresh.refresh_token)
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl AuthApi for OamClient {
    async fn login(&self, email: &str, password: &str) -> Result<SessionToken, AuthError> {
        let envelope: AuthEnvelope = self
            .post_auth(
                &self.auth_paths.login,
                None,
                &json!({ "email": email, "password": password }),
            )
            .await?;
        token_from_envelope(envelope)
    }

    async fn refresh(&self, token: &SessionToken) -> Result<SessionToken, AuthError> {
        let envelope: AuthEnvelope = self
            .post_auth(
                &self.auth_paths.refresh,
                Some(&token.access_token),
                &json!({ "refresh_token": token.refresh_token }),
            )
            .await?;
        token_from_envelope(envelope)
    }

    async fn refresh_federated(&self, token: &SessionToken) -> Result<SessionToken, AuthError> {
        let envelope: FederatedTokenEnvelope = self
            .post_auth(
                &self.auth_paths.federated_refresh,
                Some(&token.access_token),
                &json!({ "refresh_token": token.refresh_token }),
            )
            .await?;
        check_status(&envelope.status)?;
        let pair = envelope
            .token
            .ok_or_else(|| AuthError::Decode("response has no token object".to_string()))?;
        session_token(pair.access_token, pair.refresh_token)
    }

    async fn logout(&self, token: &SessionToken) -> Result<(), AuthError> {
        let envelope: AuthEnvelope = self
            .post_auth(
                &self.auth_paths.logout,
                Some(&token.access_token),
                &json!({ "refresh_token": token.refresh_token }),
            )
            .await?;
        check_status(&envelope.status)
    }
}
