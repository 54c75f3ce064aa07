use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct MiniboxClientConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl MiniboxClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct MiniboxApiClient {
    base_url: String,
    access_token: Option<String>,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum MiniboxClientError {
    #[error("minibox_client_base_url_missing")]
    BaseUrlMissing,
    #[error("minibox_client_invalid_path")]
    InvalidPath,
    #[error("minibox_request_failed:{message}")]
    Request { message: String },
    #[error("minibox_read_failed:{message}")]
    Read { message: String },
    #[error("minibox_json_decode_failed:{message}")]
    Decode { message: String },
}

/// Platform response wrapper. `code == 0` is success; every other code is an
/// application-level failure with `info` describing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl<T> ApiEnvelope<T> {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// The payload, but only when the envelope reports success.
    #[must_use]
    pub fn ok_data(self) -> Option<T> {
        if self.code == 0 { self.data } else { None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub sandbox_status: String,
    #[serde(default)]
    pub sandbox_id: String,
    #[serde(default)]
    pub startup_info: Option<StartupInfo>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default, rename = "type")]
    pub project_type: String,
    // Entries in the shared "other" partition may arrive stripped down to an
    // id plus these two markers.
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, rename = "disabledReason")]
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupInfo {
    #[serde(default)]
    pub preview_url: String,
    #[serde(default)]
    pub web_preview_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectPage {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MyMiniapps {
    #[serde(default)]
    pub owner: Vec<Project>,
    #[serde(default)]
    pub other: Vec<Project>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct ProjectRenameRequest {
    pub name: String,
}

impl MiniboxApiClient {
    pub fn new(config: MiniboxClientConfig) -> Result<Self, MiniboxClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            access_token: config.access_token,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn project_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}", project_id.trim())
    }

    #[must_use]
    pub fn project_start_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}/start", project_id.trim())
    }

    #[must_use]
    pub fn project_stop_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}/stop", project_id.trim())
    }

    #[must_use]
    pub fn project_rename_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}/rename", project_id.trim())
    }

    #[must_use]
    pub fn project_delete_path(project_id: &str) -> String {
        format!("/api/v1/projects/{}/delete", project_id.trim())
    }

    #[must_use]
    pub fn projects_path(page: u64, limit: u64) -> String {
        format!("/api/v1/projects?page={page}&limit={limit}")
    }

    #[must_use]
    pub fn my_miniapps_path(limit: u64, offset: u64) -> String {
        format!("/api/v1/me/miniapps?limit={limit}&offset={offset}")
    }

    pub async fn get_project(
        &self,
        project_id: &str,
    ) -> Result<ApiEnvelope<Project>, MiniboxClientError> {
        self.get_envelope(Self::project_path(project_id).as_str())
            .await
    }

    pub async fn start_project(
        &self,
        project_id: &str,
    ) -> Result<ApiEnvelope<serde_json::Value>, MiniboxClientError> {
        self.post_envelope(Self::project_start_path(project_id).as_str())
            .await
    }

    pub async fn stop_project(
        &self,
        project_id: &str,
    ) -> Result<ApiEnvelope<serde_json::Value>, MiniboxClientError> {
        self.post_envelope(Self::project_stop_path(project_id).as_str())
            .await
    }

    pub async fn list_projects(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<ApiEnvelope<ProjectPage>, MiniboxClientError> {
        self.get_envelope(Self::projects_path(page, limit).as_str())
            .await
    }

    pub async fn my_miniapps(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<ApiEnvelope<MyMiniapps>, MiniboxClientError> {
        self.get_envelope(Self::my_miniapps_path(limit, offset).as_str())
            .await
    }

    pub async fn rename_project(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<ApiEnvelope<Project>, MiniboxClientError> {
        let request = ProjectRenameRequest {
            name: name.to_string(),
        };
        self.post_json_envelope(Self::project_rename_path(project_id).as_str(), &request)
            .await
    }

    pub async fn delete_project(
        &self,
        project_id: &str,
    ) -> Result<ApiEnvelope<serde_json::Value>, MiniboxClientError> {
        self.post_envelope(Self::project_delete_path(project_id).as_str())
            .await
    }

    pub async fn get_envelope<T>(&self, path: &str) -> Result<ApiEnvelope<T>, MiniboxClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send_request(Method::GET, path, None::<&()>).await?;
        decode_envelope(response).await
    }

    pub async fn post_envelope<T>(&self, path: &str) -> Result<ApiEnvelope<T>, MiniboxClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.send_request(Method::POST, path, None::<&()>).await?;
        decode_envelope(response).await
    }

    pub async fn post_json_envelope<Req, T>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<ApiEnvelope<T>, MiniboxClientError>
    where
        Req: Serialize + ?Sized,
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self
            .send_request(Method::POST, path, Some(payload))
            .await?;
        decode_envelope(response).await
    }

    async fn send_request<Req>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Req>,
    ) -> Result<reqwest::Response, MiniboxClientError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(MiniboxClientError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            if let Some(token) = self.access_token.as_deref() {
                request = request.bearer_auth(token);
            }
            if let Some(payload) = payload {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(MiniboxClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Fold a non-2xx HTTP response into the envelope shape: the HTTP status
/// becomes the envelope code, and the body's `info`/`data` are kept when the
/// body still parses as an envelope. The ownership signal (401/403 on start)
/// reaches callers through this fold.
#[must_use]
pub fn fold_http_status<T>(status: StatusCode, body: &[u8]) -> ApiEnvelope<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let code = i64::from(status.as_u16());
    match serde_json::from_slice::<ApiEnvelope<T>>(body) {
        Ok(envelope) => ApiEnvelope {
            code,
            data: envelope.data,
            info: envelope
                .info
                .or_else(|| status.canonical_reason().map(str::to_string)),
        },
        Err(_) => ApiEnvelope {
            code,
            data: None,
            info: status
                .canonical_reason()
                .map(str::to_string)
                .or_else(|| non_empty_string(String::from_utf8_lossy(body).to_string()))
                .or_else(|| Some(format!("http_{}", status.as_u16()))),
        },
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, MiniboxClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(MiniboxClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_envelope<T>(response: reqwest::Response) -> Result<ApiEnvelope<T>, MiniboxClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| MiniboxClientError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Ok(fold_http_status(status, &bytes));
    }

    serde_json::from_slice::<ApiEnvelope<T>>(&bytes).map_err(|error| MiniboxClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
