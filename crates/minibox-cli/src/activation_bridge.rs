//! Adapters that plug the HTTP client into the activation seams.

use async_trait::async_trait;
use minibox_activation::{
    ActivationBackend, BackendError, ProjectSnapshot, RetryCoordinator, RetryReason, StartReceipt,
    StatusReply,
};
use minibox_api_client::{MiniboxApiClient, Project};
use tokio::io::{AsyncBufReadExt, BufReader};

/// [`ActivationBackend`] over the Minibox platform API. Envelope codes
/// pass through untouched; only transport errors become [`BackendError`].
pub struct ClientBackend {
    client: MiniboxApiClient,
}

impl ClientBackend {
    #[must_use]
    pub fn new(client: MiniboxApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActivationBackend for ClientBackend {
    async fn start_activation(&self, project_id: &str) -> Result<StartReceipt, BackendError> {
        let envelope = self
            .client
            .start_project(project_id)
            .await
            .map_err(|error| BackendError::new(error.to_string()))?;
        Ok(StartReceipt {
            code: envelope.code,
            info: envelope.info,
        })
    }

    async fn fetch_status(&self, project_id: &str) -> Result<StatusReply, BackendError> {
        let envelope = self
            .client
            .get_project(project_id)
            .await
            .map_err(|error| BackendError::new(error.to_string()))?;
        Ok(StatusReply {
            code: envelope.code,
            snapshot: envelope.data.map(|project| snapshot_from_project(&project)),
        })
    }
}

/// Narrow a full project record to the fields the activation flow reads.
#[must_use]
pub fn snapshot_from_project(project: &Project) -> ProjectSnapshot {
    let snapshot = ProjectSnapshot::new(
        project.project_id.clone(),
        project.status.clone(),
        project.sandbox_status.clone(),
    );
    match preview_url(project) {
        Some(url) => snapshot.with_preview_url(url),
        None => snapshot,
    }
}

/// Browser-facing preview locator, falling back to the sandbox-internal
/// one when the public URL is absent.
#[must_use]
pub fn preview_url(project: &Project) -> Option<String> {
    let startup = project.startup_info.as_ref()?;
    if !startup.web_preview_url.is_empty() {
        return Some(startup.web_preview_url.clone());
    }
    if !startup.preview_url.is_empty() {
        return Some(startup.preview_url.clone());
    }
    None
}

/// Asks the interactive user whether a spent attempt should run again.
/// In non-interactive mode every question is answered with no; the
/// controller never retries without an explicit yes.
pub struct StdinRetryCoordinator {
    assume_no: bool,
}

impl StdinRetryCoordinator {
    #[must_use]
    pub fn new(assume_no: bool) -> Self {
        Self { assume_no }
    }
}

#[async_trait]
impl RetryCoordinator for StdinRetryCoordinator {
    async fn confirm_retry(&self, reason: RetryReason) -> bool {
        if self.assume_no {
            tracing::info!(reason = reason.as_str(), "retry declined (non-interactive)");
            return false;
        }
        eprint!(
            "\nSandbox activation {}. Try again? [y/N] ",
            match reason {
                RetryReason::ActivationFailed => "failed",
                RetryReason::TimedOut => "timed out",
            }
        );
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) => false,
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(error) => {
                tracing::warn!(error = %error, "could not read retry answer; declining");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_from_json(payload: serde_json::Value) -> Project {
        serde_json::from_value(payload).expect("parse project")
    }

    #[test]
    fn snapshot_keeps_both_status_fields_and_the_web_preview() {
        let project = project_from_json(serde_json::json!({
            "project_id": "proj_1",
            "name": "calorie counter",
            "status": "ACTIVE",
            "sandbox_status": "BUILDING",
            "startup_info": {
                "preview_url": "http://10.0.0.5:3000",
                "web_preview_url": "https://proj-1.preview.minibox.dev"
            }
        }));
        let snapshot = snapshot_from_project(&project);
        assert_eq!(snapshot.project_id, "proj_1");
        assert_eq!(snapshot.lifecycle_status, "ACTIVE");
        assert_eq!(snapshot.sandbox_status, "BUILDING");
        assert_eq!(
            snapshot.preview_url.as_deref(),
            Some("https://proj-1.preview.minibox.dev")
        );
    }

    #[test]
    fn snapshot_falls_back_to_internal_preview_url() {
        let project = project_from_json(serde_json::json!({
            "project_id": "proj_2",
            "startup_info": { "preview_url": "http://10.0.0.5:3000" }
        }));
        assert_eq!(
            snapshot_from_project(&project).preview_url.as_deref(),
            Some("http://10.0.0.5:3000")
        );
    }

    #[test]
    fn snapshot_survives_missing_startup_info() {
        let project = project_from_json(serde_json::json!({
            "project_id": "proj_3",
            "status": "KILLED",
            "sandbox_status": "KILLED"
        }));
        let snapshot = snapshot_from_project(&project);
        assert_eq!(snapshot.preview_url, None);
        assert_eq!(snapshot.lifecycle_status, "KILLED");
    }
}
