//! Status classification for sandbox-backed projects.
//!
//! The platform reports two independent status strings per project: the
//! project lifecycle status and the sandbox runtime status. Neither alone
//! says whether the preview is usable, so every decision in the activation
//! flow goes through [`classify_status`] rather than reading either field
//! directly.

use serde::{Deserialize, Serialize};

/// Point-in-time view of the project fields the activation flow reads.
///
/// This is deliberately narrower than the platform's full project record:
/// the controller only ever needs the two status strings plus the preview
/// locator it hands back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project_id: String,
    /// Project lifecycle status as reported by the platform, e.g. `ACTIVE`
    /// or `BUILDING`. Compared verbatim; casing matters.
    pub lifecycle_status: String,
    /// Sandbox runtime status, same vocabulary as `lifecycle_status`.
    pub sandbox_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

impl ProjectSnapshot {
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        lifecycle_status: impl Into<String>,
        sandbox_status: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            lifecycle_status: lifecycle_status.into(),
            sandbox_status: sandbox_status.into(),
            preview_url: None,
        }
    }

    #[must_use]
    pub fn with_preview_url(mut self, preview_url: impl Into<String>) -> Self {
        self.preview_url = Some(preview_url.into());
        self
    }
}

/// Three-way verdict over a [`ProjectSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Sandbox is up and the preview is usable.
    Completed,
    /// Provisioning is underway; poll again later.
    Building,
    /// Anything else, including states like `CREATING` that merely precede
    /// a build. Treated as restartable.
    Failed,
}

impl StatusClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Building => "building",
            Self::Failed => "failed",
        }
    }
}

/// Classify a snapshot. `Completed` requires both fields to read `ACTIVE`;
/// `BUILDING` in either field keeps the attempt alive; everything else is
/// `Failed`. Matching is exact and case-sensitive.
#[must_use]
pub fn classify_status(snapshot: &ProjectSnapshot) -> StatusClass {
    if snapshot.lifecycle_status == "ACTIVE" && snapshot.sandbox_status == "ACTIVE" {
        StatusClass::Completed
    } else if snapshot.lifecycle_status == "BUILDING" || snapshot.sandbox_status == "BUILDING" {
        StatusClass::Building
    } else {
        StatusClass::Failed
    }
}
