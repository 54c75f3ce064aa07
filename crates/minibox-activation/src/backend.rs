//! Transport seam between the activation controller and the platform API.
//!
//! The controller never talks HTTP itself. It consumes two remote
//! operations through [`ActivationBackend`], with application-level
//! rejections carried as envelope codes inside the replies and only
//! transport-level failures surfacing as [`BackendError`]. Tests drive the
//! controller with scripted implementations of this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::status::ProjectSnapshot;

/// Transport-level failure from a backend call: the request never produced
/// a platform reply at all (connection refused, DNS, client bug).
#[derive(Debug, Clone, Error)]
#[error("activation_backend_unreachable:{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Platform reply to an activation (start) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    /// Envelope code. `0` means the platform accepted the request; HTTP
    /// failures are folded into this field by the transport (`401`, `403`,
    /// `500`, ...).
    pub code: i64,
    pub info: Option<String>,
}

impl StartReceipt {
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.code == 0
    }
}

/// Platform reply to a status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    /// Envelope code, same folding as [`StartReceipt::code`].
    pub code: i64,
    pub snapshot: Option<ProjectSnapshot>,
}

impl StatusReply {
    /// The snapshot, if the reply is both successful and populated. A
    /// non-zero code or missing body yields `None` and the poll is skipped.
    #[must_use]
    pub fn into_snapshot(self) -> Option<ProjectSnapshot> {
        if self.code == 0 { self.snapshot } else { None }
    }
}

/// The two remote operations the activation flow needs.
#[async_trait]
pub trait ActivationBackend: Send + Sync {
    /// Ask the platform to start the project's sandbox.
    async fn start_activation(&self, project_id: &str) -> Result<StartReceipt, BackendError>;

    /// Fetch the current project status for classification.
    async fn fetch_status(&self, project_id: &str) -> Result<StatusReply, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_accepts_only_code_zero() {
        assert!(
            StartReceipt {
                code: 0,
                info: None
            }
            .accepted()
        );
        assert!(
            !StartReceipt {
                code: 403,
                info: Some("forbidden".to_string())
            }
            .accepted()
        );
    }

    #[test]
    fn status_reply_withholds_snapshot_on_failure_code() {
        let snapshot = ProjectSnapshot::new("proj_1", "ACTIVE", "ACTIVE");
        let ok = StatusReply {
            code: 0,
            snapshot: Some(snapshot.clone()),
        };
        assert_eq!(ok.into_snapshot(), Some(snapshot.clone()));

        let rejected = StatusReply {
            code: 500,
            snapshot: Some(snapshot),
        };
        assert_eq!(rejected.into_snapshot(), None);
    }

    #[test]
    fn backend_error_displays_as_code_string() {
        let error = BackendError::new("connect timed out");
        assert_eq!(
            error.to_string(),
            "activation_backend_unreachable:connect timed out"
        );
    }
}
