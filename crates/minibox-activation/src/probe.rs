//! Ownership probing.
//!
//! The platform has no "is this project mine?" endpoint. Ownership is
//! inferred from the side effect of attempting activation: an authorization
//! rejection on the start request means the viewer is not the owner, while
//! acceptance proves ownership *and* already kicks off provisioning. Every
//! other answer fails open to the owner path so a transient fault never
//! strands the viewer on a stale preview with no retry.

use crate::backend::{ActivationBackend, StartReceipt};

/// Caller-side knowledge about project ownership before a session starts.
/// `Unknown` is the only value that triggers a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipHint {
    #[default]
    Unknown,
    Owner,
    NotOwner,
}

/// What a probing start call revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub is_owner: bool,
    /// The probe's start call was accepted, so activation is already
    /// underway and a second start request would be redundant.
    pub started: bool,
}

/// Map a start receipt to an ownership verdict. Only explicit
/// authorization codes (`401`, `403`) read as "not the owner"; acceptance
/// and every unknown code read as owner.
#[must_use]
pub fn interpret_start_receipt(receipt: &StartReceipt) -> ProbeOutcome {
    match receipt.code {
        0 => ProbeOutcome {
            is_owner: true,
            started: true,
        },
        401 | 403 => ProbeOutcome {
            is_owner: false,
            started: false,
        },
        _ => ProbeOutcome {
            is_owner: true,
            started: false,
        },
    }
}

/// Probe ownership by issuing a start request and reading the rejection
/// code. Transport failures fail open to owner.
pub async fn probe_ownership(backend: &dyn ActivationBackend, project_id: &str) -> ProbeOutcome {
    match backend.start_activation(project_id).await {
        Ok(receipt) => {
            let outcome = interpret_start_receipt(&receipt);
            tracing::debug!(
                project_id = %project_id,
                code = receipt.code,
                is_owner = outcome.is_owner,
                started = outcome.started,
                "ownership probe answered"
            );
            outcome
        }
        Err(error) => {
            tracing::warn!(
                project_id = %project_id,
                error = %error,
                "ownership probe hit transport failure; assuming owner"
            );
            ProbeOutcome {
                is_owner: true,
                started: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, StatusReply};
    use async_trait::async_trait;

    #[test]
    fn acceptance_proves_ownership_and_starts_activation() {
        let outcome = interpret_start_receipt(&StartReceipt {
            code: 0,
            info: None,
        });
        assert!(outcome.is_owner);
        assert!(outcome.started);
    }

    #[test]
    fn authorization_codes_read_as_not_owner() {
        for code in [401, 403] {
            let outcome = interpret_start_receipt(&StartReceipt { code, info: None });
            assert!(!outcome.is_owner, "code {code}");
            assert!(!outcome.started, "code {code}");
        }
    }

    #[test]
    fn unknown_codes_fail_open_without_starting() {
        for code in [-1, 404, 409, 500, 503] {
            let outcome = interpret_start_receipt(&StartReceipt { code, info: None });
            assert!(outcome.is_owner, "code {code}");
            assert!(!outcome.started, "code {code}");
        }
    }

    struct UnreachableBackend;

    #[async_trait]
    impl ActivationBackend for UnreachableBackend {
        async fn start_activation(&self, _project_id: &str) -> Result<StartReceipt, BackendError> {
            Err(BackendError::new("connection refused"))
        }

        async fn fetch_status(&self, _project_id: &str) -> Result<StatusReply, BackendError> {
            Err(BackendError::new("connection refused"))
        }
    }

    #[tokio::test]
    async fn transport_failure_fails_open_to_owner() {
        let outcome = probe_ownership(&UnreachableBackend, "proj_1").await;
        assert!(outcome.is_owner);
        assert!(!outcome.started);
    }
}
