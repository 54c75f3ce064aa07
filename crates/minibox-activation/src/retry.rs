//! Retry confirmation seam.
//!
//! The controller never retries a failed or timed-out attempt on its own:
//! each extra attempt costs another start request and up to a minute of
//! polling, so the decision belongs to whoever is watching. The session
//! driver blocks on [`RetryCoordinator::confirm_retry`] at every terminal
//! failure and acts on the answer exactly once.

use async_trait::async_trait;

/// Why the previous attempt ended without a usable sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The activation request was rejected or never reached the platform.
    ActivationFailed,
    /// The wait ceiling elapsed while the project was still building.
    TimedOut,
}

impl RetryReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActivationFailed => "activation_failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Answers the "try again?" question for a spent attempt. `true` starts a
/// fresh attempt with a reset clock; `false` abandons the session.
#[async_trait]
pub trait RetryCoordinator: Send + Sync {
    async fn confirm_retry(&self, reason: RetryReason) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_labels_are_stable() {
        assert_eq!(RetryReason::ActivationFailed.as_str(), "activation_failed");
        assert_eq!(RetryReason::TimedOut.as_str(), "timed_out");
    }
}
