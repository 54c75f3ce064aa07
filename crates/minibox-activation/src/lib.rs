//! Sandbox activation for Minibox projects.
//!
//! A project's sandbox shuts down when idle, so "open the app" is not one
//! request: the sandbox must be started, then polled until both the
//! project and its sandbox report `ACTIVE`, under a hard wait ceiling and
//! with synthetic progress for the UI. The platform gives no push signal
//! for readiness and no direct ownership check, which is why polling and
//! the probe-by-start-request exist at all.
//!
//! [`ActivationController`] is the entry point: one live session per
//! project id, observed through an [`ActivationHandle`].

pub mod backend;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod session;
pub mod status;

pub use backend::{ActivationBackend, BackendError, StartReceipt, StatusReply};
pub use probe::{OwnershipHint, ProbeOutcome, interpret_start_receipt, probe_ownership};
pub use progress::{ACTIVATION_WAIT_CEILING_MS, PROGRESS_CAP, ProgressGauge, progress_at};
pub use retry::{RetryCoordinator, RetryReason};
pub use session::{
    ActivationConfig, ActivationController, ActivationHandle, ActivationOutcome, ActivationPhase,
    ActivationSignal, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PROGRESS_TICK_MS,
};
pub use status::{ProjectSnapshot, StatusClass, classify_status};
