//! Per-project activation sessions.
//!
//! [`ActivationController`] owns one session per project id and drives it
//! through the full sequence: optional ownership probe, start request,
//! bounded status polling with synthetic progress, and user-confirmed
//! retries. Callers observe a session through an [`ActivationHandle`]: a
//! live `(phase, progress, is_processing)` signal plus a single terminal
//! [`ActivationOutcome`].
//!
//! Each session runs two tasks. The driver performs the network sequence;
//! a ticker republishes the signal every [`DEFAULT_PROGRESS_TICK_MS`] so
//! progress animates between network events. Both tasks re-check the
//! session registry before every mutation, so a cancelled or re-settled
//! session silently absorbs whatever was still in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::ActivationBackend;
use crate::probe::{OwnershipHint, probe_ownership};
use crate::progress::{ACTIVATION_WAIT_CEILING_MS, ProgressGauge};
use crate::retry::{RetryCoordinator, RetryReason};
use crate::status::{ProjectSnapshot, StatusClass, classify_status};

/// Default pause between status polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default interval of the progress ticker, in milliseconds.
pub const DEFAULT_PROGRESS_TICK_MS: u64 = 100;

/// Where a session currently is in the activation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPhase {
    Idle,
    /// Ownership probe in flight (unknown-ownership sessions only).
    Probing,
    /// Start request in flight.
    Requesting,
    /// Waiting for the sandbox to report ready.
    Polling,
    Succeeded,
    TimedOut,
    Failed,
}

impl ActivationPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Requesting => "requesting",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    /// Attempt-ending phases. A session parked in one of these is waiting
    /// on the retry decision (or already settled).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Failed)
    }

    /// Phases during which the activation spinner should show.
    #[must_use]
    pub fn is_processing(self) -> bool {
        matches!(self, Self::Requesting | Self::Polling)
    }
}

/// Live view of a session, published on every phase change and every
/// progress tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationSignal {
    pub phase: ActivationPhase,
    /// Synthetic progress in `[0.0, 1.0]`. Holds below `1.0` until success
    /// or timeout forces completion.
    pub progress: f64,
    pub is_processing: bool,
}

impl ActivationSignal {
    /// The inert signal: no attempt underway.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            phase: ActivationPhase::Idle,
            progress: 0.0,
            is_processing: false,
        }
    }
}

/// How a session ended. Delivered exactly once per session.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationOutcome {
    /// Sandbox is usable; carries the freshest snapshot observed, not the
    /// possibly stale one the session started from.
    Ready(ProjectSnapshot),
    /// The viewer does not own the project. Carries the snapshot the
    /// session started from so the caller can still show something.
    NotOwner(ProjectSnapshot),
    /// A failed or timed-out attempt was not retried.
    Abandoned(RetryReason),
    /// The owning caller tore the session down.
    Cancelled,
}

impl ActivationOutcome {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::NotOwner(_) => "not_owner",
            Self::Abandoned(_) => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Timing knobs for the activation sequence. The defaults are the
/// production values; tests shrink them to keep wall time down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationConfig {
    /// Longest one attempt may wait for readiness, in milliseconds. Also
    /// the denominator of the progress ramp.
    pub wait_ceiling_ms: u64,
    /// Pause between status polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Progress ticker interval, in milliseconds.
    pub progress_tick_ms: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            wait_ceiling_ms: ACTIVATION_WAIT_CEILING_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_tick_ms: DEFAULT_PROGRESS_TICK_MS,
        }
    }
}

struct SessionRecord {
    /// Bumped on every retry. Mutations carry the epoch they were issued
    /// under and are discarded on mismatch.
    epoch: u64,
    phase: ActivationPhase,
    /// Start of the current attempt's clock. Reset on entry to
    /// `Requesting`; probing time does not count against the ceiling.
    attempt_started_at: Instant,
    gauge: ProgressGauge,
    signal_tx: watch::Sender<ActivationSignal>,
    outcome_tx: watch::Sender<Option<ActivationOutcome>>,
    driver: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl SessionRecord {
    fn signal_now(&self) -> ActivationSignal {
        let progress = match self.phase {
            ActivationPhase::Idle | ActivationPhase::Probing => 0.0,
            _ => {
                let elapsed_ms = self.attempt_started_at.elapsed().as_millis() as u64;
                self.gauge.value(elapsed_ms)
            }
        };
        ActivationSignal {
            phase: self.phase,
            progress,
            is_processing: self.phase.is_processing(),
        }
    }

    fn subscribe(&self, project_id: &str) -> ActivationHandle {
        ActivationHandle {
            project_id: project_id.to_string(),
            signal_rx: self.signal_tx.subscribe(),
            outcome_rx: self.outcome_tx.subscribe(),
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Caller's view of one session. Cheap to clone; all clones observe the
/// same session.
#[derive(Debug, Clone)]
pub struct ActivationHandle {
    project_id: String,
    signal_rx: watch::Receiver<ActivationSignal>,
    outcome_rx: watch::Receiver<Option<ActivationOutcome>>,
}

impl ActivationHandle {
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Latest published signal.
    #[must_use]
    pub fn signal(&self) -> ActivationSignal {
        *self.signal_rx.borrow()
    }

    /// Watch channel of signal updates, for callers that render progress.
    #[must_use]
    pub fn signals(&self) -> watch::Receiver<ActivationSignal> {
        self.signal_rx.clone()
    }

    /// Wait for the session to end. Resolves immediately once settled; a
    /// session whose controller vanished without settling reads as
    /// cancelled.
    pub async fn outcome(&self) -> ActivationOutcome {
        let mut outcome_rx = self.outcome_rx.clone();
        match outcome_rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone().unwrap_or(ActivationOutcome::Cancelled),
            Err(_) => ActivationOutcome::Cancelled,
        }
    }
}

struct ControllerInner {
    backend: Arc<dyn ActivationBackend>,
    retry: Arc<dyn RetryCoordinator>,
    config: ActivationConfig,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl ControllerInner {
    fn sessions_guard(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a live session to a non-terminal phase. Entry to `Requesting`
    /// restarts the attempt clock. Returns false when the session is gone,
    /// superseded, or already terminal.
    fn transition(&self, project_id: &str, epoch: u64, phase: ActivationPhase) -> bool {
        let mut sessions = self.sessions_guard();
        let Some(record) = sessions.get_mut(project_id) else {
            return false;
        };
        if record.epoch != epoch || record.phase.is_terminal() {
            return false;
        }
        if phase == ActivationPhase::Requesting {
            record.attempt_started_at = Instant::now();
            record.gauge.reset();
        }
        record.phase = phase;
        let signal = record.signal_now();
        let tx = record.signal_tx.clone();
        drop(sessions);
        tracing::debug!(project_id = %project_id, phase = phase.as_str(), "activation phase change");
        tx.send_replace(signal);
        true
    }

    /// End the current attempt. First terminal transition wins; later ones
    /// (a stale poll, a racing cancel) return false and change nothing.
    /// Success and timeout force progress to `1.0` before publishing.
    fn mark_terminal(&self, project_id: &str, epoch: u64, phase: ActivationPhase) -> bool {
        let mut sessions = self.sessions_guard();
        let Some(record) = sessions.get_mut(project_id) else {
            return false;
        };
        if record.epoch != epoch || record.phase.is_terminal() {
            return false;
        }
        record.phase = phase;
        if matches!(phase, ActivationPhase::Succeeded | ActivationPhase::TimedOut) {
            record.gauge.force_complete();
        }
        let signal = record.signal_now();
        let tx = record.signal_tx.clone();
        drop(sessions);
        tracing::debug!(project_id = %project_id, phase = phase.as_str(), "activation attempt ended");
        tx.send_replace(signal);
        true
    }

    /// Begin a confirmed retry: bump the epoch, reset clock and gauge, and
    /// re-enter `Requesting`. Returns the new epoch, or `None` when the
    /// session vanished while the confirmation was pending.
    fn begin_retry(&self, project_id: &str, epoch: u64) -> Option<u64> {
        let mut sessions = self.sessions_guard();
        let record = sessions.get_mut(project_id)?;
        if record.epoch != epoch || !record.phase.is_terminal() {
            return None;
        }
        record.epoch += 1;
        record.phase = ActivationPhase::Requesting;
        record.attempt_started_at = Instant::now();
        record.gauge.reset();
        let new_epoch = record.epoch;
        let signal = record.signal_now();
        let tx = record.signal_tx.clone();
        drop(sessions);
        tracing::info!(project_id = %project_id, attempt = new_epoch + 1, "retrying sandbox activation");
        tx.send_replace(signal);
        Some(new_epoch)
    }

    /// Remove the session and deliver its outcome. The final signal stays
    /// at `Succeeded` for a ready outcome and resets to idle otherwise.
    fn settle(&self, project_id: &str, epoch: u64, outcome: ActivationOutcome) -> bool {
        let mut sessions = self.sessions_guard();
        if !sessions
            .get(project_id)
            .is_some_and(|record| record.epoch == epoch)
        {
            return false;
        }
        let Some(mut record) = sessions.remove(project_id) else {
            return false;
        };
        drop(sessions);
        // The caller may be the driver itself; it returns without another
        // await after settling, so aborting its own handle is harmless.
        record.abort_tasks();
        if !matches!(outcome, ActivationOutcome::Ready(_)) {
            record.signal_tx.send_replace(ActivationSignal::idle());
        }
        tracing::debug!(project_id = %project_id, outcome = outcome.kind(), "activation session settled");
        record.outcome_tx.send_replace(Some(outcome));
        true
    }

    /// Deadline of the current polling attempt, or `None` once the session
    /// stopped polling under this epoch.
    fn attempt_deadline(&self, project_id: &str, epoch: u64) -> Option<Instant> {
        let sessions = self.sessions_guard();
        let record = sessions.get(project_id)?;
        if record.epoch != epoch || record.phase != ActivationPhase::Polling {
            return None;
        }
        Some(record.attempt_started_at + Duration::from_millis(self.config.wait_ceiling_ms))
    }

    /// Republish the signal so progress animates. Returns false once the
    /// session is gone, which is the ticker's cue to exit.
    fn publish_tick(&self, project_id: &str) -> bool {
        let sessions = self.sessions_guard();
        let Some(record) = sessions.get(project_id) else {
            return false;
        };
        if !record.phase.is_processing() {
            return true;
        }
        let signal = record.signal_now();
        let tx = record.signal_tx.clone();
        drop(sessions);
        tx.send_replace(signal);
        true
    }
}

/// Shared activation service. One live session per project id; concurrent
/// `start` calls for the same project join the existing session instead of
/// issuing duplicate requests.
#[derive(Clone)]
pub struct ActivationController {
    inner: Arc<ControllerInner>,
}

impl ActivationController {
    #[must_use]
    pub fn new(backend: Arc<dyn ActivationBackend>, retry: Arc<dyn RetryCoordinator>) -> Self {
        Self::with_config(backend, retry, ActivationConfig::default())
    }

    #[must_use]
    pub fn with_config(
        backend: Arc<dyn ActivationBackend>,
        retry: Arc<dyn RetryCoordinator>,
        config: ActivationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                backend,
                retry,
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Begin (or join) activation for a project. Must be called inside a
    /// tokio runtime.
    ///
    /// A snapshot that already classifies as completed resolves on the
    /// spot with no session and no network traffic, as does a
    /// known-not-owner hint.
    pub fn start(&self, project: &ProjectSnapshot, hint: OwnershipHint) -> ActivationHandle {
        let project_id = project.project_id.clone();

        if classify_status(project) == StatusClass::Completed {
            tracing::debug!(project_id = %project_id, "sandbox already active; skipping activation");
            return settled_handle(
                project_id,
                ActivationSignal {
                    phase: ActivationPhase::Succeeded,
                    progress: 1.0,
                    is_processing: false,
                },
                ActivationOutcome::Ready(project.clone()),
            );
        }

        if hint == OwnershipHint::NotOwner {
            tracing::debug!(project_id = %project_id, "viewer is not the owner; keeping current snapshot");
            return settled_handle(
                project_id,
                ActivationSignal::idle(),
                ActivationOutcome::NotOwner(project.clone()),
            );
        }

        let mut sessions = self.inner.sessions_guard();
        if let Some(record) = sessions.get(&project_id) {
            tracing::debug!(project_id = %project_id, "joining live activation session");
            return record.subscribe(&project_id);
        }

        let (signal_tx, signal_rx) = watch::channel(ActivationSignal::idle());
        let (outcome_tx, outcome_rx) = watch::channel(None);
        sessions.insert(
            project_id.clone(),
            SessionRecord {
                epoch: 0,
                phase: ActivationPhase::Idle,
                attempt_started_at: Instant::now(),
                gauge: ProgressGauge::new(self.inner.config.wait_ceiling_ms),
                signal_tx,
                outcome_tx,
                driver: None,
                ticker: None,
            },
        );
        drop(sessions);

        let needs_probe = hint == OwnershipHint::Unknown;
        let driver = tokio::spawn(run_session(
            Arc::clone(&self.inner),
            project_id.clone(),
            project.clone(),
            needs_probe,
        ));
        let ticker = tokio::spawn(run_ticker(Arc::clone(&self.inner), project_id.clone()));

        let mut sessions = self.inner.sessions_guard();
        match sessions.get_mut(&project_id) {
            Some(record) => {
                record.driver = Some(driver);
                record.ticker = Some(ticker);
            }
            // The session settled before the handles landed.
            None => {
                driver.abort();
                ticker.abort();
            }
        }
        drop(sessions);

        ActivationHandle {
            project_id,
            signal_rx,
            outcome_rx,
        }
    }

    /// Tear down the live session for a project, if any. Both session
    /// tasks are aborted before this returns; a poll still in flight lands
    /// in a registry with no session to mutate.
    pub fn cancel(&self, project_id: &str) -> bool {
        let mut sessions = self.inner.sessions_guard();
        let Some(mut record) = sessions.remove(project_id) else {
            return false;
        };
        drop(sessions);
        record.abort_tasks();
        record.signal_tx.send_replace(ActivationSignal::idle());
        record.outcome_tx.send_replace(Some(ActivationOutcome::Cancelled));
        tracing::debug!(project_id = %project_id, "activation session cancelled");
        true
    }

    /// Current signal of the live session for a project, if one exists.
    #[must_use]
    pub fn signal(&self, project_id: &str) -> Option<ActivationSignal> {
        let sessions = self.inner.sessions_guard();
        sessions.get(project_id).map(SessionRecord::signal_now)
    }
}

/// Handle for a session that resolved without ever running: the senders
/// are dropped immediately and receivers serve the final values.
fn settled_handle(
    project_id: String,
    signal: ActivationSignal,
    outcome: ActivationOutcome,
) -> ActivationHandle {
    let (_, signal_rx) = watch::channel(signal);
    let (_, outcome_rx) = watch::channel(Some(outcome));
    ActivationHandle {
        project_id,
        signal_rx,
        outcome_rx,
    }
}

/// End the current attempt and ask about another one. `Some(epoch)` means
/// a confirmed retry is underway; `None` means the session is settled or
/// gone and the driver should exit.
async fn next_attempt(
    inner: &ControllerInner,
    project_id: &str,
    epoch: u64,
    reason: RetryReason,
) -> Option<u64> {
    let terminal = match reason {
        RetryReason::ActivationFailed => ActivationPhase::Failed,
        RetryReason::TimedOut => ActivationPhase::TimedOut,
    };
    if !inner.mark_terminal(project_id, epoch, terminal) {
        return None;
    }
    if inner.retry.confirm_retry(reason).await {
        inner.begin_retry(project_id, epoch)
    } else {
        inner.settle(project_id, epoch, ActivationOutcome::Abandoned(reason));
        None
    }
}

async fn run_session(
    inner: Arc<ControllerInner>,
    project_id: String,
    project: ProjectSnapshot,
    needs_probe: bool,
) {
    let mut epoch = 0_u64;
    let mut request_accepted = false;

    if needs_probe {
        if !inner.transition(&project_id, epoch, ActivationPhase::Probing) {
            return;
        }
        let probe = probe_ownership(inner.backend.as_ref(), &project_id).await;
        if !probe.is_owner {
            inner.settle(&project_id, epoch, ActivationOutcome::NotOwner(project));
            return;
        }
        request_accepted = probe.started;
    }

    loop {
        if !inner.transition(&project_id, epoch, ActivationPhase::Requesting) {
            return;
        }

        if !request_accepted {
            let accepted = match inner.backend.start_activation(&project_id).await {
                Ok(receipt) if receipt.accepted() => true,
                Ok(receipt) => {
                    tracing::debug!(
                        project_id = %project_id,
                        code = receipt.code,
                        info = receipt.info.as_deref().unwrap_or(""),
                        "activation request rejected"
                    );
                    false
                }
                Err(error) => {
                    tracing::warn!(
                        project_id = %project_id,
                        error = %error,
                        "activation request failed"
                    );
                    false
                }
            };
            if !accepted {
                match next_attempt(&inner, &project_id, epoch, RetryReason::ActivationFailed).await
                {
                    Some(next) => {
                        epoch = next;
                        continue;
                    }
                    None => return,
                }
            }
        }
        request_accepted = false;

        if !inner.transition(&project_id, epoch, ActivationPhase::Polling) {
            return;
        }

        match poll_until_ready(&inner, &project_id, epoch).await {
            PollVerdict::Ready(snapshot) => {
                if inner.mark_terminal(&project_id, epoch, ActivationPhase::Succeeded) {
                    inner.settle(&project_id, epoch, ActivationOutcome::Ready(snapshot));
                }
                return;
            }
            PollVerdict::TimedOut => {
                match next_attempt(&inner, &project_id, epoch, RetryReason::TimedOut).await {
                    Some(next) => epoch = next,
                    None => return,
                }
            }
            PollVerdict::SessionGone => return,
        }
    }
}

enum PollVerdict {
    Ready(ProjectSnapshot),
    TimedOut,
    SessionGone,
}

/// Poll status until the project classifies as completed or the attempt
/// deadline passes. Transport failures and unusable replies are logged and
/// skipped; only readiness or the clock end the loop.
async fn poll_until_ready(inner: &ControllerInner, project_id: &str, epoch: u64) -> PollVerdict {
    let poll_interval = Duration::from_millis(inner.config.poll_interval_ms.max(1));
    loop {
        let Some(deadline) = inner.attempt_deadline(project_id, epoch) else {
            return PollVerdict::SessionGone;
        };
        if Instant::now() >= deadline {
            return PollVerdict::TimedOut;
        }
        // A fetch still in flight at the deadline is abandoned with it.
        let fetch = inner.backend.fetch_status(project_id);
        match tokio::time::timeout_at(deadline, fetch).await {
            Err(_) => return PollVerdict::TimedOut,
            Ok(Err(error)) => {
                tracing::warn!(
                    project_id = %project_id,
                    error = %error,
                    "status poll failed; will poll again"
                );
            }
            Ok(Ok(reply)) => {
                let code = reply.code;
                match reply.into_snapshot() {
                    Some(snapshot) if classify_status(&snapshot) == StatusClass::Completed => {
                        return PollVerdict::Ready(snapshot);
                    }
                    Some(snapshot) => {
                        tracing::debug!(
                            project_id = %project_id,
                            lifecycle = %snapshot.lifecycle_status,
                            sandbox = %snapshot.sandbox_status,
                            "sandbox not ready yet"
                        );
                    }
                    None => {
                        tracing::warn!(
                            project_id = %project_id,
                            code,
                            "status poll returned no usable snapshot; will poll again"
                        );
                    }
                }
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return PollVerdict::TimedOut;
        }
        tokio::time::sleep(poll_interval.min(remaining)).await;
    }
}

async fn run_ticker(inner: Arc<ControllerInner>, project_id: String) {
    let tick = Duration::from_millis(inner.config.progress_tick_ms.max(1));
    loop {
        tokio::time::sleep(tick).await;
        if !inner.publish_tick(&project_id) {
            return;
        }
    }
}
