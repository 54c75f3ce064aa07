//! Synthetic activation progress.
//!
//! The platform exposes no real provisioning progress, so the UI-facing
//! number is manufactured from elapsed time: a linear ramp over the wait
//! ceiling, capped at [`PROGRESS_CAP`] so the bar never claims completion
//! the backend has not confirmed. Success and timeout both force `1.0`.

/// Longest time one activation attempt may wait for the sandbox, in
/// milliseconds. Also the denominator of the progress ramp.
pub const ACTIVATION_WAIT_CEILING_MS: u64 = 60_000;

/// Ceiling for time-derived progress. Only an explicit completion signal
/// moves the value past this.
pub const PROGRESS_CAP: f64 = 0.95;

/// Progress after `elapsed_ms` of a ramp over `ceiling_ms`:
/// `min(elapsed / ceiling, PROGRESS_CAP)`.
#[must_use]
pub fn progress_at(elapsed_ms: u64, ceiling_ms: u64) -> f64 {
    let ceiling = ceiling_ms.max(1);
    let ratio = elapsed_ms as f64 / ceiling as f64;
    ratio.min(PROGRESS_CAP)
}

/// Progress state for one activation attempt.
///
/// The reported value is the time ramp with a latched floor on top: once
/// [`force_complete`](Self::force_complete) fires, every later reading is
/// `1.0` until [`reset`](Self::reset) starts the next attempt. Readings
/// never move backwards within an attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProgressGauge {
    ceiling_ms: u64,
    floor: f64,
}

impl ProgressGauge {
    #[must_use]
    pub fn new(ceiling_ms: u64) -> Self {
        Self {
            ceiling_ms,
            floor: 0.0,
        }
    }

    /// Value at `elapsed_ms` into the current attempt.
    #[must_use]
    pub fn value(&self, elapsed_ms: u64) -> f64 {
        progress_at(elapsed_ms, self.ceiling_ms).max(self.floor)
    }

    /// Jump to `1.0` and stay there. Applied on success and on timeout; the
    /// bar completes either way before the outcome is reported.
    pub fn force_complete(&mut self) {
        self.floor = 1.0;
    }

    /// Start over for a fresh attempt (retry after failure or timeout).
    pub fn reset(&mut self) {
        self.floor = 0.0;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.floor >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn contract_constants_are_pinned() {
        assert_eq!(ACTIVATION_WAIT_CEILING_MS, 60_000);
        assert!((PROGRESS_CAP - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn ramp_is_linear_until_the_cap() {
        assert!((progress_at(0, ACTIVATION_WAIT_CEILING_MS)).abs() < f64::EPSILON);
        assert!((progress_at(15_000, ACTIVATION_WAIT_CEILING_MS) - 0.25).abs() < 1e-12);
        assert!((progress_at(30_000, ACTIVATION_WAIT_CEILING_MS) - 0.5).abs() < 1e-12);
        assert!((progress_at(57_000, ACTIVATION_WAIT_CEILING_MS) - 0.95).abs() < 1e-12);
    }

    #[test]
    fn cap_holds_through_and_past_the_ceiling() {
        assert!((progress_at(59_999, ACTIVATION_WAIT_CEILING_MS) - 0.95).abs() < 1e-12);
        assert!((progress_at(60_000, ACTIVATION_WAIT_CEILING_MS) - 0.95).abs() < 1e-12);
        assert!((progress_at(600_000, ACTIVATION_WAIT_CEILING_MS) - 0.95).abs() < 1e-12);
    }

    #[test]
    fn zero_ceiling_does_not_divide_by_zero() {
        assert!((progress_at(500, 0) - PROGRESS_CAP).abs() < 1e-12);
    }

    #[test]
    fn force_complete_latches_until_reset() {
        let mut gauge = ProgressGauge::new(ACTIVATION_WAIT_CEILING_MS);
        assert!((gauge.value(30_000) - 0.5).abs() < 1e-12);
        assert!(!gauge.is_complete());

        gauge.force_complete();
        assert!(gauge.is_complete());
        assert!((gauge.value(0) - 1.0).abs() < f64::EPSILON);
        assert!((gauge.value(90_000) - 1.0).abs() < f64::EPSILON);

        gauge.reset();
        assert!(!gauge.is_complete());
        assert!(gauge.value(0).abs() < f64::EPSILON);
    }

    quickcheck! {
        fn time_ramp_never_exceeds_cap(elapsed_ms: u64) -> bool {
            progress_at(elapsed_ms, ACTIVATION_WAIT_CEILING_MS) <= PROGRESS_CAP
        }

        fn time_ramp_is_monotone(a: u64, b: u64) -> bool {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            progress_at(lo, ACTIVATION_WAIT_CEILING_MS)
                <= progress_at(hi, ACTIVATION_WAIT_CEILING_MS)
        }

        fn gauge_reading_never_drops_within_an_attempt(a: u64, b: u64, forced: bool) -> bool {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let mut gauge = ProgressGauge::new(ACTIVATION_WAIT_CEILING_MS);
            if forced {
                gauge.force_complete();
            }
            gauge.value(lo) <= gauge.value(hi)
        }
    }
}
