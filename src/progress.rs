// Progress normalization and observer forwarding

use crate::models::{Phase, ProgressEvent};

/// Normalizes heterogeneous progress values into 0-100 integer events.
///
/// Guarantees, regardless of what the underlying engines report:
/// - percent is clamped to [0, 100] and floored to an integer
/// - within one phase the sequence is monotonically non-decreasing
///   (regressions are dropped, repeats pass through)
/// - `finish` emits `(Finished, 100)` exactly once
///
/// Callbacks run on whatever thread drives the operation; marshalling onto
/// a UI thread is the observer's job.
pub struct ProgressReporter<'a> {
    observer: &'a mut dyn FnMut(ProgressEvent),
    phase: Option<Phase>,
    last_percent: u8,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(observer: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self {
            observer,
            phase: None,
            last_percent: 0,
            finished: false,
        }
    }

    /// Forward one progress update, normalized. Out-of-order values within
    /// the current phase are suppressed rather than forwarded.
    pub fn report(&mut self, phase: Phase, percent: f64) {
        if self.finished {
            return;
        }
        let percent = percent.clamp(0.0, 100.0).floor() as u8;
        if self.phase != Some(phase) {
            // New phase starts its own monotonic sequence.
            self.phase = Some(phase);
            self.last_percent = 0;
        }
        if percent < self.last_percent {
            log::debug!(
                "suppressing regressed progress {}% (< {}%) in {:?}",
                percent,
                self.last_percent,
                phase
            );
            return;
        }
        self.last_percent = percent;
        (self.observer)(ProgressEvent { phase, percent });
    }

    /// Terminal success event. Idempotent; only the first call emits.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        (self.observer)(ProgressEvent {
            phase: Phase::Finished,
            percent: 100,
        });
    }

    /// Terminal failure event, carrying the last percentage seen. The error
    /// itself travels through the operation's return value, never here.
    pub fn fail(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        (self.observer)(ProgressEvent {
            phase: Phase::Failed,
            percent: self.last_percent,
        });
    }
}
