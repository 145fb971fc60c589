//! Shared progress record for continuous runs.
//!
//! One mutex guards the single-flight flag, the stop flag and every counter.
//! Readers receive a [`ProgressSnapshot`] copy and never hold the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;

use lumen_core::EnrichmentStep;

/// Point-in-time copy of the progress record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub is_running: bool,
    pub stop_requested: bool,
    pub current_photo: Option<String>,
    pub current_step: Option<EnrichmentStep>,
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    /// Completed items per second since the run started, two decimals.
    pub speed: f64,
    /// Finished items, completed or failed, as a percentage of `total`,
    /// one decimal.
    pub percent: f64,
}

#[derive(Debug, Default)]
struct ProgressState {
    is_running: bool,
    stop_requested: bool,
    current_photo: Option<String>,
    current_step: Option<EnrichmentStep>,
    processed: u64,
    failed: u64,
    total: u64,
    started_at: Option<Instant>,
    speed: f64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the single-flight flag and reset the counters.
    ///
    /// Returns `None` if a run is already active. The flag is released when
    /// the returned guard drops.
    pub fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        let mut s = self.state();
        if s.is_running {
            return None;
        }
        *s = ProgressState {
            is_running: true,
            started_at: Some(Instant::now()),
            ..ProgressState::default()
        };
        Some(RunGuard {
            tracker: Arc::clone(self),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    /// Ask the active run to stop at the next item boundary.
    pub fn request_stop(&self) {
        self.state().stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.state().stop_requested
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let s = self.state();
        let percent = if s.total > 0 {
            let finished = (s.processed + s.failed).min(s.total);
            round_to(finished as f64 / s.total as f64 * 100.0, 1)
        } else {
            0.0
        };
        ProgressSnapshot {
            is_running: s.is_running,
            stop_requested: s.stop_requested,
            current_photo: s.current_photo.clone(),
            current_step: s.current_step,
            processed: s.processed,
            failed: s.failed,
            total: s.total,
            speed: s.speed,
            percent,
        }
    }
}

/// Proof of ownership of the active run. Updates go through it.
pub struct RunGuard {
    tracker: Arc<ProgressTracker>,
}

impl RunGuard {
    pub fn set_total(&self, total: u64) {
        self.tracker.state().total = total;
    }

    pub fn set_current_photo(&self, name: &str) {
        let mut s = self.tracker.state();
        s.current_photo = Some(name.to_string());
        s.current_step = None;
    }

    pub fn set_current_step(&self, step: EnrichmentStep) {
        self.tracker.state().current_step = Some(step);
    }

    pub fn record_completed(&self) {
        let mut s = self.tracker.state();
        s.processed += 1;
        if let Some(started) = s.started_at {
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                s.speed = round_to(s.processed as f64 / elapsed, 2);
            }
        }
    }

    pub fn record_failed(&self) {
        self.tracker.state().failed += 1;
    }

    pub fn stop_requested(&self) -> bool {
        self.tracker.stop_requested()
    }

    pub fn processed(&self) -> u64 {
        self.tracker.state().processed
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut s = self.tracker.state();
        s.is_running = false;
        s.current_photo = None;
        s.current_step = None;
    }
}
