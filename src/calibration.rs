//! Calibration lifecycle tracking.
//!
//! The engine learns a per-user baseline before attention/relaxation values
//! mean anything.  [`CalibrationTracker`] turns the engine's reported percent
//! and its `calibration_finished()` flag into a small state machine:
//!
//! ```text
//! NotStarted ──▶ InProgress(1..99) ──▶ Complete
//!                      ▲                   │
//!                      └──── restart ──────┘
//! ```

use log::info;

use crate::error::EngineError;
use crate::types::CalibrationState;

/// What an observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationUpdate {
    Unchanged,
    Progress(u8),
    /// Fired exactly once per calibration run.
    Completed,
    /// Calibration began again after having completed.  Smoothed metrics
    /// must be reset so they do not blend against pre-calibration values.
    Restarted(u8),
}

#[derive(Debug, Clone)]
pub struct CalibrationTracker {
    state: CalibrationState,
    completion_fired: bool,
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationTracker {
    pub fn new() -> Self {
        Self {
            state: CalibrationState::NotStarted,
            completion_fired: false,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == CalibrationState::Complete
    }

    /// Feed the engine's view of calibration.
    ///
    /// `finished` is the result of the engine's explicit query; when the query
    /// fails, `percent >= 100` is used instead.
    pub fn observe(&mut self, percent: i32, finished: Result<bool, EngineError>) -> CalibrationUpdate {
        let finished = finished.unwrap_or(percent >= 100);

        if finished {
            self.state = CalibrationState::Complete;
            if self.completion_fired {
                return CalibrationUpdate::Unchanged;
            }
            self.completion_fired = true;
            info!("Calibration completed");
            return CalibrationUpdate::Completed;
        }

        if !(1..=99).contains(&percent) {
            return CalibrationUpdate::Unchanged;
        }
        let p = percent as u8;

        match self.state {
            CalibrationState::Complete => {
                self.enter_in_progress(p);
                CalibrationUpdate::Restarted(p)
            }
            CalibrationState::InProgress(prev) if prev == p => CalibrationUpdate::Unchanged,
            CalibrationState::InProgress(_) | CalibrationState::NotStarted => {
                self.state = CalibrationState::InProgress(p);
                CalibrationUpdate::Progress(p)
            }
        }
    }

    /// Manual recalibration request.
    pub fn restart(&mut self) -> CalibrationUpdate {
        self.enter_in_progress(0);
        CalibrationUpdate::Restarted(0)
    }

    fn enter_in_progress(&mut self, percent: u8) {
        self.state = CalibrationState::InProgress(percent);
        self.completion_fired = false;
    }

    /// Text for the attention line on the live screen.
    pub fn engagement_text(&self, attention: f64) -> String {
        match self.state {
            CalibrationState::InProgress(p) => format!("Calibrating: {p}%"),
            CalibrationState::Complete => format!("Attention: {:.1}%", attention * 100.0),
            CalibrationState::NotStarted => "Waiting for calibration…".to_owned(),
        }
    }
}
