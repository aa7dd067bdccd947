//! Exponential smoothing of analysis metrics.
//!
//! The engine's per-window estimates jump around a lot; the display shows an
//! exponential moving average instead:
//!
//! ```text
//! smoothed = factor × new + (1 − factor) × smoothed_prev
//! ```
//!
//! The first observation after a reset is taken as-is so the display does
//! not ramp up slowly from zero.  Smoothing runs on every analysis cycle;
//! only the hand-off to the display is throttled.

use std::time::{Duration, Instant};

use crate::types::{AnalysisSnapshot, SmoothedMetrics};

/// Factor for live device data.
pub const LIVE_FACTOR: f64 = 0.15;

/// Factor for synthetic/demo streams, where visible change should happen
/// faster.
pub const DEMO_FACTOR: f64 = 0.2;

/// Minimum spacing between two display emissions.
pub const EMIT_INTERVAL: Duration = Duration::from_millis(1_000);

/// A single exponential moving average.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    factor: f64,
    value: Option<f64>,
}

impl Ema {
    /// `factor` is clamped into `(0, 1]`.
    pub fn new(factor: f64) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(f64::EPSILON, 1.0)
        } else {
            LIVE_FACTOR
        };
        Self { factor, value: None }
    }

    /// Feed one observation and return the new smoothed value.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => self.factor * x + (1.0 - self.factor) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Forget the history; the next observation is taken unblended.
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// One [`Ema`] per displayed metric plus the emission throttle.
#[derive(Debug, Clone)]
pub struct MetricsSmoother {
    alpha: Ema,
    beta: Ema,
    theta: Ema,
    attention: Ema,
    relaxation: Ema,
    emit_interval: Duration,
    last_emit: Option<Instant>,
}

impl MetricsSmoother {
    pub fn new(factor: f64, emit_interval: Duration) -> Self {
        let ema = Ema::new(factor);
        Self {
            alpha: ema,
            beta: ema,
            theta: ema,
            attention: ema,
            relaxation: ema,
            emit_interval,
            last_emit: None,
        }
    }

    /// Blend `snapshot` into the running averages.
    ///
    /// Always updates state.  Returns `Some` only when at least
    /// `emit_interval` has passed since the previous emission (or nothing has
    /// been emitted yet).
    pub fn update(&mut self, snapshot: &AnalysisSnapshot, now: Instant) -> Option<SmoothedMetrics> {
        let current = SmoothedMetrics {
            alpha: self.alpha.update(snapshot.alpha),
            beta: self.beta.update(snapshot.beta),
            theta: self.theta.update(snapshot.theta),
            attention: self.attention.update(snapshot.attention),
            relaxation: self.relaxation.update(snapshot.relaxation),
        };

        let due = self
            .last_emit
            .map_or(true, |t| now.saturating_duration_since(t) >= self.emit_interval);
        if due {
            self.last_emit = Some(now);
            Some(current)
        } else {
            None
        }
    }

    /// Current smoothed values, or `None` before the first observation.
    pub fn current(&self) -> Option<SmoothedMetrics> {
        Some(SmoothedMetrics {
            alpha: self.alpha.value()?,
            beta: self.beta.value()?,
            theta: self.theta.value()?,
            attention: self.attention.value()?,
            relaxation: self.relaxation.value()?,
        })
    }

    /// Reset every average to "first observation" and allow an immediate
    /// emission.  Called at session start and when calibration restarts.
    pub fn reset(&mut self) {
        for ema in [
            &mut self.alpha,
            &mut self.beta,
            &mut self.theta,
            &mut self.attention,
            &mut self.relaxation,
        ] {
            ema.reset();
        }
        self.last_emit = None;
    }
}
