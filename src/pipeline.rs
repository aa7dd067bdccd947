//! Per-batch telemetry processing.
//!
//! ```text
//! raw batch ──▶ bipolar ──▶ engine.push_data + process ──▶ AnalysisReader
//!     │                                                        │
//!     └──▶ Channels                 Artifacts, Calibration ◀───┤
//!                                   Metrics, Engagement  ◀── smoother
//! ```
//!
//! Runs on the session's processing task, never on the driver thread.
//! Everything here is synchronous; the caller forwards the returned events to
//! the display sink.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::analysis::{AnalysisEngine, AnalysisReader};
use crate::bipolar;
use crate::calibration::{CalibrationTracker, CalibrationUpdate};
use crate::error::SessionError;
use crate::smoothing::MetricsSmoother;
use crate::types::{
    AnalysisSnapshot, CalibrationState, ChannelReadout, RawSignalSample, SessionEvent,
};

/// Counters kept by [`TelemetryPipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Signal batches processed.
    pub batches: u64,
    pub samples_received: u64,
    /// Bipolar samples accepted by the engine.
    pub samples_pushed: u64,
    /// Jumps in the device packet counter.
    pub sequence_gaps: u64,
    pub engine_errors: u64,
}

pub struct TelemetryPipeline {
    engine: Option<Box<dyn AnalysisEngine>>,
    reader: AnalysisReader,
    tracker: CalibrationTracker,
    smoother: MetricsSmoother,
    last_pack: Option<u32>,
    last_snapshot: Option<AnalysisSnapshot>,
    stats: PipelineStats,
}

impl TelemetryPipeline {
    /// `engine` is `None` when analysis is disabled for the session; raw
    /// channel readouts are still produced.
    pub fn new(
        engine: Option<Box<dyn AnalysisEngine>>,
        smoothing_factor: f64,
        emit_interval: Duration,
    ) -> Self {
        Self {
            engine,
            reader: AnalysisReader::new(),
            tracker: CalibrationTracker::new(),
            smoother: MetricsSmoother::new(smoothing_factor, emit_interval),
            last_pack: None,
            last_snapshot: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn analysis_enabled(&self) -> bool {
        self.engine.is_some()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn calibration(&self) -> CalibrationState {
        self.tracker.state()
    }

    /// Latest normalised engine output, before smoothing.
    pub fn last_snapshot(&self) -> Option<AnalysisSnapshot> {
        self.last_snapshot
    }

    /// Process one driver batch and return the display updates it produced.
    pub fn process_batch(&mut self, batch: &[RawSignalSample], now: Instant) -> Vec<SessionEvent> {
        let Some(last) = batch.last() else {
            return Vec::new();
        };
        self.stats.batches += 1;
        self.stats.samples_received += batch.len() as u64;
        self.track_sequence(batch);

        let mut events = Vec::with_capacity(6);
        let peak = last
            .channels()
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        events.push(SessionEvent::Channels(ChannelReadout {
            sample: *last,
            peak,
            batches: self.stats.batches,
        }));

        if self.engine.is_some() {
            self.analyse(batch, now, &mut events);
        }
        events
    }

    fn analyse(&mut self, batch: &[RawSignalSample], now: Instant, events: &mut Vec<SessionEvent>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let bipolars = bipolar::derive(batch);
        let n = self.stats.batches;
        if n <= 3 || n % 250 == 0 {
            if let Some(first) = bipolars.first() {
                debug!(
                    "Bipolar batch #{n}: {} samples, ch1={:.2e} V ch2={:.2e} V",
                    bipolars.len(),
                    first.ch1,
                    first.ch2
                );
            }
        }

        if let Err(e) = engine.push_data(&bipolars) {
            self.stats.engine_errors += 1;
            error!(
                "Engine rejected {} bipolar samples (batch #{n}, {} errors so far): {e}",
                bipolars.len(),
                self.stats.engine_errors
            );
            if self.stats.engine_errors == 1 {
                events.push(SessionEvent::Warning(format!("Analysis error: {e}")));
            }
            return;
        }
        self.stats.samples_pushed += bipolars.len() as u64;

        if let Err(e) = engine.process() {
            self.stats.engine_errors += 1;
            error!("Engine processing failed (batch #{n}): {e}");
            if self.stats.engine_errors == 1 {
                events.push(SessionEvent::Warning(format!("Analysis error: {e}")));
            }
            return;
        }

        let read = self.reader.read(engine.as_mut(), &mut self.tracker);
        self.last_snapshot = Some(read.snapshot);
        events.push(SessionEvent::Artifacts(read.snapshot.is_artifacted));

        let calibration_changed = match read.calibration {
            CalibrationUpdate::Unchanged => false,
            CalibrationUpdate::Progress(_) | CalibrationUpdate::Completed => true,
            CalibrationUpdate::Restarted(p) => {
                info!("Calibration restarted at {p}%, resetting smoothed metrics");
                self.smoother.reset();
                true
            }
        };
        if calibration_changed {
            events.push(SessionEvent::Calibration(self.tracker.state()));
        }

        let emitted = self.smoother.update(&read.snapshot, now);
        if let Some(m) = emitted {
            events.push(SessionEvent::Metrics(m));
        }
        if calibration_changed || emitted.is_some() {
            let attention = self
                .smoother
                .current()
                .map_or(read.snapshot.attention, |m| m.attention);
            events.push(SessionEvent::Engagement(self.tracker.engagement_text(attention)));
        }
    }

    fn track_sequence(&mut self, batch: &[RawSignalSample]) {
        for s in batch {
            if let Some(prev) = self.last_pack {
                if s.pack_num > prev.wrapping_add(1) && prev != u32::MAX {
                    self.stats.sequence_gaps += 1;
                    let gaps = self.stats.sequence_gaps;
                    if gaps <= 3 || gaps % 100 == 0 {
                        warn!(
                            "Packet sequence gap: {prev} -> {} ({gaps} gaps so far)",
                            s.pack_num
                        );
                    }
                } else if s.pack_num < prev {
                    debug!("Packet counter restarted: {prev} -> {}", s.pack_num);
                }
            }
            self.last_pack = Some(s.pack_num);
        }
    }

    /// Manually restart calibration.
    pub fn start_calibration(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let engine = self.engine.as_mut().ok_or(SessionError::AnalysisDisabled)?;
        engine.start_calibration().map_err(SessionError::Engine)?;
        self.tracker.restart();
        self.smoother.reset();
        info!("Manual calibration started");
        Ok(vec![
            SessionEvent::Calibration(self.tracker.state()),
            SessionEvent::Engagement(self.tracker.engagement_text(0.0)),
        ])
    }

    /// Drop the engine.  Further batches only produce channel readouts.
    pub fn release_engine(&mut self) {
        if self.engine.take().is_some() {
            debug!("Analysis engine released");
        }
        self.reader.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MentalRecord, SpectralRecord};
    use crate::error::EngineError;
    use crate::types::BipolarSample;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Shared {
        pushed: Vec<BipolarSample>,
        percent: i32,
        calibrations: u32,
    }

    struct ScriptedEngine(Arc<Mutex<Shared>>);

    impl AnalysisEngine for ScriptedEngine {
        fn push_data(&mut self, samples: &[BipolarSample]) -> Result<(), EngineError> {
            self.0.lock().unwrap().pushed.extend_from_slice(samples);
            Ok(())
        }
        fn process(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn is_both_sides_artifacted(&self) -> bool {
            false
        }
        fn is_artifacted_sequence(&self) -> bool {
            false
        }
        fn calibration_percent(&self) -> i32 {
            self.0.lock().unwrap().percent
        }
        fn calibration_finished(&self) -> Result<bool, EngineError> {
            Ok(self.0.lock().unwrap().percent >= 100)
        }
        fn read_mental_results(&mut self) -> Vec<MentalRecord> {
            vec![MentalRecord { rel_attention: 0.4, rel_relaxation: 0.6 }]
        }
        fn read_spectral_results(&mut self) -> Vec<SpectralRecord> {
            vec![SpectralRecord { alpha: 30.0, beta: 20.0, theta: 10.0 }]
        }
        fn start_calibration(&mut self) -> Result<(), EngineError> {
            self.0.lock().unwrap().calibrations += 1;
            Ok(())
        }
    }

    fn batch(start: u32, n: u32) -> Vec<RawSignalSample> {
        (start..start + n)
            .map(|i| RawSignalSample {
                pack_num: i,
                o1: f64::from(i),
                o2: 0.0,
                t3: 0.0,
                t4: 1.0,
            })
            .collect()
    }

    fn pipeline() -> (TelemetryPipeline, Arc<Mutex<Shared>>) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let p = TelemetryPipeline::new(
            Some(Box::new(ScriptedEngine(Arc::clone(&shared)))),
            0.15,
            Duration::from_secs(1),
        );
        (p, shared)
    }

    #[test]
    fn test_batches_push_in_order() {
        let (mut p, shared) = pipeline();
        let t0 = Instant::now();
        for b in 0..10 {
            p.process_batch(&batch(b * 10, 10), t0);
        }
        let pushed = &shared.lock().unwrap().pushed;
        assert_eq!(pushed.len(), 100);
        for (i, s) in pushed.iter().enumerate() {
            assert_eq!(s.ch1, -(i as f64));
        }
        assert_eq!(p.stats().samples_pushed, 100);
        assert_eq!(p.stats().sequence_gaps, 0);
    }

    #[test]
    fn test_events_for_first_batch() {
        let (mut p, shared) = pipeline();
        shared.lock().unwrap().percent = 20;
        let events = p.process_batch(&batch(0, 5), Instant::now());

        assert!(matches!(events[0], SessionEvent::Channels(c) if c.batches == 1 && c.sample.pack_num == 4));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Artifacts(false))));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Calibration(CalibrationState::InProgress(20)))));
        let metrics = events.iter().find_map(|e| match e {
            SessionEvent::Metrics(m) => Some(*m),
            _ => None,
        });
        let m = metrics.expect("first snapshot is emitted");
        assert_eq!(m.alpha, 0.3);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Engagement(t) if t == "Calibrating: 20%")));
    }

    #[test]
    fn test_disabled_analysis_still_reports_channels() {
        let mut p = TelemetryPipeline::new(None, 0.15, Duration::from_secs(1));
        let events = p.process_batch(&batch(0, 3), Instant::now());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Channels(_)));
        assert!(matches!(p.start_calibration(), Err(SessionError::AnalysisDisabled)));
    }

    #[test]
    fn test_sequence_gap_is_counted_not_dropped() {
        let (mut p, shared) = pipeline();
        let t0 = Instant::now();
        p.process_batch(&batch(0, 5), t0);
        p.process_batch(&batch(9, 5), t0);
        assert_eq!(p.stats().sequence_gaps, 1);
        assert_eq!(shared.lock().unwrap().pushed.len(), 10);
    }

    #[test]
    fn test_manual_calibration_resets_tracker() {
        let (mut p, shared) = pipeline();
        shared.lock().unwrap().percent = 100;
        p.process_batch(&batch(0, 5), Instant::now());
        assert_eq!(p.calibration(), CalibrationState::Complete);

        let events = p.start_calibration().unwrap();
        assert_eq!(shared.lock().unwrap().calibrations, 1);
        assert_eq!(p.calibration(), CalibrationState::InProgress(0));
        assert!(matches!(&events[1], SessionEvent::Engagement(t) if t == "Calibrating: 0%"));
    }
}
