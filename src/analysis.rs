//! Analysis engine contract and result normalisation.
//!
//! The engine itself (band power, attention estimation, artifact detection)
//! is an external capability.  This module pins the contract the session
//! relies on and turns whatever the engine reports into an
//! [`AnalysisSnapshot`] whose values are always finite and in range.

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::calibration::{CalibrationTracker, CalibrationUpdate};
use crate::error::EngineError;
use crate::types::{AnalysisSnapshot, BipolarSample};

// ── Engine contract ───────────────────────────────────────────────────────────

/// One mental-state estimate.  Values are nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MentalRecord {
    pub rel_attention: f64,
    pub rel_relaxation: f64,
}

/// One spectral-percent estimate.
///
/// Depending on the engine build the bands are fractions in `[0, 1]` or
/// percentages in `[0, 100]`; [`normalize_fraction`] handles both.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectralRecord {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
}

/// Field names accepted for each band when a record arrives as a loosely
/// typed map.  Lookup is case-insensitive; the first name present wins.
pub const SPECTRAL_FIELD_TABLE: [(&str, &[&str]); 3] = [
    ("alpha", &["alpha", "alphap", "alphaprocent"]),
    ("beta", &["beta", "betap", "betaprocent"]),
    ("theta", &["theta", "thetap", "index", "indexp"]),
];

impl SpectralRecord {
    /// Build a record from a loosely typed field map.
    ///
    /// Fails with [`EngineError::UnrecognizedSpectralRecord`] when a band has
    /// none of the names in [`SPECTRAL_FIELD_TABLE`] or its value is not a
    /// number.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, EngineError> {
        let lookup = |band: &'static str, names: &[&str]| -> Result<f64, EngineError> {
            names
                .iter()
                .find_map(|wanted| {
                    fields
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
                        .and_then(|(_, v)| v.as_f64())
                })
                .ok_or_else(|| EngineError::UnrecognizedSpectralRecord {
                    band,
                    fields: fields.keys().cloned().collect(),
                })
        };
        let [(a, an), (b, bn), (t, tn)] = SPECTRAL_FIELD_TABLE;
        Ok(Self {
            alpha: lookup(a, an)?,
            beta: lookup(b, bn)?,
            theta: lookup(t, tn)?,
        })
    }
}

/// The analysis engine, one instance per session.
///
/// Construction takes a fixed [`crate::protocol::EngineSettings`] bundle via
/// [`crate::device::Backend::create_engine`].
pub trait AnalysisEngine: Send {
    /// Append bipolar samples in arrival order.
    fn push_data(&mut self, samples: &[BipolarSample]) -> Result<(), EngineError>;

    /// Run all pending analysis windows.
    fn process(&mut self) -> Result<(), EngineError>;

    fn is_both_sides_artifacted(&self) -> bool;

    fn is_artifacted_sequence(&self) -> bool;

    fn calibration_percent(&self) -> i32;

    fn calibration_finished(&self) -> Result<bool, EngineError>;

    /// Mental estimates produced since the last read, oldest first.
    fn read_mental_results(&mut self) -> Vec<MentalRecord>;

    /// Spectral estimates produced since the last read, oldest first.
    fn read_spectral_results(&mut self) -> Vec<SpectralRecord>;

    fn start_calibration(&mut self) -> Result<(), EngineError>;
}

// ── Normalisation ─────────────────────────────────────────────────────────────

/// Clamp to `[0, 1]`, mapping NaN to `0`.
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Bring a band value into `[0, 1]`.
///
/// Values above `1` are taken to be percentages and divided by 100 first.
///
/// ```
/// # use brainbit_rs::analysis::normalize_fraction;
/// assert_eq!(normalize_fraction(45.0), 0.45);
/// assert_eq!(normalize_fraction(0.72), 0.72);
/// ```
pub fn normalize_fraction(v: f64) -> f64 {
    if v > 1.0 {
        clamp_unit(v / 100.0)
    } else {
        clamp_unit(v)
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Result of reading the engine after one push + process call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisRead {
    pub snapshot: AnalysisSnapshot,
    pub calibration: CalibrationUpdate,
}

/// Pulls the latest results out of the engine after each processing call.
///
/// Keeps the last mental and spectral records so that a cycle in which the
/// engine produced no new window still yields the most recent values (or
/// `0.0` before the first one).
#[derive(Debug, Clone, Default)]
pub struct AnalysisReader {
    last_mental: Option<MentalRecord>,
    last_spectral: Option<SpectralRecord>,
}

impl AnalysisReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(
        &mut self,
        engine: &mut dyn AnalysisEngine,
        tracker: &mut CalibrationTracker,
    ) -> AnalysisRead {
        let is_artifacted = engine.is_both_sides_artifacted() || engine.is_artifacted_sequence();

        let percent = engine.calibration_percent();
        let finished = engine.calibration_finished();
        if let Err(e) = &finished {
            debug!("calibration_finished() failed, falling back to percent: {e}");
        }
        let calibration = tracker.observe(percent, finished);

        if let Some(m) = engine.read_mental_results().last() {
            self.last_mental = Some(*m);
        }
        if let Some(s) = engine.read_spectral_results().last() {
            self.last_spectral = Some(*s);
        }

        let mental = self.last_mental.unwrap_or_default();
        let spectral = self.last_spectral.unwrap_or_default();

        let snapshot = AnalysisSnapshot {
            attention: clamp_unit(mental.rel_attention),
            relaxation: clamp_unit(mental.rel_relaxation),
            alpha: normalize_fraction(spectral.alpha),
            beta: normalize_fraction(spectral.beta),
            theta: normalize_fraction(spectral.theta),
            is_artifacted,
            calibration_percent: percent.clamp(0, 100) as u8,
        };
        if snapshot.alpha + snapshot.beta + snapshot.theta > 1.0 + 1e-6 {
            warn!(
                "Spectral fractions sum above 1 (alpha={:.3} beta={:.3} theta={:.3})",
                snapshot.alpha, snapshot.beta, snapshot.theta
            );
        }

        AnalysisRead {
            snapshot,
            calibration,
        }
    }

    /// Forget cached records (new session or engine released).
    pub fn reset(&mut self) {
        self.last_mental = None;
        self.last_spectral = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct FixedEngine {
        both: bool,
        seq: bool,
        percent: i32,
        finished: Option<bool>,
        mental: Vec<MentalRecord>,
        spectral: Vec<SpectralRecord>,
    }

    impl AnalysisEngine for FixedEngine {
        fn push_data(&mut self, _: &[BipolarSample]) -> Result<(), EngineError> {
            Ok(())
        }
        fn process(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn is_both_sides_artifacted(&self) -> bool {
            self.both
        }
        fn is_artifacted_sequence(&self) -> bool {
            self.seq
        }
        fn calibration_percent(&self) -> i32 {
            self.percent
        }
        fn calibration_finished(&self) -> Result<bool, EngineError> {
            self.finished
                .ok_or_else(|| EngineError::Calibration("unsupported".into()))
        }
        fn read_mental_results(&mut self) -> Vec<MentalRecord> {
            std::mem::take(&mut self.mental)
        }
        fn read_spectral_results(&mut self) -> Vec<SpectralRecord> {
            std::mem::take(&mut self.spectral)
        }
        fn start_calibration(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn test_normalize_fraction() {
        assert_eq!(normalize_fraction(45.0), 0.45);
        assert_eq!(normalize_fraction(0.72), 0.72);
        assert_eq!(normalize_fraction(1.0), 1.0);
        assert_eq!(normalize_fraction(250.0), 1.0);
        assert_eq!(normalize_fraction(-3.0), 0.0);
        assert_eq!(normalize_fraction(f64::NAN), 0.0);
    }

    #[test]
    fn test_defaults_before_first_record() {
        let mut engine = FixedEngine::default();
        let mut tracker = CalibrationTracker::new();
        let read = AnalysisReader::new().read(&mut engine, &mut tracker);
        assert_eq!(read.snapshot, AnalysisSnapshot::default());
        assert_eq!(read.calibration, CalibrationUpdate::Unchanged);
    }

    #[test]
    fn test_reads_latest_and_clamps() {
        let mut engine = FixedEngine {
            seq: true,
            percent: 140,
            finished: None,
            mental: vec![
                MentalRecord { rel_attention: 0.1, rel_relaxation: 0.2 },
                MentalRecord { rel_attention: 1.7, rel_relaxation: f64::NAN },
            ],
            spectral: vec![SpectralRecord { alpha: 45.0, beta: 0.3, theta: 12.5 }],
            ..Default::default()
        };
        let mut tracker = CalibrationTracker::new();
        let mut reader = AnalysisReader::new();
        let read = reader.read(&mut engine, &mut tracker);
        let s = read.snapshot;

        assert!(s.is_artifacted);
        assert_eq!(s.calibration_percent, 100);
        assert_eq!(s.attention, 1.0);
        assert_eq!(s.relaxation, 0.0);
        assert_eq!(s.alpha, 0.45);
        assert_eq!(s.beta, 0.3);
        assert_eq!(s.theta, 0.125);
        assert_eq!(read.calibration, CalibrationUpdate::Completed);

        // No new records: the previous ones are kept.
        let again = reader.read(&mut engine, &mut tracker).snapshot;
        assert_eq!(again.alpha, 0.45);
        assert_eq!(again.attention, 1.0);
    }

    #[test]
    fn test_spectral_field_table() {
        let Value::Object(fields) = json!({"AlphaProcent": 40.0, "betaP": 0.25, "index": 12})
        else {
            unreachable!()
        };
        let r = SpectralRecord::from_fields(&fields).unwrap();
        assert_eq!(r, SpectralRecord { alpha: 40.0, beta: 0.25, theta: 12.0 });
    }

    #[test]
    fn test_spectral_field_table_fails_loudly() {
        let Value::Object(fields) = json!({"alpha": 0.4, "gamma": 0.1, "theta": 0.2}) else {
            unreachable!()
        };
        match SpectralRecord::from_fields(&fields) {
            Err(EngineError::UnrecognizedSpectralRecord { band, .. }) => assert_eq!(band, "beta"),
            other => panic!("expected unrecognised record, got {other:?}"),
        }
    }
}
