use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resistance::ResistanceReport;

// ── Raw telemetry ─────────────────────────────────────────────────────────────

/// One multi-channel EEG sample as delivered by the headset driver.
///
/// BrainBit places its four dry electrodes at the occipital (O1, O2) and
/// temporal (T3, T4) positions.  Values are in volts, exactly as reported by
/// the driver; no scaling is applied anywhere in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSignalSample {
    /// Packet sequence number assigned by the device.
    ///
    /// Several samples share one packet number when the driver unpacks a
    /// single BLE notification into multiple samples.
    pub pack_num: u32,
    pub o1: f64,
    pub o2: f64,
    pub t3: f64,
    pub t4: f64,
}

impl RawSignalSample {
    /// The four channel voltages in [`crate::protocol::CHANNEL_NAMES`] order.
    pub fn channels(&self) -> [f64; 4] {
        [self.o1, self.o2, self.t3, self.t4]
    }
}

/// A bipolar derivation pair consumed by the analysis engine.
///
/// * `ch1 = T3 − O1` (left hemisphere)
/// * `ch2 = T4 − O2` (right hemisphere)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BipolarSample {
    pub ch1: f64,
    pub ch2: f64,
}

/// One resistance (electrode impedance) reading, in ohms.
///
/// A value of `+∞` means the electrode is not touching the skin at all;
/// `NaN` means the driver could not compute a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResistanceSample {
    pub o1: f64,
    pub o2: f64,
    pub t3: f64,
    pub t4: f64,
}

impl ResistanceSample {
    pub fn channels(&self) -> [f64; 4] {
        [self.o1, self.o2, self.t3, self.t4]
    }
}

// ── Analysis output ───────────────────────────────────────────────────────────

/// Normalised result of one analysis cycle.
///
/// Produced by [`crate::analysis::AnalysisReader`] after every
/// push + process call.  Every numeric field is finite and lies in `[0, 1]`;
/// `calibration_percent` lies in `[0, 100]`.  Only the latest snapshot is
/// meaningful; nothing is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub attention: f64,
    pub relaxation: f64,
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    pub is_artifacted: bool,
    pub calibration_percent: u8,
}

/// EMA-filtered copy of the numeric fields of an [`AnalysisSnapshot`].
///
/// This is what the display layer shows.  See [`crate::smoothing`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SmoothedMetrics {
    pub attention: f64,
    pub relaxation: f64,
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
}

impl SmoothedMetrics {
    /// Band fractions as percentages `(alpha, beta, theta)` for display.
    pub fn spectral_percents(&self) -> (f64, f64, f64) {
        (self.alpha * 100.0, self.beta * 100.0, self.theta * 100.0)
    }
}

// ── Mode and lifecycle state ──────────────────────────────────────────────────

/// Which acquisition mode the headset is currently configured for.
///
/// The device is half-duplex: it either streams EEG (`Signal`) or measures
/// electrode impedance (`Resistance`), never both.  The two `Transitioning*`
/// variants cover the settling delays between commands.  The authoritative
/// value lives inside [`crate::arbiter::ModeArbiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    /// No acquisition command has been issued yet.
    Idle,
    Signal,
    TransitioningToResistance,
    Resistance,
    TransitioningToSignal,
    /// Session ended.  Terminal; no further device commands are issued.
    Stopped,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquisitionMode::Idle => "idle",
            AcquisitionMode::Signal => "signal",
            AcquisitionMode::TransitioningToResistance => "entering resistance",
            AcquisitionMode::Resistance => "resistance",
            AcquisitionMode::TransitioningToSignal => "leaving resistance",
            AcquisitionMode::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Calibration lifecycle as reported by [`crate::calibration::CalibrationTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationState {
    NotStarted,
    /// Percent complete.  `0` only right after a manual restart; values
    /// reported by the engine are `1..=99`.
    InProgress(u8),
    Complete,
}

/// Link state reported by the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    InRange,
    OutOfRange,
}

/// Headset families the session knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorFamily {
    /// BrainBit (LE): four channels O1, O2, T3, T4.
    BrainBit,
    /// Anything else seen during discovery.  Never connected to.
    Other,
}

/// A headset seen during discovery.
///
/// Kept in [`crate::session::ConnectionContext`] after a successful connect so
/// a later session can reconnect directly without scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Platform BLE address (MAC on Linux/Android, UUID on macOS).
    pub address: String,
    /// Advertised name, e.g. `"BrainBit"`.
    pub name: String,
    pub family: SensorFamily,
}

impl DeviceDescriptor {
    /// Case-insensitive address comparison.
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

// ── Display events ────────────────────────────────────────────────────────────

/// Latest raw channel values shown on the live screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReadout {
    /// Last sample of the batch.
    pub sample: RawSignalSample,
    /// Largest of the four channel voltages in that sample.
    pub peak: f64,
    /// Signal batches received so far in this session.
    pub batches: u64,
}

/// Push-style updates for the display layer.
///
/// Delivered through a bounded channel with `try_send`; every variant is a
/// full replacement of the corresponding on-screen value, so dropping or
/// coalescing updates under load is harmless.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection status line.
    Status(String),
    Channels(ChannelReadout),
    Resistance(ResistanceReport),
    /// `true` when the engine flagged the current window as artifacted.
    Artifacts(bool),
    Metrics(SmoothedMetrics),
    Calibration(CalibrationState),
    /// Calibration progress or attention text, e.g. `"Attention: 42.0%"`.
    Engagement(String),
    Mode(AcquisitionMode),
    /// Recoverable problem worth showing once (failed resistance check,
    /// analysis disabled, …).
    Warning(String),
    /// Fatal for the session.
    Error(String),
    /// The device link is gone.
    Disconnected,
}
