//! Channel layout, sampling constants, device timing and analysis-engine
//! configuration for BrainBit headsets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Channels ──────────────────────────────────────────────────────────────────

/// Electrode names in [`crate::types::RawSignalSample::channels`] order.
pub const CHANNEL_NAMES: [&str; 4] = ["O1", "O2", "T3", "T4"];

/// Number of raw electrodes on the headset.
pub const NUM_CHANNELS: usize = 4;

/// EEG sample rate in Hz.
pub const SAMPLING_RATE: u32 = 250;

/// Advertised-name prefix used by every BrainBit model.
pub const NAME_PREFIX: &str = "BrainBit";

// ── Resistance thresholds ─────────────────────────────────────────────────────

/// Upper bounds (exclusive, Ω) of the resistance quality tiers.
///
/// | Tier | Range |
/// |---|---|
/// | excellent | `< 50 kΩ` |
/// | good | `< 200 kΩ` |
/// | fair | `< 500 kΩ` |
/// | poor | `< 2 MΩ` |
/// | no contact | `≥ 2 MΩ`, `∞`, `NaN` |
pub const EXCELLENT_BELOW_OHMS: f64 = 50_000.0;
pub const GOOD_BELOW_OHMS: f64 = 200_000.0;
pub const FAIR_BELOW_OHMS: f64 = 500_000.0;
pub const POOR_BELOW_OHMS: f64 = 2_000_000.0;

// ── Mode-switch timing ────────────────────────────────────────────────────────

/// Fixed delays used by [`crate::arbiter::ModeArbiter`].
///
/// These reflect how long the headset firmware needs between a command and
/// its effect.  They are configuration rather than literals so that hardware
/// revisions can be tuned without touching the control flow.
///
/// ```text
/// stop signal ─settle─▶ start resist ─window─▶ stop resist ─settle─▶ start signal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeTimings {
    /// Delay between session setup and the first periodic resistance check.
    pub initial_check_delay_ms: u64,
    /// Delay after each check attempt returns before the next one starts.
    pub check_interval_ms: u64,
    /// Settling time after stopping one mode before starting the other.
    pub settle_ms: u64,
    /// How long resistance mode stays on; resistance callbacks fire here.
    pub resistance_window_ms: u64,
    /// Pause between the best-effort stop and start of the recovery path.
    pub recovery_delay_ms: u64,
}

impl Default for ModeTimings {
    fn default() -> Self {
        Self {
            initial_check_delay_ms: 10_000,
            check_interval_ms: 30_000,
            settle_ms: 500,
            resistance_window_ms: 3_000,
            recovery_delay_ms: 400,
        }
    }
}

impl ModeTimings {
    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_millis(self.initial_check_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn resistance_window(&self) -> Duration {
        Duration::from_millis(self.resistance_window_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

// ── Analysis engine configuration ─────────────────────────────────────────────

/// The fixed configuration bundle handed to the analysis engine at
/// construction.
///
/// Defaults are the headset vendor's reference values for BrainBit at 250 Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub sampling_rate: u32,
    /// Samples between two processing steps.
    pub process_step: u32,
    /// Analysis window length in samples.
    pub process_window: u32,
    pub fft_window: u32,
    pub bipolar_mode: bool,
    pub channels_number: u32,
    pub channel_for_analysis: u32,

    // Artifact detection
    pub art_bord: u32,
    pub allowed_percent_artpoints: u32,
    pub raw_betap_limit: u32,
    pub total_pow_border: u32,
    pub global_artwin_sec: u32,
    pub spect_art_by_totalp: bool,
    pub hanning_win_spectrum: bool,
    pub hamming_win_spectrum: bool,
    pub num_wins_for_quality_avg: u32,

    // Short artifact detection
    pub short_art_amp: u32,
    pub short_art_total_amp: u32,
    pub short_art_win_ms: u32,

    // Mental / spectral estimation
    pub n_sec_for_instant_estimation: u32,
    pub n_sec_for_averaging: u32,

    /// Calibration length in seconds.
    pub calibration_length_secs: u32,
    /// `true` selects independent (non-relative) mental levels.
    pub independent_mental_levels: bool,
    pub skip_wins_after_artifact: u32,
    pub spect_normalization_by_bands_width: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sampling_rate: SAMPLING_RATE,
            process_step: 25,
            process_window: 1_000,
            fft_window: 4,
            bipolar_mode: true,
            channels_number: 4,
            channel_for_analysis: 0,
            art_bord: 110,
            allowed_percent_artpoints: 70,
            raw_betap_limit: 800_000,
            total_pow_border: 400_000_000,
            global_artwin_sec: 4,
            spect_art_by_totalp: true,
            hanning_win_spectrum: false,
            hamming_win_spectrum: true,
            num_wins_for_quality_avg: 125,
            short_art_amp: 200,
            short_art_total_amp: 200,
            short_art_win_ms: 25,
            n_sec_for_instant_estimation: 4,
            n_sec_for_averaging: 2,
            calibration_length_secs: 6,
            independent_mental_levels: false,
            skip_wins_after_artifact: 10,
            spect_normalization_by_bands_width: true,
        }
    }
}

impl EngineSettings {
    /// Number of samples the engine needs to finish calibration.
    pub fn calibration_samples(&self) -> u64 {
        u64::from(self.calibration_length_secs) * u64::from(self.sampling_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let t = ModeTimings::default();
        assert_eq!(t.initial_check_delay(), Duration::from_secs(10));
        assert_eq!(t.check_interval(), Duration::from_secs(30));
        assert_eq!(t.settle() * 2 + t.resistance_window(), Duration::from_secs(4));
        assert!((300..=500).contains(&t.recovery_delay_ms));
    }

    #[test]
    fn test_calibration_samples() {
        assert_eq!(EngineSettings::default().calibration_samples(), 1_500);
    }

    #[test]
    fn test_partial_timings_deserialize_with_defaults() {
        let t: ModeTimings = serde_json::from_str(r#"{"settle_ms": 750}"#).unwrap();
        assert_eq!(t.settle_ms, 750);
        assert_eq!(t.check_interval_ms, 30_000);
    }
}
