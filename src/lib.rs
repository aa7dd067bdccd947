//! # brainbit-rs
//!
//! Async Rust session core for [BrainBit](https://brainbit.com/) 4-channel
//! dry-electrode EEG headsets.
//!
//! The headset is half-duplex: it either streams EEG or measures electrode
//! resistance, never both.  This crate runs a session that keeps EEG flowing
//! into an analysis engine while periodically interrupting it to check
//! electrode contact, and turns the engine's noisy output into smoothed,
//! display-ready metrics.
//!
//! ## Electrodes
//!
//! | Channel | Position | Used in |
//! |---|---|---|
//! | O1 | left occipital | `ch1 = T3 − O1` |
//! | O2 | right occipital | `ch2 = T4 − O2` |
//! | T3 | left temporal | `ch1` |
//! | T4 | right temporal | `ch2` |
//!
//! ## Quick start
//!
//! ```no_run
//! use brainbit_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SimBackend::new();
//!     let mut ctx = ConnectionContext::new();
//!     let (session, mut rx) = Session::connect(
//!         &backend,
//!         &SessionConfig::default(),
//!         &mut ctx,
//!         Some(SIM_ADDRESS),
//!         None,
//!     )
//!     .await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             SessionEvent::Metrics(m) => println!("attention {:.0}%", m.attention * 100.0),
//!             SessionEvent::Resistance(r) => println!("{r}"),
//!             SessionEvent::Disconnected => break,
//!             _ => {}
//!         }
//!     }
//!     session.disconnect(&mut ctx).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`session`] | Connect, wire callbacks, tear down; [`session::ConnectionContext`] |
//! | [`arbiter`] | Signal/resistance mode state machine and periodic check |
//! | [`pipeline`] | Per-batch processing from raw samples to display events |
//! | [`analysis`] | Analysis engine contract and result normalisation |
//! | [`calibration`] | Calibration lifecycle |
//! | [`smoothing`] | Exponential moving averages with throttled emission |
//! | [`resistance`] | Contact-quality tiers and display text |
//! | [`bipolar`] | Bipolar derivation |
//! | [`queue`] | Bounded drop-oldest queue from driver thread to processing task |
//! | [`sink`] | Non-blocking display event sender |
//! | [`device`] | Sensor, scanner and backend traits |
//! | [`sim`] | Simulated headset, scanner and engine |
//! | `ble` | Bluetooth discovery (feature `ble`) |
//! | [`config`] | Session configuration |
//! | [`types`] | Data and event types |
//! | [`protocol`] | Channel layout, thresholds, timings, engine settings |
//! | [`error`] | Error types |

pub mod analysis;
pub mod arbiter;
pub mod bipolar;
#[cfg(feature = "ble")]
pub mod ble;
pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
#[cfg(test)]
mod mock;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod resistance;
pub mod session;
pub mod sim;
pub mod sink;
pub mod smoothing;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
///
/// ```no_run
/// use brainbit_rs::prelude::*;
/// ```
pub mod prelude {
    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::arbiter::MeasureOutcome;
    pub use crate::config::SessionConfig;
    pub use crate::session::{ConnectionContext, Session, SessionStats};

    // ── Capabilities ──────────────────────────────────────────────────────────
    pub use crate::analysis::AnalysisEngine;
    pub use crate::device::{Backend, Scanner, Sensor, SensorCommand};
    pub use crate::sim::{SimBackend, SIM_ADDRESS};

    #[cfg(feature = "ble")]
    pub use crate::ble::BleBackend;

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::resistance::{ResistanceQuality, ResistanceReport};
    pub use crate::types::{
        AcquisitionMode, AnalysisSnapshot, CalibrationState, ChannelReadout, ConnectionState,
        DeviceDescriptor, RawSignalSample, ResistanceSample, SensorFamily, SessionEvent,
        SmoothedMetrics,
    };

    // ── Errors ────────────────────────────────────────────────────────────────
    pub use crate::error::{DeviceError, SessionError};

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{CHANNEL_NAMES, SAMPLING_RATE};
}
