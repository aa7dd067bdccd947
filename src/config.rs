//! Session configuration.
//!
//! Every fixed delay, retry count and smoothing factor used by the session
//! lives here with its reference value as the default.  A JSON file may
//! override any subset:
//!
//! ```json
//! { "timings": { "settle_ms": 750 }, "smoothing": { "live_factor": 0.1 } }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{EngineSettings, ModeTimings};
use crate::smoothing::{DEMO_FACTOR, EMIT_INTERVAL, LIVE_FACTOR};

/// Bounded discovery poll used when no cached descriptor matches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub attempts: u32,
    pub interval_ms: u64,
    /// Pause after creating a sensor from a cached descriptor before issuing
    /// the first command.
    pub direct_connect_settle_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            attempts: 6,
            interval_ms: 250,
            direct_connect_settle_ms: 150,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn direct_connect_settle(&self) -> Duration {
        Duration::from_millis(self.direct_connect_settle_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub live_factor: f64,
    pub demo_factor: f64,
    pub emit_interval_ms: u64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            live_factor: LIVE_FACTOR,
            demo_factor: DEMO_FACTOR,
            emit_interval_ms: EMIT_INTERVAL.as_millis() as u64,
        }
    }
}

impl SmoothingConfig {
    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }
}

/// Everything a [`crate::session::Session`] needs besides its backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timings: ModeTimings,
    pub discovery: DiscoveryConfig,
    pub smoothing: SmoothingConfig,
    /// Signal batches buffered between the driver and the processing task.
    pub queue_capacity: usize,
    /// Display events buffered before new ones are dropped.
    pub sink_capacity: usize,
    /// Start the periodic resistance check automatically after connecting.
    pub periodic_resistance_check: bool,
    pub engine: EngineSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timings: ModeTimings::default(),
            discovery: DiscoveryConfig::default(),
            smoothing: SmoothingConfig::default(),
            queue_capacity: 64,
            sink_capacity: 256,
            periodic_resistance_check: true,
            engine: EngineSettings::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid session config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
