//! Capabilities consumed by the session core.
//!
//! The headset driver, the discovery backend and the analysis engine are all
//! external collaborators.  They are modelled as object-safe traits so the
//! session can be driven by real hardware, by [`crate::sim`], or by test
//! doubles without any change to the control flow.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisEngine;
use crate::error::{DeviceCommandError, DeviceError, EngineError};
use crate::protocol::EngineSettings;
use crate::types::{
    ConnectionState, DeviceDescriptor, RawSignalSample, ResistanceSample, SensorFamily,
};

/// Mode commands understood by the headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorCommand {
    StartSignal,
    StopSignal,
    StartResist,
    StopResist,
}

/// Invoked by the driver on its own delivery thread with a burst of samples.
pub type SignalCallback = Box<dyn Fn(Vec<RawSignalSample>) + Send + Sync>;

/// Invoked by the driver with one resistance reading.
pub type ResistCallback = Box<dyn Fn(ResistanceSample) + Send + Sync>;

/// Invoked by the driver when the link state changes.
pub type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// A connected headset.
///
/// The command interface is **not** safe to call re-entrantly from several
/// tasks; every mode change goes through [`crate::arbiter::ModeArbiter`],
/// which serialises them.
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn exec_command(&self, command: SensorCommand) -> Result<(), DeviceCommandError>;

    fn state(&self) -> ConnectionState;

    /// Install (`Some`) or clear (`None`) the signal-data callback.
    fn set_signal_callback(&self, callback: Option<SignalCallback>);

    fn set_resist_callback(&self, callback: Option<ResistCallback>);

    fn set_state_callback(&self, callback: Option<StateCallback>);

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Release driver resources.  Must be called after [`Sensor::disconnect`].
    fn close(&self);
}

/// A discovery handle for one sensor family.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn start(&self) -> Result<(), DeviceError>;

    async fn stop(&self) -> Result<(), DeviceError>;

    fn close(&self);

    /// Devices seen since the last [`Scanner::start`].
    async fn sensors(&self) -> Vec<DeviceDescriptor>;

    async fn create_sensor(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<dyn Sensor>, DeviceError>;
}

/// Factory for the per-session collaborators.
///
/// One implementation exists per platform: [`crate::sim::SimBackend`] runs
/// everything in-process, [`crate::ble::BleBackend`] discovers real headsets.
pub trait Backend: Send + Sync {
    fn open_scanner(&self, family: SensorFamily) -> Result<Arc<dyn Scanner>, DeviceError>;

    fn create_engine(
        &self,
        settings: &EngineSettings,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError>;
}
