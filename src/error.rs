use thiserror::Error;

use crate::device::SensorCommand;
use crate::types::SensorFamily;

/// A single device command was rejected by the driver.
#[derive(Debug, Clone, Error)]
#[error("device rejected {command:?}: {reason}")]
pub struct DeviceCommandError {
    pub command: SensorCommand,
    pub reason: String,
}

/// Driver-level failures.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Command(#[from] DeviceCommandError),

    /// The device is not (or no longer) connected.
    #[error("device not connected")]
    NotConnected,

    #[error("unsupported sensor family: {0:?}")]
    UnsupportedFamily(SensorFamily),

    /// Discovery works for this transport but no wire-protocol driver is
    /// available to open the device.
    #[error("no driver available for {0}")]
    NoDriver(String),

    /// Bluetooth adapter / discovery backend failure.
    #[error("discovery backend error: {0}")]
    Backend(String),
}

/// Analysis engine failures.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("analysis engine could not be created: {0}")]
    Init(String),

    #[error("analysis engine processing failed: {0}")]
    Processing(String),

    /// A loosely typed spectral record carried none of the known field names
    /// for a band.
    #[error("spectral record has no recognised field for {band} (fields: {fields:?})")]
    UnrecognizedSpectralRecord {
        band: &'static str,
        fields: Vec<String>,
    },

    #[error("calibration state unavailable: {0}")]
    Calibration(String),
}

/// Errors surfaced to the user by [`crate::session::Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The caller did not say which headset to use.  No device interaction
    /// was attempted.
    #[error("no device address, reconnect from the main screen")]
    MissingAddress,

    /// No headset with the requested address showed up during the bounded
    /// discovery poll.
    #[error("{} not found, make sure it is switched on and nearby", display_target(.address, .name.as_deref()))]
    DiscoveryFailure {
        address: String,
        name: Option<String>,
    },

    /// Analysis is disabled for the session; raw channels keep streaming.
    #[error(transparent)]
    AnalysisEngineInit(EngineError),

    #[error(transparent)]
    DeviceCommand(#[from] DeviceCommandError),

    /// Mode recovery failed twice in a row.
    #[error("device disconnected")]
    DeviceDisconnected,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("device not connected")]
    NotConnected,

    #[error("analysis is disabled for this session")]
    AnalysisDisabled,

    /// The engine rejected a request after it was created.
    #[error(transparent)]
    Engine(EngineError),
}

fn display_target(address: &str, name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => format!("BrainBit ({n}, {address})"),
        _ => format!("BrainBit ({address})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_failure_message() {
        let e = SessionError::DiscoveryFailure {
            address: "AA:BB".into(),
            name: Some("BrainBit-7".into()),
        };
        assert_eq!(
            e.to_string(),
            "BrainBit (BrainBit-7, AA:BB) not found, make sure it is switched on and nearby"
        );
    }

    #[test]
    fn test_command_error_converts() {
        let e: SessionError = DeviceCommandError {
            command: SensorCommand::StartResist,
            reason: "gatt write failed".into(),
        }
        .into();
        assert!(e.to_string().contains("StartResist"));
    }
}
