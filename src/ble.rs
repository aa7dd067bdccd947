//! Bluetooth LE discovery via btleplug.
//!
//! Lists nearby BrainBit headsets (address, advertised name, family).  Opening
//! a headset needs the vendor wire-protocol driver, which this crate does not
//! ship: [`Scanner::create_sensor`] therefore reports
//! [`DeviceError::NoDriver`], and a session started on [`BleBackend`] ends
//! with that error after discovery succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::analysis::AnalysisEngine;
use crate::device::{Backend, Scanner, Sensor};
use crate::error::{DeviceError, EngineError};
use crate::protocol::{EngineSettings, NAME_PREFIX};
use crate::types::{DeviceDescriptor, SensorFamily};

fn backend_err(e: btleplug::Error) -> DeviceError {
    DeviceError::Backend(e.to_string())
}

/// Family implied by an advertised name.
pub fn family_for_name(name: &str) -> SensorFamily {
    if name.starts_with(NAME_PREFIX) {
        SensorFamily::BrainBit
    } else {
        SensorFamily::Other
    }
}

async fn first_adapter() -> Result<Adapter, DeviceError> {
    let manager = Manager::new().await.map_err(backend_err)?;
    let adapter = manager
        .adapters()
        .await
        .map_err(backend_err)?
        .into_iter()
        .next()
        .ok_or_else(|| DeviceError::Backend("No Bluetooth adapter found".into()))?;

    // CoreBluetooth starts in an "unknown" state; scanning before it reports
    // PoweredOn is a silent no-op.
    #[cfg(target_os = "macos")]
    {
        use btleplug::api::CentralState;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => break,
                Ok(state) if tokio::time::Instant::now() >= deadline => {
                    warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                    break;
                }
                Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
                Err(e) => {
                    warn!("macOS: adapter_state() error: {e}");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    Ok(adapter)
}

/// Discovery handle for one sensor family on the first Bluetooth adapter.
pub struct BleScanner {
    family: SensorFamily,
    adapter: Mutex<Option<Adapter>>,
}

impl BleScanner {
    pub fn new(family: SensorFamily) -> Self {
        Self {
            family,
            adapter: Mutex::new(None),
        }
    }

    /// Scan for `duration` and return every headset of this family seen.
    pub async fn scan_for(&self, duration: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        self.start().await?;
        info!("Scanning for {} s …", duration.as_secs());
        tokio::time::sleep(duration).await;
        let found = self.sensors().await;
        self.stop().await?;
        info!("{} device(s) found", found.len());
        Ok(found)
    }
}

#[async_trait]
impl Scanner for BleScanner {
    async fn start(&self) -> Result<(), DeviceError> {
        let mut slot = self.adapter.lock().await;
        if slot.is_none() {
            *slot = Some(first_adapter().await?);
        }
        if let Some(adapter) = slot.as_ref() {
            adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        if let Some(adapter) = self.adapter.lock().await.as_ref() {
            adapter.stop_scan().await.map_err(backend_err)?;
        }
        Ok(())
    }

    fn close(&self) {
        // Dropping the adapter ends the scan; if the lock is busy the
        // scanner is about to be dropped anyway.
        if let Ok(mut slot) = self.adapter.try_lock() {
            slot.take();
        }
    }

    async fn sensors(&self) -> Vec<DeviceDescriptor> {
        let slot = self.adapter.lock().await;
        let Some(adapter) = slot.as_ref() else {
            return Vec::new();
        };
        let peripherals = match adapter.peripherals().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Listing peripherals failed: {e}");
                return Vec::new();
            }
        };
        let mut found = Vec::new();
        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                if let Some(name) = props.local_name {
                    let family = family_for_name(&name);
                    if family == self.family {
                        let address = p.id().to_string();
                        debug!("Found {name}  id={address}");
                        found.push(DeviceDescriptor {
                            address,
                            name,
                            family,
                        });
                    }
                }
            }
        }
        found
    }

    async fn create_sensor(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<dyn Sensor>, DeviceError> {
        Err(DeviceError::NoDriver(format!(
            "{} ({})",
            descriptor.name, descriptor.address
        )))
    }
}

/// Real Bluetooth discovery; no analysis engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BleBackend;

impl Backend for BleBackend {
    fn open_scanner(&self, family: SensorFamily) -> Result<Arc<dyn Scanner>, DeviceError> {
        if family != SensorFamily::BrainBit {
            return Err(DeviceError::UnsupportedFamily(family));
        }
        Ok(Arc::new(BleScanner::new(family)))
    }

    fn create_engine(
        &self,
        _settings: &EngineSettings,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        Err(EngineError::Init(
            "no analysis engine linked for Bluetooth sessions".into(),
        ))
    }
}
