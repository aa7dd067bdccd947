//! Test doubles for the device, discovery and analysis capabilities.
//!
//! Unlike [`crate::sim`], nothing here runs on its own: tests inject data
//! through the stored callbacks and inspect the recorded commands.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::analysis::{AnalysisEngine, MentalRecord, SpectralRecord};
use crate::device::{
    Backend, ResistCallback, Scanner, Sensor, SensorCommand, SignalCallback, StateCallback,
};
use crate::error::{DeviceCommandError, DeviceError, EngineError};
use crate::protocol::EngineSettings;
use crate::types::{
    BipolarSample, ConnectionState, DeviceDescriptor, RawSignalSample, ResistanceSample,
    SensorFamily,
};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

pub fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        address: ADDRESS.into(),
        name: "BrainBit".into(),
        family: SensorFamily::BrainBit,
    }
}

pub fn batch(start: u32, n: u32) -> Vec<RawSignalSample> {
    (start..start + n)
        .map(|i| RawSignalSample {
            pack_num: i,
            o1: f64::from(i),
            o2: 0.0,
            t3: 0.0,
            t4: 0.0,
        })
        .collect()
}

// ── Sensor ────────────────────────────────────────────────────────────────────

pub struct MockSensor {
    commands: Mutex<Vec<SensorCommand>>,
    failing: Mutex<HashSet<SensorCommand>>,
    link: Mutex<ConnectionState>,
    /// Delivered through the resist callback whenever `StartResist` succeeds.
    reading: Mutex<Option<ResistanceSample>>,
    signal_cb: Mutex<Option<SignalCallback>>,
    resist_cb: Mutex<Option<ResistCallback>>,
    state_cb: Mutex<Option<StateCallback>>,
    /// How long each command takes to complete.
    latency: Mutex<Duration>,
    running: AtomicUsize,
    /// Highest number of `exec_command` calls seen running at once.
    pub peak_concurrency: AtomicUsize,
    pub disconnected: AtomicBool,
    pub closed: AtomicBool,
}

impl MockSensor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            link: Mutex::new(ConnectionState::InRange),
            reading: Mutex::new(None),
            signal_cb: Mutex::new(None),
            resist_cb: Mutex::new(None),
            state_cb: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            running: AtomicUsize::new(0),
            peak_concurrency: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn fail(&self, command: SensorCommand) {
        self.failing.lock().unwrap().insert(command);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn commands(&self) -> Vec<SensorCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_reading(&self, sample: ResistanceSample) {
        *self.reading.lock().unwrap() = Some(sample);
    }

    pub fn set_link(&self, state: ConnectionState) {
        *self.link.lock().unwrap() = state;
        if let Some(cb) = self.state_cb.lock().unwrap().as_ref() {
            cb(state);
        }
    }

    pub fn emit_signal(&self, samples: Vec<RawSignalSample>) {
        if let Some(cb) = self.signal_cb.lock().unwrap().as_ref() {
            cb(samples);
        }
    }

    pub fn has_callbacks(&self) -> bool {
        self.signal_cb.lock().unwrap().is_some()
            || self.resist_cb.lock().unwrap().is_some()
            || self.state_cb.lock().unwrap().is_some()
    }
}

#[async_trait]
impl Sensor for MockSensor {
    async fn exec_command(&self, command: SensorCommand) -> Result<(), DeviceCommandError> {
        self.commands.lock().unwrap().push(command);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrency.fetch_max(running, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&command) {
            return Err(DeviceCommandError {
                command,
                reason: "rejected by mock".into(),
            });
        }
        if command == SensorCommand::StartResist {
            let reading = *self.reading.lock().unwrap();
            if let (Some(sample), Some(cb)) = (reading, self.resist_cb.lock().unwrap().as_ref()) {
                cb(sample);
            }
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.link.lock().unwrap()
    }

    fn set_signal_callback(&self, callback: Option<SignalCallback>) {
        *self.signal_cb.lock().unwrap() = callback;
    }

    fn set_resist_callback(&self, callback: Option<ResistCallback>) {
        *self.resist_cb.lock().unwrap() = callback;
    }

    fn set_state_callback(&self, callback: Option<StateCallback>) {
        *self.state_cb.lock().unwrap() = callback;
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

pub struct MockScanner {
    devices: Vec<DeviceDescriptor>,
    sensor: Arc<MockSensor>,
    pub started: AtomicBool,
    pub closed: AtomicBool,
    pub sensors_calls: AtomicUsize,
    pub created: AtomicUsize,
}

impl MockScanner {
    pub fn new(devices: Vec<DeviceDescriptor>, sensor: Arc<MockSensor>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            sensor,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sensors_calls: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn start(&self) -> Result<(), DeviceError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn sensors(&self) -> Vec<DeviceDescriptor> {
        self.sensors_calls.fetch_add(1, Ordering::SeqCst);
        self.devices.clone()
    }

    async fn create_sensor(
        &self,
        _descriptor: &DeviceDescriptor,
    ) -> Result<Arc<dyn Sensor>, DeviceError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let sensor: Arc<dyn Sensor> = self.sensor.clone();
        Ok(sensor)
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Records every bipolar sample it receives and never produces results.
pub struct RecordingEngine {
    pub pushed: Arc<Mutex<Vec<BipolarSample>>>,
}

impl AnalysisEngine for RecordingEngine {
    fn push_data(&mut self, samples: &[BipolarSample]) -> Result<(), EngineError> {
        self.pushed.lock().unwrap().extend_from_slice(samples);
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
        0
    }
    fn calibration_finished(&self) -> Result<bool, EngineError> {
        Ok(false)
    }
    fn read_mental_results(&mut self) -> Vec<MentalRecord> {
        Vec::new()
    }
    fn read_spectral_results(&mut self) -> Vec<SpectralRecord> {
        Vec::new()
    }
    fn start_calibration(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct MockBackend {
    pub scanner: Arc<MockScanner>,
    pub sensor: Arc<MockSensor>,
    pub pushed: Arc<Mutex<Vec<BipolarSample>>>,
    pub engine_fails: bool,
    pub scanners_opened: AtomicUsize,
}

impl MockBackend {
    /// One discoverable headset at [`ADDRESS`].
    pub fn new() -> Self {
        Self::with_devices(vec![descriptor()])
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let sensor = MockSensor::new();
        Self {
            scanner: MockScanner::new(devices, Arc::clone(&sensor)),
            sensor,
            pushed: Arc::new(Mutex::new(Vec::new())),
            engine_fails: false,
            scanners_opened: AtomicUsize::new(0),
        }
    }
}

impl Backend for MockBackend {
    fn open_scanner(&self, _family: SensorFamily) -> Result<Arc<dyn Scanner>, DeviceError> {
        self.scanners_opened.fetch_add(1, Ordering::SeqCst);
        let scanner: Arc<dyn Scanner> = self.scanner.clone();
        Ok(scanner)
    }

    fn create_engine(
        &self,
        _settings: &EngineSettings,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        if self.engine_fails {
            return Err(EngineError::Init("license check failed".into()));
        }
        Ok(Box::new(RecordingEngine {
            pushed: Arc::clone(&self.pushed),
        }))
    }
}
