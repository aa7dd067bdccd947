//! In-process stand-ins for the headset, the discovery backend and the
//! analysis engine.
//!
//! `--simulate` runs the complete session on top of these: a
//! [`SimulatedSensor`] streams synthetic 250 Hz EEG in 40 ms bursts while in
//! signal mode and plausible electrode resistances while in resistance mode;
//! a [`SimulatedEngine`] calibrates over the configured number of seconds
//! and then reports attention and band percentages derived from the pushed
//! data.  [`DemoFeed`] is the even simpler no-device metric stream.

use std::collections::HashSet;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisEngine, MentalRecord, SpectralRecord};
use crate::device::{
    Backend, ResistCallback, Scanner, Sensor, SensorCommand, SignalCallback, StateCallback,
};
use crate::error::{DeviceCommandError, DeviceError, EngineError};
use crate::protocol::{EngineSettings, SAMPLING_RATE};
use crate::smoothing::MetricsSmoother;
use crate::types::{
    AnalysisSnapshot, BipolarSample, ConnectionState, DeviceDescriptor, RawSignalSample,
    ResistanceSample, SensorFamily, SmoothedMetrics,
};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Address advertised by the simulated headset.
pub const SIM_ADDRESS: &str = "00:11:22:33:44:55";
pub const SIM_NAME: &str = "BrainBit (simulated)";

/// Samples per signal callback.  10 samples at 250 Hz = one burst every 40 ms.
pub const BATCH_SAMPLES: usize = 10;

/// Resistance readings are delivered every this many bursts (~0.5 s).
const RESIST_EVERY: u64 = 12;

// ── Waveforms ─────────────────────────────────────────────────────────────────

/// Synthetic EEG voltage for electrode `ch` at time `t` (s).
///
/// Alpha (10 Hz) + beta (22 Hz) + theta (6 Hz) with a per-channel phase
/// offset, plus deterministic pseudo-random noise.  Amplitude is in the tens
/// of microvolts.
pub fn sim_voltage(t: f64, ch: usize) -> f64 {
    let phi = ch as f64 * PI / 2.5;
    let alpha = 20.0 * (2.0 * PI * 10.0 * t + phi).sin();
    let beta = 6.0 * (2.0 * PI * 22.0 * t + phi * 1.7).sin();
    let theta = 10.0 * (2.0 * PI * 6.0 * t + phi * 0.9).sin();
    let nx = t * 1000.7 + ch as f64 * 137.508;
    let noise = ((nx.sin() * 9973.1).fract() - 0.5) * 8.0;
    (alpha + beta + theta + noise) * 1e-6
}

/// Synthetic electrode resistances at time `t` (s).
///
/// O1 sits firmly, O2 and T3 drift through the middle tiers and T4 loses
/// contact for ten seconds out of every thirty.
pub fn sim_resistance(t: f64) -> ResistanceSample {
    let wobble = |period: f64, lo: f64, hi: f64| {
        lo + (hi - lo) * 0.5 * (1.0 + (2.0 * PI * t / period).sin())
    };
    let t4 = if (t as u64 / 10) % 3 == 2 {
        f64::INFINITY
    } else {
        wobble(17.0, 600_000.0, 1_500_000.0)
    };
    ResistanceSample {
        o1: wobble(23.0, 20_000.0, 45_000.0),
        o2: wobble(31.0, 80_000.0, 190_000.0),
        t3: wobble(13.0, 150_000.0, 450_000.0),
        t4,
    }
}

// ── Sensor ────────────────────────────────────────────────────────────────────

type SharedSignal = Arc<dyn Fn(Vec<RawSignalSample>) + Send + Sync>;
type SharedResist = Arc<dyn Fn(ResistanceSample) + Send + Sync>;
type SharedState = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct SensorState {
    signal_on: bool,
    resist_on: bool,
    out_of_range: bool,
    closed: bool,
    failing: HashSet<SensorCommand>,
    on_signal: Option<SharedSignal>,
    on_resist: Option<SharedResist>,
    on_state: Option<SharedState>,
    commands: Vec<SensorCommand>,
}

/// A headset that lives in a background task.
pub struct SimulatedSensor {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<SensorState>>,
    token: CancellationToken,
}

fn lock(state: &Mutex<SensorState>) -> MutexGuard<'_, SensorState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimulatedSensor {
    /// Create the sensor and start its delivery task.  Must be called inside
    /// a tokio runtime.
    pub fn spawn(descriptor: DeviceDescriptor, failing: HashSet<SensorCommand>) -> Arc<Self> {
        let state = Arc::new(Mutex::new(SensorState {
            failing,
            ..Default::default()
        }));
        let token = CancellationToken::new();
        tokio::spawn(deliver(Arc::clone(&state), token.clone()));
        info!("Simulated sensor {} created", descriptor.address);
        Arc::new(Self {
            descriptor,
            state,
            token,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Make `command` fail from now on.
    pub fn fail_command(&self, command: SensorCommand) {
        lock(&self.state).failing.insert(command);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    /// Commands accepted or rejected so far, in order.
    pub fn commands(&self) -> Vec<SensorCommand> {
        lock(&self.state).commands.clone()
    }

    /// Change the link state and notify the installed callback.
    pub fn set_link(&self, link: ConnectionState) {
        let cb = {
            let mut st = lock(&self.state);
            st.out_of_range = link == ConnectionState::OutOfRange;
            if st.out_of_range {
                st.signal_on = false;
                st.resist_on = false;
            }
            st.on_state.clone()
        };
        if let Some(cb) = cb {
            cb(link);
        }
    }
}

async fn deliver(state: Arc<Mutex<SensorState>>, token: CancellationToken) {
    let dt = 1.0 / f64::from(SAMPLING_RATE);
    let mut ticker = interval(Duration::from_secs_f64(BATCH_SAMPLES as f64 * dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut t = 0.0_f64;
    let mut tick = 0u64;
    let mut pack_num = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tick += 1;

        let (on_signal, on_resist) = {
            let st = lock(&state);
            (
                st.on_signal.clone().filter(|_| st.signal_on),
                st.on_resist.clone().filter(|_| st.resist_on),
            )
        };

        if let Some(cb) = on_signal {
            let batch = (0..BATCH_SAMPLES)
                .map(|i| {
                    let ts = t + i as f64 * dt;
                    // Two samples per BLE packet, as the real headset sends.
                    let s = RawSignalSample {
                        pack_num,
                        o1: sim_voltage(ts, 0),
                        o2: sim_voltage(ts, 1),
                        t3: sim_voltage(ts, 2),
                        t4: sim_voltage(ts, 3),
                    };
                    if i % 2 == 1 {
                        pack_num = pack_num.wrapping_add(1);
                    }
                    s
                })
                .collect();
            cb(batch);
        }
        if let Some(cb) = on_resist {
            if tick.is_multiple_of(RESIST_EVERY) {
                cb(sim_resistance(t));
            }
        }
        t += BATCH_SAMPLES as f64 * dt;
    }
    debug!("Simulated delivery task stopped");
}

#[async_trait]
impl Sensor for SimulatedSensor {
    async fn exec_command(&self, command: SensorCommand) -> Result<(), DeviceCommandError> {
        let mut st = lock(&self.state);
        st.commands.push(command);
        let reason = if st.closed {
            Some("sensor closed")
        } else if st.out_of_range {
            Some("device out of range")
        } else if st.failing.contains(&command) {
            Some("simulated command failure")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(DeviceCommandError {
                command,
                reason: reason.into(),
            });
        }
        match command {
            SensorCommand::StartSignal => st.signal_on = true,
            SensorCommand::StopSignal => st.signal_on = false,
            SensorCommand::StartResist => st.resist_on = true,
            SensorCommand::StopResist => st.resist_on = false,
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        let st = lock(&self.state);
        if st.closed || st.out_of_range {
            ConnectionState::OutOfRange
        } else {
            ConnectionState::InRange
        }
    }

    fn set_signal_callback(&self, callback: Option<SignalCallback>) {
        lock(&self.state).on_signal = callback.map(Arc::from);
    }

    fn set_resist_callback(&self, callback: Option<ResistCallback>) {
        lock(&self.state).on_resist = callback.map(Arc::from);
    }

    fn set_state_callback(&self, callback: Option<StateCallback>) {
        lock(&self.state).on_state = callback.map(Arc::from);
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut st = lock(&self.state);
        st.signal_on = false;
        st.resist_on = false;
        Ok(())
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.token.cancel();
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Discovery over a fixed list of simulated devices.
pub struct SimulatedScanner {
    devices: Vec<DeviceDescriptor>,
    failing: HashSet<SensorCommand>,
    scanning: Mutex<bool>,
    closed: Mutex<bool>,
}

impl SimulatedScanner {
    pub fn new(devices: Vec<DeviceDescriptor>, failing: HashSet<SensorCommand>) -> Self {
        Self {
            devices,
            failing,
            scanning: Mutex::new(false),
            closed: Mutex::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Scanner for SimulatedScanner {
    async fn start(&self) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Backend("scanner closed".into()));
        }
        *self.scanning.lock().unwrap_or_else(|e| e.into_inner()) = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        *self.scanning.lock().unwrap_or_else(|e| e.into_inner()) = false;
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    async fn sensors(&self) -> Vec<DeviceDescriptor> {
        let scanning = *self.scanning.lock().unwrap_or_else(|e| e.into_inner());
        if scanning {
            self.devices.clone()
        } else {
            Vec::new()
        }
    }

    async fn create_sensor(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<Arc<dyn Sensor>, DeviceError> {
        if descriptor.family != SensorFamily::BrainBit {
            return Err(DeviceError::UnsupportedFamily(descriptor.family));
        }
        if !self.devices.iter().any(|d| d.matches_address(&descriptor.address)) {
            return Err(DeviceError::NotConnected);
        }
        let sensor: Arc<dyn Sensor> =
            SimulatedSensor::spawn(descriptor.clone(), self.failing.clone());
        Ok(sensor)
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// A cheap analysis engine good enough to drive the display.
///
/// Calibration progresses with the number of pushed samples.  After
/// calibration every `process_step` samples yield one mental and one
/// spectral record.  Spectral values are reported as percentages, the way
/// some engine builds do, so the reader's normalisation is exercised.
pub struct SimulatedEngine {
    settings: EngineSettings,
    calibration_target: u64,
    calibrated_samples: u64,
    pending: u64,
    total: u64,
    recent_peak: f64,
    mental: Vec<MentalRecord>,
    spectral: Vec<SpectralRecord>,
}

/// Bipolar amplitude above which a window counts as artifacted.
const ARTIFACT_VOLTS: f64 = 500e-6;

impl SimulatedEngine {
    pub fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        if settings.sampling_rate == 0 || settings.process_step == 0 {
            return Err(EngineError::Init(
                "sampling rate and process step must be non-zero".into(),
            ));
        }
        Ok(Self {
            calibration_target: settings.calibration_samples().max(1),
            settings: settings.clone(),
            calibrated_samples: 0,
            pending: 0,
            total: 0,
            recent_peak: 0.0,
            mental: Vec::new(),
            spectral: Vec::new(),
        })
    }

    fn calibrated(&self) -> bool {
        self.calibrated_samples >= self.calibration_target
    }
}

impl AnalysisEngine for SimulatedEngine {
    fn push_data(&mut self, samples: &[BipolarSample]) -> Result<(), EngineError> {
        let n = samples.len() as u64;
        self.pending += n;
        self.total += n;
        self.calibrated_samples = (self.calibrated_samples + n).min(self.calibration_target);
        self.recent_peak = samples
            .iter()
            .map(|s| s.ch1.abs().max(s.ch2.abs()))
            .fold(0.0, f64::max);
        Ok(())
    }

    fn process(&mut self) -> Result<(), EngineError> {
        let step = u64::from(self.settings.process_step);
        while self.pending >= step {
            self.pending -= step;
            if !self.calibrated() {
                continue;
            }
            let t = self.total as f64 / f64::from(self.settings.sampling_rate);
            let attention = 0.5 + 0.3 * (2.0 * PI * t / 40.0).sin();
            self.mental.push(MentalRecord {
                rel_attention: attention,
                rel_relaxation: 1.0 - attention,
            });
            let alpha = 40.0 + 10.0 * (2.0 * PI * t / 25.0).sin();
            let beta = 25.0 + 8.0 * (2.0 * PI * t / 33.0).cos();
            self.spectral.push(SpectralRecord {
                alpha,
                beta,
                theta: (100.0 - alpha - beta).max(0.0) * 0.6,
            });
        }
        Ok(())
    }

    fn is_both_sides_artifacted(&self) -> bool {
        self.recent_peak > ARTIFACT_VOLTS
    }

    fn is_artifacted_sequence(&self) -> bool {
        false
    }

    fn calibration_percent(&self) -> i32 {
        (self.calibrated_samples * 100 / self.calibration_target) as i32
    }

    fn calibration_finished(&self) -> Result<bool, EngineError> {
        Ok(self.calibrated())
    }

    fn read_mental_results(&mut self) -> Vec<MentalRecord> {
        std::mem::take(&mut self.mental)
    }

    fn read_spectral_results(&mut self) -> Vec<SpectralRecord> {
        std::mem::take(&mut self.spectral)
    }

    fn start_calibration(&mut self) -> Result<(), EngineError> {
        self.calibrated_samples = 0;
        Ok(())
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// Everything simulated.
#[derive(Debug, Clone)]
pub struct SimBackend {
    devices: Vec<DeviceDescriptor>,
    failing: HashSet<SensorCommand>,
    engine_available: bool,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// One simulated BrainBit at [`SIM_ADDRESS`].
    pub fn new() -> Self {
        Self {
            devices: vec![DeviceDescriptor {
                address: SIM_ADDRESS.into(),
                name: SIM_NAME.into(),
                family: SensorFamily::BrainBit,
            }],
            failing: HashSet::new(),
            engine_available: true,
        }
    }

    /// Sensors created from now on reject `command`.
    pub fn with_failing_command(mut self, command: SensorCommand) -> Self {
        self.failing.insert(command);
        self
    }

    /// Make engine construction fail, so sessions run with analysis disabled.
    pub fn without_engine(mut self) -> Self {
        self.engine_available = false;
        self
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }
}

impl Backend for SimBackend {
    fn open_scanner(&self, family: SensorFamily) -> Result<Arc<dyn Scanner>, DeviceError> {
        let devices = self
            .devices
            .iter()
            .filter(|d| d.family == family)
            .cloned()
            .collect();
        Ok(Arc::new(SimulatedScanner::new(devices, self.failing.clone())))
    }

    fn create_engine(
        &self,
        settings: &EngineSettings,
    ) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        if !self.engine_available {
            return Err(EngineError::Init("analysis library not available".into()));
        }
        Ok(Box::new(SimulatedEngine::new(settings)?))
    }
}

// ── Demo feed ─────────────────────────────────────────────────────────────────

/// Synthetic metrics without any device, for the demo screen.
///
/// Produces one random-looking snapshot per call and smooths it with the
/// faster demo factor.
pub struct DemoFeed {
    smoother: MetricsSmoother,
    seed: u64,
}

impl DemoFeed {
    pub fn new(factor: f64, emit_interval: Duration) -> Self {
        Self {
            smoother: MetricsSmoother::new(factor, emit_interval),
            seed: 0x9E37_79B9_7F4A_7C15,
        }
    }

    // xorshift64*, uniform in [0, 1)
    fn next_unit(&mut self) -> f64 {
        self.seed ^= self.seed >> 12;
        self.seed ^= self.seed << 25;
        self.seed ^= self.seed >> 27;
        let v = self.seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
        (v >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Draw the next raw snapshot.  Band fractions sum to at most 1.
    pub fn next_snapshot(&mut self) -> AnalysisSnapshot {
        let alpha = 0.2 + 0.3 * self.next_unit();
        let beta = 0.1 + 0.3 * self.next_unit();
        let theta = (1.0 - alpha - beta) * self.next_unit();
        let attention = self.next_unit();
        AnalysisSnapshot {
            attention,
            relaxation: 1.0 - attention,
            alpha,
            beta,
            theta,
            is_artifacted: false,
            calibration_percent: 100,
        }
    }

    /// Advance one step; `Some` when the display should update.
    pub fn tick(&mut self, now: Instant) -> Option<SmoothedMetrics> {
        let snapshot = self.next_snapshot();
        self.smoother.update(&snapshot, now)
    }
}
