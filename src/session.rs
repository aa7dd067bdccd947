//! Connection session: discovery, wiring and teardown.
//!
//! A [`Session`] owns one connected sensor for its whole lifetime together
//! with the discovery handle that produced it, the [`ModeArbiter`], the
//! [`TelemetryPipeline`] and the background tasks that connect them:
//!
//! ```text
//!  driver thread                     tokio tasks
//! ───────────────                   ─────────────────────────────────────────
//!  signal cb ──push──▶ SampleQueue ──recv──▶ processing ──▶ TelemetryPipeline
//!  resist cb ────────────────────────────▶ ModeArbiter::on_resistance
//!  state cb  ──try_send──▶ watcher ──────▶ ModeArbiter::on_connection_state
//!                                          ModeArbiter scheduler (periodic)
//!                          all of the above ──▶ DisplaySink ──▶ display
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::arbiter::{ArbiterStats, MeasureOutcome, ModeArbiter};
use crate::config::SessionConfig;
use crate::device::{Backend, Scanner, Sensor};
use crate::error::{DeviceError, SessionError};
use crate::pipeline::{PipelineStats, TelemetryPipeline};
use crate::queue::SampleQueue;
use crate::sink::DisplaySink;
use crate::types::{
    AcquisitionMode, CalibrationState, ConnectionState, DeviceDescriptor, RawSignalSample,
    ResistanceSample, SensorFamily, SessionEvent,
};

// ── ConnectionContext ─────────────────────────────────────────────────────────

/// The last headset a session connected to.
///
/// Owned by the application and passed into [`Session::connect`].  Filled on
/// every successful connect so the next session for the same address can
/// skip discovery; emptied by [`Session::disconnect`] or [`clear`](Self::clear)
/// on an app-level reset.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    descriptor: Option<DeviceDescriptor>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, descriptor: DeviceDescriptor) {
        self.descriptor = Some(descriptor);
    }

    /// The cached descriptor, if it belongs to `address`.
    pub fn cached_for(&self, address: &str) -> Option<&DeviceDescriptor> {
        self.descriptor
            .as_ref()
            .filter(|d| d.matches_address(address))
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn clear(&mut self) {
        self.descriptor = None;
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub pipeline: PipelineStats,
    pub arbiter: ArbiterStats,
    /// Signal batches discarded because the processing task fell behind.
    pub dropped_batches: u64,
    pub dropped_samples: u64,
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct Session {
    descriptor: DeviceDescriptor,
    sensor: Arc<dyn Sensor>,
    scanner: Arc<dyn Scanner>,
    arbiter: Arc<ModeArbiter>,
    pipeline: Arc<Mutex<TelemetryPipeline>>,
    queue: Arc<SampleQueue>,
    sink: DisplaySink,
    processing: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

fn lock_pipeline(p: &Mutex<TelemetryPipeline>) -> MutexGuard<'_, TelemetryPipeline> {
    p.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    /// Connect to the headset at `address` and start streaming.
    ///
    /// Tries a direct reconnect first when `ctx` holds a descriptor for the
    /// same address, otherwise runs a bounded discovery poll.  On success the
    /// device is in signal mode, the periodic resistance check is scheduled
    /// and display updates flow into the returned receiver.
    ///
    /// On failure nothing is left open: any discovery handle is closed.
    pub async fn connect(
        backend: &dyn Backend,
        config: &SessionConfig,
        ctx: &mut ConnectionContext,
        address: Option<&str>,
        name: Option<&str>,
    ) -> Result<(Session, mpsc::Receiver<SessionEvent>), SessionError> {
        let address = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(SessionError::MissingAddress)?;

        let (sink, rx) = DisplaySink::channel(config.sink_capacity);
        sink.status("Connecting…");

        let scanner = backend.open_scanner(SensorFamily::BrainBit)?;
        let opened = Self::open_sensor(&*scanner, config, ctx, address, name).await;
        let (descriptor, sensor) = match opened {
            Ok(found) => found,
            Err(e) => {
                scanner.close();
                error!("Connect to {address} failed: {e}");
                sink.error(e.to_string());
                return Err(e);
            }
        };
        ctx.remember(descriptor.clone());
        info!("Connected to {} ({})", descriptor.name, descriptor.address);

        let engine = match backend.create_engine(&config.engine) {
            Ok(engine) => Some(engine),
            Err(e) => {
                let e = SessionError::AnalysisEngineInit(e);
                warn!("{e}; analysis disabled for this session");
                sink.warning(format!("{e}; showing raw channels only"));
                None
            }
        };

        let queue = Arc::new(SampleQueue::new(config.queue_capacity));
        let pipeline = Arc::new(Mutex::new(TelemetryPipeline::new(
            engine,
            config.smoothing.live_factor,
            config.smoothing.emit_interval(),
        )));
        let arbiter = Arc::new(ModeArbiter::new(
            Arc::clone(&sensor),
            config.timings,
            sink.clone(),
        ));

        // Driver callbacks only hand data off; all work happens on tasks.
        {
            let queue = Arc::clone(&queue);
            sensor.set_signal_callback(Some(Box::new(move |batch: Vec<RawSignalSample>| {
                queue.push(batch);
            })));
        }
        {
            let arbiter = Arc::clone(&arbiter);
            sensor.set_resist_callback(Some(Box::new(move |sample: ResistanceSample| {
                arbiter.on_resistance(sample);
            })));
        }
        let (state_tx, mut state_rx) = mpsc::channel::<ConnectionState>(16);
        sensor.set_state_callback(Some(Box::new(move |state: ConnectionState| {
            if state_tx.try_send(state).is_err() {
                warn!("Link state change {state:?} dropped");
            }
        })));

        let processing = {
            let queue = Arc::clone(&queue);
            let pipeline = Arc::clone(&pipeline);
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(batch) = queue.recv().await {
                    let now = Instant::now().into_std();
                    let events = lock_pipeline(&pipeline).process_batch(&batch, now);
                    sink.emit_all(events);
                }
                debug!("Processing task finished");
            })
        };
        let watcher = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move {
                while let Some(state) = state_rx.recv().await {
                    arbiter.on_connection_state(state).await;
                }
            })
        };

        let session = Session {
            descriptor,
            sensor,
            scanner,
            arbiter,
            pipeline,
            queue,
            sink,
            processing: Mutex::new(Some(processing)),
            watcher: Mutex::new(Some(watcher)),
            torn_down: AtomicBool::new(false),
        };

        if let Err(e) = session.arbiter.start_signal_mode().await {
            error!("Signal acquisition could not be started: {e}");
            session.teardown().await;
            return Err(e);
        }
        if config.periodic_resistance_check {
            session.arbiter.start_periodic_check();
        }
        session.sink.status(format!(
            "Connected to {} • receiving data",
            session.descriptor.name
        ));
        Ok((session, rx))
    }

    async fn open_sensor(
        scanner: &dyn Scanner,
        config: &SessionConfig,
        ctx: &ConnectionContext,
        address: &str,
        name: Option<&str>,
    ) -> Result<(DeviceDescriptor, Arc<dyn Sensor>), SessionError> {
        if let Some(cached) = ctx.cached_for(address) {
            info!("Reconnecting directly to {}", cached.address);
            let direct: Result<Arc<dyn Sensor>, DeviceError> = async {
                scanner.start().await?;
                sleep(config.discovery.direct_connect_settle()).await;
                scanner.create_sensor(cached).await
            }
            .await;
            match direct {
                Ok(sensor) => {
                    if let Err(e) = scanner.stop().await {
                        debug!("Scanner stop failed: {e}");
                    }
                    return Ok((cached.clone(), sensor));
                }
                Err(e) => warn!("Direct reconnect failed, falling back to discovery: {e}"),
            }
            if let Err(e) = scanner.stop().await {
                debug!("Scanner stop failed: {e}");
            }
        }

        scanner.start().await?;
        let found = Self::poll_discovery(scanner, config, address).await;
        if let Err(e) = scanner.stop().await {
            debug!("Scanner stop failed: {e}");
        }
        let descriptor = found.ok_or_else(|| SessionError::DiscoveryFailure {
            address: address.to_owned(),
            name: name.map(str::to_owned),
        })?;

        if descriptor.family != SensorFamily::BrainBit {
            return Err(DeviceError::UnsupportedFamily(descriptor.family).into());
        }
        let sensor = scanner.create_sensor(&descriptor).await?;
        Ok((descriptor, sensor))
    }

    async fn poll_discovery(
        scanner: &dyn Scanner,
        config: &SessionConfig,
        address: &str,
    ) -> Option<DeviceDescriptor> {
        let attempts = config.discovery.attempts.max(1);
        for attempt in 1..=attempts {
            sleep(config.discovery.interval()).await;
            let seen = scanner.sensors().await;
            debug!("Discovery attempt {attempt}/{attempts}: {} device(s)", seen.len());
            if let Some(d) = seen.into_iter().find(|d| d.matches_address(address)) {
                info!("Found {} ({}) on attempt {attempt}", d.name, d.address);
                return Some(d);
            }
        }
        warn!("{address} not seen after {attempts} discovery attempts");
        None
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.arbiter.mode()
    }

    pub fn arbiter(&self) -> &Arc<ModeArbiter> {
        &self.arbiter
    }

    pub fn calibration(&self) -> CalibrationState {
        lock_pipeline(&self.pipeline).calibration()
    }

    pub fn analysis_enabled(&self) -> bool {
        lock_pipeline(&self.pipeline).analysis_enabled()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            pipeline: lock_pipeline(&self.pipeline).stats(),
            arbiter: self.arbiter.stats(),
            dropped_batches: self.queue.dropped_batches(),
            dropped_samples: self.queue.dropped_samples(),
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Restart calibration on demand.
    ///
    /// Fails when the headset is not in range or analysis is disabled.
    pub fn start_calibration(&self) -> Result<(), SessionError> {
        if self.is_torn_down() || self.sensor.state() != ConnectionState::InRange {
            self.sink.error("Device not connected");
            return Err(SessionError::NotConnected);
        }
        let events = lock_pipeline(&self.pipeline).start_calibration();
        match events {
            Ok(events) => {
                self.sink.emit_all(events);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start calibration: {e}");
                self.sink.error(format!("Failed to start calibration: {e}"));
                Err(e)
            }
        }
    }

    /// Run a resistance check now instead of waiting for the scheduler.
    pub async fn measure_resistance_now(&self) -> MeasureOutcome {
        if self.is_torn_down() {
            return MeasureOutcome::Skipped;
        }
        self.arbiter.measure_resistance_once().await
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Stop everything and release the device.  Idempotent.
    ///
    /// Safe to call while a resistance measurement is in flight: the
    /// scheduler is cancelled first, the measurement gives up at its next
    /// step and the arbiter then stops both acquisition modes.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Tearing down session for {}", self.descriptor.address);

        self.arbiter.shutdown().await;

        self.sensor.set_signal_callback(None);
        self.sensor.set_resist_callback(None);
        self.sensor.set_state_callback(None);

        self.queue.close();
        let processing = self
            .processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = processing {
            if let Err(e) = handle.await {
                warn!("Processing task ended abnormally: {e}");
            }
        }
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = watcher {
            handle.abort();
        }

        if let Err(e) = self.sensor.disconnect().await {
            warn!("Sensor disconnect failed: {e}");
        }
        self.sensor.close();

        lock_pipeline(&self.pipeline).release_engine();

        if let Err(e) = self.scanner.stop().await {
            debug!("Scanner stop failed: {e}");
        }
        self.scanner.close();

        self.sink.status("Disconnected");
        info!("Session closed");
    }

    /// Tear down and forget the headset, so the next connect runs discovery.
    pub async fn disconnect(self, ctx: &mut ConnectionContext) {
        self.teardown().await;
        ctx.clear();
    }
}
