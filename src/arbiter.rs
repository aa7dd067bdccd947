//! Device mode arbitration.
//!
//! The headset is half-duplex: it streams EEG **or** measures electrode
//! resistance, never both.  [`ModeArbiter`] is the only component that issues
//! mode commands.  It owns the authoritative [`AcquisitionMode`], serialises
//! every command sequence behind one async lock, and guarantees that a failed
//! excursion into resistance mode always ends with a best-effort return to
//! signal mode.
//!
//! A resistance excursion looks like this (default timings):
//!
//! ```text
//! StopSignal ─500 ms─▶ StartResist ─3000 ms─▶ StopResist ─500 ms─▶ StartSignal
//!                           │   resistance callbacks   │
//!                           └──────── fire here ───────┘
//! ```
//!
//! On any failure the recovery path is `StopResist`, a short pause, then
//! `StartSignal`, regardless of which step failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::{Sensor, SensorCommand};
use crate::error::{DeviceCommandError, SessionError};
use crate::protocol::ModeTimings;
use crate::resistance::{self, ResistanceReport};
use crate::sink::DisplaySink;
use crate::types::{AcquisitionMode, ConnectionState, ResistanceSample, SessionEvent};

/// Consecutive failed recoveries after which the device is considered gone.
pub const MAX_RECOVERY_FAILURES: u32 = 2;

/// Result of one [`ModeArbiter::measure_resistance_once`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasureOutcome {
    /// The full sequence ran.  Carries the last reading received during the
    /// window, if any.
    Completed(Option<ResistanceSample>),
    /// Another measurement was in flight, checks are suspended, or the
    /// session has stopped.  No command was issued.
    Skipped,
    /// A command failed; the recovery path has run.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub measurements_completed: u64,
    pub measurements_failed: u64,
    pub measurements_skipped: u64,
}

struct ArbiterState {
    mode: AcquisitionMode,
    /// Periodic checks are paused until the link comes back.
    suspended: bool,
    link_lost: bool,
    recovery_failures: u32,
    last_resistance: Option<ResistanceSample>,
    stats: ArbiterStats,
}

struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the re-entrancy flag on every exit path, including cancellation
/// of the owning future.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ModeArbiter {
    sensor: Arc<dyn Sensor>,
    timings: ModeTimings,
    sink: DisplaySink,
    state: Mutex<ArbiterState>,
    resistance_in_flight: AtomicBool,
    /// Held for the duration of every command sequence.
    command_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
    /// Cancelled by [`ModeArbiter::stop`]; cuts short every pause inside a
    /// command sequence.
    stop_token: CancellationToken,
    scheduler: Mutex<Option<Scheduler>>,
}

impl ModeArbiter {
    pub fn new(sensor: Arc<dyn Sensor>, timings: ModeTimings, sink: DisplaySink) -> Self {
        Self {
            sensor,
            timings,
            sink,
            state: Mutex::new(ArbiterState {
                mode: AcquisitionMode::Idle,
                suspended: false,
                link_lost: false,
                recovery_failures: 0,
                last_resistance: None,
                stats: ArbiterStats::default(),
            }),
            resistance_in_flight: AtomicBool::new(false),
            command_lock: tokio::sync::Mutex::new(()),
            stopped: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            scheduler: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn mode(&self) -> AcquisitionMode {
        self.state().mode
    }

    pub fn is_measuring(&self) -> bool {
        self.resistance_in_flight.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.state().suspended
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn stats(&self) -> ArbiterStats {
        self.state().stats
    }

    pub fn last_resistance(&self) -> Option<ResistanceSample> {
        self.state().last_resistance
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn set_mode(&self, mode: AcquisitionMode) {
        let changed = {
            let mut st = self.state();
            // Stopped is terminal.
            if st.mode == AcquisitionMode::Stopped || st.mode == mode {
                false
            } else {
                st.mode = mode;
                true
            }
        };
        if changed {
            debug!("Acquisition mode -> {mode}");
            self.sink.emit(SessionEvent::Mode(mode));
        }
    }

    async fn exec(&self, command: SensorCommand) -> Result<(), DeviceCommandError> {
        if self.is_stopped() {
            return Err(DeviceCommandError {
                command,
                reason: "session stopped".into(),
            });
        }
        debug!("Device command {command:?}");
        let result = self.sensor.exec_command(command).await;
        if let Err(e) = &result {
            warn!("{e}");
        }
        result
    }

    /// Sleep between two commands.  Returns early once the arbiter stops;
    /// the next [`Self::exec`] then fails and the sequence unwinds.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            biased;
            _ = self.stop_token.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    // ── Signal mode ───────────────────────────────────────────────────────────

    /// Put the device into signal mode.
    ///
    /// Issues a best-effort `StopResist` then `StartSignal`.  Calling this
    /// while already streaming re-issues the start command.  When
    /// `StartSignal` is rejected the pair is attempted once more; if that
    /// also fails the mode is left as [`AcquisitionMode::Signal`], periodic
    /// checks are suspended until the link recovers and the error is
    /// returned.
    pub async fn start_signal_mode(&self) -> Result<(), SessionError> {
        let _cmd = self.command_lock.lock().await;
        if self.is_stopped() {
            return Err(SessionError::NotConnected);
        }

        let mut last_err = None;
        for attempt in 1..=2 {
            if let Err(e) = self.exec(SensorCommand::StopResist).await {
                debug!("Best-effort StopResist before signal start failed: {e}");
            }
            match self.exec(SensorCommand::StartSignal).await {
                Ok(()) => {
                    self.state().recovery_failures = 0;
                    self.set_mode(AcquisitionMode::Signal);
                    info!("Signal acquisition started");
                    return Ok(());
                }
                Err(e) => {
                    warn!("StartSignal attempt {attempt}/2 failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        self.set_mode(AcquisitionMode::Signal);
        self.state().suspended = true;
        let err = last_err.map_or(SessionError::NotConnected, SessionError::DeviceCommand);
        error!("Could not start signal acquisition, periodic checks suspended: {err}");
        self.sink
            .error(format!("Could not start signal acquisition: {err}"));
        Err(err)
    }

    // ── Resistance excursion ──────────────────────────────────────────────────

    /// Run one full resistance measurement.
    ///
    /// Concurrent calls collapse: while one measurement is in flight every
    /// other call returns [`MeasureOutcome::Skipped`] immediately, without
    /// waiting and without touching the device.
    pub async fn measure_resistance_once(&self) -> MeasureOutcome {
        if self.is_stopped() || self.is_suspended() {
            self.state().stats.measurements_skipped += 1;
            return MeasureOutcome::Skipped;
        }
        if self
            .resistance_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Resistance measurement already in flight, skipping");
            self.state().stats.measurements_skipped += 1;
            return MeasureOutcome::Skipped;
        }
        let _in_flight = InFlightGuard(&self.resistance_in_flight);
        let _cmd = self.command_lock.lock().await;
        // Whoever held the lock may have stopped the arbiter or given up on
        // the device in the meantime.
        if self.is_stopped() || self.is_suspended() {
            debug!("Resistance measurement abandoned after waiting for the command lock");
            self.state().stats.measurements_skipped += 1;
            return MeasureOutcome::Skipped;
        }

        info!("Starting resistance measurement");
        self.state().last_resistance = None;

        match self.excursion().await {
            Ok(()) => {
                let reading = {
                    let mut st = self.state();
                    st.recovery_failures = 0;
                    st.stats.measurements_completed += 1;
                    st.last_resistance
                };
                if reading.is_none() {
                    warn!("No resistance data received during the measurement window");
                }
                info!("Resistance measurement finished, signal restored");
                MeasureOutcome::Completed(reading)
            }
            Err(e) => {
                self.state().stats.measurements_failed += 1;
                if self.is_stopped() {
                    debug!("Resistance measurement abandoned, session stopped");
                    return MeasureOutcome::Failed;
                }
                error!("Resistance measurement failed: {e}");
                self.sink.warning(format!("Resistance check failed: {e}"));
                self.recover().await;
                MeasureOutcome::Failed
            }
        }
    }

    async fn excursion(&self) -> Result<(), DeviceCommandError> {
        self.exec(SensorCommand::StopSignal).await?;
        self.set_mode(AcquisitionMode::TransitioningToResistance);
        self.pause(self.timings.settle()).await;

        self.exec(SensorCommand::StartResist).await?;
        self.set_mode(AcquisitionMode::Resistance);
        self.pause(self.timings.resistance_window()).await;

        self.exec(SensorCommand::StopResist).await?;
        self.set_mode(AcquisitionMode::TransitioningToSignal);
        self.pause(self.timings.settle()).await;

        self.exec(SensorCommand::StartSignal).await?;
        self.set_mode(AcquisitionMode::Signal);
        Ok(())
    }

    /// Fail-open back to signal mode.  Caller holds the command lock.
    async fn recover(&self) {
        if let Err(e) = self.exec(SensorCommand::StopResist).await {
            debug!("Recovery StopResist failed: {e}");
        }
        self.pause(self.timings.recovery_delay()).await;

        match self.exec(SensorCommand::StartSignal).await {
            Ok(()) => {
                self.state().recovery_failures = 0;
                self.set_mode(AcquisitionMode::Signal);
                info!("Signal mode restored after failed measurement");
            }
            Err(e) if self.is_stopped() => {
                debug!("Recovery abandoned, arbiter stopped: {e}");
            }
            Err(e) => {
                // The device is most likely still streaming nothing; report
                // it as signal so the next attempt starts from a known place.
                self.set_mode(AcquisitionMode::Signal);
                let failures = {
                    let mut st = self.state();
                    st.recovery_failures += 1;
                    st.recovery_failures
                };
                error!("Failed to restore signal mode ({failures} in a row): {e}");
                if failures >= MAX_RECOVERY_FAILURES {
                    self.state().suspended = true;
                    error!("Device unresponsive, suspending resistance checks");
                    self.sink.error(SessionError::DeviceDisconnected.to_string());
                    self.sink.emit(SessionEvent::Disconnected);
                }
            }
        }
    }

    // ── Driver callbacks ──────────────────────────────────────────────────────

    /// Handle one resistance reading.  The most recent reading wins.
    pub fn on_resistance(&self, sample: ResistanceSample) {
        info!("{}", resistance::log_line(&sample));
        let mode = {
            let mut st = self.state();
            st.last_resistance = Some(sample);
            st.mode
        };
        if mode != AcquisitionMode::Resistance {
            debug!("Resistance reading arrived while in {mode} mode");
        }
        self.sink
            .emit(SessionEvent::Resistance(ResistanceReport::from_sample(&sample)));
    }

    /// React to a link-state change reported by the driver.
    ///
    /// Losing the link suspends periodic checks.  When it comes back the
    /// suspension is lifted and signal mode is started again.
    pub async fn on_connection_state(&self, state: ConnectionState) {
        if self.is_stopped() {
            return;
        }
        match state {
            ConnectionState::OutOfRange => {
                {
                    let mut st = self.state();
                    st.suspended = true;
                    st.link_lost = true;
                }
                warn!("Device went out of range, resistance checks suspended");
                self.sink.status("Device out of range");
                self.sink.emit(SessionEvent::Disconnected);
            }
            ConnectionState::InRange => {
                let was_lost = {
                    let mut st = self.state();
                    let lost = st.link_lost || st.suspended;
                    st.link_lost = false;
                    st.suspended = false;
                    st.recovery_failures = 0;
                    lost
                };
                if was_lost {
                    info!("Device back in range, restarting signal acquisition");
                    self.sink.status("Reconnected");
                    if let Err(e) = self.start_signal_mode().await {
                        warn!("Signal restart after reconnect failed: {e}");
                    }
                }
            }
        }
    }

    // ── Scheduler ─────────────────────────────────────────────────────────────

    /// Launch the periodic resistance check.
    ///
    /// Waits the initial delay, then repeatedly measures and waits the check
    /// interval after each attempt returns.  At most one scheduler runs per
    /// arbiter; further calls are ignored.
    pub fn start_periodic_check(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            debug!("Periodic resistance check already running");
            return;
        }
        if self.is_stopped() {
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let stopping = self.stop_token.clone();
        let arbiter = Arc::clone(self);
        let initial = self.timings.initial_check_delay();
        let interval = self.timings.check_interval();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => return,
                _ = stopping.cancelled() => return,
                _ = sleep(initial) => {}
            }
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    outcome = arbiter.measure_resistance_once() => {
                        debug!("Periodic resistance check: {outcome:?}");
                    }
                }
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = stopping.cancelled() => break,
                    _ = sleep(interval) => {}
                }
            }
            debug!("Periodic resistance check stopped");
        });

        info!(
            "Periodic resistance check scheduled (first in {:?}, then every {:?})",
            initial, interval
        );
        *slot = Some(Scheduler { token, handle });
    }

    /// Cancel the periodic check.  Immediate and idempotent; issues no
    /// device commands.  A measurement it was running is dropped at its
    /// current await point.
    pub fn stop_periodic_check(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(s) = scheduler {
            s.token.cancel();
            s.handle.abort();
            debug!("Periodic resistance check cancelled");
        }
    }

    /// Enter the terminal [`AcquisitionMode::Stopped`] state.
    ///
    /// Cancels the scheduler and makes any in-flight sequence give up before
    /// its next command.  Does not wait for the command lock, so it is safe
    /// to call while a measurement is running.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_token.cancel();
        // Not aborted: a measurement it is running sees the stop at its next
        // step, and dropping it mid-command would release the command lock
        // while the device is still busy.
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if scheduler.is_some() {
            debug!("Periodic resistance check winding down");
        }
        self.set_mode(AcquisitionMode::Stopped);
        info!("Mode arbiter stopped");
    }

    /// [`Self::stop`], then wait for any command in flight to finish and
    /// issue a best-effort `StopSignal` and `StopResist` under the command
    /// lock, whatever mode the device was last seen in.
    pub async fn shutdown(&self) {
        self.stop();
        let _cmd = self.command_lock.lock().await;
        for command in [SensorCommand::StopSignal, SensorCommand::StopResist] {
            debug!("Device command {command:?}");
            if let Err(e) = self.sensor.exec_command(command).await {
                debug!("Shutdown {command:?} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::mock::MockSensor;

    use crate::device::SensorCommand::*;

    fn arbiter() -> (Arc<ModeArbiter>, Arc<MockSensor>, mpsc::Receiver<SessionEvent>) {
        let sensor = MockSensor::new();
        let (sink, rx) = DisplaySink::channel(256);
        let arbiter = ModeArbiter::new(sensor.clone(), ModeTimings::default(), sink);
        (Arc::new(arbiter), sensor, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_excursion_order_and_modes() {
        let (arbiter, sensor, mut rx) = arbiter();
        let outcome = arbiter.measure_resistance_once().await;

        assert_eq!(outcome, MeasureOutcome::Completed(None));
        assert_eq!(sensor.commands(), vec![StopSignal, StartResist, StopResist, StartSignal]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Signal);
        assert!(!arbiter.is_measuring());

        let modes: Vec<AcquisitionMode> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Mode(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(
            modes,
            vec![
                AcquisitionMode::TransitioningToResistance,
                AcquisitionMode::Resistance,
                AcquisitionMode::TransitioningToSignal,
                AcquisitionMode::Signal,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_measurements_collapse() {
        let (arbiter, sensor, _rx) = arbiter();
        let (a, b) = tokio::join!(
            arbiter.measure_resistance_once(),
            arbiter.measure_resistance_once()
        );

        assert_eq!(a, MeasureOutcome::Completed(None));
        assert_eq!(b, MeasureOutcome::Skipped);
        assert_eq!(sensor.commands().len(), 4);
        assert_eq!(arbiter.stats().measurements_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_during_window_is_returned() {
        let (arbiter, sensor, mut rx) = arbiter();
        let sample = ResistanceSample {
            o1: 40_000.0,
            o2: 60_000.0,
            t3: 250_000.0,
            t4: f64::INFINITY,
        };
        sensor.set_reading(sample);
        let handler = Arc::clone(&arbiter);
        sensor.set_resist_callback(Some(Box::new(move |s: ResistanceSample| {
            handler.on_resistance(s);
        })));

        let outcome = arbiter.measure_resistance_once().await;
        assert_eq!(outcome, MeasureOutcome::Completed(Some(sample)));
        assert_eq!(arbiter.last_resistance(), Some(sample));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SessionEvent::Resistance(ResistanceReport::Channels(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_resist_recovers_to_signal() {
        let (arbiter, sensor, mut rx) = arbiter();
        sensor.fail(StartResist);

        let outcome = arbiter.measure_resistance_once().await;

        assert_eq!(outcome, MeasureOutcome::Failed);
        assert_eq!(sensor.commands(), vec![StopSignal, StartResist, StopResist, StartSignal]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Signal);
        assert!(!arbiter.is_measuring());
        assert!(!arbiter.is_suspended());

        let warnings = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Warning(w) if w.starts_with("Resistance check failed")))
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_recovery_failure_reports_disconnect() {
        let (arbiter, sensor, mut rx) = arbiter();
        sensor.fail(StartResist);
        sensor.fail(StartSignal);

        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Failed);
        assert!(!arbiter.is_suspended());
        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Failed);
        assert!(arbiter.is_suspended());

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Disconnected)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(m) if m == "device disconnected")));

        let issued = sensor.commands().len();
        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Skipped);
        assert_eq!(sensor.commands().len(), issued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_signal_retries_once() {
        let (arbiter, sensor, mut rx) = arbiter();
        sensor.fail(StartSignal);

        let err = arbiter.start_signal_mode().await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceCommand(_)));
        assert_eq!(sensor.commands(), vec![StopResist, StartSignal, StopResist, StartSignal]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Signal);
        assert!(arbiter.is_suspended());
        assert!(drain(&mut rx).iter().any(|e| matches!(e, SessionEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_signal_ignores_stop_resist_failure() {
        let (arbiter, sensor, _rx) = arbiter();
        sensor.fail(StopResist);

        arbiter.start_signal_mode().await.unwrap();
        assert_eq!(sensor.commands(), vec![StopResist, StartSignal]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Signal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_schedule_and_cancel() {
        let (arbiter, sensor, _rx) = arbiter();
        arbiter.start_periodic_check();
        arbiter.start_periodic_check();
        assert!(arbiter.is_scheduler_running());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(sensor.commands().is_empty());

        // First check at 10 s takes 4 s end to end.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sensor.commands().len(), 4);

        arbiter.stop_periodic_check();
        arbiter.stop_periodic_check();
        assert!(!arbiter.is_scheduler_running());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sensor.commands().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_counts_from_end_of_check() {
        let (arbiter, sensor, _rx) = arbiter();
        arbiter.start_periodic_check();

        // Second check starts at 10 + 4 + 30 = 44 s.
        tokio::time::sleep(Duration::from_secs(43)).await;
        assert_eq!(sensor.commands().len(), 4);
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(sensor.commands().len(), 5);
        arbiter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_measurement_issues_nothing_further() {
        let (arbiter, sensor, _rx) = arbiter();
        let running = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.measure_resistance_once().await })
        };

        // Inside the resistance window.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(arbiter.mode(), AcquisitionMode::Resistance);
        arbiter.stop();

        assert_eq!(running.await.unwrap(), MeasureOutcome::Failed);
        assert_eq!(sensor.commands(), vec![StopSignal, StartResist]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Stopped);
        assert!(!arbiter.is_measuring());

        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Skipped);
        assert!(arbiter.start_signal_mode().await.is_err());
        assert_eq!(sensor.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_suspends_and_return_resumes() {
        let (arbiter, sensor, mut rx) = arbiter();

        arbiter.on_connection_state(ConnectionState::OutOfRange).await;
        assert!(arbiter.is_suspended());
        assert!(drain(&mut rx).iter().any(|e| matches!(e, SessionEvent::Disconnected)));
        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Skipped);
        assert!(sensor.commands().is_empty());

        arbiter.on_connection_state(ConnectionState::InRange).await;
        assert!(!arbiter.is_suspended());
        assert_eq!(sensor.commands(), vec![StopResist, StartSignal]);
        assert_eq!(arbiter.mode(), AcquisitionMode::Signal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_range_without_loss_is_noop() {
        let (arbiter, sensor, _rx) = arbiter();
        arbiter.on_connection_state(ConnectionState::InRange).await;
        assert!(sensor.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_command_in_flight() {
        let (arbiter, sensor, _rx) = arbiter();
        sensor.set_latency(Duration::from_millis(100));
        let running = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.measure_resistance_once().await })
        };

        // StartSignal is issued at 4300 ms and completes at 4400 ms.
        tokio::time::sleep(Duration::from_millis(4_350)).await;
        assert_eq!(sensor.commands().last(), Some(&StartSignal));
        arbiter.shutdown().await;

        assert_eq!(running.await.unwrap(), MeasureOutcome::Completed(None));
        assert_eq!(sensor.peak_concurrency.load(Ordering::SeqCst), 1);
        assert_eq!(
            sensor.commands(),
            vec![StopSignal, StartResist, StopResist, StartSignal, StopSignal, StopResist]
        );
        assert_eq!(arbiter.mode(), AcquisitionMode::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_resistance_window_short() {
        let (arbiter, sensor, _rx) = arbiter();
        let running = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.measure_resistance_once().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = tokio::time::Instant::now();
        arbiter.shutdown().await;

        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(running.await.unwrap(), MeasureOutcome::Failed);
        assert_eq!(
            sensor.commands(),
            vec![StopSignal, StartResist, StopSignal, StopResist]
        );
        assert!(!arbiter.is_measuring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_measurement_queued_behind_failed_signal_start_is_skipped() {
        let (arbiter, sensor, _rx) = arbiter();
        sensor.set_latency(Duration::from_millis(100));
        sensor.fail(StartSignal);
        let starting = {
            let arbiter = Arc::clone(&arbiter);
            tokio::spawn(async move { arbiter.start_signal_mode().await })
        };

        // The signal start holds the command lock but has not given up yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!arbiter.is_suspended());
        assert_eq!(arbiter.measure_resistance_once().await, MeasureOutcome::Skipped);

        assert!(starting.await.unwrap().is_err());
        assert!(arbiter.is_suspended());
        assert_eq!(
            sensor.commands(),
            vec![StopResist, StartSignal, StopResist, StartSignal]
        );
        assert_eq!(arbiter.stats().measurements_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_scheduled_check_serialises_commands() {
        let (arbiter, sensor, _rx) = arbiter();
        sensor.set_latency(Duration::from_millis(100));
        arbiter.start_periodic_check();

        // First check starts at 10 s; its closing StartSignal runs
        // 14300..14400 ms.
        tokio::time::sleep(Duration::from_millis(14_350)).await;
        arbiter.shutdown().await;

        assert!(!arbiter.is_scheduler_running());
        assert_eq!(sensor.peak_concurrency.load(Ordering::SeqCst), 1);
        assert_eq!(
            sensor.commands(),
            vec![StopSignal, StartResist, StopResist, StartSignal, StopSignal, StopResist]
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sensor.commands().len(), 6);
    }
}
