//! The control loop: one owner for every actuator, driven by a fixed-order
//! tick.
//!
//! Each tick runs, in order:
//!
//! 1. drain inbound commands and apply them (commands beat automation);
//! 2. the safety check for pump and lift, every tick;
//! 3. when the read interval has elapsed, sample sensors, publish the
//!    reading, and let the arbiter request a pump change if automation is on;
//! 4. tell the sensor source whether the pump is running.
//!
//! A tick returns a `Result`. Failures and panics are caught at the loop
//! boundary, logged, and followed by a short pause; nothing is reset, so an
//! actuator that was running stays running and the next safety check still
//! applies to it.

use anyhow::Result;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::arbiter::AutomationArbiter;
use crate::command::{self, CommandChannel};
use crate::controller::{ActuatorRole, Transition};
use crate::sensors::SensorReader;
use crate::state::ControllerState;
use crate::telemetry::{StatusEvent, TelemetryPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub tick: Duration,
    pub read_interval: Duration,
    /// Pause after a failed tick.
    pub fault_retry: Duration,
}

/// A tick that panicked. Kept distinct from hardware errors so the run loop
/// only backs off after a panic.
#[derive(Debug)]
pub struct TickPanic(String);

impl fmt::Display for TickPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick panicked: {}", self.0)
    }
}

impl std::error::Error for TickPanic {}

/// What one tick did. Mostly for logs and tests.
#[derive(Debug, Default)]
pub struct TickReport {
    pub commands_applied: usize,
    pub sampled: bool,
    pub transitions: Vec<Transition>,
}

pub struct ControlLoop {
    timing: LoopTiming,
    state: ControllerState,
    arbiter: AutomationArbiter,
    commands: CommandChannel,
    sensors: Box<dyn SensorReader>,
    telemetry: TelemetryPublisher,
    /// Start of the last sampling pass; `None` until the first one.
    last_read: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        timing: LoopTiming,
        state: ControllerState,
        arbiter: AutomationArbiter,
        commands: CommandChannel,
        sensors: Box<dyn SensorReader>,
        telemetry: TelemetryPublisher,
    ) -> Self {
        Self {
            timing,
            state,
            arbiter,
            commands,
            sensors,
            telemetry,
            last_read: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    // -- tick ---------------------------------------------------------------

    /// Run one tick at `now`. Every step runs even if an earlier one hit a
    /// hardware error; the first such error is returned at the end.
    pub fn tick(&mut self, now: Instant) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut first_err = None;

        self.apply_commands(now, &mut report);

        for role in [ActuatorRole::Pump, ActuatorRole::Lift] {
            if let Err(e) = self.evaluate(role, now, None, &mut report) {
                first_err.get_or_insert(e);
            }
        }

        if self.sample_due(now) {
            if let Err(e) = self.sample(now, &mut report) {
                first_err.get_or_insert(e);
            }
        }

        self.sensors.set_watering(self.state.pump.is_running());

        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// `tick` with panics turned into errors.
    pub fn guarded_tick(&mut self, now: Instant) -> Result<TickReport> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick(now))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(TickPanic(msg).into())
            }
        }
    }

    /// How long to back off after a failed tick. Hardware errors are retried
    /// on the next tick so the safety pass keeps its cadence; only a panic
    /// earns the `fault_retry` pause.
    fn retry_delay(&self, err: &anyhow::Error) -> Option<Duration> {
        err.is::<TickPanic>().then_some(self.timing.fault_retry)
    }

    fn apply_commands(&mut self, now: Instant, report: &mut TickReport) {
        while let Some(commands) = self.commands.next_message() {
            report.commands_applied += commands.len();
            let events = command::apply(&mut self.state, now, &commands);
            for event in &events {
                self.telemetry.publish_status(event);
            }
        }
    }

    fn sample_due(&self, now: Instant) -> bool {
        match self.last_read {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.timing.read_interval,
        }
    }

    fn sample(&mut self, now: Instant, report: &mut TickReport) -> Result<()> {
        // Stamped before reading so a failing sensor waits a full interval.
        self.last_read = Some(now);
        report.sampled = true;

        let reading = self.sensors.read();
        self.telemetry.publish_reading(&reading);
        debug!(
            pump = ?self.state.pump.status(now),
            lift = ?self.state.lift.status(now),
            auto = self.state.auto_enabled(),
            "rig status"
        );

        match self
            .arbiter
            .decide(&reading, self.state.auto_enabled(), ActuatorRole::Pump)
        {
            Some(on) => {
                debug!(soil = ?reading.soil_moisture_pct, on, "automation request");
                self.evaluate(ActuatorRole::Pump, now, Some(on), report)
            }
            None => Ok(()),
        }
    }

    fn evaluate(
        &mut self,
        role: ActuatorRole,
        now: Instant,
        desired: Option<bool>,
        report: &mut TickReport,
    ) -> Result<()> {
        let Some(ctl) = self.state.controller_mut(role) else {
            return Ok(());
        };
        if let Some(t) = ctl.evaluate(now, desired)? {
            debug!(role = %t.role, running = t.running, cause = ?t.cause, "transition");
            if let Some(event) = StatusEvent::from_transition(&t) {
                self.telemetry.publish_status(&event);
            }
            report.transitions.push(t);
        }
        Ok(())
    }

    // -- shutdown -----------------------------------------------------------

    /// Stop pump and lift, publishing each stop.
    pub fn shutdown(&mut self, now: Instant) {
        for role in [ActuatorRole::Pump, ActuatorRole::Lift] {
            let Some(ctl) = self.state.controller_mut(role) else {
                continue;
            };
            match ctl.shutdown(now) {
                Ok(Some(t)) => {
                    if let Some(event) = StatusEvent::from_transition(&t) {
                        self.telemetry.publish_status(&event);
                    }
                }
                Ok(None) => {}
                Err(e) => error!(role = %ctl.role(), "failed to stop on shutdown: {e:#}"),
            }
        }
        info!(
            lid_angle = self.state.lid.angle(),
            lid = ?self.state.lid.position(),
            "actuators stopped"
        );
    }

    // -- run ----------------------------------------------------------------

    /// Tick until `shutdown` resolves, then stop the actuators.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut ticker = interval(self.timing.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let thresholds = self.arbiter.thresholds();
        info!(
            tick_ms = self.timing.tick.as_millis() as u64,
            read_interval_s = self.timing.read_interval.as_secs(),
            dry = thresholds.dry,
            wet = thresholds.wet,
            "control loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            // Sensor drivers sleep while converting; keep that off the
            // runtime's async workers.
            let result = tokio::task::block_in_place(|| self.guarded_tick(Instant::now()));
            match result {
                Ok(report) => {
                    if report.commands_applied > 0 || !report.transitions.is_empty() {
                        debug!(
                            commands = report.commands_applied,
                            transitions = report.transitions.len(),
                            sampled = report.sampled,
                            "tick"
                        );
                    }
                }
                Err(e) => match self.retry_delay(&e) {
                    Some(pause) => {
                        error!(retry_ms = pause.as_millis() as u64, "tick failed: {e:#}");
                        tokio::select! {
                            biased;
                            _ = &mut shutdown => break,
                            _ = sleep(pause) => {}
                        }
                    }
                    None => error!("hardware fault during tick: {e:#}"),
                },
            }
        }

        warn!("shutdown requested");
        self.shutdown(Instant::now());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
