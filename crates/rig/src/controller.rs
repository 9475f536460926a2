//! Runtime state machine for the actuators that run continuously (pump and
//! lift). Each controller owns its relay and is the only code allowed to
//! switch it; everything else submits a request through `evaluate`.
//!
//! ## State machine
//!
//! ```text
//!            [requested on, min_off elapsed]
//!   OFF ───────────────────────────────────────▶ RUNNING
//!    ▲                                             │
//!    └──[max_runtime elapsed | requested off]──────┘
//! ```
//!
//! COOLDOWN is not stored. It is OFF while `now - stopped_at < min_off`, and
//! a start request in that window is refused.
//!
//! The max-runtime cutoff is checked first on every call, including calls
//! that carry no request, so a relay left on is cleared by time alone.

use anyhow::{Context, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::actuators::Relay;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorRole {
    Pump,
    Lift,
    /// Position-only; never runs continuously, so it has no controller.
    Lid,
}

impl ActuatorRole {
    /// Key used for this role in command and status payloads.
    pub fn key(self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Lift => "lift",
            Self::Lid => "lid",
        }
    }
}

impl fmt::Display for ActuatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Hardware-protection limits for one role. Built once from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyPolicy {
    /// Longest continuous run before a forced stop.
    pub max_runtime: Duration,
    /// Shortest rest after any stop before the next start.
    pub min_off: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Off,
    Running,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Max runtime reached.
    Safety,
    /// Manual command or automation decision.
    Requested,
    /// Process is exiting.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub role: ActuatorRole,
    pub running: bool,
    pub cause: TransitionCause,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ActuatorController {
    role: ActuatorRole,
    policy: SafetyPolicy,
    relay: Box<dyn Relay>,
    /// Set iff running.
    started_at: Option<Instant>,
    /// Stamped on every stop; drives the cooldown window.
    stopped_at: Option<Instant>,
}

impl ActuatorController {
    /// Take ownership of `relay` and drive it off.
    pub fn new(role: ActuatorRole, policy: SafetyPolicy, mut relay: Box<dyn Relay>) -> Result<Self> {
        relay
            .set(false)
            .with_context(|| format!("{role}: failed to switch relay off at startup"))?;

        info!(
            role = %role,
            max_runtime_s = policy.max_runtime.as_secs_f32(),
            min_off_s = policy.min_off.as_secs_f32(),
            "actuator controller ready"
        );

        Ok(Self {
            role,
            policy,
            relay,
            started_at: None,
            stopped_at: None,
        })
    }

    pub fn role(&self) -> ActuatorRole {
        self.role
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    #[cfg(test)]
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    #[cfg(test)]
    pub fn stopped_at(&self) -> Option<Instant> {
        self.stopped_at
    }

    pub fn status(&self, now: Instant) -> RuntimeStatus {
        if self.is_running() {
            RuntimeStatus::Running
        } else if self.cooldown_remaining(now).is_some() {
            RuntimeStatus::Cooldown
        } else {
            RuntimeStatus::Off
        }
    }

    /// Time left before a start is allowed, or `None` if a start is allowed
    /// now (or the actuator is running).
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        if self.is_running() {
            return None;
        }
        let stopped = self.stopped_at?;
        let rested = now.saturating_duration_since(stopped);
        (rested < self.policy.min_off).then(|| self.policy.min_off - rested)
    }

    /// Run one evaluation: the max-runtime cutoff first, then `desired`
    /// (`Some(true)` start, `Some(false)` stop, `None` no request).
    ///
    /// On a relay error the recorded state is left unchanged, so the same
    /// transition is attempted again on the next call. The one exception is
    /// a start whose rollback also fails: that is recorded as running so the
    /// max-runtime cutoff still applies to whatever switched on.
    pub fn evaluate(&mut self, now: Instant, desired: Option<bool>) -> Result<Option<Transition>> {
        if let Some(started) = self.started_at {
            let ran_for = now.saturating_duration_since(started);
            if ran_for >= self.policy.max_runtime {
                warn!(
                    role = %self.role,
                    ran_for_s = ran_for.as_secs_f32(),
                    max_runtime_s = self.policy.max_runtime.as_secs_f32(),
                    "max runtime reached, forcing off"
                );
                return self.stop(now, TransitionCause::Safety).map(Some);
            }
            if desired == Some(false) {
                return self.stop(now, TransitionCause::Requested).map(Some);
            }
            return Ok(None);
        }

        if desired != Some(true) {
            return Ok(None);
        }

        if let Some(remaining) = self.cooldown_remaining(now) {
            warn!(
                role = %self.role,
                remaining_s = remaining.as_secs_f32(),
                "start refused: still cooling down"
            );
            return Ok(None);
        }

        self.start(now).map(Some)
    }

    /// Stop unconditionally if running.
    pub fn shutdown(&mut self, now: Instant) -> Result<Option<Transition>> {
        if !self.is_running() {
            return Ok(None);
        }
        self.stop(now, TransitionCause::Shutdown).map(Some)
    }

    fn start(&mut self, now: Instant) -> Result<Transition> {
        if let Err(e) = self.relay.set(true) {
            // Part of a relay group may have switched on anyway. Pull it
            // back; if that fails too, record the run so the cutoff owns it.
            if let Err(off_err) = self.relay.set(false) {
                warn!(role = %self.role, "rollback after failed start also failed: {off_err:#}");
                self.started_at = Some(now);
            }
            return Err(e.context(format!("{}: relay failed to switch on", self.role)));
        }
        self.started_at = Some(now);

        info!(role = %self.role, "actuator started");
        Ok(Transition {
            role: self.role,
            running: true,
            cause: TransitionCause::Requested,
        })
    }

    fn stop(&mut self, now: Instant, cause: TransitionCause) -> Result<Transition> {
        self.relay
            .set(false)
            .with_context(|| format!("{}: relay failed to switch off", self.role))?;
        self.started_at = None;
        self.stopped_at = Some(now);

        info!(role = %self.role, ?cause, "actuator stopped");
        Ok(Transition {
            role: self.role,
            running: false,
            cause,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::{RelayGroup, SimRelay};
    use anyhow::bail;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Pump policy used across the scenarios: 60 s max run, 10 s rest.
    fn pump_policy() -> SafetyPolicy {
        SafetyPolicy {
            max_runtime: secs(60),
            min_off: secs(10),
        }
    }

    fn pump() -> (ActuatorController, SimRelay) {
        let relay = SimRelay::new("pump");
        let ctl =
            ActuatorController::new(ActuatorRole::Pump, pump_policy(), Box::new(relay.clone()))
                .unwrap();
        (ctl, relay)
    }

    /// Relay whose driver can be made to fail on demand.
    #[derive(Clone)]
    struct FlakyRelay {
        inner: SimRelay,
        failing: Arc<AtomicBool>,
    }

    impl Relay for FlakyRelay {
        fn set(&mut self, on: bool) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("i/o error");
            }
            self.inner.set(on)
        }
    }

    // -- Construction -------------------------------------------------------

    #[test]
    fn new_controller_is_off_without_timestamps() {
        let (ctl, relay) = pump();
        let now = Instant::now();
        assert_eq!(ctl.status(now), RuntimeStatus::Off);
        assert!(ctl.started_at().is_none());
        assert!(ctl.stopped_at().is_none());
        assert!(!relay.is_on());
    }

    #[test]
    fn new_controller_switches_relay_off() {
        let mut relay = SimRelay::new("pump");
        relay.set(true).unwrap();
        let _ctl =
            ActuatorController::new(ActuatorRole::Pump, pump_policy(), Box::new(relay.clone()))
                .unwrap();
        assert!(!relay.is_on());
    }

    // -- OFF -> RUNNING -----------------------------------------------------

    #[test]
    fn start_from_never_run_is_allowed() {
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();

        let t = ctl.evaluate(t0, Some(true)).unwrap().unwrap();

        assert!(t.running);
        assert_eq!(t.cause, TransitionCause::Requested);
        assert_eq!(ctl.started_at(), Some(t0));
        assert!(relay.is_on());
    }

    #[test]
    fn no_request_while_off_does_nothing() {
        let (mut ctl, relay) = pump();
        assert!(ctl.evaluate(Instant::now(), None).unwrap().is_none());
        assert!(!relay.is_on());
    }

    #[test]
    fn start_after_long_rest_stamps_started_at() {
        // Stopped 100 s ago, min_off 10 s -> start allowed, started_at = now.
        let (mut ctl, _relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();
        ctl.evaluate(t0 + secs(5), Some(false)).unwrap();

        let now = t0 + secs(105);
        let t = ctl.evaluate(now, Some(true)).unwrap().unwrap();

        assert!(t.running);
        assert_eq!(ctl.status(now), RuntimeStatus::Running);
        assert_eq!(ctl.started_at(), Some(now));
    }

    #[test]
    fn start_refused_during_cooldown() {
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();
        ctl.evaluate(t0 + secs(5), Some(false)).unwrap();

        let now = t0 + secs(14); // rested 9 s of 10
        assert_eq!(ctl.status(now), RuntimeStatus::Cooldown);
        assert_eq!(ctl.cooldown_remaining(now), Some(secs(1)));
        assert!(ctl.evaluate(now, Some(true)).unwrap().is_none());
        assert!(!relay.is_on());
    }

    #[test]
    fn start_allowed_exactly_at_min_off() {
        let (mut ctl, _relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();
        ctl.evaluate(t0 + secs(5), Some(false)).unwrap();

        let t = ctl.evaluate(t0 + secs(15), Some(true)).unwrap();
        assert!(t.is_some_and(|t| t.running));
    }

    #[test]
    fn cooldown_follows_a_safety_stop_too() {
        let (mut ctl, _relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();
        ctl.evaluate(t0 + secs(60), None).unwrap();

        // Dry soil keeps asking for water every second; none may start it
        // until 10 s have passed since the forced stop.
        for s in 61..70 {
            assert!(
                ctl.evaluate(t0 + secs(s), Some(true)).unwrap().is_none(),
                "restarted {s} s after start"
            );
        }
        assert!(ctl.evaluate(t0 + secs(70), Some(true)).unwrap().is_some());
    }

    // -- RUNNING -> OFF -----------------------------------------------------

    #[test]
    fn requested_off_stamps_stopped_at_and_clears_started_at() {
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        let t = ctl.evaluate(t0 + secs(20), Some(false)).unwrap().unwrap();

        assert!(!t.running);
        assert_eq!(t.cause, TransitionCause::Requested);
        assert_eq!(ctl.started_at(), None);
        assert_eq!(ctl.stopped_at(), Some(t0 + secs(20)));
        assert!(!relay.is_on());
    }

    #[test]
    fn on_while_running_keeps_original_start() {
        let (mut ctl, _relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        assert!(ctl.evaluate(t0 + secs(30), Some(true)).unwrap().is_none());
        assert_eq!(ctl.started_at(), Some(t0));
    }

    #[test]
    fn off_while_off_is_a_no_op() {
        let (mut ctl, _relay) = pump();
        assert!(ctl.evaluate(Instant::now(), Some(false)).unwrap().is_none());
        assert!(ctl.stopped_at().is_none());
    }

    // -- Safety cutoff ------------------------------------------------------

    #[test]
    fn max_runtime_forces_off_without_any_request() {
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        assert!(ctl.evaluate(t0 + secs(59), None).unwrap().is_none());
        let t = ctl.evaluate(t0 + secs(60), None).unwrap().unwrap();

        assert_eq!(t.cause, TransitionCause::Safety);
        assert!(!relay.is_on());
    }

    #[test]
    fn safety_beats_a_concurrent_on_request() {
        // Running 61 s against a 60 s limit while soil is still dry.
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        let now = t0 + secs(61);
        let t = ctl.evaluate(now, Some(true)).unwrap().unwrap();

        assert!(!t.running);
        assert_eq!(t.cause, TransitionCause::Safety);
        assert_eq!(ctl.status(now), RuntimeStatus::Cooldown);
        assert!(!relay.is_on());
    }

    // -- Relay faults -------------------------------------------------------

    #[test]
    fn failed_stop_keeps_running_and_retries() {
        let failing = Arc::new(AtomicBool::new(false));
        let relay = FlakyRelay {
            inner: SimRelay::new("pump"),
            failing: Arc::clone(&failing),
        };
        let mut ctl =
            ActuatorController::new(ActuatorRole::Pump, pump_policy(), Box::new(relay.clone()))
                .unwrap();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        failing.store(true, Ordering::SeqCst);
        assert!(ctl.evaluate(t0 + secs(60), None).is_err());
        assert!(ctl.is_running(), "state must not claim off when relay is still on");

        failing.store(false, Ordering::SeqCst);
        let t = ctl.evaluate(t0 + secs(61), None).unwrap().unwrap();
        assert_eq!(t.cause, TransitionCause::Safety);
        assert!(!relay.inner.is_on());
    }

    /// Accepts `off` but fails every `on`.
    struct StuckOff;

    impl Relay for StuckOff {
        fn set(&mut self, on: bool) -> Result<()> {
            if on {
                bail!("coil open");
            }
            Ok(())
        }
    }

    /// Switches on once, then jams until released.
    #[derive(Clone)]
    struct Jamming {
        inner: SimRelay,
        jammed: Arc<AtomicBool>,
    }

    impl Relay for Jamming {
        fn set(&mut self, on: bool) -> Result<()> {
            if self.jammed.load(Ordering::SeqCst) {
                bail!("relay jammed");
            }
            self.inner.set(on)?;
            if on {
                self.jammed.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn lift_policy() -> SafetyPolicy {
        SafetyPolicy {
            max_runtime: secs(30),
            min_off: secs(5),
        }
    }

    #[test]
    fn failed_group_start_switches_the_healthy_relay_back_off() {
        let right = SimRelay::new("lift-right");
        let group = RelayGroup::new(vec![Box::new(StuckOff), Box::new(right.clone())]);
        let mut ctl =
            ActuatorController::new(ActuatorRole::Lift, lift_policy(), Box::new(group)).unwrap();
        let t0 = Instant::now();

        let err = ctl.evaluate(t0, Some(true)).unwrap_err();
        assert!(format!("{err:#}").contains("coil open"));
        assert!(!ctl.is_running());
        assert!(!right.is_on(), "half-started lift left energised");
        for s in [31, 60, 600] {
            assert!(ctl.evaluate(t0 + secs(s), None).unwrap().is_none());
            assert!(!right.is_on());
        }
    }

    #[test]
    fn failed_start_without_rollback_is_still_cut_off() {
        let left = Jamming {
            inner: SimRelay::new("lift-left"),
            jammed: Arc::new(AtomicBool::new(false)),
        };
        let group = RelayGroup::new(vec![Box::new(left.clone()), Box::new(StuckOff)]);
        let mut ctl =
            ActuatorController::new(ActuatorRole::Lift, lift_policy(), Box::new(group)).unwrap();
        let t0 = Instant::now();

        assert!(ctl.evaluate(t0, Some(true)).is_err());
        assert!(left.inner.is_on());
        assert!(ctl.is_running(), "unrecoverable half-start must be timed");

        left.jammed.store(false, Ordering::SeqCst);
        assert!(ctl.evaluate(t0 + secs(29), None).unwrap().is_none());
        let t = ctl.evaluate(t0 + secs(30), None).unwrap().unwrap();
        assert_eq!(t.cause, TransitionCause::Safety);
        assert!(!left.inner.is_on());
    }

    // -- Shutdown -----------------------------------------------------------

    #[test]
    fn shutdown_stops_a_running_actuator() {
        let (mut ctl, relay) = pump();
        let t0 = Instant::now();
        ctl.evaluate(t0, Some(true)).unwrap();

        let t = ctl.shutdown(t0 + secs(1)).unwrap().unwrap();
        assert_eq!(t.cause, TransitionCause::Shutdown);
        assert!(!relay.is_on());
        assert!(ctl.shutdown(t0 + secs(2)).unwrap().is_none());
    }

    #[test]
    fn role_keys_match_payload_names() {
        assert_eq!(ActuatorRole::Pump.to_string(), "pump");
        assert_eq!(ActuatorRole::Lift.to_string(), "lift");
        assert_eq!(ActuatorRole::Lid.to_string(), "lid");
    }
}
