//! Relay and servo outputs. The `gpio` feature gates the real rppal drivers;
//! the in-memory variants are always compiled and stand in for hardware in
//! development builds and tests.
//!
//! Outputs carry no policy. Whether a relay may switch is decided by the
//! owning `ActuatorController`; these types only move pins.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};
#[cfg(feature = "gpio")]
use std::time::Duration;

/// Hobby servo PWM period (50 Hz).
pub const SERVO_PERIOD_US: u64 = 20_000;

/// Pulse width at 0°.
const SERVO_MIN_PULSE_US: u64 = 500;

/// Pulse width at 180°.
const SERVO_MAX_PULSE_US: u64 = 2_500;

pub const SERVO_MAX_ANGLE: u8 = 180;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A switched output (pump relay, lift motor relay).
pub trait Relay: Send {
    fn set(&mut self, on: bool) -> Result<()>;
}

/// A positional output (lid servo).
pub trait Servo: Send {
    fn set_angle(&mut self, angle: u8) -> Result<()>;
}

/// Map an angle in degrees to a servo pulse width. Angles past 180° are
/// clamped.
pub fn angle_to_pulse_us(angle: u8) -> u64 {
    let angle = u64::from(angle.min(SERVO_MAX_ANGLE));
    SERVO_MIN_PULSE_US
        + angle * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / u64::from(SERVO_MAX_ANGLE)
}

// ---------------------------------------------------------------------------
// Groups: the lift runs two relays together, the lid two servos
// ---------------------------------------------------------------------------

/// Several relays switched as one. Every member is driven even if an
/// earlier one fails; the first error is returned.
pub struct RelayGroup {
    relays: Vec<Box<dyn Relay>>,
}

impl RelayGroup {
    pub fn new(relays: Vec<Box<dyn Relay>>) -> Self {
        Self { relays }
    }
}

impl Relay for RelayGroup {
    fn set(&mut self, on: bool) -> Result<()> {
        let mut first_err = None;
        for relay in &mut self.relays {
            if let Err(e) = relay.set(on) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Several servos moved to the same angle.
pub struct ServoGroup {
    servos: Vec<Box<dyn Servo>>,
}

impl ServoGroup {
    pub fn new(servos: Vec<Box<dyn Servo>>) -> Self {
        Self { servos }
    }
}

impl Servo for ServoGroup {
    fn set_angle(&mut self, angle: u8) -> Result<()> {
        let mut first_err = None;
        for servo in &mut self.servos {
            if let Err(e) = servo.set_angle(angle) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

// ---------------------------------------------------------------------------
// Real GPIO outputs (requires rppal and Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct GpioRelay {
    name: &'static str,
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl GpioRelay {
    pub fn new(gpio: &Gpio, name: &'static str, pin_num: u8, active_low: bool) -> Result<Self> {
        let pin = gpio
            .get(pin_num)
            .with_context(|| format!("relay {name}: gpio {pin_num} unavailable"))?
            .into_output();

        let mut relay = Self {
            name,
            pin,
            active_low,
        };
        // Fail-safe: ensure "OFF" before anyone asks
        relay.set(false)?;
        Ok(relay)
    }
}

#[cfg(feature = "gpio")]
impl Relay for GpioRelay {
    fn set(&mut self, on: bool) -> Result<()> {
        // active-low: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        debug!(relay = self.name, on, "gpio relay set");
        Ok(())
    }
}

#[cfg(feature = "gpio")]
pub struct GpioServo {
    name: &'static str,
    pin: OutputPin,
}

#[cfg(feature = "gpio")]
impl GpioServo {
    pub fn new(gpio: &Gpio, name: &'static str, pin_num: u8) -> Result<Self> {
        let pin = gpio
            .get(pin_num)
            .with_context(|| format!("servo {name}: gpio {pin_num} unavailable"))?
            .into_output_low();
        Ok(Self { name, pin })
    }
}

#[cfg(feature = "gpio")]
impl Servo for GpioServo {
    fn set_angle(&mut self, angle: u8) -> Result<()> {
        let pulse_us = angle_to_pulse_us(angle);
        self.pin
            .set_pwm(
                Duration::from_micros(SERVO_PERIOD_US),
                Duration::from_micros(pulse_us),
            )
            .with_context(|| format!("servo {}: pwm update failed", self.name))?;
        debug!(servo = self.name, angle, pulse_us, "gpio servo set");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory outputs (development and tests, no hardware)
// ---------------------------------------------------------------------------

/// Relay that only remembers its level. Clones share the level, so a test
/// can keep a handle after boxing one into a controller.
#[cfg_attr(feature = "gpio", allow(dead_code))]
#[derive(Clone)]
pub struct SimRelay {
    name: &'static str,
    on: Arc<AtomicBool>,
}

impl SimRelay {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            on: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

impl Relay for SimRelay {
    fn set(&mut self, on: bool) -> Result<()> {
        self.on.store(on, Ordering::SeqCst);
        debug!(relay = self.name, on, "[sim-gpio] relay set");
        Ok(())
    }
}

#[cfg_attr(feature = "gpio", allow(dead_code))]
#[derive(Clone)]
pub struct SimServo {
    name: &'static str,
    angle: Arc<AtomicU8>,
}

impl SimServo {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            angle: Arc::new(AtomicU8::new(0)),
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn angle(&self) -> u8 {
        self.angle.load(Ordering::SeqCst)
    }
}

impl Servo for SimServo {
    fn set_angle(&mut self, angle: u8) -> Result<()> {
        self.angle.store(angle.min(SERVO_MAX_ANGLE), Ordering::SeqCst);
        debug!(
            servo = self.name,
            angle,
            pulse_us = angle_to_pulse_us(angle),
            "[sim-gpio] servo set"
        );
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct BrokenRelay;

    impl Relay for BrokenRelay {
        fn set(&mut self, _on: bool) -> Result<()> {
            bail!("relay driver unplugged")
        }
    }

    // -- Servo pulse mapping ------------------------------------------------

    #[test]
    fn pulse_at_zero_degrees() {
        assert_eq!(angle_to_pulse_us(0), 500);
    }

    #[test]
    fn pulse_at_ninety_degrees_is_centre() {
        assert_eq!(angle_to_pulse_us(90), 1_500);
    }

    #[test]
    fn pulse_at_full_sweep() {
        assert_eq!(angle_to_pulse_us(180), 2_500);
    }

    #[test]
    fn pulse_clamps_past_full_sweep() {
        assert_eq!(angle_to_pulse_us(250), 2_500);
    }

    // -- SimRelay / SimServo --------------------------------------------------

    #[test]
    fn sim_relay_starts_off_and_shares_state_across_clones() {
        let relay = SimRelay::new("pump");
        let mut boxed: Box<dyn Relay> = Box::new(relay.clone());
        assert!(!relay.is_on());
        boxed.set(true).unwrap();
        assert!(relay.is_on());
    }

    #[test]
    fn sim_servo_clamps_angle() {
        let servo = SimServo::new("lid");
        let mut boxed: Box<dyn Servo> = Box::new(servo.clone());
        boxed.set_angle(200).unwrap();
        assert_eq!(servo.angle(), 180);
    }

    // -- Groups ---------------------------------------------------------------

    #[test]
    fn relay_group_switches_every_member() {
        let left = SimRelay::new("lift-left");
        let right = SimRelay::new("lift-right");
        let mut group = RelayGroup::new(vec![Box::new(left.clone()), Box::new(right.clone())]);

        group.set(true).unwrap();
        assert!(left.is_on() && right.is_on());

        group.set(false).unwrap();
        assert!(!left.is_on() && !right.is_on());
    }

    #[test]
    fn relay_group_drives_remaining_members_after_a_failure() {
        let right = SimRelay::new("lift-right");
        let mut group = RelayGroup::new(vec![Box::new(BrokenRelay), Box::new(right.clone())]);

        let err = group.set(true).unwrap_err();
        assert!(format!("{err}").contains("unplugged"));
        assert!(right.is_on(), "healthy relay must still be driven");
    }

    #[test]
    fn servo_group_moves_all_servos_together() {
        let left = SimServo::new("servo-left");
        let right = SimServo::new("servo-right");
        let mut group = ServoGroup::new(vec![Box::new(left.clone()), Box::new(right.clone())]);

        group.set_angle(45).unwrap();
        assert_eq!(left.angle(), 45);
        assert_eq!(right.angle(), 45);
    }
}
