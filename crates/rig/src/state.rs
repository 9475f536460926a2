use anyhow::{Context, Result};
use tracing::info;

use crate::actuators::Servo;
use crate::controller::{ActuatorController, ActuatorRole};

// ---------------------------------------------------------------------------
// Lid
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidPosition {
    Open,
    Closed,
    /// Set directly by angle rather than a preset.
    Angle(u8),
}

/// The lid servos plus their open/close presets. No timers: the lid only
/// ever moves to a position.
pub struct Lid {
    servos: Box<dyn Servo>,
    open_angle: u8,
    close_angle: u8,
    position: LidPosition,
    angle: u8,
}

impl Lid {
    /// Closes the lid so the recorded position matches the hardware.
    pub fn new(mut servos: Box<dyn Servo>, open_angle: u8, close_angle: u8) -> Result<Self> {
        servos
            .set_angle(close_angle)
            .context("lid: failed to close at startup")?;
        Ok(Self {
            servos,
            open_angle,
            close_angle,
            position: LidPosition::Closed,
            angle: close_angle,
        })
    }

    pub fn position(&self) -> LidPosition {
        self.position
    }

    pub fn angle(&self) -> u8 {
        self.angle
    }

    pub fn open(&mut self) -> Result<u8> {
        self.move_to(self.open_angle, LidPosition::Open)
    }

    pub fn close(&mut self) -> Result<u8> {
        self.move_to(self.close_angle, LidPosition::Closed)
    }

    pub fn set_angle(&mut self, angle: u8) -> Result<u8> {
        self.move_to(angle, LidPosition::Angle(angle))
    }

    fn move_to(&mut self, angle: u8, position: LidPosition) -> Result<u8> {
        self.servos
            .set_angle(angle)
            .with_context(|| format!("lid: failed to move to {angle}°"))?;
        self.angle = angle;
        self.position = position;
        info!(angle, ?position, "lid moved");
        Ok(angle)
    }
}

// ---------------------------------------------------------------------------
// Controller state
// ---------------------------------------------------------------------------

/// Everything the control loop mutates: the automation flag, one controller
/// per timed actuator, and the lid. Owned by the loop and lent to the
/// command channel; nothing else holds it.
pub struct ControllerState {
    auto_enabled: bool,
    pub pump: ActuatorController,
    pub lift: ActuatorController,
    pub lid: Lid,
}

impl ControllerState {
    pub fn new(pump: ActuatorController, lift: ActuatorController, lid: Lid) -> Self {
        Self {
            auto_enabled: true,
            pump,
            lift,
            lid,
        }
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled
    }

    /// Returns `true` if the flag actually changed.
    pub fn set_auto(&mut self, enabled: bool) -> bool {
        if self.auto_enabled == enabled {
            return false;
        }
        self.auto_enabled = enabled;
        info!(auto_enabled = enabled, "automation mode changed");
        true
    }

    /// Controller for a timed role; the lid has none.
    pub fn controller_mut(&mut self, role: ActuatorRole) -> Option<&mut ActuatorController> {
        match role {
            ActuatorRole::Pump => Some(&mut self.pump),
            ActuatorRole::Lift => Some(&mut self.lift),
            ActuatorRole::Lid => None,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
