//! Soil-moisture automation. A pure decision function: it never touches an
//! actuator and keeps no state between calls.
//!
//! Between the two thresholds there is no request at all, so a running pump
//! keeps running and a stopped pump stays stopped until a band edge is
//! crossed.

use crate::controller::ActuatorRole;
use crate::sensors::SensorReading;

/// Soil moisture bounds in percent. `dry < wet` is enforced by config
/// validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub dry: u8,
    pub wet: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { dry: 40, wet: 70 }
    }
}

pub struct AutomationArbiter {
    thresholds: Thresholds,
}

impl AutomationArbiter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// `Some(true)` to request on, `Some(false)` to request off, `None` for
    /// no action. Only the pump is automated.
    pub fn decide(
        &self,
        reading: &SensorReading,
        auto_enabled: bool,
        role: ActuatorRole,
    ) -> Option<bool> {
        if !auto_enabled {
            return None;
        }
        match role {
            ActuatorRole::Pump => {
                let soil = reading.soil_moisture_pct?;
                if soil < self.thresholds.dry {
                    Some(true)
                } else if soil > self.thresholds.wet {
                    Some(false)
                } else {
                    None
                }
            }
            ActuatorRole::Lift | ActuatorRole::Lid => None,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
