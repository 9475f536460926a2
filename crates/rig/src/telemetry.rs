//! Outbound payloads: periodic sensor snapshots and per-transition actuator
//! status. Field names are fixed by the ingestion side and must not change.
//!
//! Publishing never fails the caller. A transport error is logged and the
//! next tick simply publishes again.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::controller::{ActuatorRole, Transition};
use crate::sensors::SensorReading;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Local wall-clock time, falling back to UTC when the offset is unknown.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `YYYY-MM-DD HH:MM:SS`.
pub fn format_ts(t: OffsetDateTime) -> String {
    t.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Canonical sensor names used by the ingestion side
// ---------------------------------------------------------------------------

/// `(payload field, canonical sensor name, unit)`.
pub const CANONICAL_SENSORS: &[(&str, &str, &str)] = &[
    ("temperature_c", "DHT22_TEMP", "C"),
    ("humidity_pct", "DHT22_HUMIDITY", "%"),
    ("soil_moisture", "SOIL_MOISTURE", "%"),
    ("ph", "PH_SENSOR", "pH"),
    ("light_lux", "BH1750", "lux"),
    ("lux", "BH1750", "lux"),
];

/// Canonical `(name, unit)` for a telemetry field.
pub fn canonical_sensor(field: &str) -> Option<(&'static str, &'static str)> {
    CANONICAL_SENSORS
        .iter()
        .find(|(f, _, _)| *f == field)
        .map(|(_, name, unit)| (*name, *unit))
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TelemetryMsg<'a> {
    pub device_id: &'a str,
    pub ts: String,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub soil_moisture: Option<u8>,
    pub ph: Option<f64>,
    pub light_lux: Option<f64>,
}

impl<'a> TelemetryMsg<'a> {
    pub fn from_reading(device_id: &'a str, reading: &SensorReading) -> Self {
        Self {
            device_id,
            ts: format_ts(reading.taken_at),
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
            soil_moisture: reading.soil_moisture_pct,
            ph: reading.ph,
            light_lux: reading.light_lux,
        }
    }
}

/// One actuator change, as announced on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Pump { on: bool },
    Lift { up: bool },
    Lid { open: bool, angle: u8 },
    Servo { angle: u8 },
    AutoMode(bool),
}

impl StatusEvent {
    /// Pump and lift transitions map to their status event; anything else
    /// has no controller and never produces a `Transition`.
    pub fn from_transition(t: &Transition) -> Option<Self> {
        match t.role {
            ActuatorRole::Pump => Some(Self::Pump { on: t.running }),
            ActuatorRole::Lift => Some(Self::Lift { up: t.running }),
            ActuatorRole::Lid => None,
        }
    }

    pub fn to_payload(&self, ts: &str) -> Value {
        match *self {
            Self::Pump { on } => json!({ "pump": if on { "ON" } else { "OFF" }, "ts": ts }),
            Self::Lift { up } => json!({ "lift": if up { "UP" } else { "DOWN" }, "ts": ts }),
            Self::Lid { open, angle } => json!({
                "lid": if open { "OPEN" } else { "CLOSED" },
                "servo_left": angle,
                "servo_right": angle,
                "ts": ts,
            }),
            Self::Servo { angle } => json!({
                "servo_left": angle,
                "servo_right": angle,
                "ts": ts,
            }),
            Self::AutoMode(enabled) => json!({ "auto_mode": enabled, "ts": ts }),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink + publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sensors,
    Status,
}

/// Where payloads go. The MQTT implementation lives in `mqtt.rs`.
pub trait TelemetrySink: Send {
    fn publish(&mut self, channel: Channel, payload: Vec<u8>) -> Result<()>;
}

pub struct TelemetryPublisher {
    device_id: String,
    sink: Box<dyn TelemetrySink>,
}

impl TelemetryPublisher {
    pub fn new(device_id: String, sink: Box<dyn TelemetrySink>) -> Self {
        Self { device_id, sink }
    }

    pub fn publish_reading(&mut self, reading: &SensorReading) {
        let msg = TelemetryMsg::from_reading(&self.device_id, reading);
        log_canonical(&msg);
        match serde_json::to_vec(&msg) {
            Ok(payload) => self.send(Channel::Sensors, payload),
            Err(e) => warn!("telemetry: failed to encode reading: {e}"),
        }
    }

    pub fn publish_status(&mut self, event: &StatusEvent) {
        let payload = event.to_payload(&format_ts(local_now()));
        match serde_json::to_vec(&payload) {
            Ok(bytes) => self.send(Channel::Status, bytes),
            Err(e) => warn!("telemetry: failed to encode status: {e}"),
        }
    }

    fn send(&mut self, channel: Channel, payload: Vec<u8>) {
        if let Err(e) = self.sink.publish(channel, payload) {
            warn!(?channel, "publish failed: {e:#}");
        }
    }
}

fn log_canonical(msg: &TelemetryMsg<'_>) {
    let fields = [
        ("temperature_c", msg.temperature_c),
        ("humidity_pct", msg.humidity_pct),
        ("soil_moisture", msg.soil_moisture.map(f64::from)),
        ("ph", msg.ph),
        ("light_lux", msg.light_lux),
    ];
    for (field, value) in fields {
        if let Some((sensor, unit)) = canonical_sensor(field) {
            match value {
                Some(v) => debug!(sensor, unit, value = v, "reading"),
                None => debug!(sensor, "reading missing"),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
