//! Inbound remote commands: decoding, validation, and their side effects.
//!
//! A message is one JSON object whose recognised keys are independent. A bad
//! value drops only its own key; unknown keys are ignored. Decoding is
//! synchronous and bounded so the control loop never waits on it.
//!
//! ```json
//! {"pump": "on"|"off", "lift": "up"|"down", "lid": "open"|"close",
//!  "servo": 0..=180, "auto": true|false}
//! ```

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actuators::SERVO_MAX_ANGLE;
use crate::controller::ActuatorRole;
use crate::state::ControllerState;
use crate::telemetry::StatusEvent;

/// Inbound messages buffered between the MQTT task and the control loop.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

/// Keys in the order they are applied within one message. `auto` is last so
/// an explicit mode in the same message wins over a manual override.
const KNOWN_KEYS: [&str; 5] = ["lift", "lid", "pump", "servo", "auto"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidCommand {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetPump(bool),
    /// `true` = up (running), `false` = down.
    SetLift(bool),
    SetLid(LidCommand),
    SetServoAngle(u8),
    SetAutoMode(bool),
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one message. `Err` only when the payload is not a JSON object;
/// per-key problems are logged and the key is skipped.
pub fn decode(payload: &[u8]) -> Result<Vec<Command>, String> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| format!("invalid command json: {e}"))?;
    let Value::Object(map) = value else {
        return Err(format!("command payload is not a JSON object: {value}"));
    };

    for key in map.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            debug!(key = %key, "ignoring unknown command key");
        }
    }

    let mut commands = Vec::with_capacity(map.len());
    for key in KNOWN_KEYS {
        if let Some(value) = map.get(key) {
            match decode_key(key, value) {
                Ok(cmd) => commands.push(cmd),
                Err(msg) => warn!(key, "dropping command: {msg}"),
            }
        }
    }
    Ok(commands)
}

fn decode_key(key: &str, value: &Value) -> Result<Command, String> {
    match key {
        "lift" => parse_choice(value, "up", "down").map(Command::SetLift),
        "lid" => parse_choice(value, "open", "close").map(|open| {
            Command::SetLid(if open { LidCommand::Open } else { LidCommand::Close })
        }),
        "pump" => parse_choice(value, "on", "off").map(Command::SetPump),
        "servo" => parse_servo_angle(value).map(Command::SetServoAngle),
        "auto" => parse_auto(value).map(Command::SetAutoMode),
        _ => Err(format!("unknown key '{key}'")),
    }
}

/// Two-way string literal, case-insensitive, whitespace-trimmed. `Ok(true)`
/// for `on`, `Ok(false)` for `off`.
pub fn parse_choice(value: &Value, on: &str, off: &str) -> Result<bool, String> {
    let Some(s) = value.as_str() else {
        return Err(format!("expected \"{on}\" or \"{off}\", got {value}"));
    };
    let s = s.trim().to_lowercase();
    if s == on {
        Ok(true)
    } else if s == off {
        Ok(false)
    } else {
        Err(format!("unknown value '{s}' (use {on}/{off})"))
    }
}

/// Whole degrees in 0..=180.
pub fn parse_servo_angle(value: &Value) -> Result<u8, String> {
    let angle = value
        .as_u64()
        .ok_or_else(|| format!("servo angle must be a whole number of degrees, got {value}"))?;
    if angle > u64::from(SERVO_MAX_ANGLE) {
        return Err(format!("servo angle {angle} out of range [0, {SERVO_MAX_ANGLE}]"));
    }
    Ok(angle as u8)
}

pub fn parse_auto(value: &Value) -> Result<bool, String> {
    value
        .as_bool()
        .ok_or_else(|| format!("auto must be true or false, got {value}"))
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Apply one message's commands to the state and return the status events
/// to publish. A pump or lift command turns automation off before its
/// request; the mode event is emitted only when the flag actually flips, so
/// several manual keys in one message announce it once.
///
/// Hardware errors are logged per command and do not stop the rest of the
/// message.
pub fn apply(state: &mut ControllerState, now: Instant, commands: &[Command]) -> Vec<StatusEvent> {
    let mut events = Vec::new();

    for cmd in commands {
        match *cmd {
            Command::SetPump(on) => request(state, ActuatorRole::Pump, now, on, &mut events),
            Command::SetLift(up) => request(state, ActuatorRole::Lift, now, up, &mut events),
            Command::SetLid(lid) => {
                let moved = match lid {
                    LidCommand::Open => state.lid.open(),
                    LidCommand::Close => state.lid.close(),
                };
                match moved {
                    Ok(angle) => events.push(StatusEvent::Lid {
                        open: lid == LidCommand::Open,
                        angle,
                    }),
                    Err(e) => error!("lid command failed: {e:#}"),
                }
            }
            Command::SetServoAngle(angle) => match state.lid.set_angle(angle) {
                Ok(angle) => events.push(StatusEvent::Servo { angle }),
                Err(e) => error!("servo command failed: {e:#}"),
            },
            Command::SetAutoMode(enabled) => {
                state.set_auto(enabled);
                events.push(StatusEvent::AutoMode(enabled));
            }
        }
    }

    events
}

fn request(
    state: &mut ControllerState,
    role: ActuatorRole,
    now: Instant,
    on: bool,
    events: &mut Vec<StatusEvent>,
) {
    if state.set_auto(false) {
        events.push(StatusEvent::AutoMode(false));
    }

    let Some(ctl) = state.controller_mut(role) else {
        return;
    };
    info!(role = %role, on, "manual request");
    match ctl.evaluate(now, Some(on)) {
        Ok(Some(t)) => events.extend(StatusEvent::from_transition(&t)),
        Ok(None) => {}
        Err(e) => error!(role = %role, "manual request failed: {e:#}"),
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Receiving end of the inbound queue. The control loop drains it once per
/// tick without waiting.
pub struct CommandChannel {
    inbox: mpsc::Receiver<Vec<u8>>,
}

/// Create the inbound queue: the sender goes to the MQTT task.
pub fn channel() -> (mpsc::Sender<Vec<u8>>, CommandChannel) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    (tx, CommandChannel { inbox: rx })
}

impl CommandChannel {
    /// Next decodable message already waiting, or `None` if the queue is
    /// empty. Malformed messages are logged and skipped.
    pub fn next_message(&mut self) -> Option<Vec<Command>> {
        loop {
            let payload = self.inbox.try_recv().ok()?;
            match decode(&payload) {
                Ok(commands) => {
                    debug!(?commands, "command message decoded");
                    return Some(commands);
                }
                Err(msg) => warn!(
                    payload = %String::from_utf8_lossy(&payload),
                    "dropping command message: {msg}"
                ),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
