mod actuators;
#[cfg(feature = "gpio")]
mod ads1115;
mod arbiter;
mod command;
mod config;
mod control;
mod controller;
mod mqtt;
mod sensors;
#[cfg(feature = "sim")]
#[cfg_attr(feature = "gpio", allow(dead_code))]
mod sim;
mod state;
mod telemetry;

#[cfg(not(any(feature = "gpio", feature = "sim")))]
compile_error!("enable the `gpio` feature for hardware or `sim` for the simulated rig");

use anyhow::Result;
use rumqttc::AsyncClient;
use std::{env, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbiter::AutomationArbiter;
use config::Config;
use control::ControlLoop;
use controller::{ActuatorController, ActuatorRole};
use sensors::SensorReader;
use state::{ControllerState, Lid};
use telemetry::TelemetryPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path: PathBuf = env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "rig.toml".to_string())
        .into();
    let cfg = config::load(&config_path)?;

    // ── Hardware (everything off, lid closed) ───────────────────────
    let (state, sensors) = build_rig(&cfg)?;

    // ── MQTT ────────────────────────────────────────────────────────
    let (client, eventloop) = AsyncClient::new(
        mqtt::options(&cfg.mqtt, &cfg.device_id),
        mqtt::CLIENT_QUEUE_DEPTH,
    );
    let (inbox, commands) = command::channel();
    tokio::spawn(mqtt::forward_commands(
        eventloop,
        client.clone(),
        cfg.mqtt.commands_topic.clone(),
        inbox,
    ));
    let telemetry = TelemetryPublisher::new(
        cfg.device_id.clone(),
        Box::new(mqtt::MqttSink::new(client, &cfg.mqtt)),
    );

    // ── Control loop ────────────────────────────────────────────────
    let control = ControlLoop::new(
        cfg.loop_timing(),
        state,
        AutomationArbiter::new(cfg.thresholds()),
        commands,
        sensors,
        telemetry,
    );

    info!(device_id = %cfg.device_id, "greenhouse rig running");
    control
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("greenhouse rig stopped");
    Ok(())
}

fn controllers(
    cfg: &Config,
    pump: Box<dyn actuators::Relay>,
    lift: Box<dyn actuators::Relay>,
    lid: Box<dyn actuators::Servo>,
) -> Result<ControllerState> {
    let (open_angle, close_angle) = cfg.lid_angles();
    Ok(ControllerState::new(
        ActuatorController::new(ActuatorRole::Pump, cfg.pump_policy(), pump)?,
        ActuatorController::new(ActuatorRole::Lift, cfg.lift_policy(), lift)?,
        Lid::new(lid, open_angle, close_angle)?,
    ))
}

#[cfg(feature = "gpio")]
fn build_rig(cfg: &Config) -> Result<(ControllerState, Box<dyn SensorReader>)> {
    use actuators::{GpioRelay, GpioServo, RelayGroup, ServoGroup};
    use anyhow::Context;
    use rppal::gpio::Gpio;

    let hw = &cfg.hardware;
    let pin = |name: &str, n: i64| u8::try_from(n).with_context(|| format!("{name} {n}"));
    let gpio = Gpio::new().context("failed to open gpio")?;

    let pump = GpioRelay::new(&gpio, "pump", pin("pump_pin", hw.pump_pin)?, hw.active_low)?;
    let lift = RelayGroup::new(vec![
        Box::new(GpioRelay::new(
            &gpio,
            "lift_left",
            pin("lift_left_pin", hw.lift_left_pin)?,
            hw.active_low,
        )?),
        Box::new(GpioRelay::new(
            &gpio,
            "lift_right",
            pin("lift_right_pin", hw.lift_right_pin)?,
            hw.active_low,
        )?),
    ]);
    let lid = ServoGroup::new(vec![
        Box::new(GpioServo::new(
            &gpio,
            "servo_left",
            pin("servo_left_pin", hw.servo_left_pin)?,
        )?),
        Box::new(GpioServo::new(
            &gpio,
            "servo_right",
            pin("servo_right_pin", hw.servo_right_pin)?,
        )?),
    ]);

    let state = controllers(cfg, Box::new(pump), Box::new(lift), Box::new(lid))?;
    let sensors = sensors::HardwareSensors::new(hw)?;
    info!("hardware rig initialised");
    Ok((state, Box::new(sensors)))
}

#[cfg(not(feature = "gpio"))]
fn build_rig(cfg: &Config) -> Result<(ControllerState, Box<dyn SensorReader>)> {
    use actuators::{RelayGroup, ServoGroup, SimRelay, SimServo};
    use sim::{Scenario, SimulatedRig};

    let scenario = match env::var("SIM_SCENARIO") {
        Ok(name) => name.parse().unwrap_or_else(|e| {
            tracing::warn!("{e:#}, falling back to {}", Scenario::default());
            Scenario::default()
        }),
        Err(_) => Scenario::default(),
    };
    let day_s: f64 = env::var("SIM_DAY_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(86_400.0);

    let lift = RelayGroup::new(vec![
        Box::new(SimRelay::new("lift_left")),
        Box::new(SimRelay::new("lift_right")),
    ]);
    let lid = ServoGroup::new(vec![
        Box::new(SimServo::new("servo_left")),
        Box::new(SimServo::new("servo_right")),
    ]);

    let pump = SimRelay::new("pump");
    let state = controllers(cfg, Box::new(pump), Box::new(lift), Box::new(lid))?;
    info!(%scenario, day_s, "simulated rig initialised (no hardware)");
    Ok((state, Box::new(SimulatedRig::new(scenario, day_s))))
}
