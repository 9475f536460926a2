//! MQTT transport: broker options, the outbound telemetry sink, and the
//! event-loop task that feeds inbound commands to the control loop.
//!
//! Neither direction ever blocks the control loop. Publishes go through
//! `try_publish` into the client's request queue; inbound payloads are
//! handed over with `try_send` and dropped if the loop has fallen behind.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::telemetry::{Channel, TelemetrySink};

/// Request queue depth between the client handle and the event loop.
pub const CLIENT_QUEUE_DEPTH: usize = 20;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

pub fn options(cfg: &MqttConfig, device_id: &str) -> MqttOptions {
    let client_id = format!("greenhouse-rig-{device_id}");
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user.clone(), pass.clone());
    }
    opts
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

pub struct MqttSink {
    client: AsyncClient,
    sensors_topic: String,
    status_topic: String,
}

impl MqttSink {
    pub fn new(client: AsyncClient, cfg: &MqttConfig) -> Self {
        Self {
            client,
            sensors_topic: cfg.sensors_topic.clone(),
            status_topic: cfg.status_topic.clone(),
        }
    }

    fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Sensors => &self.sensors_topic,
            Channel::Status => &self.status_topic,
        }
    }
}

impl TelemetrySink for MqttSink {
    fn publish(&mut self, channel: Channel, payload: Vec<u8>) -> Result<()> {
        let topic = self.topic(channel).to_string();
        self.client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("mqtt: could not queue publish to {topic}"))
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Hand a publish on the command topic to the control loop. Returns `false`
/// once the receiving side is gone.
fn forward_publish(p: &Publish, commands_topic: &str, inbox: &mpsc::Sender<Vec<u8>>) -> bool {
    if p.topic != commands_topic {
        debug!(topic = %p.topic, "ignoring publish on unexpected topic");
        return true;
    }
    match inbox.try_send(p.payload.to_vec()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("command queue full, dropping message");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Drive the MQTT event loop until the control loop drops its receiver.
/// Subscribes on every ConnAck so the subscription survives reconnects.
pub async fn forward_commands(
    mut eventloop: EventLoop,
    client: AsyncClient,
    commands_topic: String,
    inbox: mpsc::Sender<Vec<u8>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if !forward_publish(&p, &commands_topic, &inbox) {
                    info!("command receiver closed, stopping mqtt task");
                    return;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(topic = %commands_topic, "mqtt connected, subscribing");
                if let Err(e) = client.try_subscribe(commands_topic.as_str(), QoS::AtLeastOnce) {
                    warn!("mqtt subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
