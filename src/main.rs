mod alert;
mod config;
mod controller;
mod indicator;
mod io;
mod level;
mod pump;
mod sensor;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alert::{AlertQueue, LogTransport, MqttTransport};
use controller::Controller;
use io::DigitalOutput;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(
        tick_ms = cfg.control.tick_ms,
        debounce_ticks = cfg.control.debounce_ticks,
        dry_run_clear = ?cfg.control.dry_run_clear,
        "config loaded from {config_path}"
    );

    // ── I/O banks ───────────────────────────────────────────────────
    let inputs = build_inputs(&cfg)?;
    let mut outputs = build_outputs(&cfg)?;
    outputs.all_off()?;

    // ── Shutdown + command plumbing ─────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_shutdown = shutdown_tx.subscribe();
    let (ack_tx, ack_rx) = mpsc::channel::<()>(4);

    // ── Alert worker ────────────────────────────────────────────────
    let queue = AlertQueue::new(cfg.control.alert_queue_capacity);
    let worker = if cfg.mqtt.enabled {
        let client_id = "pumphouse";
        let mut mqttoptions = MqttOptions::new(client_id, cfg.mqtt.host.clone(), cfg.mqtt.port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqttoptions, 20);
        let ack_topic = format!("{}/cmd/ack", cfg.mqtt.topic_prefix);
        client.subscribe(ack_topic.clone(), QoS::AtLeastOnce).await?;
        info!(topic = %ack_topic, "subscribed for fault acknowledgements");

        tokio::spawn(poll_mqtt(eventloop, ack_topic, ack_tx.clone()));

        let transport = MqttTransport::new(client, cfg.mqtt.topic_prefix.clone());
        tokio::spawn(alert::run_worker(queue.clone(), transport, worker_shutdown))
    } else {
        info!("mqtt disabled — alerts go to the log only");
        tokio::spawn(alert::run_worker(
            queue.clone(),
            LogTransport,
            worker_shutdown,
        ))
    };

    // ── Ctrl-C → cooperative stop ───────────────────────────────────
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // ── Control loop (runs on this task until shutdown) ─────────────
    let controller = Controller::new(&cfg.control, inputs, outputs, queue.clone());
    controller.run(shutdown_rx, ack_rx).await?;

    worker.await?;
    info!(dropped_alerts = queue.dropped(), "pumphouse stopped");
    Ok(())
}

/// Keep the MQTT connection alive and turn acknowledgement publishes into
/// control-loop messages. Runs until the process exits.
async fn poll_mqtt(mut eventloop: rumqttc::EventLoop, ack_topic: String, ack_tx: mpsc::Sender<()>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if p.topic == ack_topic {
                    info!("fault acknowledgement received");
                    if ack_tx.send(()).await.is_err() {
                        return; // control loop is gone
                    }
                } else {
                    warn!(topic = %p.topic, "unhandled mqtt topic");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// I/O construction (real GPIO behind the `gpio` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
fn build_inputs(cfg: &config::Config) -> Result<io::GpioInputs> {
    let entries: Vec<_> = cfg
        .sensors
        .iter()
        .map(|s| (s.id, s.bcm_pin, s.pull, s.active_low))
        .collect();
    io::GpioInputs::new(&entries)
}

#[cfg(feature = "gpio")]
fn build_outputs(cfg: &config::Config) -> Result<io::GpioOutputs> {
    let entries: Vec<_> = cfg
        .outputs
        .iter()
        .map(|o| (o.id, o.bcm_pin, o.active_low))
        .collect();
    io::GpioOutputs::new(&entries)
}

#[cfg(not(feature = "gpio"))]
fn build_inputs(cfg: &config::Config) -> Result<io::MemInputs> {
    for s in &cfg.sensors {
        info!(sensor = %s.id, bcm_pin = s.bcm_pin, "[mock-gpio] registered (not wired)");
    }
    Ok(io::MemInputs::new())
}

#[cfg(not(feature = "gpio"))]
fn build_outputs(cfg: &config::Config) -> Result<io::MemOutputs> {
    for o in &cfg.outputs {
        info!(output = %o.id, bcm_pin = o.bcm_pin, "[mock-gpio] registered (not wired)");
    }
    Ok(io::MemOutputs::new())
}
