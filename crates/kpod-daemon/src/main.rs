//! KPod Daemon - reports Elecraft KPod input.
//!
//! Opens the pod, polls it through `kpod-hid` and logs every knob, button
//! and rocker event until a shutdown signal arrives or the device goes away.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use kpod_core::PodEvent;
use kpod_hid::{ChannelSink, Driver, DriverEvent, HidError, StopReason, is_kpod_connected};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod signals;

/// Events buffered between the poll thread and the runtime.
const EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("kpod_daemon={}", config.daemon.log_level).parse()?)
                .add_directive(format!("kpod_hid={}", config.daemon.log_level).parse()?)
                .add_directive(format!("kpod_core={}", config.daemon.log_level).parse()?),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting KPod daemon");

    let driver_config = config.driver_config()?;
    let (vendor_id, product_id) = (driver_config.vendor_id, driver_config.product_id);

    let (sink, mut events) = ChannelSink::channel(EVENT_CAPACITY);
    let mut driver = match Driver::open(driver_config, Some(Arc::new(sink))) {
        Ok(driver) => driver,
        Err(HidError::DeviceNotFound) if is_kpod_connected(vendor_id, product_id) => {
            return Err(HidError::PermissionDenied)
                .context("KPod is on the USB bus but cannot be opened");
        }
        Err(e) => return Err(e).context("Failed to open KPod"),
    };
    info!("KPod driver running");

    let shutdown = signals::shutdown_signal();
    tokio::pin!(shutdown);

    let failure = loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!(signal, "Shutting down");
                break None;
            }
            Some(event) = events.recv() => match event {
                DriverEvent::Pod(event) => report(&event, config.daemon.json_events),
                DriverEvent::Stopped(StopReason::Requested) => break None,
                DriverEvent::Stopped(reason) => {
                    error!(?reason, "KPod driver stopped unexpectedly");
                    break Some(reason);
                }
            },
        }
    };

    tokio::task::spawn_blocking(move || driver.close())
        .await
        .context("Driver shutdown task failed")?;
    info!("KPod daemon stopped");

    if let Some(reason) = failure {
        bail!("KPod driver stopped: {reason:?}");
    }
    Ok(())
}

/// Print one event, as a JSON line or a log record.
fn report(event: &PodEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "Failed to serialize event"),
        }
        return;
    }

    match *event {
        PodEvent::Button { buttons, tap_hold } => {
            info!(buttons = %format!("{buttons:04b}"), hold = tap_hold, "Button");
        }
        PodEvent::Rotate { position } => info!(position, "Rotated"),
        PodEvent::Rocker { position } => info!(position, "Rocker"),
    }
}
