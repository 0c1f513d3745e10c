//! Audio Output Application
//!
//! Plays a continuous or pulse-based waveform on an audio device while a
//! demo task sweeps the position around the unit circle.
//!
//! Usage: `stim-audio [continuous|pulse|4phase|5phase] [volume] [device-id]`

use anyhow::{bail, Result};
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phase_stim::{
    audio::{device::list_output_devices, AudioOutput, StreamEvent},
    axis::{Axis, AxisCatalog, AxisId, InactivityMonitor},
    config::AppConfig,
    constants::STATUS_INTERVAL_SECS,
    synth::{AudioAlgorithm, MagnitudeSource, MultiPhaseContinuous, PulseBased, ThreePhaseContinuous},
    time::system_time,
};

/// Seconds per revolution of the demo motion
const REVOLUTION_SECS: f64 = 8.0;

/// Demo position updates per second
const UPDATE_HZ: f64 = 20.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio stimulation output");

    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "continuous".to_string());
    let volume: f64 = match args.next() {
        Some(v) => v.parse()?,
        None => 0.3,
    };
    let device_id = args.next();

    let mut config = AppConfig::load_or_default()?;
    if device_id.is_some() {
        config.audio.device_id = device_id;
    }

    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let time = system_time();
    let catalog = AxisCatalog::new(time.clone(), &config.axis);

    let algorithm: Box<dyn AudioAlgorithm> = match mode.as_str() {
        "continuous" => Box::new(ThreePhaseContinuous::new(
            catalog.clone(),
            config.safety,
            config.projection.squeeze,
        )),
        "pulse" => Box::new(PulseBased::new(
            catalog.clone(),
            config.safety,
            config.pulse,
            config.projection.squeeze,
        )),
        "4phase" => Box::new(MultiPhaseContinuous::<4>::new(
            catalog.clone(),
            config.safety,
            MagnitudeSource::Tetrahedral,
        )),
        "5phase" => Box::new(MultiPhaseContinuous::<5>::new(
            catalog.clone(),
            config.safety,
            MagnitudeSource::Electrodes,
        )),
        other => bail!("Unknown mode '{}', expected continuous, pulse, 4phase or 5phase", other),
    };

    let mut output = AudioOutput::new(&config.audio, config.clock)?;
    output.start(algorithm, time.clone())?;

    // Fade in from silence
    let now = catalog.now();
    let master = catalog.axis(AxisId::VolumeMaster);
    master.add_at(now, 0.0);
    master.add_at(now + 1.0, volume.clamp(0.0, 1.0));
    tracing::info!("Mode: {}, volume {:.2}", mode, volume);

    let (stop_tx, stop_rx) = watch::channel(false);
    let inactivity = if config.inactivity.enabled {
        Some(InactivityMonitor::new(catalog.clone(), config.inactivity).spawn(stop_rx.clone()))
    } else {
        None
    };
    let motion = tokio::spawn(sweep_position(catalog.clone(), stop_rx));

    tracing::info!("Running - press Ctrl+C to stop");

    let mut status = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    let mut events = tokio::time::interval(Duration::from_millis(100));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
            _ = events.tick() => {
                match output.check_events() {
                    Some(StreamEvent::Desync(e)) => {
                        tracing::error!("Output aborted: {}", e);
                        break;
                    }
                    Some(StreamEvent::StreamError(e)) => tracing::warn!("Stream error: {}", e),
                    Some(StreamEvent::ConfigClamped { name, value }) => {
                        tracing::warn!("{} = {} outside valid range, clamping", name, value)
                    }
                    None => {}
                }
                if !output.is_running() {
                    tracing::error!("Output stream ended");
                    break;
                }
            }
            _ = status.tick() => {
                let stats = output.stats();
                tracing::info!(
                    "Callbacks: {}, frames: {}, offset: {:.4}s, latency: {:.1}ms",
                    stats.callbacks(),
                    stats.frames(),
                    stats.offset(),
                    stats.latency() * 1000.0
                );
            }
        }
    }

    stop_tx.send_replace(true);
    let _ = motion.await;
    if let Some(handle) = inactivity {
        let _ = handle.await;
    }
    output.stop();
    Ok(())
}

/// Move the position around the unit circle until `stop` turns true
async fn sweep_position(catalog: AxisCatalog, mut stop: watch::Receiver<bool>) {
    let period = Duration::from_secs_f64(1.0 / UPDATE_HZ);
    let mut interval = tokio::time::interval(period);
    let start = catalog.now();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let angle = (catalog.now() - start) / REVOLUTION_SECS * TAU;
                // half a period ahead so interpolation stays smooth
                let delay = period.as_secs_f64() / 2.0;
                catalog.set(AxisId::PositionAlpha, angle.cos(), delay);
                catalog.set(AxisId::PositionBeta, angle.sin(), delay);
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}
