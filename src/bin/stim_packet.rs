//! Pulse Packet Application
//!
//! Generates pulse packets for a packet-based device and writes them to a
//! file, a serial port node, or stdout.
//!
//! Usage: `stim-packet [output-path] [volume]`

use anyhow::Result;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phase_stim::{
    axis::{AxisCatalog, AxisId},
    config::AppConfig,
    device::{ConnectionState, PacketGenerator, PacketScheduler, PacketSession},
    time::system_time,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout can carry packets
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting pulse packet output");

    let mut args = std::env::args().skip(1);
    let path = args.next();
    let volume: f64 = match args.next() {
        Some(v) => v.parse()?,
        None => 0.3,
    };

    let config = AppConfig::load_or_default()?;
    let time = system_time();
    let catalog = AxisCatalog::new(time.clone(), &config.axis);
    catalog.set(AxisId::VolumeMaster, volume.clamp(0.0, 1.0), 0.0);

    let generator = PacketGenerator::new(catalog.clone(), config.safety, &config.device);
    let scheduler = PacketScheduler::new(Box::new(generator), config.device.regenerate_fraction);

    let writer: Box<dyn AsyncWrite + Unpin + Send> = match path.as_deref() {
        Some("-") | None => Box::new(tokio::io::stdout()),
        Some(path) => {
            tracing::info!("Writing packets to {}", path);
            Box::new(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            )
        }
    };

    tracing::info!(
        "{} channels, regenerate at {:.0}% of queue",
        config.device.channels.len(),
        config.device.regenerate_fraction * 100.0
    );

    let session = PacketSession::spawn(scheduler, writer, time);

    tracing::info!("Running - press Ctrl+C to stop");
    let mut check = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
            _ = check.tick() => {
                if session.state() != ConnectionState::Connected {
                    break;
                }
            }
        }
    }

    session.stop();
    match session.join().await {
        ConnectionState::Lost(reason) => tracing::error!("Connection lost: {}", reason),
        state => tracing::info!("Session ended: {:?}", state),
    }
    Ok(())
}
