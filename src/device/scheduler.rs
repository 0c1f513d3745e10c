//! Packet timing for pulse devices
//!
//! A device plays its queued pulses on its own clock. The scheduler asks the
//! algorithm for a new packet once a fixed fraction of the shortest queued
//! channel has elapsed, so the queue neither runs dry nor grows.

use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{PacketAlgorithm, PulsePacket};
use crate::error::DeviceError;
use crate::time::SharedTime;

/// Shortest sleep between ticks, in seconds
const MIN_WAKE_INTERVAL: f64 = 0.001;

/// State of a packet connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Stopped on request
    Stopped,
    /// Closed after a fault
    Lost(String),
}

/// Decides when the next packet is due
pub struct PacketScheduler {
    algorithm: Box<dyn PacketAlgorithm>,
    channel_end: Vec<f64>,
    next_wake: f64,
    regenerate_fraction: f64,
    packets: u64,
}

impl PacketScheduler {
    pub fn new(algorithm: Box<dyn PacketAlgorithm>, regenerate_fraction: f64) -> Self {
        let channels = algorithm.channel_count();
        Self {
            algorithm,
            channel_end: vec![f64::NEG_INFINITY; channels],
            next_wake: f64::NEG_INFINITY,
            regenerate_fraction: regenerate_fraction.clamp(0.05, 1.0),
            packets: 0,
        }
    }

    /// Time of the next scheduled regeneration
    pub fn next_wake(&self) -> f64 {
        self.next_wake
    }

    /// Time each channel's queue runs out
    pub fn channel_end(&self) -> &[f64] {
        &self.channel_end
    }

    pub fn packets_generated(&self) -> u64 {
        self.packets
    }

    /// Generate a packet if one is due at `now`
    pub fn tick(&mut self, now: f64) -> Option<PulsePacket> {
        if now < self.next_wake {
            return None;
        }

        let packet = self.algorithm.generate_packet(now);
        self.channel_end.clone_from(&packet.finish);

        let remaining = self
            .channel_end
            .iter()
            .map(|end| end - now)
            .fold(f64::INFINITY, f64::min);
        let remaining = if remaining.is_finite() { remaining.max(0.0) } else { 0.0 };
        self.next_wake = now + (self.regenerate_fraction * remaining).max(MIN_WAKE_INTERVAL);
        self.packets += 1;
        Some(packet)
    }
}

/// Drive `scheduler` until `stop` turns true or the writer fails.
///
/// Each packet is written with a single `write`; anything short of the full
/// frame is an underrun and closes the connection.
pub async fn run_packet_loop<W>(
    scheduler: &mut PacketScheduler,
    writer: &mut W,
    time: SharedTime,
    stop: &mut watch::Receiver<bool>,
) -> ConnectionState
where
    W: AsyncWrite + Unpin,
{
    loop {
        if *stop.borrow() {
            info!("Packet loop stopped");
            return ConnectionState::Stopped;
        }

        if let Some(packet) = scheduler.tick(time.now()) {
            let frame = match packet.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("{}", e);
                    return ConnectionState::Lost(e.to_string());
                }
            };

            match writer.write(&frame).await {
                Ok(written) if written == frame.len() => {
                    debug!("Sent packet {} ({} bytes)", scheduler.packets_generated(), written);
                }
                Ok(written) => {
                    let err = DeviceError::Underrun {
                        written,
                        expected: frame.len(),
                    };
                    error!("{}", err);
                    return ConnectionState::Lost(err.to_string());
                }
                Err(e) => {
                    let err = DeviceError::ConnectionLost(e.to_string());
                    error!("{}", err);
                    return ConnectionState::Lost(err.to_string());
                }
            }
            if let Err(e) = writer.flush().await {
                let err = DeviceError::ConnectionLost(e.to_string());
                error!("{}", err);
                return ConnectionState::Lost(err.to_string());
            }
        }

        let wait = (scheduler.next_wake() - time.now()).clamp(0.0, 1.0);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    return ConnectionState::Stopped;
                }
            }
        }
    }
}

/// Packet loop running on its own tokio task
pub struct PacketSession {
    stop: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    handle: JoinHandle<ConnectionState>,
}

impl PacketSession {
    pub fn spawn<W>(mut scheduler: PacketScheduler, mut writer: W, time: SharedTime) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop, mut stop_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(ConnectionState::Connected);
        let handle = tokio::spawn(async move {
            info!("Packet session started");
            let end = run_packet_loop(&mut scheduler, &mut writer, time, &mut stop_rx).await;
            state_tx.send_replace(end.clone());
            end
        });
        Self {
            stop,
            state,
            handle,
        }
    }

    /// Request the loop to stop; takes effect at the next tick. Calling it
    /// again has no further effect.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// `Connected` while the loop runs, then the state it ended in
    pub fn state(&self) -> ConnectionState {
        let state = self.state.borrow().clone();
        if state == ConnectionState::Connected && self.handle.is_finished() {
            // task ended without reporting, i.e. it panicked
            ConnectionState::Lost("packet task ended".to_string())
        } else {
            state
        }
    }

    /// Wait for the loop to end and return why it ended
    pub async fn join(self) -> ConnectionState {
        match self.handle.await {
            Ok(state) => state,
            Err(e) => ConnectionState::Lost(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Pulse, PULSES_PER_PACKET};
    use crate::time::{system_time, ManualTimeSource};
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    /// Fixed-length pulses on every channel
    struct FixedPulses {
        durations_ms: Vec<f64>,
        cursors: Vec<f64>,
    }

    impl FixedPulses {
        fn new(durations_ms: &[f64]) -> Self {
            Self {
                durations_ms: durations_ms.to_vec(),
                cursors: vec![f64::NEG_INFINITY; durations_ms.len()],
            }
        }
    }

    impl PacketAlgorithm for FixedPulses {
        fn channel_count(&self) -> usize {
            self.durations_ms.len()
        }

        fn generate_packet(&mut self, now: f64) -> PulsePacket {
            let starts: Vec<f64> = self.cursors.iter().map(|c| c.max(now)).collect();
            let channels: Vec<[Pulse; PULSES_PER_PACKET]> = self
                .durations_ms
                .iter()
                .map(|&d| [Pulse::from_duration(d, 50.0); PULSES_PER_PACKET])
                .collect();
            let packet = PulsePacket::new(now, &starts, channels);
            self.cursors.clone_from(&packet.finish);
            packet
        }
    }

    /// Accepts only part of every write
    struct ShortWriter;

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len() / 2))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_first_tick_generates() {
        let mut scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0, 50.0])), 0.8);
        let packet = scheduler.tick(10.0).unwrap();
        assert_eq!(packet.channels.len(), 2);
        // shorter channel holds 100 ms, wake after 80 ms
        assert!((scheduler.next_wake() - 10.08).abs() < 1e-9);
        assert!(scheduler.tick(10.05).is_none());
    }

    #[test]
    fn test_regenerates_at_fraction_of_remaining() {
        let mut scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0])), 0.8);
        scheduler.tick(0.0).unwrap();
        scheduler.tick(0.08).unwrap();
        // queue now ends at 0.2, remaining 0.12
        assert!((scheduler.channel_end()[0] - 0.2).abs() < 1e-9);
        assert!((scheduler.next_wake() - (0.08 + 0.8 * 0.12)).abs() < 1e-9);
        assert_eq!(scheduler.packets_generated(), 2);
    }

    #[test]
    fn test_late_tick_restarts_from_now() {
        let mut scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0])), 0.8);
        scheduler.tick(0.0).unwrap();
        let packet = scheduler.tick(5.0).unwrap();
        assert!((packet.finish[0] - 5.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_short_write_is_underrun() {
        let mut scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0])), 0.8);
        let time: SharedTime = Arc::new(ManualTimeSource::new(0.0));
        let (_tx, mut rx) = watch::channel(false);
        let state = run_packet_loop(&mut scheduler, &mut ShortWriter, time, &mut rx).await;
        match state {
            ConnectionState::Lost(reason) => assert!(reason.contains("underrun")),
            other => panic!("expected Lost, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reports_underrun_as_lost() {
        let scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0])), 0.8);
        let session = PacketSession::spawn(scheduler, ShortWriter, system_time());

        tokio::time::sleep(Duration::from_millis(50)).await;
        match session.state() {
            ConnectionState::Lost(reason) => assert!(reason.contains("underrun")),
            other => panic!("expected Lost, got {:?}", other),
        }
        // stopping after the fault does not mask it
        session.stop();
        match session.join().await {
            ConnectionState::Lost(reason) => assert!(reason.contains("underrun")),
            other => panic!("expected Lost, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_before_start_writes_nothing() {
        let mut scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[25.0])), 0.8);
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        let mut out: Vec<u8> = Vec::new();
        let state = run_packet_loop(&mut scheduler, &mut out, system_time(), &mut rx).await;
        assert_eq!(state, ConnectionState::Stopped);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_session_writes_decodable_packets_and_stops() {
        let scheduler = PacketScheduler::new(Box::new(FixedPulses::new(&[5.0, 5.0])), 0.8);
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let session = PacketSession::spawn(scheduler, client, system_time());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), ConnectionState::Connected);
        session.stop();
        session.stop();
        assert_eq!(session.join().await, ConnectionState::Stopped);

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut received)
            .await
            .unwrap();
        let first = PulsePacket::decode(&received).unwrap();
        assert_eq!(first.channels.len(), 2);
        assert_eq!(first.channels[0][0].duration, 5);
    }
}
