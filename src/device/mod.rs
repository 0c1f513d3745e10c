//! Pulse-packet devices
//!
//! Devices of this class do not take audio. They receive packets of discrete
//! pulses, each with its own frequency, intensity and duration, and play them
//! back on their internal clock. The host must keep their queues filled.

pub mod packet;
pub mod scheduler;

pub use packet::{PacketGenerator, SensationModulator, SensationShape};
pub use scheduler::{ConnectionState, PacketScheduler, PacketSession};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Shortest pulse a device accepts, in milliseconds
pub const MIN_PULSE_MS: u32 = 5;

/// Longest pulse a device accepts, in milliseconds
pub const MAX_PULSE_MS: u32 = 240;

/// Pulses per channel in every packet
pub const PULSES_PER_PACKET: usize = 4;

/// One device pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pulse {
    /// Hz, always `round(1000 / duration)`
    pub frequency: u32,
    /// 0..=100
    pub intensity: u8,
    /// Milliseconds in [`MIN_PULSE_MS`, `MAX_PULSE_MS`]
    pub duration: u32,
}

impl Pulse {
    /// Build a pulse from a target duration. The duration is rounded and
    /// clamped first, the frequency follows from the clamped value.
    pub fn from_duration(duration_ms: f64, intensity: f64) -> Self {
        let duration = if duration_ms.is_finite() {
            duration_ms.round().clamp(MIN_PULSE_MS as f64, MAX_PULSE_MS as f64) as u32
        } else {
            MAX_PULSE_MS
        };
        let intensity = if intensity.is_finite() {
            intensity.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Self {
            frequency: (1000.0 / duration as f64).round() as u32,
            intensity,
            duration,
        }
    }

    /// Duration in seconds
    pub fn seconds(&self) -> f64 {
        self.duration as f64 / 1000.0
    }
}

/// Pulses for every channel starting at `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsePacket {
    /// Wall-clock time the packet was generated for
    pub start: f64,
    /// Time each channel runs out of pulses
    pub finish: Vec<f64>,
    pub channels: Vec<[Pulse; PULSES_PER_PACKET]>,
}

impl PulsePacket {
    /// `channel_starts` is where each channel's first pulse begins
    pub fn new(start: f64, channel_starts: &[f64], channels: Vec<[Pulse; PULSES_PER_PACKET]>) -> Self {
        let finish = channels
            .iter()
            .enumerate()
            .map(|(i, pulses)| {
                let begin = channel_starts.get(i).copied().unwrap_or(start);
                begin + pulses.iter().map(Pulse::seconds).sum::<f64>()
            })
            .collect();
        Self {
            start,
            finish,
            channels,
        }
    }

    /// Earliest channel finish
    pub fn first_finish(&self) -> f64 {
        self.finish.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    /// Frame the packet for the wire
    pub fn encode(&self) -> Result<Bytes, DeviceError> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| DeviceError::Encoding(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, DeviceError> {
        bincode::deserialize(data).map_err(|e| DeviceError::Encoding(e.to_string()))
    }
}

/// A packet-producing algorithm driven by the scheduler
pub trait PacketAlgorithm: Send {
    fn channel_count(&self) -> usize;

    /// Produce the next packet. Channels continue from where their previous
    /// packet ended, or from `now` if that lies in the past.
    fn generate_packet(&mut self, now: f64) -> PulsePacket;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_duration_clamps() {
        let short = Pulse::from_duration(1.0, 50.0);
        assert_eq!(short.duration, 5);
        assert_eq!(short.frequency, 200);

        let long = Pulse::from_duration(1000.0, 50.0);
        assert_eq!(long.duration, 240);
        assert_eq!(long.frequency, 4);

        let mid = Pulse::from_duration(33.4, 150.0);
        assert_eq!(mid.duration, 33);
        assert_eq!(mid.frequency, 30);
        assert_eq!(mid.intensity, 100);
    }

    #[test]
    fn test_from_duration_rejects_nan() {
        let pulse = Pulse::from_duration(f64::NAN, f64::NAN);
        assert_eq!(pulse.duration, MAX_PULSE_MS);
        assert_eq!(pulse.intensity, 0);
    }

    #[test]
    fn test_packet_finish_per_channel() {
        let a = [Pulse::from_duration(10.0, 0.0); 4];
        let b = [Pulse::from_duration(25.0, 0.0); 4];
        let packet = PulsePacket::new(1.0, &[1.0, 1.02], vec![a, b]);
        assert!((packet.finish[0] - 1.04).abs() < 1e-12);
        assert!((packet.finish[1] - 1.12).abs() < 1e-12);
        assert!((packet.first_finish() - 1.04).abs() < 1e-12);
    }

    #[test]
    fn test_encode_decode() {
        let packet = PulsePacket::new(3.5, &[3.5], vec![[Pulse::from_duration(20.0, 42.0); 4]]);
        let bytes = packet.encode().unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(PulsePacket::decode(&bytes).unwrap(), packet);
    }
}
