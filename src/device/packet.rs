//! Pulse packets from the control axes
//!
//! The carrier frequency axis selects where in each channel's frequency band
//! the pulse rate sits. A slow triangle modulator, driven by the pulse
//! frequency axis, sweeps the rate around that point so the sensation moves.
//! Intensities follow the position over the electrode triangle.

use serde::{Deserialize, Serialize};

use crate::axis::{AxisCatalog, AxisId};
use crate::config::{ChannelBand, ClampWarning, DeviceConfig, SafetyLimits};
use crate::error::ConfigError;
use crate::math::calibration::CALIBRATION_DB_LIMIT;
use crate::math::threephase::barycentric;
use crate::math::{CenterCalibration, Position};
use crate::synth::aggregate_volume;

use super::{PacketAlgorithm, Pulse, PulsePacket, PULSES_PER_PACKET};

/// Shape of the sensation modulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensationShape {
    /// Rate scaler at the bottom of the triangle
    #[serde(default = "SensationShape::default_duty_scale_min")]
    pub duty_scale_min: f64,
    /// Rate scaler at the top of the triangle
    #[serde(default = "SensationShape::default_duty_scale_max")]
    pub duty_scale_max: f64,
    #[serde(default = "SensationShape::default_rise_clamp_min")]
    pub rise_clamp_min: f64,
    #[serde(default = "SensationShape::default_rise_clamp_max")]
    pub rise_clamp_max: f64,
}

impl SensationShape {
    fn default_duty_scale_min() -> f64 {
        0.75
    }
    fn default_duty_scale_max() -> f64 {
        1.25
    }
    fn default_rise_clamp_min() -> f64 {
        0.01
    }
    fn default_rise_clamp_max() -> f64 {
        0.99
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |name: &'static str, value: f64, min: f64, max: f64| {
            if value.is_nan() || value < min || value > max {
                Err(ConfigError::OutOfRange {
                    name,
                    value,
                    min,
                    max,
                })
            } else {
                Ok(())
            }
        };
        check("device.sensation.duty_scale_min", self.duty_scale_min, 0.0, 10.0)?;
        check(
            "device.sensation.duty_scale_max",
            self.duty_scale_max,
            self.duty_scale_min,
            10.0,
        )?;
        check("device.sensation.rise_clamp_min", self.rise_clamp_min, 0.0, 1.0)?;
        check(
            "device.sensation.rise_clamp_max",
            self.rise_clamp_max,
            self.rise_clamp_min,
            1.0,
        )
    }
}

impl Default for SensationShape {
    fn default() -> Self {
        Self {
            duty_scale_min: Self::default_duty_scale_min(),
            duty_scale_max: Self::default_duty_scale_max(),
            rise_clamp_min: Self::default_rise_clamp_min(),
            rise_clamp_max: Self::default_rise_clamp_max(),
        }
    }
}

/// Asymmetric triangle oscillator producing a rate scaler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensationModulator {
    shape: SensationShape,
    phase: f64,
}

impl SensationModulator {
    pub fn new(shape: SensationShape) -> Self {
        Self { shape, phase: 0.0 }
    }

    /// Position in the cycle, [0, 1)
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Fraction of the cycle spent rising for a pulse width and rise time
    pub fn rise_fraction(&self, pulse_width: f64, rise_time: f64) -> f64 {
        let fraction = if pulse_width > 0.0 {
            rise_time / pulse_width
        } else {
            0.5
        };
        let fraction = if fraction.is_finite() { fraction } else { 0.5 };
        fraction.clamp(self.shape.rise_clamp_min, self.shape.rise_clamp_max)
    }

    /// Triangle value in [0, 1] at the current phase
    pub fn triangle(&self, rise: f64) -> f64 {
        if self.phase < rise {
            self.phase / rise
        } else {
            (1.0 - self.phase) / (1.0 - rise)
        }
    }

    /// Rate scaler at the current phase
    pub fn scaler(&self, pulse_width: f64, rise_time: f64) -> f64 {
        let value = self.triangle(self.rise_fraction(pulse_width, rise_time));
        self.shape.duty_scale_min + (self.shape.duty_scale_max - self.shape.duty_scale_min) * value
    }

    /// Advance by `dt` seconds at `frequency` Hz
    pub fn advance(&mut self, frequency: f64, dt: f64) {
        let step = frequency * dt;
        if step.is_finite() && step > 0.0 {
            self.phase = (self.phase + step).rem_euclid(1.0);
        }
    }

    /// Current rate scaler, then advance by `dt` seconds at `frequency` Hz
    pub fn next(&mut self, frequency: f64, pulse_width: f64, rise_time: f64, dt: f64) -> f64 {
        let scaler = self.scaler(pulse_width, rise_time);
        self.advance(frequency, dt);
        scaler
    }
}

/// Per-channel intensities in [0, 1] from the position.
///
/// Two channels drive L and R against N, so the neutral weight is shared
/// between them. Three channels get the raw weights; one channel is always
/// full.
pub fn channel_intensities(position: Position, channels: usize) -> Vec<f64> {
    let [n, l, r] = barycentric(position);
    match channels {
        0 => Vec::new(),
        1 => vec![1.0],
        2 => vec![l + n / 2.0, r + n / 2.0],
        _ => {
            let mut out = vec![n, l, r];
            out.resize(channels, 0.0);
            out
        }
    }
}

/// Packet generator for pulse devices
pub struct PacketGenerator {
    catalog: AxisCatalog,
    limits: SafetyLimits,
    bands: Vec<ChannelBand>,
    modulators: Vec<SensationModulator>,
    cursors: Vec<f64>,
    /// Time up to which each channel's modulator has been advanced
    modulator_clock: Vec<f64>,
    center: CenterCalibration,
    center_warning: ClampWarning,
}

impl PacketGenerator {
    pub fn new(catalog: AxisCatalog, limits: SafetyLimits, config: &DeviceConfig) -> Self {
        let channels = config.channels.len();
        Self {
            catalog,
            limits,
            bands: config.channels.clone(),
            modulators: vec![SensationModulator::new(config.sensation); channels],
            cursors: vec![f64::NEG_INFINITY; channels],
            modulator_clock: vec![f64::NEG_INFINITY; channels],
            center: CenterCalibration::default(),
            center_warning: ClampWarning::new("calibrate.3phase.center"),
        }
    }

    /// Position of the carrier axis within the safety band, [0, 1]
    fn duty(&self, t: f64) -> f64 {
        let carrier = self
            .limits
            .clamp_carrier(self.catalog.interpolate(AxisId::CarrierFrequency, t));
        let span = self.limits.max_carrier_hz - self.limits.min_carrier_hz;
        if span > 0.0 {
            (carrier - self.limits.min_carrier_hz) / span
        } else {
            0.5
        }
    }

    /// Modulator phase of `channel`, [0, 1)
    pub fn modulator_phase(&self, channel: usize) -> f64 {
        self.modulators[channel].phase()
    }

    /// Pulse for `channel` starting at `t`.
    ///
    /// The channel's modulator first catches up with any gap since its last
    /// pulse, then runs through the pulse's own duration.
    fn next_pulse(&mut self, channel: usize, t: f64) -> Pulse {
        let frequency = self.catalog.interpolate(AxisId::PulseFrequency, t);
        let clock = self.modulator_clock[channel];
        if clock.is_finite() {
            self.modulators[channel].advance(frequency, (t - clock).max(0.0));
        }

        let duration = self.target_duration(channel, t);
        let pulse = Pulse::from_duration(duration, self.intensity(channel, t));
        let seconds = pulse.seconds();
        self.modulators[channel].advance(frequency, seconds);
        self.modulator_clock[channel] = t + seconds;
        pulse
    }

    /// Target pulse duration in ms for `channel` at `t`
    fn target_duration(&self, channel: usize, t: f64) -> f64 {
        let band = self.bands[channel];
        let width = self.catalog.interpolate(AxisId::PulseWidth, t);
        let rise = self.catalog.interpolate(AxisId::PulseRiseTime, t);

        let scaler = self.modulators[channel].scaler(width, rise);
        let duty = (self.duty(t) * scaler).clamp(0.0, 1.0);
        let effective = band.min_hz + duty * (band.max_hz - band.min_hz);
        1000.0 / effective.clamp(band.min_hz, band.max_hz)
    }

    fn intensity(&mut self, channel: usize, t: f64) -> f64 {
        let center_db = self.center_warning.clamp(
            self.catalog.interpolate(AxisId::Calib3Center, t),
            -CALIBRATION_DB_LIMIT,
            CALIBRATION_DB_LIMIT,
        );
        if self.center.center_db() != center_db {
            self.center = CenterCalibration::new(center_db);
        }

        let position = Position::new(
            self.catalog.interpolate(AxisId::PositionAlpha, t),
            self.catalog.interpolate(AxisId::PositionBeta, t),
        )
        .clamped();
        let weights = channel_intensities(position, self.bands.len());
        let volume = aggregate_volume(
            AxisId::VOLUMES.map(|id| self.catalog.interpolate(id, t)),
            &self.limits,
        );
        let radius = (position.alpha * position.alpha + position.beta * position.beta).sqrt();
        weights[channel] * self.center.gain(radius) * volume * 100.0
    }
}

impl PacketAlgorithm for PacketGenerator {
    fn channel_count(&self) -> usize {
        self.bands.len()
    }

    fn generate_packet(&mut self, now: f64) -> PulsePacket {
        let channels = self.bands.len();
        let mut starts = Vec::with_capacity(channels);
        let mut pulses = Vec::with_capacity(channels);

        for channel in 0..channels {
            let start = self.cursors[channel].max(now);
            let mut t = start;
            let packet: [Pulse; PULSES_PER_PACKET] = std::array::from_fn(|_| {
                let pulse = self.next_pulse(channel, t);
                t += pulse.seconds();
                pulse
            });
            self.cursors[channel] = t;
            starts.push(start);
            pulses.push(packet);
        }

        self.center_warning.log_pending();
        PulsePacket::new(now, &starts, pulses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;
    use crate::device::{MAX_PULSE_MS, MIN_PULSE_MS};
    use crate::time::ManualTimeSource;
    use std::sync::Arc;

    fn generator(configure: impl FnOnce(&AxisCatalog)) -> PacketGenerator {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let catalog = AxisCatalog::new(time, &AxisConfig::default());
        catalog.set(AxisId::VolumeMaster, 1.0, 0.0);
        configure(&catalog);
        PacketGenerator::new(catalog, SafetyLimits::default(), &DeviceConfig::default())
    }

    #[test]
    fn test_modulator_range() {
        let mut modulator = SensationModulator::new(SensationShape::default());
        for _ in 0..1000 {
            let scaler = modulator.next(3.0, 6.0, 2.0, 0.013);
            assert!((0.75..=1.25).contains(&scaler));
            assert!((0.0..1.0).contains(&modulator.phase()));
        }
    }

    #[test]
    fn test_rise_fraction_clamped() {
        let modulator = SensationModulator::new(SensationShape::default());
        assert_eq!(modulator.rise_fraction(6.0, 0.0), 0.01);
        assert_eq!(modulator.rise_fraction(6.0, 100.0), 0.99);
        assert!((modulator.rise_fraction(6.0, 3.0) - 0.5).abs() < 1e-12);
        assert_eq!(modulator.rise_fraction(0.0, 1.0), 0.5);
    }

    #[test]
    fn test_channel_intensities() {
        let center = channel_intensities(Position::CENTER, 2);
        assert!((center[0] - 0.5).abs() < 1e-12 && (center[1] - 0.5).abs() < 1e-12);

        let left = channel_intensities(Position::new(-0.5, 0.866_025_403_784_438_6), 2);
        assert!((left[0] - 1.0).abs() < 1e-9 && left[1].abs() < 1e-9);

        assert_eq!(channel_intensities(Position::CENTER, 1), vec![1.0]);
        assert_eq!(channel_intensities(Position::CENTER, 3).len(), 3);
    }

    #[test]
    fn test_packet_pulses_valid() {
        let mut generator = generator(|c| c.set(AxisId::CarrierFrequency, 1500.0, 0.0));
        let packet = generator.generate_packet(0.0);
        assert_eq!(packet.channels.len(), 2);
        for pulses in &packet.channels {
            for pulse in pulses {
                assert!((MIN_PULSE_MS..=MAX_PULSE_MS).contains(&pulse.duration));
                assert_eq!(pulse.frequency, (1000.0 / pulse.duration as f64).round() as u32);
                assert!(pulse.intensity <= 100);
            }
        }
    }

    #[test]
    fn test_center_position_splits_intensity() {
        let mut generator = generator(|_| {});
        let packet = generator.generate_packet(0.0);
        assert_eq!(packet.channels[0][0].intensity, 50);
        assert_eq!(packet.channels[1][0].intensity, 50);
    }

    #[test]
    fn test_silent_at_zero_volume() {
        let mut generator = generator(|c| c.set(AxisId::VolumeMaster, 0.0, 0.0));
        let packet = generator.generate_packet(0.0);
        assert!(packet.channels.iter().flatten().all(|p| p.intensity == 0));
    }

    #[test]
    fn test_channels_continue_from_previous_packet() {
        let mut generator = generator(|_| {});
        let first = generator.generate_packet(0.0);
        let second = generator.generate_packet(0.01);
        // second packet picks up where the first left off
        let expected: f64 = second.channels[0].iter().map(Pulse::seconds).sum();
        assert!((second.finish[0] - (first.finish[0] + expected)).abs() < 1e-12);

        let late = generator.generate_packet(100.0);
        let expected: f64 = late.channels[0].iter().map(Pulse::seconds).sum();
        assert!((late.finish[0] - (100.0 + expected)).abs() < 1e-9);
    }

    #[test]
    fn test_modulator_tracks_elapsed_time_across_packets() {
        // carrier at the bottom of the band pins every pulse to 100 ms
        let mut generator = generator(|c| {
            c.set(AxisId::CarrierFrequency, 300.0, 0.0);
            c.set(AxisId::PulseFrequency, 0.3, 0.0);
        });
        let mut now = 0.0;
        for _ in 0..10 {
            let packet = generator.generate_packet(now);
            assert!(packet.channels[0].iter().all(|p| p.duration == 100));
            now = packet.finish[0];
        }
        // 40 pulses of 100 ms at 0.3 Hz
        assert!((now - 4.0).abs() < 1e-9);
        for channel in 0..2 {
            assert!((generator.modulator_phase(channel) - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_modulator_runs_through_late_start_gap() {
        let mut generator = generator(|c| {
            c.set(AxisId::CarrierFrequency, 300.0, 0.0);
            c.set(AxisId::PulseFrequency, 0.3, 0.0);
        });
        generator.generate_packet(0.0);
        assert!((generator.modulator_phase(0) - 0.12).abs() < 1e-9);

        // queue ran dry at 0.4 s; the next packet starts at 1.0 s
        let packet = generator.generate_packet(1.0);
        assert!((packet.finish[0] - 1.4).abs() < 1e-9);
        assert!((generator.modulator_phase(0) - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_carrier_selects_rate_within_band() {
        // bottom of the carrier band maps to the slowest pulses
        let mut slow = generator(|c| c.set(AxisId::CarrierFrequency, 300.0, 0.0));
        let packet = slow.generate_packet(0.0);
        assert_eq!(packet.channels[0][0].duration, 100);

        let mut fast = generator(|c| c.set(AxisId::CarrierFrequency, 2000.0, 0.0));
        let packet = fast.generate_packet(0.0);
        // first pulse: modulator at phase 0 gives the minimum scaler
        assert!(packet.channels[0][0].duration < 20);
    }
}
