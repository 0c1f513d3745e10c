//! Pulse-based audio synthesis
//!
//! Output is a train of short carrier bursts separated by silence. Each burst
//! is synthesized whole into a rolling buffer using the parameters sampled at
//! its start, so parameter changes never cut a pulse in half.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};

use crate::audio::buffer::{ChannelBuffers, RollingBuffer};
use crate::axis::{AxisCatalog, AxisId};
use crate::config::{ClampWarning, PulseConfig, SafetyLimits};
use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::math::calibration::CALIBRATION_DB_LIMIT;
use crate::math::{
    CenterCalibration, Position, SqueezeStrategy, ThreePhaseCalibration, ThreePhaseProjection,
};

use super::{aggregate_volume, AudioAlgorithm, MAX_CHUNK_FRAMES};

/// Fractional part of the golden ratio; successive pulse phases never repeat
pub const GOLDEN_FRACTION: f64 = 0.618_033_988_749_895;

/// Polarity and starting phase of the next pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseState {
    /// +1 or -1
    pub polarity: f64,
    pub phase_offset: f64,
}

impl PulseState {
    pub fn new() -> Self {
        Self {
            polarity: 1.0,
            phase_offset: 0.0,
        }
    }

    /// State for the pulse after this one
    #[must_use]
    pub fn advance(self) -> Self {
        Self {
            polarity: -self.polarity,
            phase_offset: (self.phase_offset + TAU * GOLDEN_FRACTION).rem_euclid(TAU),
        }
    }
}

impl Default for PulseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised-cosine burst envelope.
///
/// `t`, `width` and `rise` are in carrier cycles; the rise is limited to half
/// the width.
#[inline]
pub fn envelope(t: f64, width: f64, rise: f64) -> f64 {
    if t < 0.0 || t > width {
        return 0.0;
    }
    let rise = rise.clamp(0.0, width / 2.0);
    if rise <= 0.0 {
        return 1.0;
    }
    let edge = t.min(width - t);
    if edge >= rise {
        1.0
    } else {
        0.5 - 0.5 * (PI * edge / rise).cos()
    }
}

/// Timing of one pulse in frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTiming {
    pub carrier_hz: f64,
    pub width_cycles: f64,
    pub rise_cycles: f64,
    pub burst_frames: usize,
    pub gap_frames: usize,
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Three-phase pulse synthesizer with a rolling output buffer
pub struct PulseBased {
    catalog: AxisCatalog,
    limits: SafetyLimits,
    config: PulseConfig,
    squeeze: SqueezeStrategy,
    buffer: RollingBuffer,
    state: PulseState,
    rng: StdRng,
    calibration: ThreePhaseCalibration,
    center: CenterCalibration,
    warnings: [ClampWarning; 3],
    pulses: u64,
}

impl PulseBased {
    pub fn new(
        catalog: AxisCatalog,
        limits: SafetyLimits,
        config: PulseConfig,
        squeeze: SqueezeStrategy,
    ) -> Self {
        Self::with_rng(catalog, limits, config, squeeze, StdRng::from_entropy())
    }

    /// Deterministic interval jitter
    pub fn with_seed(
        catalog: AxisCatalog,
        limits: SafetyLimits,
        config: PulseConfig,
        squeeze: SqueezeStrategy,
        seed: u64,
    ) -> Self {
        Self::with_rng(catalog, limits, config, squeeze, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        catalog: AxisCatalog,
        limits: SafetyLimits,
        config: PulseConfig,
        squeeze: SqueezeStrategy,
        rng: StdRng,
    ) -> Self {
        let mut synth = Self {
            catalog,
            limits,
            config,
            squeeze,
            buffer: RollingBuffer::new(2, 0),
            state: PulseState::new(),
            rng,
            calibration: ThreePhaseCalibration::identity(),
            center: CenterCalibration::default(),
            warnings: [
                ClampWarning::new("calibrate.3phase.neutral"),
                ClampWarning::new("calibrate.3phase.right"),
                ClampWarning::new("calibrate.3phase.center"),
            ],
            pulses: 0,
        };
        synth.prepare(DEFAULT_SAMPLE_RATE as f64, MAX_CHUNK_FRAMES);
        synth
    }

    pub fn state(&self) -> PulseState {
        self.state
    }

    /// Number of pulses synthesized so far
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }

    /// Frames synthesized but not yet handed out
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames the rolling buffer holds without reallocating
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Upper bound on one burst plus its gap at the configured limits
    pub fn longest_pulse_frames(&self, sample_rate: f64) -> usize {
        let burst_secs = self.config.max_width_cycles / self.limits.min_carrier_hz.max(1.0);
        let gap_secs = (1.0 + self.config.max_interval_random) / self.config.min_pulse_hz;
        let frames = ((burst_secs + gap_secs) * sample_rate).ceil();
        if frames.is_finite() {
            frames as usize + 2
        } else {
            MAX_CHUNK_FRAMES
        }
    }

    /// Pulse timing from the axes at `t`
    pub fn timing(&mut self, t: f64, sample_rate: f64) -> PulseTiming {
        let axis = |id| self.catalog.interpolate(id, t);
        let carrier_hz = self.limits.clamp_carrier(axis(AxisId::CarrierFrequency));
        let pulse_hz = finite_or(axis(AxisId::PulseFrequency), self.config.min_pulse_hz)
            .clamp(self.config.min_pulse_hz, self.config.max_pulse_hz);
        let width_cycles = finite_or(axis(AxisId::PulseWidth), 1.0)
            .clamp(1.0, self.config.max_width_cycles);
        let rise_cycles =
            finite_or(axis(AxisId::PulseRiseTime), 0.0).clamp(0.0, width_cycles / 2.0);
        let random = finite_or(axis(AxisId::PulseIntervalRandom), 0.0)
            .clamp(0.0, self.config.max_interval_random);

        let burst_secs = width_cycles / carrier_hz;
        let jitter = if random > 0.0 {
            self.rng.gen_range(-random..=random)
        } else {
            0.0
        };
        let gap_secs = ((1.0 / pulse_hz - burst_secs) * (1.0 + jitter)).max(0.0);

        PulseTiming {
            carrier_hz,
            width_cycles,
            rise_cycles,
            burst_frames: ((burst_secs * sample_rate).round() as usize).max(1),
            gap_frames: (gap_secs * sample_rate).round() as usize,
        }
    }

    fn refresh_calibration(&mut self, t: f64) {
        let limit = CALIBRATION_DB_LIMIT;
        let neutral = self.warnings[0].clamp(
            self.catalog.interpolate(AxisId::Calib3Neutral, t),
            -limit,
            limit,
        );
        let right = self.warnings[1].clamp(
            self.catalog.interpolate(AxisId::Calib3Right, t),
            -limit,
            limit,
        );
        let center = self.warnings[2].clamp(
            self.catalog.interpolate(AxisId::Calib3Center, t),
            -limit,
            limit,
        );
        if !self.calibration.matches(neutral, right) {
            self.calibration = ThreePhaseCalibration::new(neutral, right);
        }
        if self.center.center_db() != center {
            self.center = CenterCalibration::new(center);
        }
    }

    /// Append exactly one burst and its trailing gap, starting at command
    /// time `t`
    fn synthesize_pulse(&mut self, t: f64, sample_rate: f64) {
        let timing = self.timing(t, sample_rate);
        self.refresh_calibration(t);

        let position = Position::new(
            self.catalog.interpolate(AxisId::PositionAlpha, t),
            self.catalog.interpolate(AxisId::PositionBeta, t),
        );
        let volume = aggregate_volume(
            AxisId::VOLUMES.map(|id| self.catalog.interpolate(id, t)),
            &self.limits,
        );
        let projection = ThreePhaseProjection::new(position, self.squeeze);
        let gain = volume * self.center.gain(projection.radius()) * self.state.polarity;

        let cycles_per_frame = timing.carrier_hz / sample_rate;
        for n in 0..timing.burst_frames {
            let cycles = n as f64 * cycles_per_frame;
            let theta = TAU * cycles + self.state.phase_offset;
            let env = envelope(cycles, timing.width_cycles, timing.rise_cycles);
            let (l, r) = projection.channels(theta);
            let (l, r) = self.calibration.apply(l, r);
            let g = gain * env;
            self.buffer.push(&[
                (l * g).clamp(-1.0, 1.0) as f32,
                (r * g).clamp(-1.0, 1.0) as f32,
            ]);
        }
        self.buffer.push_silence(timing.gap_frames);

        self.state = self.state.advance();
        self.pulses += 1;
    }
}

impl AudioAlgorithm for PulseBased {
    fn channel_count(&self) -> usize {
        2
    }

    fn generate_audio(
        &mut self,
        sample_rate: f64,
        steady_clock: &[f64],
        command_time: &[f64],
        out: &mut ChannelBuffers,
    ) {
        let frames = steady_clock.len().min(command_time.len()).min(out.frames());
        if frames == 0 {
            return;
        }
        while self.buffer.len() < frames {
            // buffered frames occupy the front of this request
            let start = self.buffer.len();
            let t = command_time[start];
            self.synthesize_pulse(t, sample_rate);
        }
        self.buffer.drain_into(out, 0);
    }

    /// A request for `n` frames leaves fewer than `n` buffered, then adds at
    /// most one pulse.
    fn prepare(&mut self, sample_rate: f64, max_frames: usize) {
        let needed = max_frames + self.longest_pulse_frames(sample_rate);
        self.buffer.reserve(needed.saturating_sub(self.buffer.len()));
    }

    fn report_clamps(&self, report: &mut dyn FnMut(&'static str, f64)) {
        for warning in &self.warnings {
            if let Some((name, value)) = warning.take_pending() {
                report(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;
    use crate::time::ManualTimeSource;
    use std::sync::Arc;

    const SR: f64 = 48_000.0;

    fn synth(configure: impl FnOnce(&AxisCatalog)) -> PulseBased {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let catalog = AxisCatalog::new(time, &AxisConfig::default());
        catalog.set(AxisId::VolumeMaster, 1.0, 0.0);
        catalog.set(AxisId::PulseIntervalRandom, 0.0, 0.0);
        configure(&catalog);
        PulseBased::with_seed(
            catalog,
            SafetyLimits::default(),
            PulseConfig::default(),
            SqueezeStrategy::Linear,
            7,
        )
    }

    fn render(synth: &mut PulseBased, start: usize, frames: usize) -> ChannelBuffers {
        let clock: Vec<f64> = (start..start + frames).map(|i| i as f64 / SR).collect();
        let mut out = ChannelBuffers::new(2, frames);
        out.prepare(frames);
        synth.generate_audio(SR, &clock, &clock, &mut out);
        out
    }

    #[test]
    fn test_pulse_state_alternates() {
        let s0 = PulseState::new();
        let s1 = s0.advance();
        let s2 = s1.advance();
        assert_eq!(s1.polarity, -1.0);
        assert_eq!(s2.polarity, 1.0);
        assert!((s1.phase_offset - TAU * GOLDEN_FRACTION).abs() < 1e-12);
        assert!(s2.phase_offset < TAU);
    }

    #[test]
    fn test_envelope_shape() {
        assert_eq!(envelope(0.0, 6.0, 2.0), 0.0);
        assert!((envelope(1.0, 6.0, 2.0) - 0.5).abs() < 1e-12);
        assert_eq!(envelope(3.0, 6.0, 2.0), 1.0);
        assert_eq!(envelope(6.0, 6.0, 2.0), 0.0);
        assert_eq!(envelope(7.0, 6.0, 2.0), 0.0);
        // rise longer than half the burst is limited
        assert!((envelope(1.5, 3.0, 10.0) - 1.0).abs() < 1e-12);
        assert_eq!(envelope(1.0, 6.0, 0.0), 1.0);
    }

    #[test]
    fn test_returns_exact_length_and_carries_remainder() {
        let mut synth = synth(|_| {});
        let out = render(&mut synth, 0, 100);
        assert_eq!(out.frames(), 100);
        // 50 Hz at 48 kHz is 960 frames per pulse
        assert_eq!(synth.pulse_count(), 1);
        assert_eq!(synth.buffered(), 860);

        render(&mut synth, 100, 860);
        assert_eq!(synth.pulse_count(), 1);
        assert_eq!(synth.buffered(), 0);
    }

    #[test]
    fn test_pulse_then_silence() {
        let mut synth = synth(|_| {});
        let out = render(&mut synth, 0, 960);
        // 6 cycles of 700 Hz
        let burst = (6.0 / 700.0 * SR).round() as usize;
        let left = out.channel(0);
        assert!(left[..burst].iter().any(|s| s.abs() > 0.5));
        assert!(left[burst..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_polarity_flips_between_pulses() {
        let mut synth = synth(|_| {});
        render(&mut synth, 0, 960 * 3);
        assert_eq!(synth.pulse_count(), 3);
        assert_eq!(synth.state().polarity, -1.0);
    }

    #[test]
    fn test_interval_jitter_bounded() {
        let mut synth = synth(|c| c.set(AxisId::PulseIntervalRandom, 0.5, 0.0));
        let burst_secs = 6.0 / 700.0;
        let gap = 1.0 / 50.0 - burst_secs;
        for _ in 0..200 {
            let timing = synth.timing(0.0, SR);
            let secs = timing.gap_frames as f64 / SR;
            assert!(secs >= gap * 0.5 - 1.0 / SR && secs <= gap * 1.5 + 1.0 / SR);
        }
    }

    #[test]
    fn test_parameters_sampled_at_pulse_start() {
        let mut synth = synth(|c| {
            // volume drops to zero just after the first pulse starts
            c.axis(AxisId::VolumeMaster).add_at(0.001, 1.0);
            c.axis(AxisId::VolumeMaster).add_at(0.0011, 0.0);
        });
        let out = render(&mut synth, 0, 960);
        assert!(out.channel(0).iter().any(|s| s.abs() > 0.1));
        let second = render(&mut synth, 960, 960);
        assert!(second.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_buffer_sized_before_rendering() {
        // slowest pulses with the widest jitter give the longest gaps
        let mut synth = synth(|c| {
            c.set(AxisId::PulseFrequency, 1.0, 0.0);
            c.set(AxisId::PulseIntervalRandom, 0.5, 0.0);
            c.set(AxisId::PulseWidth, 100.0, 0.0);
            c.set(AxisId::CarrierFrequency, 300.0, 0.0);
        });
        synth.prepare(SR, 512);
        let capacity = synth.buffer_capacity();
        assert!(capacity >= 512 + (1.5 * SR) as usize);

        let mut start = 0;
        for _ in 0..400 {
            render(&mut synth, start, 512);
            start += 512;
            assert_eq!(synth.buffer_capacity(), capacity);
        }
        assert!(synth.pulse_count() >= 2);
    }

    #[test]
    fn test_clamped_calibration_left_for_owner_to_report() {
        let mut synth = synth(|c| c.set(AxisId::Calib3Center, -100.0, 0.0));
        render(&mut synth, 0, 960 * 2);
        let mut reported = Vec::new();
        synth.report_clamps(&mut |name, value| reported.push((name, value)));
        assert_eq!(reported, vec![("calibrate.3phase.center", -100.0)]);
    }

    #[test]
    fn test_zero_width_gap_when_pulse_rate_high() {
        let mut synth = synth(|c| {
            c.set(AxisId::PulseFrequency, 300.0, 0.0);
            c.set(AxisId::PulseWidth, 100.0, 0.0);
        });
        let timing = synth.timing(0.0, SR);
        assert_eq!(timing.gap_frames, 0);
        assert!(timing.burst_frames > 0);
    }
}
