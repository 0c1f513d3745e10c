//! Continuous carrier synthesis
//!
//! A constant-amplitude carrier whose per-electrode amplitude and phase
//! follow the position or electrode axes, corrected by the hardware
//! calibration and scaled by the aggregate volume.

use crate::audio::buffer::ChannelBuffers;
use crate::axis::{AxisCatalog, AxisId};
use crate::config::{ClampWarning, SafetyLimits};
use crate::math::calibration::{CALIBRATION_DB_LIMIT, PHASE_TERM_LIMIT};
use crate::math::projection::{constrain_amplitudes, project, sample_points};
use crate::math::threephase::tetrahedral_intensities;
use crate::math::{
    CenterCalibration, PhaseCalibration, Position, SqueezeStrategy, ThreePhaseCalibration,
    ThreePhaseProjection,
};

use super::{chunks, AudioAlgorithm, AxisFrames, Carrier, Vibration, MAX_CHUNK_FRAMES};

const COMMON_AXES: [AxisId; 9] = [
    AxisId::CarrierFrequency,
    AxisId::VolumeMaster,
    AxisId::VolumeApi,
    AxisId::VolumeInactivity,
    AxisId::VolumeExternal,
    AxisId::Vibration1Frequency,
    AxisId::Vibration1Strength,
    AxisId::Vibration2Frequency,
    AxisId::Vibration2Strength,
];

/// Carrier angle, volume and vibration shared by all topologies
struct Modulation {
    carrier: Carrier,
    vibrations: [Vibration; 2],
    theta: Vec<f64>,
    gain: Vec<f64>,
}

impl Modulation {
    fn new() -> Self {
        Self {
            carrier: Carrier::new(),
            vibrations: [Vibration::new(); 2],
            theta: Vec::with_capacity(MAX_CHUNK_FRAMES),
            gain: Vec::with_capacity(MAX_CHUNK_FRAMES),
        }
    }

    /// Fill `theta` and `gain` for the frames last sampled into `frames`
    fn render(&mut self, frames: &AxisFrames, len: usize, sample_rate: f64, limits: &SafetyLimits) {
        self.theta.clear();
        self.theta.resize(len, 0.0);
        self.carrier.advance_into(
            frames.get(AxisId::CarrierFrequency),
            sample_rate,
            limits,
            &mut self.theta,
        );

        let [v1f, v1s, v2f, v2s] = [
            frames.get(AxisId::Vibration1Frequency),
            frames.get(AxisId::Vibration1Strength),
            frames.get(AxisId::Vibration2Frequency),
            frames.get(AxisId::Vibration2Strength),
        ];
        self.gain.clear();
        for i in 0..len {
            let [first, second] = &mut self.vibrations;
            let vibration =
                first.next(v1f[i], v1s[i], sample_rate) * second.next(v2f[i], v2s[i], sample_rate);
            self.gain.push(frames.volume(i, limits) * vibration);
        }
    }
}

#[inline]
fn to_sample(value: f64) -> f32 {
    value.clamp(-1.0, 1.0) as f32
}

/// Two-channel output for three electrodes (N, L, R)
pub struct ThreePhaseContinuous {
    catalog: AxisCatalog,
    limits: SafetyLimits,
    squeeze: SqueezeStrategy,
    frames: AxisFrames,
    modulation: Modulation,
    calibration: ThreePhaseCalibration,
    center: CenterCalibration,
    warnings: [ClampWarning; 3],
}

impl ThreePhaseContinuous {
    pub fn new(catalog: AxisCatalog, limits: SafetyLimits, squeeze: SqueezeStrategy) -> Self {
        let mut ids = vec![AxisId::PositionAlpha, AxisId::PositionBeta];
        ids.extend_from_slice(&COMMON_AXES);
        Self {
            catalog,
            limits,
            squeeze,
            frames: AxisFrames::new(&ids),
            modulation: Modulation::new(),
            calibration: ThreePhaseCalibration::identity(),
            center: CenterCalibration::default(),
            warnings: [
                ClampWarning::new("calibrate.3phase.neutral"),
                ClampWarning::new("calibrate.3phase.right"),
                ClampWarning::new("calibrate.3phase.center"),
            ],
        }
    }

    /// Rebuild the cached calibration if its scalars changed
    fn refresh_calibration(&mut self, t: f64) {
        let limit = CALIBRATION_DB_LIMIT;
        let [neutral, right, center] = [
            AxisId::Calib3Neutral,
            AxisId::Calib3Right,
            AxisId::Calib3Center,
        ]
        .map(|id| self.catalog.interpolate(id, t));
        let neutral = self.warnings[0].clamp(neutral, -limit, limit);
        let right = self.warnings[1].clamp(right, -limit, limit);
        let center = self.warnings[2].clamp(center, -limit, limit);

        if !self.calibration.matches(neutral, right) {
            self.calibration = ThreePhaseCalibration::new(neutral, right);
        }
        if self.center.center_db() != center {
            self.center = CenterCalibration::new(center);
        }
    }

    pub fn calibration(&self) -> &ThreePhaseCalibration {
        &self.calibration
    }
}

impl AudioAlgorithm for ThreePhaseContinuous {
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
        let len = steady_clock.len().min(command_time.len()).min(out.frames());
        for range in chunks(len) {
            let times = &command_time[range.clone()];
            if let Some(&last) = times.last() {
                self.refresh_calibration(last);
            }
            self.frames.sample(&self.catalog, times);
            self.modulation
                .render(&self.frames, times.len(), sample_rate, &self.limits);

            let alpha = self.frames.get(AxisId::PositionAlpha);
            let beta = self.frames.get(AxisId::PositionBeta);
            for (i, frame) in range.enumerate() {
                let projection =
                    ThreePhaseProjection::new(Position::new(alpha[i], beta[i]), self.squeeze);
                let (l, r) = projection.channels(self.modulation.theta[i]);
                let (l, r) = self.calibration.apply(l, r);
                let gain = self.modulation.gain[i] * self.center.gain(projection.radius());
                out.channel_mut(0)[frame] = to_sample(l * gain);
                out.channel_mut(1)[frame] = to_sample(r * gain);
            }
        }
    }

    fn report_clamps(&self, report: &mut dyn FnMut(&'static str, f64)) {
        for warning in &self.warnings {
            if let Some((name, value)) = warning.take_pending() {
                report(name, value);
            }
        }
    }
}

/// Where the per-electrode magnitudes of [`MultiPhaseContinuous`] come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MagnitudeSource {
    /// The `intensity.e1..eN` axes
    #[default]
    Electrodes,
    /// The 3D position mapped over a tetrahedron; four electrodes only
    Tetrahedral,
}

/// One output channel per adjacent electrode pair for four or five
/// electrodes
pub struct MultiPhaseContinuous<const N: usize> {
    catalog: AxisCatalog,
    limits: SafetyLimits,
    source: MagnitudeSource,
    frames: AxisFrames,
    modulation: Modulation,
    calibration: PhaseCalibration<N>,
    shared_warning: ClampWarning,
    term_warnings: [ClampWarning; N],
}

impl<const N: usize> MultiPhaseContinuous<N> {
    pub fn new(catalog: AxisCatalog, limits: SafetyLimits, source: MagnitudeSource) -> Self {
        let source = if N == 4 { source } else { MagnitudeSource::Electrodes };
        let mut ids = match source {
            MagnitudeSource::Electrodes => AxisId::ELECTRODES[..N.min(5)].to_vec(),
            MagnitudeSource::Tetrahedral => vec![
                AxisId::PositionAlpha,
                AxisId::PositionBeta,
                AxisId::PositionGamma,
            ],
        };
        ids.extend_from_slice(&COMMON_AXES);
        Self {
            catalog,
            limits,
            source,
            frames: AxisFrames::new(&ids),
            modulation: Modulation::new(),
            calibration: PhaseCalibration::identity(),
            shared_warning: ClampWarning::new("calibrate.nphase.t"),
            term_warnings: std::array::from_fn(|i| {
                ClampWarning::new(AxisId::PHASE_TERMS[i % 5].name())
            }),
        }
    }

    fn refresh_calibration(&mut self, t: f64) {
        let shared = self.shared_warning.clamp(
            self.catalog.interpolate(AxisId::CalibPhaseShared, t),
            0.0,
            PHASE_TERM_LIMIT,
        );
        let terms: [f64; N] = std::array::from_fn(|i| {
            let value = self.catalog.interpolate(AxisId::PHASE_TERMS[i % 5], t);
            self.term_warnings[i].clamp(value, 0.0, PHASE_TERM_LIMIT)
        });
        if !self.calibration.matches(shared, &terms) {
            self.calibration = PhaseCalibration::new(shared, terms);
        }
    }

    fn magnitudes(&self, i: usize) -> [f64; N] {
        match self.source {
            MagnitudeSource::Electrodes => {
                std::array::from_fn(|e| self.frames.get(AxisId::ELECTRODES[e % 5])[i])
            }
            MagnitudeSource::Tetrahedral => {
                let weights = tetrahedral_intensities(Position::new3(
                    self.frames.get(AxisId::PositionAlpha)[i],
                    self.frames.get(AxisId::PositionBeta)[i],
                    self.frames.get(AxisId::PositionGamma)[i],
                ));
                std::array::from_fn(|e| weights.get(e).copied().unwrap_or(0.0))
            }
        }
    }

    pub fn calibration(&self) -> &PhaseCalibration<N> {
        &self.calibration
    }
}

impl<const N: usize> AudioAlgorithm for MultiPhaseContinuous<N> {
    fn channel_count(&self) -> usize {
        N
    }

    fn generate_audio(
        &mut self,
        sample_rate: f64,
        steady_clock: &[f64],
        command_time: &[f64],
        out: &mut ChannelBuffers,
    ) {
        let len = steady_clock.len().min(command_time.len()).min(out.frames());
        for range in chunks(len) {
            let times = &command_time[range.clone()];
            if let Some(&last) = times.last() {
                self.refresh_calibration(last);
            }
            self.frames.sample(&self.catalog, times);
            self.modulation
                .render(&self.frames, times.len(), sample_rate, &self.limits);

            for (i, frame) in range.enumerate() {
                let magnitudes = constrain_amplitudes(self.magnitudes(i));
                let points = project(magnitudes);
                let electrodes = sample_points(&points, self.modulation.theta[i]);
                let channels = self.calibration.apply(electrodes);
                let gain = self.modulation.gain[i];
                for (channel, value) in channels.iter().enumerate() {
                    out.channel_mut(channel)[frame] = to_sample(value * gain);
                }
            }
        }
    }

    fn report_clamps(&self, report: &mut dyn FnMut(&'static str, f64)) {
        for warning in std::iter::once(&self.shared_warning).chain(&self.term_warnings) {
            if let Some((name, value)) = warning.take_pending() {
                report(name, value);
            }
        }
    }
}
