//! Audio-rate synthesizers
//!
//! Every synthesizer implements [`AudioAlgorithm`]. The output callback hands
//! it two clocks per frame: the steady clock drives oscillators, command time
//! is where control axes are sampled.

pub mod carrier;
pub mod continuous;
pub mod pulse;
pub mod vibration;

pub use carrier::Carrier;
pub use continuous::{MagnitudeSource, MultiPhaseContinuous, ThreePhaseContinuous};
pub use pulse::{PulseBased, PulseState};
pub use vibration::Vibration;

use crate::audio::buffer::ChannelBuffers;
use crate::axis::{AxisCatalog, AxisId};
use crate::config::SafetyLimits;

/// Largest number of frames rendered in one pass; longer requests are split
pub const MAX_CHUNK_FRAMES: usize = 10_000;

/// A sample-producing algorithm driven by the output callback
pub trait AudioAlgorithm: Send {
    /// Number of planar output channels
    fn channel_count(&self) -> usize;

    /// Fill `out` with `steady_clock.len()` frames. `out` is already prepared
    /// to that length. `command_time` has the same length as `steady_clock`.
    fn generate_audio(
        &mut self,
        sample_rate: f64,
        steady_clock: &[f64],
        command_time: &[f64],
        out: &mut ChannelBuffers,
    );

    /// Reserve working memory for callbacks of up to `max_frames` frames, so
    /// rendering does not allocate. Called before the stream starts.
    fn prepare(&mut self, _sample_rate: f64, _max_frames: usize) {}

    /// Hand each out-of-range control value clamped since the last call to
    /// `report`. Must not block or log; runs on the audio thread.
    fn report_clamps(&self, _report: &mut dyn FnMut(&'static str, f64)) {}
}

impl<T: AudioAlgorithm + ?Sized> AudioAlgorithm for Box<T> {
    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn generate_audio(
        &mut self,
        sample_rate: f64,
        steady_clock: &[f64],
        command_time: &[f64],
        out: &mut ChannelBuffers,
    ) {
        (**self).generate_audio(sample_rate, steady_clock, command_time, out)
    }

    fn prepare(&mut self, sample_rate: f64, max_frames: usize) {
        (**self).prepare(sample_rate, max_frames)
    }

    fn report_clamps(&self, report: &mut dyn FnMut(&'static str, f64)) {
        (**self).report_clamps(report)
    }
}

/// Product of the volume axes, each clamped to [0, 1], scaled by the safety
/// amplitude
#[inline]
pub fn aggregate_volume(volumes: [f64; 4], limits: &SafetyLimits) -> f64 {
    volumes
        .iter()
        .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
        .product::<f64>()
        * limits.amplitude()
}

/// Preallocated per-chunk axis values
#[derive(Debug, Clone)]
pub struct AxisFrames {
    ids: Vec<AxisId>,
    values: Vec<Vec<f64>>,
}

impl AxisFrames {
    pub fn new(ids: &[AxisId]) -> Self {
        Self {
            ids: ids.to_vec(),
            values: ids
                .iter()
                .map(|_| Vec::with_capacity(MAX_CHUNK_FRAMES))
                .collect(),
        }
    }

    /// Interpolate every tracked axis at `times`
    pub fn sample(&mut self, catalog: &AxisCatalog, times: &[f64]) {
        for (id, values) in self.ids.iter().zip(&mut self.values) {
            values.clear();
            values.resize(times.len(), 0.0);
            catalog.axis(*id).interpolate_into(times, values);
        }
    }

    /// Values of `id` from the last [`AxisFrames::sample`]; empty if untracked
    pub fn get(&self, id: AxisId) -> &[f64] {
        self.ids
            .iter()
            .position(|&tracked| tracked == id)
            .map_or(&[], |index| &self.values[index])
    }

    /// Aggregate volume of frame `i`. All four volume axes must be tracked.
    #[inline]
    pub fn volume(&self, i: usize, limits: &SafetyLimits) -> f64 {
        let v = AxisId::VOLUMES.map(|id| self.get(id).get(i).copied().unwrap_or(0.0));
        aggregate_volume(v, limits)
    }
}

/// Split `len` frames into consecutive ranges of at most [`MAX_CHUNK_FRAMES`]
pub fn chunks(len: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    (0..len)
        .step_by(MAX_CHUNK_FRAMES)
        .map(move |start| start..(start + MAX_CHUNK_FRAMES).min(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;
    use crate::time::ManualTimeSource;
    use std::sync::Arc;

    #[test]
    fn test_aggregate_volume_clamps_each_factor() {
        let limits = SafetyLimits::default();
        assert_eq!(aggregate_volume([1.0, 1.0, 1.0, 1.0], &limits), 1.0);
        assert_eq!(aggregate_volume([2.0, 0.5, 1.0, 1.0], &limits), 0.5);
        assert_eq!(aggregate_volume([-1.0, 1.0, 1.0, 1.0], &limits), 0.0);
        assert_eq!(aggregate_volume([f64::NAN, 1.0, 1.0, 1.0], &limits), 0.0);

        let quiet = SafetyLimits {
            max_amplitude: 0.25,
            ..Default::default()
        };
        assert_eq!(aggregate_volume([1.0; 4], &quiet), 0.25);
    }

    #[test]
    fn test_chunks_cover_range() {
        let ranges: Vec<_> = chunks(25_000).collect();
        assert_eq!(ranges, vec![0..10_000, 10_000..20_000, 20_000..25_000]);
        assert_eq!(chunks(0).count(), 0);
    }

    #[test]
    fn test_axis_frames_sample() {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let catalog = AxisCatalog::new(time, &AxisConfig::default());
        catalog.set(AxisId::VolumeMaster, 0.5, 0.0);

        let mut frames = AxisFrames::new(&[
            AxisId::VolumeMaster,
            AxisId::VolumeApi,
            AxisId::VolumeInactivity,
            AxisId::VolumeExternal,
        ]);
        frames.sample(&catalog, &[0.0, 1.0]);
        assert_eq!(frames.get(AxisId::VolumeMaster), &[0.5, 0.5]);
        assert!(frames.get(AxisId::PositionAlpha).is_empty());
        assert_eq!(frames.volume(1, &SafetyLimits::default()), 0.5);
    }
}
