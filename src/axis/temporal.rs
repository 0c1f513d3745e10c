//! Time-indexed scalar parameters
//!
//! Producers (control surfaces, script players, wire protocols) call `add`;
//! the audio and packet threads read with `interpolate`. The lock is held for
//! a single insert or a single batch read, never across an audio deadline.

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::AxisConfig;
use crate::time::SharedTime;

/// Most expired samples dropped by one insert
pub const PRUNE_STEP: usize = 32;

/// A control parameter readable at arbitrary times
pub trait Axis: Send + Sync {
    /// Insert `value` at `now + delay`
    fn add(&self, value: f64, delay: f64);

    /// Insert `value` at an absolute timestamp, discarding samples at or after it
    fn add_at(&self, timestamp: f64, value: f64);

    fn interpolate(&self, t: f64) -> f64;

    /// Batch form of [`Axis::interpolate`] for real-time readers
    fn interpolate_into(&self, times: &[f64], out: &mut [f64]);

    /// Most recent sample regardless of time
    fn last_value(&self) -> f64;
}

/// Shared handle to an axis
pub type SharedAxis = Arc<dyn Axis>;

/// Query behaviour between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Linear between neighbours
    Linear,
    /// Nearest earlier sample
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    timestamp: f64,
    value: f64,
}

/// Ordered sample series with linear or hold interpolation
pub struct TemporalAxis {
    samples: Mutex<VecDeque<Sample>>,
    mode: Interpolation,
    time: SharedTime,
    config: AxisConfig,
}

impl TemporalAxis {
    pub fn new(initial: f64, mode: Interpolation, time: SharedTime, config: AxisConfig) -> Self {
        // room for a forecast window as long as the retained history
        let mut samples = VecDeque::with_capacity(2 * config.prune_threshold);
        samples.push_back(Sample {
            timestamp: time.now(),
            value: initial,
        });
        Self {
            samples: Mutex::new(samples),
            mode,
            time,
            config,
        }
    }

    pub fn linear(initial: f64, time: SharedTime, config: AxisConfig) -> Self {
        Self::new(initial, Interpolation::Linear, time, config)
    }

    pub fn hold(initial: f64, time: SharedTime, config: AxisConfig) -> Self {
        Self::new(initial, Interpolation::Hold, time, config)
    }

    pub fn mode(&self) -> Interpolation {
        self.mode
    }

    /// Number of stored samples
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Snapshot of the stored (timestamp, value) pairs
    pub fn samples(&self) -> Vec<(f64, f64)> {
        self.samples
            .lock()
            .iter()
            .map(|s| (s.timestamp, s.value))
            .collect()
    }

    /// Drop up to [`PRUNE_STEP`] expired samples. Every insert calls this,
    /// so a large backlog clears over several inserts instead of one long
    /// drain under the lock.
    fn prune(&self, samples: &mut VecDeque<Sample>) {
        if samples.len() <= self.config.prune_threshold {
            return;
        }
        let cutoff = self.time.now() - self.config.retention_secs;
        // keep the last sample before the cutoff so reads at the cutoff are unchanged
        let older = samples.partition_point(|s| s.timestamp < cutoff);
        let drop = older
            .saturating_sub(1)
            .min(samples.len() - 1)
            .min(PRUNE_STEP);
        samples.drain(..drop);
    }

    #[inline]
    fn lookup(&self, samples: &VecDeque<Sample>, t: f64) -> f64 {
        let after = samples.partition_point(|s| s.timestamp <= t);
        if after == 0 {
            return samples.front().map_or(0.0, |s| s.value);
        }
        let a = samples[after - 1];
        if after == samples.len() || self.mode == Interpolation::Hold {
            return a.value;
        }
        let b = samples[after];
        let span = b.timestamp - a.timestamp;
        if span <= 0.0 {
            return b.value;
        }
        a.value + (b.value - a.value) * (t - a.timestamp) / span
    }
}

impl Axis for TemporalAxis {
    fn add(&self, value: f64, delay: f64) {
        let delay = if delay.is_finite() { delay.max(0.0) } else { 0.0 };
        self.add_at(self.time.now() + delay, value);
    }

    fn add_at(&self, timestamp: f64, value: f64) {
        if !value.is_finite() || !timestamp.is_finite() {
            return;
        }
        let mut samples = self.samples.lock();
        // latest command wins over any forecast at or after its timestamp
        let keep = samples.partition_point(|s| s.timestamp < timestamp);
        samples.truncate(keep);
        samples.push_back(Sample { timestamp, value });
        self.prune(&mut samples);
    }

    fn interpolate(&self, t: f64) -> f64 {
        let samples = self.samples.lock();
        self.lookup(&samples, t)
    }

    fn interpolate_into(&self, times: &[f64], out: &mut [f64]) {
        let samples = self.samples.lock();
        for (value, &t) in out.iter_mut().zip(times) {
            *value = self.lookup(&samples, t);
        }
    }

    fn last_value(&self) -> f64 {
        self.samples.lock().back().map_or(0.0, |s| s.value)
    }
}

/// Axis holding one value, independent of time
#[derive(Debug)]
pub struct ConstantAxis {
    value: AtomicCell<f64>,
}

impl ConstantAxis {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicCell::new(value),
        }
    }
}

impl Axis for ConstantAxis {
    fn add(&self, value: f64, _delay: f64) {
        if value.is_finite() {
            self.value.store(value);
        }
    }

    fn add_at(&self, _timestamp: f64, value: f64) {
        self.add(value, 0.0);
    }

    fn interpolate(&self, _t: f64) -> f64 {
        self.value.load()
    }

    fn interpolate_into(&self, _times: &[f64], out: &mut [f64]) {
        out.fill(self.value.load());
    }

    fn last_value(&self) -> f64 {
        self.value.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTimeSource;

    fn setup(mode: Interpolation) -> (Arc<ManualTimeSource>, TemporalAxis) {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let axis = TemporalAxis::new(0.0, mode, time.clone(), AxisConfig::default());
        (time, axis)
    }

    #[test]
    fn test_add_then_read_now() {
        let (time, axis) = setup(Interpolation::Linear);
        time.set(3.0);
        axis.add(0.75, 0.0);
        assert_eq!(axis.interpolate(3.0), 0.75);
        assert_eq!(axis.last_value(), 0.75);
    }

    #[test]
    fn test_scheduled_add_truncates_forecast() {
        let (time, axis) = setup(Interpolation::Linear);
        axis.add_at(5.0, 1.0);
        axis.add_at(10.0, 2.0);
        time.set(5.0);
        axis.add(3.0, 2.0);

        let samples = axis.samples();
        assert_eq!(samples.last(), Some(&(7.0, 3.0)));
        assert!(samples.iter().all(|&(t, _)| t < 10.0));
        assert_eq!(axis.interpolate(6.0), 2.0);
    }

    #[test]
    fn test_linear_interpolation_and_clamping() {
        let (_, axis) = setup(Interpolation::Linear);
        axis.add_at(1.0, 0.0);
        axis.add_at(3.0, 1.0);
        assert!((axis.interpolate(2.0) - 0.5).abs() < 1e-12);
        assert_eq!(axis.interpolate(100.0), 1.0);
        assert_eq!(axis.interpolate(-100.0), 0.0);
    }

    #[test]
    fn test_hold_returns_earlier_sample() {
        let (_, axis) = setup(Interpolation::Hold);
        axis.add_at(1.0, 4.0);
        axis.add_at(3.0, 8.0);
        assert_eq!(axis.interpolate(2.9), 4.0);
        assert_eq!(axis.interpolate(3.0), 8.0);
    }

    #[test]
    fn test_batch_matches_single() {
        let (_, axis) = setup(Interpolation::Linear);
        axis.add_at(1.0, 2.0);
        axis.add_at(2.0, -2.0);
        let times = [0.5, 1.0, 1.25, 1.5, 3.0];
        let mut out = [0.0; 5];
        axis.interpolate_into(&times, &mut out);
        for (t, v) in times.iter().zip(out) {
            assert_eq!(axis.interpolate(*t), v);
        }
    }

    #[test]
    fn test_add_before_initial_replaces_everything() {
        let (time, axis) = setup(Interpolation::Linear);
        time.set(10.0);
        axis.add_at(-1.0, 0.25);
        assert_eq!(axis.len(), 1);
        assert_eq!(axis.last_value(), 0.25);
    }

    #[test]
    fn test_non_finite_values_ignored() {
        let (_, axis) = setup(Interpolation::Linear);
        axis.add_at(1.0, f64::NAN);
        assert_eq!(axis.len(), 1);
    }

    #[test]
    fn test_prune_bounds_memory() {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let config = AxisConfig {
            retention_secs: 1.0,
            prune_threshold: 10,
        };
        let axis = TemporalAxis::linear(0.0, time.clone(), config);
        for i in 1..=100 {
            time.set(i as f64 * 0.1);
            axis.add(i as f64, 0.0);
        }
        assert!(axis.len() <= 12);
        assert_eq!(axis.last_value(), 100.0);
        // one second back is still covered
        assert!((axis.interpolate(9.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_backlog_cleared_in_steps() {
        let time = Arc::new(ManualTimeSource::new(0.0));
        let config = AxisConfig {
            retention_secs: 1.0,
            prune_threshold: 10,
        };
        let axis = TemporalAxis::linear(0.0, time.clone(), config);
        // a long forecast is all in the future, nothing to prune yet
        for i in 1..=500 {
            axis.add_at(i as f64 * 0.1, i as f64);
        }
        assert_eq!(axis.len(), 501);

        // the whole forecast expires at once
        time.set(1000.0);
        axis.add(-1.0, 0.0);
        assert_eq!(axis.len(), 502 - PRUNE_STEP);

        for i in 1..=20 {
            time.set(1000.0 + i as f64 * 0.01);
            axis.add(-1.0, 0.0);
        }
        // one expired sample anchors the window, the 21 recent ones stay
        assert_eq!(axis.len(), 22);
        assert_eq!(axis.interpolate(1000.1), -1.0);
    }

    #[test]
    fn test_constant_axis_ignores_time() {
        let axis = ConstantAxis::new(0.5);
        axis.add(0.8, 100.0);
        assert_eq!(axis.interpolate(-5.0), 0.8);
        let mut out = [0.0; 3];
        axis.interpolate_into(&[1.0, 2.0, 3.0], &mut out);
        assert_eq!(out, [0.8; 3]);
    }
}
