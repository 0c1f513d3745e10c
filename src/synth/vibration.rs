//! Slow amplitude modulation layered on the carrier

use std::f64::consts::TAU;

/// Highest modulation rate accepted, in Hz
pub const MAX_VIBRATION_HZ: f64 = 100.0;

/// Amplitude modulator. The factor swings between `1 - strength` and 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vibration {
    phase: f64,
}

impl Vibration {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn next(&mut self, frequency: f64, strength: f64, sample_rate: f64) -> f64 {
        let frequency = if frequency.is_finite() {
            frequency.clamp(0.0, MAX_VIBRATION_HZ)
        } else {
            0.0
        };
        let strength = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let factor = 1.0 - strength * (1.0 - self.phase.cos()) * 0.5;
        self.phase = (self.phase + TAU * frequency / sample_rate).rem_euclid(TAU);
        factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_range() {
        let mut vibration = Vibration::new();
        let (mut lo, mut hi) = (f64::MAX, f64::MIN);
        for _ in 0..48_000 {
            let f = vibration.next(5.0, 0.6, 48_000.0);
            lo = lo.min(f);
            hi = hi.max(f);
        }
        assert!((hi - 1.0).abs() < 1e-9);
        assert!((lo - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_zero_strength_is_transparent() {
        let mut vibration = Vibration::new();
        for _ in 0..100 {
            assert_eq!(vibration.next(20.0, 0.0, 1000.0), 1.0);
        }
    }
}
