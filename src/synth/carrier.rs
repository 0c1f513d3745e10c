//! Carrier phase accumulator

use std::f64::consts::TAU;

use crate::config::SafetyLimits;

/// Phase accumulator for the carrier. The phase persists across callbacks so
/// chunk boundaries are seamless.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Carrier {
    phase: f64,
}

impl Carrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Return the current angle and advance by one sample at `frequency`
    #[inline]
    pub fn next(&mut self, frequency: f64, sample_rate: f64) -> f64 {
        let theta = self.phase;
        self.phase = (self.phase + TAU * frequency / sample_rate).rem_euclid(TAU);
        theta
    }

    /// Write one angle per frequency into `theta`, clamping each frequency to
    /// the safety band
    pub fn advance_into(
        &mut self,
        frequencies: &[f64],
        sample_rate: f64,
        limits: &SafetyLimits,
        theta: &mut [f64],
    ) {
        for (out, &f) in theta.iter_mut().zip(frequencies) {
            *out = self.next(limits.clamp_carrier(f), sample_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wraps() {
        let mut carrier = Carrier::new();
        for _ in 0..1000 {
            let theta = carrier.next(1000.0, 48_000.0);
            assert!((0.0..TAU).contains(&theta));
        }
    }

    #[test]
    fn test_split_chunks_match_single_pass() {
        let limits = SafetyLimits::default();
        let freqs = vec![700.0; 300];

        let mut whole = Carrier::new();
        let mut a = vec![0.0; 300];
        whole.advance_into(&freqs, 44_100.0, &limits, &mut a);

        let mut split = Carrier::new();
        let mut b = vec![0.0; 300];
        split.advance_into(&freqs[..100], 44_100.0, &limits, &mut b[..100]);
        split.advance_into(&freqs[100..], 44_100.0, &limits, &mut b[100..]);

        assert_eq!(a, b);
    }

    #[test]
    fn test_frequency_clamped_to_safety_band() {
        let limits = SafetyLimits::default();
        let mut fast = Carrier::new();
        let mut capped = Carrier::new();
        let mut theta = [0.0; 2];
        fast.advance_into(&[10_000.0; 2], 48_000.0, &limits, &mut theta);
        capped.advance_into(&[limits.max_carrier_hz; 2], 48_000.0, &limits, &mut theta);
        assert_eq!(fast.phase(), capped.phase());
    }
}
