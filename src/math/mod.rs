//! Geometry and calibration math
//!
//! Everything here is pure and allocation-free so it can run per sample on the
//! audio thread.

pub mod calibration;
pub mod projection;
pub mod threephase;

pub use calibration::{CenterCalibration, PhaseCalibration, ThreePhaseCalibration};
pub use projection::{constrain_4p_amplitudes, constrain_5p_amplitudes, split_point};
pub use threephase::{SqueezeStrategy, ThreePhaseProjection};

/// Desired sensation location. Components are in [-1, 1]; `gamma` is only
/// used by the tetrahedral four-electrode mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Position {
    pub const CENTER: Position = Position {
        alpha: 0.0,
        beta: 0.0,
        gamma: 0.0,
    };

    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            gamma: 0.0,
        }
    }

    pub fn new3(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    pub fn norm(&self) -> f64 {
        (self.alpha * self.alpha + self.beta * self.beta + self.gamma * self.gamma).sqrt()
    }

    /// Non-finite components become zero, then the vector is scaled back onto
    /// the unit ball if it lies outside.
    pub fn clamped(self) -> Self {
        let fix = |v: f64| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        let p = Self::new3(fix(self.alpha), fix(self.beta), fix(self.gamma));
        let norm = p.norm();
        if norm > 1.0 {
            Self::new3(p.alpha / norm, p.beta / norm, p.gamma / norm)
        } else {
            p
        }
    }
}

/// Convert decibels to a linear amplitude ratio
#[inline]
pub fn db_to_amplitude(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}
