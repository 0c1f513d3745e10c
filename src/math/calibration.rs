//! Hardware calibration
//!
//! Calibrations are immutable values built from a handful of user scalars.
//! Each carries a scale constant chosen so that no unit-disc input can produce
//! an output above unit amplitude. Synthesizers rebuild them only when the
//! scalars change.

use glam::{DMat2, DVec2};

use super::db_to_amplitude;
use super::threephase::{channel_base, scale_at_angle};

/// Valid band for calibration values expressed in dB
pub const CALIBRATION_DB_LIMIT: f64 = 30.0;

/// Valid band for the linear N-phase calibration terms
pub const PHASE_TERM_LIMIT: f64 = 10.0;

/// Three-phase channel correction from a (neutral, right) dB pair.
///
/// The pair is read as a vector: its length sets the stretch ratio and half
/// its angle the stretch direction in the alpha/beta plane. The stretch is
/// moved into channel space with the channel base transform and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreePhaseCalibration {
    neutral_db: f64,
    right_db: f64,
    transform: DMat2,
    scale: f64,
}

impl ThreePhaseCalibration {
    pub fn new(neutral_db: f64, right_db: f64) -> Self {
        let magnitude = (neutral_db * neutral_db + right_db * right_db).sqrt();
        let angle = right_db.atan2(neutral_db) / 2.0;
        let stretch = scale_at_angle(angle, db_to_amplitude(magnitude));

        let base = channel_base();
        let full = base * stretch;
        let row_max = row_norms(full).into_iter().fold(0.0, f64::max);
        let scale = if row_max > 0.0 { 1.0 / row_max } else { 0.0 };

        Self {
            neutral_db,
            right_db,
            transform: full * base.inverse(),
            scale,
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0)
    }

    /// True when built from these scalars
    pub fn matches(&self, neutral_db: f64, right_db: f64) -> bool {
        self.neutral_db == neutral_db && self.right_db == right_db
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Channel-space matrix including the scale constant
    pub fn matrix(&self) -> DMat2 {
        self.transform * self.scale
    }

    #[inline]
    pub fn apply(&self, left: f64, right: f64) -> (f64, f64) {
        let out = self.matrix() * DVec2::new(left, right);
        (out.x, out.y)
    }
}

impl Default for ThreePhaseCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

fn row_norms(m: DMat2) -> [f64; 2] {
    [
        DVec2::new(m.x_axis.x, m.y_axis.x).length(),
        DVec2::new(m.x_axis.y, m.y_axis.y).length(),
    ]
}

/// Relative level of the centre against the edge of the position disc.
///
/// Positive values make the centre quieter, negative values make the edge
/// quieter. The gain never exceeds 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterCalibration {
    center_db: f64,
}

impl CenterCalibration {
    pub fn new(center_db: f64) -> Self {
        Self { center_db }
    }

    pub fn center_db(&self) -> f64 {
        self.center_db
    }

    /// Gain at distance `radius` from the centre
    #[inline]
    pub fn gain(&self, radius: f64) -> f64 {
        let r = radius.clamp(0.0, 1.0);
        let c = self.center_db;
        db_to_amplitude(-c * (1.0 - r) - (-c).max(0.0))
    }
}

impl Default for CenterCalibration {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Four/five-phase correction.
///
/// Output channel `i` drives the adjacent electrode pair (i, i+1). Row `i` of
/// the banded matrix carries `s[i] + t/2` on electrode `i` and
/// `-(s[i+1] + t/2)` on electrode `i+1`. The scale is the inverse of the
/// largest `s[i] + s[i+1] + t`, the worst case row sum for electrode signals
/// within [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseCalibration<const N: usize> {
    shared: f64,
    terms: [f64; N],
    scale: f64,
}

impl<const N: usize> PhaseCalibration<N> {
    /// `shared` is the common term `t`, `terms` the per-electrode `s[i]`.
    /// Negative inputs are treated as zero.
    pub fn new(shared: f64, terms: [f64; N]) -> Self {
        let shared = shared.max(0.0);
        let terms = terms.map(|s| s.max(0.0));
        let worst = (0..N)
            .map(|i| terms[i] + terms[(i + 1) % N] + shared)
            .fold(0.0, f64::max);
        let scale = if worst > 0.0 { 1.0 / worst } else { 0.0 };
        Self {
            shared,
            terms,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, [1.0; N])
    }

    pub fn matches(&self, shared: f64, terms: &[f64; N]) -> bool {
        self.shared == shared.max(0.0) && self.terms == (*terms).map(|s| s.max(0.0))
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Row `i` as (weight on electrode i, weight on electrode i+1), scaled
    pub fn row(&self, i: usize) -> (f64, f64) {
        let half = self.shared / 2.0;
        (
            (self.terms[i] + half) * self.scale,
            -(self.terms[(i + 1) % N] + half) * self.scale,
        )
    }

    #[inline]
    pub fn apply(&self, electrodes: [f64; N]) -> [f64; N] {
        let mut out = [0.0; N];
        for (i, value) in out.iter_mut().enumerate() {
            let (own, next) = self.row(i);
            *value = own * electrodes[i] + next * electrodes[(i + 1) % N];
        }
        out
    }
}

impl<const N: usize> Default for PhaseCalibration<N> {
    fn default() -> Self {
        Self::identity()
    }
}
