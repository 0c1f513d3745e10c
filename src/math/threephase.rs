//! Closed-form three-electrode projection
//!
//! The carrier is a unit vector rotating in the alpha/beta plane. The position
//! squeezes that circle into an ellipse along the position direction, and a
//! fixed matrix turns the alpha/beta vector into the two audio channels, which
//! drive the L and R electrodes relative to the neutral electrode N.

use glam::{DMat2, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use super::Position;

const SQRT3_2: f64 = 0.866_025_403_784_438_6;

/// Directions shorter than this are treated as "no direction"
const DIRECTION_EPSILON: f64 = 1e-9;

/// How the squeeze factor along the position direction depends on the
/// distance `r` from the centre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SqueezeStrategy {
    /// `1 - r`
    #[default]
    Linear,
    /// `1 - r^2`
    Quadratic,
}

impl SqueezeStrategy {
    #[inline]
    pub fn factor(self, r: f64) -> f64 {
        let r = r.clamp(0.0, 1.0);
        match self {
            SqueezeStrategy::Linear => 1.0 - r,
            SqueezeStrategy::Quadratic => 1.0 - r * r,
        }
    }
}

/// Matrix that scales by `k` along `direction` and leaves the orthogonal
/// direction untouched: `I + (k - 1) u uᵀ`.
#[inline]
pub fn scale_in_direction(direction: DVec2, k: f64) -> DMat2 {
    let len = direction.length();
    if !(len > DIRECTION_EPSILON) {
        return DMat2::IDENTITY;
    }
    let u = direction / len;
    let m = k - 1.0;
    DMat2::from_cols(
        DVec2::new(1.0 + m * u.x * u.x, m * u.x * u.y),
        DVec2::new(m * u.x * u.y, 1.0 + m * u.y * u.y),
    )
}

/// [`scale_in_direction`] with the direction given as an angle
#[inline]
pub fn scale_at_angle(angle: f64, k: f64) -> DMat2 {
    scale_in_direction(DVec2::new(angle.cos(), angle.sin()), k)
}

/// Alpha/beta vector to (L - N, R - N), normalised by √3 so each row has
/// unit length.
#[inline]
pub fn channel_base() -> DMat2 {
    DMat2::from_cols(DVec2::new(-SQRT3_2, -SQRT3_2), DVec2::new(0.5, -0.5))
}

/// Electrode potentials (N, L, R) for an alpha/beta vector
#[inline]
pub fn electrode_potentials(v: DVec2) -> [f64; 3] {
    [
        v.x,
        -0.5 * v.x + SQRT3_2 * v.y,
        -0.5 * v.x - SQRT3_2 * v.y,
    ]
}

/// Per-sample three-phase transform for one position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreePhaseProjection {
    transform: DMat2,
    radius: f64,
}

impl ThreePhaseProjection {
    pub fn new(position: Position, squeeze: SqueezeStrategy) -> Self {
        let p = Position::new(position.alpha, position.beta).clamped();
        let direction = DVec2::new(p.alpha, p.beta);
        let radius = direction.length();
        let squeeze_matrix = scale_in_direction(direction, squeeze.factor(radius));
        Self {
            transform: channel_base() * squeeze_matrix,
            radius,
        }
    }

    /// Alpha/beta-to-channel matrix including the squeeze
    pub fn transform(&self) -> DMat2 {
        self.transform
    }

    /// Distance of the clamped position from the centre
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Channel values at carrier angle `theta`
    #[inline]
    pub fn channels(&self, theta: f64) -> (f64, f64) {
        let (sin, cos) = theta.sin_cos();
        let out = self.transform * DVec2::new(cos, sin);
        (out.x, out.y)
    }
}

/// Corners of the electrode triangle: N, L, R
pub const TRIANGLE_CORNERS: [[f64; 2]; 3] = [[1.0, 0.0], [-0.5, SQRT3_2], [-0.5, -SQRT3_2]];

/// Barycentric weights of a position over the electrode triangle (N, L, R).
/// Points outside the triangle are projected back by dropping negative
/// weights and renormalising.
pub fn barycentric(position: Position) -> [f64; 3] {
    let p = Position::new(position.alpha, position.beta).clamped();
    let mut weights = TRIANGLE_CORNERS.map(|[x, y]| {
        // corners are unit vectors summing to zero, pairwise dot -1/2
        ((1.0 + 2.0 * (p.alpha * x + p.beta * y)) / 3.0).max(0.0)
    });
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    }
    weights
}

/// Electrode magnitudes for four electrodes at the corners of a regular
/// tetrahedron, normalised so the strongest electrode is at 1.
pub fn tetrahedral_intensities(position: Position) -> [f64; 4] {
    let p = position.clamped();
    let p = DVec3::new(p.alpha, p.beta, p.gamma);
    let inv = 1.0 / 3f64.sqrt();
    let corners = [
        DVec3::new(inv, inv, inv),
        DVec3::new(inv, -inv, -inv),
        DVec3::new(-inv, inv, -inv),
        DVec3::new(-inv, -inv, inv),
    ];
    let mut weights = corners.map(|c| ((1.0 + 3.0 * p.dot(c)) / 4.0).max(0.0));
    let peak = weights.iter().cloned().fold(0.0, f64::max);
    if peak > 0.0 {
        for w in &mut weights {
            *w /= peak;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{PI, TAU};

    fn peak(projection: &ThreePhaseProjection) -> (f64, f64) {
        (0..360).fold((0.0f64, 0.0f64), |(l, r), deg| {
            let (a, b) = projection.channels(deg as f64 * TAU / 360.0);
            (l.max(a.abs()), r.max(b.abs()))
        })
    }

    #[test]
    fn test_zero_direction_is_identity() {
        assert_eq!(scale_in_direction(DVec2::ZERO, 0.0), DMat2::IDENTITY);
    }

    #[test]
    fn test_scale_in_direction_scales_only_along_direction() {
        let m = scale_in_direction(DVec2::new(0.0, 2.0), 0.25);
        let along = m * DVec2::new(0.0, 1.0);
        let across = m * DVec2::new(1.0, 0.0);
        assert!((along - DVec2::new(0.0, 0.25)).length() < 1e-12);
        assert!((across - DVec2::new(1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_channel_base_rows_are_unit() {
        let base = channel_base();
        let row0 = DVec2::new(base.x_axis.x, base.y_axis.x);
        let row1 = DVec2::new(base.x_axis.y, base.y_axis.y);
        assert!((row0.length() - 1.0).abs() < 1e-12);
        assert!((row1.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_center_is_balanced() {
        let projection = ThreePhaseProjection::new(Position::CENTER, SqueezeStrategy::Linear);
        let (l, r) = peak(&projection);
        assert!((l - 1.0).abs() < 1e-3);
        assert!((r - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_center_channels_sixty_degrees_apart() {
        // L - N and R - N of a balanced 120° system lead and lag by 150°
        let projection = ThreePhaseProjection::new(Position::CENTER, SqueezeStrategy::Linear);
        for deg in 0..72 {
            let theta = deg as f64 * TAU / 72.0;
            let (l, r) = projection.channels(theta);
            assert!((l - (theta - 5.0 * PI / 6.0).cos()).abs() < 1e-12);
            assert!((r - (theta + 5.0 * PI / 6.0).cos()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_electrode_potentials_120_degrees_apart() {
        for deg in 0..72 {
            let theta = deg as f64 * TAU / 72.0;
            let [n, l, r] = electrode_potentials(DVec2::new(theta.cos(), theta.sin()));
            assert!((n - theta.cos()).abs() < 1e-12);
            assert!((l - (theta - TAU / 3.0).cos()).abs() < 1e-12);
            assert!((r - (theta + TAU / 3.0).cos()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_edge_position_collapses_to_line() {
        // squeezing alpha away leaves only beta, which drives L and R 180° apart
        let projection = ThreePhaseProjection::new(Position::new(1.0, 0.0), SqueezeStrategy::Linear);
        for deg in 0..36 {
            let (l, r) = projection.channels(deg as f64 * PI / 18.0);
            assert!((l + r).abs() < 1e-12);
        }
    }

    #[test]
    fn test_output_bounded_for_all_positions() {
        for squeeze in [SqueezeStrategy::Linear, SqueezeStrategy::Quadratic] {
            for i in 0..40 {
                let angle = i as f64 * TAU / 40.0;
                for r in [0.0, 0.3, 0.7, 1.0, 1.5] {
                    let p = Position::new(r * angle.cos(), r * angle.sin());
                    let (l, rr) = peak(&ThreePhaseProjection::new(p, squeeze));
                    assert!(l <= 1.0 + 1e-12 && rr <= 1.0 + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_squeeze_strategies_differ_inside() {
        assert_eq!(SqueezeStrategy::Linear.factor(0.5), 0.5);
        assert_eq!(SqueezeStrategy::Quadratic.factor(0.5), 0.75);
        assert_eq!(SqueezeStrategy::Linear.factor(2.0), 0.0);
    }

    #[test]
    fn test_electrode_potentials_sum_to_zero() {
        let v = DVec2::new(0.3, -0.8);
        let sum: f64 = electrode_potentials(v).iter().sum();
        assert!(sum.abs() < 1e-12);
    }

    #[test]
    fn test_barycentric_corners_and_center() {
        let n = barycentric(Position::new(1.0, 0.0));
        assert!((n[0] - 1.0).abs() < 1e-12 && n[1].abs() < 1e-12 && n[2].abs() < 1e-12);

        let c = barycentric(Position::CENTER);
        for w in c {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }

        let outside = barycentric(Position::new(-1.0, 0.0));
        assert_eq!(outside[0], 0.0);
        assert!((outside[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_tetrahedral_corner_and_center() {
        let inv = 1.0 / 3f64.sqrt();
        let corner = tetrahedral_intensities(Position::new3(inv, inv, inv));
        assert!((corner[0] - 1.0).abs() < 1e-12);
        assert!(corner[1..].iter().all(|w| w.abs() < 1e-12));

        let center = tetrahedral_intensities(Position::CENTER);
        assert!(center.iter().all(|w| (w - 1.0).abs() < 1e-12));
    }
}
