//! N-phase decomposition
//!
//! Turns N target electrode magnitudes into N complex points with those
//! magnitudes that sum to zero. Rotating all points by the carrier angle and
//! taking the real part yields N phase-related sinusoids whose instantaneous
//! sum is always zero, so no net current flows.
//!
//! A magnitude vector is realizable when no component exceeds the sum of the
//! others (the polygon inequality). [`constrain_amplitudes`] repairs vectors
//! that are not.

use num_complex::Complex64;

use crate::error::GeometryError;

/// Slack allowed on the realizability inequalities after repair
pub const REALIZABILITY_EPSILON: f64 = 1e-9;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Split `m` into two points with magnitudes `a` and `b` that sum to `m`.
///
/// The first point is found with the law of cosines relative to the direction
/// of `m`. Requires `|a - b| <= |m| <= a + b`; outside that range the
/// perpendicular component clamps to zero. When `m` is zero the first point
/// lies on the positive real axis.
#[inline]
pub fn split_point(m: Complex64, a: f64, b: f64) -> (Complex64, Complex64) {
    let d = m.norm();
    if d < 1e-12 {
        let p = Complex64::new(a, 0.0);
        return (p, m - p);
    }
    let direction = m / d;
    let x = ((a * a - b * b + d * d) / (2.0 * d)).clamp(-a, a);
    let y = (a * a - x * x).max(0.0).sqrt();
    let p = Complex64::new(x, y) * direction;
    (p, m - p)
}

/// Range of magnitudes reachable by summing vectors of the given lengths
#[inline]
pub fn reachable_range(magnitudes: &[f64]) -> (f64, f64) {
    let total: f64 = magnitudes.iter().sum();
    let largest = magnitudes.iter().cloned().fold(0.0, f64::max);
    ((2.0 * largest - total).max(0.0), total)
}

/// Check that every magnitude is in [0, 1] and every polygon inequality holds
pub fn check_realizable(magnitudes: &[f64]) -> Result<(), GeometryError> {
    let total: f64 = magnitudes.iter().sum();
    for (index, &value) in magnitudes.iter().enumerate() {
        if !(value >= 0.0 && value <= 1.0 + REALIZABILITY_EPSILON) {
            return Err(GeometryError::MagnitudeOutOfRange { index, value });
        }
        let slack = total - 2.0 * value;
        if slack < -REALIZABILITY_EPSILON {
            return Err(GeometryError::InvalidGeometry { index, slack });
        }
    }
    Ok(())
}

/// Make a magnitude vector realizable.
///
/// Negative and non-finite entries become zero. If the largest component
/// exceeds the sum of the others, the shortfall is shared equally among the
/// other components. Finally the vector is scaled down so no entry exceeds 1.
pub fn constrain_amplitudes<const N: usize>(magnitudes: [f64; N]) -> [f64; N] {
    let mut out = magnitudes.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    if N < 2 {
        return out;
    }

    // only the largest component can violate its inequality
    let (largest_index, largest) = out
        .iter()
        .cloned()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    let total: f64 = out.iter().sum();
    let shortfall = 2.0 * largest - total;
    if shortfall > 0.0 {
        let share = shortfall / (N - 1) as f64;
        for (i, v) in out.iter_mut().enumerate() {
            if i != largest_index {
                *v += share;
            }
        }
    }

    let peak = out.iter().cloned().fold(0.0, f64::max);
    if peak > 1.0 {
        for v in &mut out {
            *v /= peak;
        }
    }

    debug_assert!(
        check_realizable(&out).is_ok(),
        "magnitude repair failed: {:?}",
        out
    );
    out
}

/// [`constrain_amplitudes`] for four electrodes
pub fn constrain_4p_amplitudes(magnitudes: [f64; 4]) -> [f64; 4] {
    constrain_amplitudes(magnitudes)
}

/// [`constrain_amplitudes`] for five electrodes
pub fn constrain_5p_amplitudes(magnitudes: [f64; 5]) -> [f64; 5] {
    constrain_amplitudes(magnitudes)
}

#[inline]
fn midpoint_of_intersection(first: (f64, f64), second: (f64, f64)) -> f64 {
    let lo = first.0.max(second.0);
    let hi = first.1.min(second.1);
    0.5 * (lo + hi)
}

/// Three points: `a` on the real axis, `-a` split into `b` and `c`
pub fn project_3p(m: [f64; 3]) -> [Complex64; 3] {
    let [a, b, c] = m;
    let za = Complex64::new(a, 0.0);
    let (zb, zc) = split_point(-za, b, c);
    [za, zb, zc]
}

/// Four points: a midpoint `p` reachable by both {a, b} and {c, d}, then
/// `p` splits into (a, b) and `-p` into (c, d).
pub fn project_4p(m: [f64; 4]) -> [Complex64; 4] {
    let [a, b, c, d] = m;
    let radius = midpoint_of_intersection(reachable_range(&[a, b]), reachable_range(&[c, d]));
    let p = Complex64::new(radius, 0.0);
    let (za, zb) = split_point(p, a, b);
    let (zc, zd) = split_point(-p, c, d);
    [za, zb, zc, zd]
}

/// Five points: {a, b} against {c, d, e}, then {c, d} against e
pub fn project_5p(m: [f64; 5]) -> [Complex64; 5] {
    let [a, b, c, d, e] = m;
    let radius = midpoint_of_intersection(reachable_range(&[a, b]), reachable_range(&[c, d, e]));
    let p = Complex64::new(radius, 0.0);
    let (za, zb) = split_point(p, a, b);

    let inner = midpoint_of_intersection(reachable_range(&[c, d]), reachable_range(&[radius, e]));
    let (q, ze) = split_point(-p, inner, e);
    let (zc, zd) = split_point(q, c, d);
    [za, zb, zc, zd, ze]
}

/// Dispatch on the electrode count. Counts other than 3, 4 or 5 yield zeros.
pub fn project<const N: usize>(m: [f64; N]) -> [Complex64; N] {
    let mut out = [ZERO; N];
    let src: &[f64] = &m;
    let dst: &mut [Complex64] = &mut out;
    match src.len() {
        3 => dst.copy_from_slice(&project_3p([src[0], src[1], src[2]])),
        4 => dst.copy_from_slice(&project_4p([src[0], src[1], src[2], src[3]])),
        5 => dst.copy_from_slice(&project_5p([src[0], src[1], src[2], src[3], src[4]])),
        _ => {}
    }
    out
}

/// Instantaneous electrode signals at carrier angle `theta`
#[inline]
pub fn sample_points<const N: usize>(points: &[Complex64; N], theta: f64) -> [f64; N] {
    let rotation = Complex64::from_polar(1.0, theta);
    (*points).map(|z| (z * rotation).re)
}
