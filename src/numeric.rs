//! Numeric primitives shared by every agent: simplex projection, softmax
//! normalization, and safe division. These are pure functions with no agent
//! state, grounded in `cryptotrader.agents.utils.simplex_proj`/`array_normalize`/`safe_div`.

use nalgebra::DVector;

use crate::error::{NumericError, OlpsResult};

/// `ε` used throughout the agent core for guarding near-zero denominators.
pub const EPSILON: f64 = 1e-16;

/// `a / b`, returning `0.0` when `|b|` is too small to divide safely.
pub fn safe_div(a: f64, b: f64) -> f64 {
    if b.abs() > EPSILON { a / b } else { 0.0 }
}

/// Euclidean projection of `y` onto the probability simplex
/// `{ b : b_i >= 0, sum(b) == 1 }`, via the sort-and-threshold algorithm
/// (Duchi et al., 2008).
pub fn simplex_proj(y: &DVector<f64>) -> OlpsResult<DVector<f64>> {
    let m = y.len();
    if m == 0 {
        return Err(NumericError::InvalidInput {
            op: "simplex_proj".to_string(),
            reason: "empty input vector".to_string(),
        }
        .into());
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(NumericError::InvalidInput {
            op: "simplex_proj".to_string(),
            reason: "non-finite entry".to_string(),
        }
        .into());
    }

    let mut u: Vec<f64> = y.iter().copied().collect();
    u.sort_by(|a, b| b.partial_cmp(a).unwrap());

    let mut cumsum = 0.0;
    let mut rho = 0usize;
    let mut lambda = 0.0;
    for (i, &ui) in u.iter().enumerate() {
        cumsum += ui;
        let candidate = (cumsum - 1.0) / (i as f64 + 1.0);
        if ui - candidate > 0.0 {
            rho = i + 1;
            lambda = candidate;
        }
    }
    if rho == 0 {
        // Every entry failed the threshold test; fall back to the uniform
        // distribution rather than dividing by zero.
        let uniform = 1.0 / m as f64;
        return Ok(DVector::from_element(m, uniform));
    }

    Ok(y.map(|yi| (yi - lambda).max(0.0)))
}

/// Normalizes `y` to sum to one (a simplex projection by division, not the
/// exponential softmax its name suggests): clips negative entries to zero,
/// divides by the sum, and falls back to the uniform distribution when the
/// sum is zero.
pub fn softmax_norm(y: &DVector<f64>) -> DVector<f64> {
    let m = y.len();
    let clipped = y.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let sum: f64 = clipped.iter().sum();
    if sum > 0.0 {
        clipped / sum
    } else {
        DVector::from_element(m, 1.0 / m as f64)
    }
}

/// Portfolio activation applied after an agent's raw update step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Simplex,
    Softmax,
}

impl Activation {
    pub fn apply(self, y: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        match self {
            Activation::Simplex => simplex_proj(y),
            Activation::Softmax => Ok(softmax_norm(y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_vec(values.to_vec())
    }

    #[test]
    fn simplex_proj_of_point_already_on_simplex_is_identity() {
        let b = v(&[0.3, 0.3, 0.4]);
        let proj = simplex_proj(&b).unwrap();
        for (a, c) in b.iter().zip(proj.iter()) {
            assert!((a - c).abs() < 1e-9);
        }
    }

    #[test]
    fn simplex_proj_sums_to_one_and_is_nonnegative() {
        let proj = simplex_proj(&v(&[5.0, -3.0, 0.1, 12.0])).unwrap();
        assert!(proj.iter().all(|&x| x >= 0.0));
        assert!((proj.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn simplex_proj_scenario_uniform_halves() {
        let proj = simplex_proj(&v(&[0.5, 0.5, 0.5])).unwrap();
        for x in proj.iter() {
            assert!((x - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn simplex_proj_scenario_corner() {
        let proj = simplex_proj(&v(&[1.2, -0.3, 0.1])).unwrap();
        assert!((proj[0] - 1.0).abs() < 1e-9);
        assert!(proj[1].abs() < 1e-9);
        assert!(proj[2].abs() < 1e-9);
    }

    #[test]
    fn simplex_proj_rejects_empty_and_nonfinite() {
        assert!(simplex_proj(&DVector::from_vec(vec![])).is_err());
        assert!(simplex_proj(&v(&[1.0, f64::NAN])).is_err());
    }

    #[test]
    fn simplex_proj_is_idempotent() {
        let b = simplex_proj(&v(&[2.0, -1.0, 0.5, 3.0])).unwrap();
        let b2 = simplex_proj(&b).unwrap();
        for (a, c) in b.iter().zip(b2.iter()) {
            assert!((a - c).abs() < 1e-9);
        }
    }

    #[test]
    fn safe_div_of_zero_denominator_is_zero() {
        assert_eq!(safe_div(5.0, 0.0), 0.0);
        assert_eq!(safe_div(-3.2, 0.0), 0.0);
        assert_eq!(safe_div(0.0, 0.0), 0.0);
    }

    #[test]
    fn safe_div_normal_case() {
        assert!((safe_div(6.0, 2.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn softmax_norm_all_zero_falls_back_to_uniform() {
        let n = softmax_norm(&v(&[0.0, 0.0, 0.0]));
        for x in n.iter() {
            assert!((x - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn softmax_norm_clips_negative_then_normalizes() {
        let n = softmax_norm(&v(&[-1.0, 3.0, 1.0]));
        assert_eq!(n[0], 0.0);
        assert!((n.sum() - 1.0).abs() < 1e-12);
    }
}
