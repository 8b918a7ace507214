//! Confidence-Weighted Mean Reversion (Li, Hoi, Zhao & Gopalkrishnan, 2013).
//! Grounded in `CWMR` from `cryptotrader/agents/apriori.py`; the `scipy.stats
//! .norm.ppf` confidence-to-threshold conversion is done with `statrs`.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::{AgentError, NumericError, OlpsResult};
use crate::numeric::{EPSILON, simplex_proj};
use crate::observation::{Observation, PriceRelativeMode, portfolio_vector_at, price_relative};

/// Which of the two posterior-update approximations from the paper to use.
/// `false` (the paper's primary derivation) is the default; `true` selects
/// the first, simpler variant.
#[derive(Debug, Clone)]
pub struct Cwmr {
    eps: f64,
    theta: f64,
    variant_one: bool,
    reb: isize,
    sigma: Option<DMatrix<f64>>,
    step: u64,
}

impl Cwmr {
    pub fn new(confidence: f64) -> OlpsResult<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(AgentError::InvalidParameter {
                name: "confidence".to_string(),
                reason: "must be within [0, 1]".to_string(),
            }
            .into());
        }
        let theta = inverse_normal_cdf(confidence)?;
        tracing::debug!(confidence, "constructed CWMR agent");
        Ok(Self { eps: -0.5, theta, variant_one: false, reb: -2, sigma: None, step: 0 })
    }

    fn update(&mut self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let m = x.len();
        let sigma = self.sigma.clone().unwrap_or_else(|| DMatrix::identity(m, m) / (m * m) as f64);
        let mu = b.clone();
        let theta = self.theta;
        let eps = self.eps;

        let mm = mu.dot(x);
        let vv = (x.transpose() * &sigma * x)[(0, 0)];
        let diag_sum: f64 = (0..m).map(|i| sigma[(i, i)] * x[i]).sum();
        let trace: f64 = (0..m).map(|i| sigma[(i, i)]).sum();
        let x_upper = diag_sum / trace.max(EPSILON);

        let row_sums: DVector<f64> = DVector::from_fn(m, |i, _| (0..m).map(|j| sigma[(i, j)]).sum());
        let foo_common = (vv - x_upper * x.dot(&row_sums)) / mm.powi(2);

        let (a, b_coef, c) = if self.variant_one {
            let foo = foo_common;
            let a = 2.0 * theta * vv * foo;
            let b_coef = foo + 2.0 * theta * vv * (eps - mm.ln());
            let c = eps - mm.ln() - theta * vv;
            (a, b_coef, c)
        } else {
            let foo = foo_common + vv * theta.powi(2) / 2.0;
            let a = foo.powi(2) - vv.powi(2) * theta.powi(4) / 4.0;
            let b_coef = 2.0 * (eps - mm.ln()) * foo;
            let c = (eps - mm.ln()).powi(2) - vv * theta.powi(2);
            (a, b_coef, c)
        };

        let discriminant = b_coef.powi(2) - 4.0 * a * c;
        if discriminant < 0.0 || a.abs() < EPSILON {
            // Degenerate quadratic: no reversion signal strong enough to act on.
            self.sigma = Some(sigma);
            return simplex_proj(&mu);
        }
        let sqrt_disc = discriminant.sqrt();
        let lam = [0.0, (-b_coef + sqrt_disc) / (2.0 * a), (-b_coef - sqrt_disc) / (2.0 * a)]
            .into_iter()
            .fold(0.0_f64, f64::max)
            .min(1e7);

        let x_minus_upper = x.add_scalar(-x_upper);
        let (new_mu, new_sigma) = if self.variant_one {
            let new_mu = &mu - &sigma * &x_minus_upper * (lam / mm);
            let diag_sq = DMatrix::from_diagonal(&x.map(|v| v * v));
            let inv_sigma = sigma.clone().try_inverse().ok_or_else(|| {
                warn!("cwmr sigma became singular during inversion");
                NumericError::SingularMatrix { op: "CWMR sigma inverse".to_string() }
            })?;
            let updated = inv_sigma + diag_sq * (2.0 * lam * theta);
            let new_sigma = updated.try_inverse().unwrap_or(sigma.clone());
            (new_mu, new_sigma)
        } else {
            let u_sqrt = 0.5 * (-lam * theta * vv + (lam.powi(2) * theta.powi(2) * vv.powi(2) + 4.0 * vv).sqrt());
            let new_mu = &mu - &sigma * &x_minus_upper * (lam / mm);
            let diag_sq = DMatrix::from_diagonal(&x.map(|v| v * v));
            let inv_sigma = sigma.clone().try_inverse().ok_or_else(|| {
                warn!("cwmr sigma became singular during inversion");
                NumericError::SingularMatrix { op: "CWMR sigma inverse".to_string() }
            })?;
            let updated = inv_sigma + diag_sq * (theta * lam / u_sqrt.max(EPSILON));
            let new_sigma = updated.try_inverse().unwrap_or(sigma.clone());
            (new_mu, new_sigma)
        };

        let mu_proj = simplex_proj(&new_mu)?;
        let trace_new: f64 = (0..m).map(|i| new_sigma[(i, i)]).sum();
        let normalized_sigma = new_sigma / ((m * m) as f64 * trace_new.max(EPSILON));
        self.sigma = Some(normalized_sigma);
        Ok(mu_proj)
    }
}

fn inverse_normal_cdf(confidence: f64) -> OlpsResult<f64> {
    let clamped = confidence.clamp(1e-9, 1.0 - 1e-9);
    let normal = Normal::new(0.0, 1.0).map_err(|e| NumericError::InvalidInput {
        op: "CWMR confidence threshold".to_string(),
        reason: e.to_string(),
    })?;
    Ok(normal.inverse_cdf(clamped))
}

impl Agent for Cwmr {
    fn identifier(&self) -> &'static str {
        "CWMR"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            let m = obs.n_assets() + 1;
            self.sigma = Some(DMatrix::identity(m, m) / (m * m) as f64);
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, self.reb)?;
        let x = price_relative(obs, PriceRelativeMode::RatioPrevOverNow)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.eps = params.get_f64("eps")?;
        self.theta = inverse_normal_cdf(params.get_f64("confidence")?)?;
        tracing::info!(eps = self.eps, theta = self.theta, "CWMR parameters updated");
        Ok(())
    }

    fn step(&self) -> u64 {
        self.step
    }

    fn advance_step(&mut self) {
        self.step += 1;
    }
}
