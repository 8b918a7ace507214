//! Online Newton Step (Agarwal, Hazan, Kale & Schapire, 2006). Grounded in
//! `ONS` from `cryptotrader/agents/apriori.py`, with the `cvxopt` QP call
//! replaced by the crate's [`crate::qp`] solver abstraction.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::{NumericError, OlpsResult};
use crate::observation::{Observation, PriceRelativeMode, portfolio_vector_at, price_relative};
use crate::qp::{ClarabelSolver, QpSolver, projection_in_norm};

pub struct Ons {
    delta: f64,
    beta: f64,
    eta: f64,
    a: Option<DMatrix<f64>>,
    b: Option<DVector<f64>>,
    solver: Box<dyn QpSolver + Send>,
    step: u64,
}

impl Default for Ons {
    fn default() -> Self {
        debug!("constructed ONS agent");
        Self {
            delta: 0.1,
            beta: 2.0,
            eta: 0.0,
            a: None,
            b: None,
            solver: Box::new(ClarabelSolver),
            step: 0,
        }
    }
}

impl Ons {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let dim = x.len();
        let denom = b.dot(x);
        let grad = x.map(|v| crate::numeric::safe_div(v, denom));

        let a = self.a.get_or_insert_with(|| DMatrix::identity(dim, dim));
        *a += &grad * grad.transpose();
        let bvec = self.b.get_or_insert_with(|| DVector::zeros(dim));
        *bvec += &grad * (1.0 + 1.0 / self.beta);

        let a_inv = a.clone().try_inverse().ok_or_else(|| {
            warn!("ons covariance matrix became singular during inversion");
            NumericError::SingularMatrix { op: "ONS A matrix inverse".to_string() }
        })?;
        let target = &a_inv * &*bvec * self.delta;
        let pp = projection_in_norm(self.solver.as_ref(), &target, a)?;

        let uniform = DVector::from_element(dim, 1.0 / dim as f64);
        Ok(pp * (1.0 - self.eta) + uniform * self.eta)
    }
}

impl Agent for Ons {
    fn identifier(&self) -> &'static str {
        "ONS"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            let dim = obs.n_assets() + 1;
            self.a = Some(DMatrix::identity(dim, dim));
            self.b = Some(DVector::zeros(dim));
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, -1)?;
        let x = price_relative(obs, PriceRelativeMode::RatioNowOverPrev)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.delta = params.get_f64("delta")?;
        self.beta = params.get_f64("beta")?;
        self.eta = params.get_f64("eta")?;
        info!(delta = self.delta, beta = self.beta, eta = self.eta, "ONS parameters updated");
        Ok(())
    }

    fn step(&self) -> u64 {
        self.step
    }

    fn advance_step(&mut self) {
        self.step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Bar, MarketHistory, Row};
    use std::collections::BTreeMap;

    fn drifting_history() -> MarketHistory {
        let mut rows = Vec::new();
        for open in [100.0, 102.0, 99.0, 105.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.5 });
            rows.push(Row { bars, fiat_balance: 50.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn update_keeps_the_portfolio_on_the_simplex() {
        let hist = drifting_history();
        let mut agent = Ons::new();
        for step in 0..hist.rows().len() {
            let obs = hist.observation_at(step);
            let v = agent.rebalance(&obs).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-4);
            assert!(v.iter().all(|&x| x >= -1e-6));
            agent.advance_step();
        }
    }
}
