//! On-Line Moving Average Reversion (Li & Hoi, 2012). Grounded in `OLMAR`
//! from `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::{EPSILON, simplex_proj};
use crate::observation::{Observation, PriceRelativeMode, portfolio_vector_at, price_relative};

#[derive(Debug, Clone)]
pub struct Olmar {
    window: usize,
    eps: f64,
    smooth: f64,
    step: u64,
}

impl Default for Olmar {
    fn default() -> Self {
        Self { window: 7, eps: 0.02, smooth: 0.5, step: 0 }
    }
}

impl Olmar {
    pub fn new() -> Self {
        tracing::debug!("constructed OLMAR agent");
        Self::default()
    }

    fn predict_price(&self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n = obs.n_assets();
        let full = price_relative(obs, PriceRelativeMode::MaOverNow { window: self.window })?;
        Ok(full.rows(0, n).into_owned())
    }

    fn update(&self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let x_mean = x.mean();
        let portvar = b.dot(x);
        let norm_sq = (x.add_scalar(-x_mean)).norm_squared() + EPSILON;
        let lam = if portvar >= 1.0 {
            ((portvar - 1.0 - self.eps) / norm_sq).max(0.0)
        } else {
            ((1.0 - self.eps - portvar) / norm_sq).max(0.0)
        };
        let lam = lam.min(100_000.0);
        let updated = b + (x.add_scalar(-x_mean)) * (self.smooth * lam);
        let projected = simplex_proj(&updated)?;
        let mut full = DVector::zeros(projected.len() + 1);
        full.rows_mut(0, projected.len()).copy_from(&projected);
        Ok(full)
    }
}

impl Agent for Olmar {
    fn identifier(&self) -> &'static str {
        "OLMAR"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev_full = portfolio_vector_at(obs, -2)?;
        let n = obs.n_assets();
        let prev = prev_full.rows(0, n).into_owned();
        let x = self.predict_price(obs)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.eps = params.get_f64("eps")?;
        self.window = params.get_i64("window")? as usize;
        self.smooth = params.get_f64("smooth")?;
        tracing::info!(eps = self.eps, window = self.window, smooth = self.smooth, "OLMAR parameters updated");
        Ok(())
    }

    fn step(&self) -> u64 {
        self.step
    }

    fn advance_step(&mut self) {
        self.step += 1;
    }
}
