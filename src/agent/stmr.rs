//! Short-Term Mean Reversion. Grounded in `STMR` from
//! `cryptotrader/agents/apriori.py` (credited there to José Olímpio Mendes).

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::{Activation, safe_div};
use crate::observation::{Observation, PriceRelativeMode, portfolio_vector_at, price_relative};

#[derive(Debug, Clone)]
pub struct Stmr {
    sensitivity: f64,
    reb: isize,
    activation: Activation,
    step: u64,
}

impl Default for Stmr {
    fn default() -> Self {
        Self { sensitivity: 0.02, reb: -2, activation: Activation::Simplex, step: 0 }
    }
}

impl Stmr {
    pub fn new() -> Self {
        tracing::debug!("constructed STMR agent");
        Self::default()
    }

    fn update(&self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let x_mean = x.mean();
        let portvar = b.dot(x);
        let (argmax_idx, _) = x
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .unwrap();
        let change = ((portvar + x[argmax_idx]) / 2.0).abs();
        let norm_sq = (x.add_scalar(-x_mean)).norm_squared();
        let lam = safe_div(change - self.sensitivity, norm_sq).clamp(0.0, 1e6);
        let updated = b + (x.add_scalar(-x_mean)) * lam;
        self.activation.apply(&updated)
    }
}

impl Agent for Stmr {
    fn identifier(&self) -> &'static str {
        "STMR"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, self.reb)?;
        let x = price_relative(obs, PriceRelativeMode::DiffRatioMinusOne)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.sensitivity = params.get_f64("sensitivity")?;
        tracing::info!(sensitivity = self.sensitivity, "STMR parameters updated");
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

    #[test]
    fn stays_on_simplex_across_steps() {
        let mut rows = Vec::new();
        for open in [100.0, 98.0, 103.0, 97.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        let hist = MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows);
        let mut agent = Stmr::new();
        for step in 0..hist.rows().len() {
            let v = agent.rebalance(&hist.observation_at(step)).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-6);
            agent.advance_step();
        }
    }
}
