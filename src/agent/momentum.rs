//! Momentum trading agent: crosses a fast and slow moving average per asset
//! and nudges the portfolio toward assets with rising momentum. Grounded in
//! `Momentum` from `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::{Activation, EPSILON};
use crate::observation::{MaKind, Observation, moving_average_series, portfolio_vector_at, trailing_stddev};

#[derive(Debug, Clone)]
pub struct Momentum {
    ma_span: (usize, usize),
    std_span: usize,
    weights: (f64, f64),
    mean_type: MaKind,
    sensitivity: f64,
    /// Row offset used to read the previous portfolio vector: `-2` when the
    /// agent rebalances every step, `-1` when it only observes.
    reb: isize,
    activation: Activation,
    step: u64,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            ma_span: (2, 3),
            std_span: 3,
            weights: (1.0, 1.0),
            mean_type: MaKind::Kama,
            sensitivity: 0.1,
            reb: -2,
            activation: Activation::Simplex,
            step: 0,
        }
    }
}

impl Momentum {
    pub fn new() -> Self {
        tracing::debug!("constructed Momentum agent");
        Self::default()
    }

    fn factor(&self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n = obs.n_assets();
        let mut factor = DVector::zeros(n + 1);
        for (i, symbol) in obs.symbols.iter().enumerate() {
            let open = obs.open_series(symbol)?;
            let ma1 = moving_average_series(&open, self.mean_type, self.ma_span.0);
            let ma2 = moving_average_series(&open, self.mean_type, self.ma_span.1);
            let diff: Vec<f64> = ma1.iter().zip(ma2.iter()).map(|(a, b)| a - b).collect();
            let last = diff.len() - 1;
            let p = diff[last];
            let d = if last >= 1 { diff[last] - diff[last - 1] } else { 0.0 };
            let std = trailing_stddev(&open, self.std_span);
            factor[i] = self.weights.0 * (p + self.weights.1 * d) / (std + EPSILON);
        }
        Ok(crate::numeric::softmax_norm(&factor).add_scalar(1.0))
    }

    fn update(&self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let x_mean = x.mean();
        let portvar = b.dot(x);
        let change = ((portvar - 1.0).abs() + (x.map(|v| (v - 1.0).abs())).max()) / 2.0;
        let norm_sq = (x.add_scalar(-x_mean)).norm_squared();
        let lam = ((change - self.sensitivity) / (norm_sq + EPSILON)).clamp(0.0, 1e6);
        let updated = b + (x.add_scalar(-x_mean)) * lam;
        self.activation.apply(&updated)
    }
}

impl Agent for Momentum {
    fn identifier(&self) -> &'static str {
        "Momentum"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, self.reb)?;
        let factor = self.factor(obs)?;
        self.update(&prev, &factor)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.weights = (params.get_f64("alpha_v")?, params.get_f64("alpha_a")?);
        self.mean_type = match params.get_str("mean_type")? {
            "simple" => MaKind::Simple,
            "exp" => MaKind::Exponential,
            "kama" => MaKind::Kama,
            other => {
                return Err(crate::error::AgentError::InvalidParameter {
                    name: "mean_type".to_string(),
                    reason: format!("unknown mean type '{other}'"),
                }
                .into());
            }
        };
        self.ma_span = (params.get_i64("ma1")? as usize, params.get_i64("ma2")? as usize);
        self.std_span = params.get_i64("std_span")? as usize;
        tracing::info!(ma_span = ?self.ma_span, std_span = self.std_span, "Momentum parameters updated");
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

    fn constant_price_history(n_rows: usize) -> MarketHistory {
        let mut rows = Vec::new();
        for _ in 0..n_rows {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open: 100.0, close: 100.0, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn constant_price_series_keeps_portfolio_on_simplex() {
        let hist = constant_price_history(10);
        let mut agent = Momentum::new();
        for step in 0..hist.rows().len() {
            agent.advance_step();
            let obs = hist.observation_at(step);
            if step == 0 {
                continue;
            }
            let v = agent.rebalance(&obs).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-6);
            assert!(v.iter().all(|&x| x >= -1e-9));
        }
    }
}
