//! Compound factor trader: blends several independent signal generators
//! into one portfolio. Grounded in `FactorTrader` from
//! `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::{Activation, EPSILON};
use crate::observation::{Observation, centered_rolling_stddev_last, portfolio_vector};

/// A single tradeable signal consumed by [`FactorTrader`]. Unlike a full
/// [`Agent`], a factor only produces a raw directional signal per non-fiat
/// asset; `FactorTrader` owns turning that into a portfolio.
pub trait Factor: Send {
    /// Stable name; `"<name>_weight"` is the key `FactorTrader::set_params`
    /// looks up for this factor's blend weight.
    fn name(&self) -> &'static str;

    /// Length-`n` raw signal, one entry per non-fiat asset.
    fn signal(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>>;
}

pub struct FactorTrader {
    factors: Vec<Box<dyn Factor>>,
    weights: Vec<f64>,
    std_window: usize,
    std_weight: f64,
    alpha: (f64, f64),
    activation: Activation,
    step: u64,
}

impl FactorTrader {
    pub fn new(factors: Vec<Box<dyn Factor>>) -> Self {
        tracing::debug!(n_factors = factors.len(), "constructed FactorTrader agent");
        let weights = vec![1.0; factors.len()];
        Self {
            factors,
            weights,
            std_window: 3,
            std_weight: 1.0,
            alpha: (1.0, 1.0),
            activation: Activation::Softmax,
            step: 0,
        }
    }

    fn blended_signal(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n = obs.n_assets();
        let mut action = DVector::zeros(n);
        for (factor, &weight) in self.factors.iter_mut().zip(self.weights.iter()) {
            action += factor.signal(obs)? * weight;
        }
        Ok(action)
    }
}

impl Agent for FactorTrader {
    fn identifier(&self) -> &'static str {
        "FactorTrader"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let n = obs.n_assets();
        let action = self.blended_signal(obs)?;
        let prev_port = portfolio_vector(obs)?;
        let mut port_vec = DVector::zeros(n + 1);
        for (i, symbol) in obs.symbols.iter().enumerate() {
            let open = obs.open_series(symbol)?;
            let last = *open.last().unwrap();
            let stdev = self.std_weight * centered_rolling_stddev_last(&open, self.std_window) / last + EPSILON;
            let alpha = if action[i] >= 0.0 { self.alpha.0 } else { self.alpha.1 };
            port_vec[i] = (prev_port[i] + alpha * action[i] / stdev).max(0.0);
        }
        let rest: f64 = port_vec.rows(0, n).sum();
        port_vec[n] = (1.0 - rest).max(0.0);
        self.activation.apply(&port_vec)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.std_window = params.get_i64("std_window")? as usize;
        self.std_weight = params.get_f64("std_weight")?;
        for (i, factor) in self.factors.iter().enumerate() {
            self.weights[i] = params.get_f64(&format!("{}_weight", factor.name()))?;
        }
        self.alpha = (params.get_f64("alpha_up")?, params.get_f64("alpha_down")?);
        tracing::info!(std_window = self.std_window, std_weight = self.std_weight, "FactorTrader parameters updated");
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

    struct AlwaysBullish;
    impl Factor for AlwaysBullish {
        fn name(&self) -> &'static str {
            "bullish"
        }
        fn signal(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
            Ok(DVector::from_element(obs.n_assets(), 1.0))
        }
    }

    fn history() -> MarketHistory {
        let mut rows = Vec::new();
        for open in [100.0, 101.0, 102.0, 103.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn factor_weight_is_keyed_by_declaration_order() {
        let mut agent = FactorTrader::new(vec![Box::new(AlwaysBullish)]);
        let mut params = ParamMap::new();
        params.insert("std_window".to_string(), crate::agent::ParamValue::Int(3));
        params.insert("std_weight".to_string(), crate::agent::ParamValue::Float(1.0));
        params.insert("bullish_weight".to_string(), crate::agent::ParamValue::Float(2.0));
        params.insert("alpha_up".to_string(), crate::agent::ParamValue::Float(1.0));
        params.insert("alpha_down".to_string(), crate::agent::ParamValue::Float(1.0));
        agent.set_params(&params).unwrap();
        assert_eq!(agent.weights[0], 2.0);
    }

    #[test]
    fn produces_normalized_portfolio() {
        let hist = history();
        let mut agent = FactorTrader::new(vec![Box::new(AlwaysBullish)]);
        agent.advance_step();
        let v = agent.rebalance(&hist.full_observation()).unwrap();
        assert!((v.sum() - 1.0).abs() < 1e-6);
        assert!(v.iter().all(|&x| x >= -1e-9));
    }
}
