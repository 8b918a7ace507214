//! Constant rebalanced portfolio: return the same declared weight vector
//! every step. Grounded in `ConstantRebalance` from
//! `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt};
use crate::error::OlpsResult;
use crate::numeric::softmax_norm;
use crate::observation::Observation;

#[derive(Debug, Clone, Default)]
pub struct ConstantRebalance {
    position: Option<DVector<f64>>,
    step: u64,
}

impl ConstantRebalance {
    pub fn new() -> Self {
        tracing::debug!("constructed ConstantRebalance agent");
        Self::default()
    }

    /// Declares the fixed weight vector directly. `weights` covers the
    /// non-fiat assets only; the fiat slot is always forced to zero.
    pub fn with_weights(weights: &[f64]) -> Self {
        tracing::debug!(n_assets = weights.len(), "constructed ConstantRebalance agent with fixed weights");
        let normalized = softmax_norm(&DVector::from_row_slice(weights));
        let mut position = DVector::zeros(weights.len() + 1);
        position.rows_mut(0, weights.len()).copy_from(&normalized);
        Self { position: Some(position), step: 0 }
    }
}

impl Agent for ConstantRebalance {
    fn identifier(&self) -> &'static str {
        "ConstantRebalance"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.position.is_none() {
            let n = obs.n_assets();
            let uniform = softmax_norm(&DVector::from_element(n, 1.0));
            let mut position = DVector::zeros(n + 1);
            position.rows_mut(0, n).copy_from(&uniform);
            self.position = Some(position);
        }
        Ok(self.position.clone().unwrap())
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        let n = params.len();
        let mut raw = DVector::zeros(n);
        for (i, key) in params.keys().enumerate() {
            raw[i] = params.get_f64(key)?;
        }
        let normalized = softmax_norm(&raw);
        let mut position = DVector::zeros(n + 1);
        position.rows_mut(0, n).copy_from(&normalized);
        self.position = Some(position);
        tracing::info!(n_assets = n, "ConstantRebalance parameters updated");
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
    use crate::agent::ParamValue;
    use crate::observation::{Bar, MarketHistory, Row};
    use std::collections::BTreeMap;

    fn history() -> MarketHistory {
        let mut bars = BTreeMap::new();
        bars.insert("BTC".to_string(), Bar { open: 100.0, close: 100.0, holding: 0.0 });
        bars.insert("ETH".to_string(), Bar { open: 50.0, close: 50.0, holding: 0.0 });
        MarketHistory::new(
            vec!["BTC".to_string(), "ETH".to_string()],
            "USDT".to_string(),
            vec![Row { bars, fiat_balance: 100.0 }],
        )
    }

    #[test]
    fn default_position_is_uniform_over_assets_with_zero_fiat() {
        let hist = history();
        let mut agent = ConstantRebalance::new();
        let v = agent.rebalance(&hist.full_observation()).unwrap();
        assert!((v[0] - 0.5).abs() < 1e-9);
        assert!((v[1] - 0.5).abs() < 1e-9);
        assert_eq!(v[2], 0.0);
    }

    #[test]
    fn set_params_forces_fiat_slot_to_zero() {
        let mut agent = ConstantRebalance::new();
        let mut params = ParamMap::new();
        params.insert("BTC".to_string(), ParamValue::Float(3.0));
        params.insert("ETH".to_string(), ParamValue::Float(1.0));
        agent.set_params(&params).unwrap();
        let hist = history();
        let v = agent.rebalance(&hist.full_observation()).unwrap();
        assert_eq!(v[2], 0.0);
        assert!((v[0] - 0.75).abs() < 1e-9);
        assert!((v[1] - 0.25).abs() < 1e-9);
    }
}
