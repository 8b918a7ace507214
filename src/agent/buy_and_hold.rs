//! Buy-and-hold: equally distribute cash into every non-fiat asset at the
//! first step, then never trade again. Grounded in `BuyAndHold` from
//! `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, first_step_portfolio};
use crate::error::OlpsResult;
use crate::observation::{Observation, portfolio_vector};

#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    step: u64,
}

impl BuyAndHold {
    pub fn new() -> Self {
        tracing::debug!("constructed BuyAndHold agent");
        Self::default()
    }
}

impl Agent for BuyAndHold {
    fn identifier(&self) -> &'static str {
        "BuyAndHold"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            Ok(first_step_portfolio(obs.n_assets()))
        } else {
            // No further trading: weights drift on their own as prices move.
            portfolio_vector(obs)
        }
    }

    fn set_params(&mut self, _params: &ParamMap) -> OlpsResult<()> {
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

    fn two_asset_history() -> MarketHistory {
        let mut rows = Vec::new();
        for open in [100.0, 101.0, 105.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.5 });
            bars.insert("ETH".to_string(), Bar { open: open / 2.0, close: open / 2.0, holding: 1.0 });
            rows.push(Row { bars, fiat_balance: 0.0 });
        }
        MarketHistory::new(vec!["BTC".to_string(), "ETH".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn first_step_is_uniform_over_non_fiat_assets() {
        let hist = two_asset_history();
        let mut agent = BuyAndHold::new();
        let v = agent.rebalance(&hist.observation_at(0)).unwrap();
        assert_eq!(v[2], 0.0);
        assert!((v[0] - 0.5).abs() < 1e-9);
        assert!((v[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn later_steps_report_realized_drifted_weights() {
        let hist = two_asset_history();
        let mut agent = BuyAndHold::new();
        agent.advance_step();
        let v = agent.rebalance(&hist.full_observation()).unwrap();
        assert!((v.sum() - 1.0).abs() < 1e-9);
        assert!(v.iter().all(|&x| x >= 0.0));
    }
}
