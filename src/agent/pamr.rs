//! Passive Aggressive Mean Reversion (Li, Zhao, Hoi & Gopalkrishnan, 2012).
//! Grounded in `PAMR` from `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;
use strum::EnumString;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::{AgentError, OlpsResult};
use crate::numeric::{EPSILON, simplex_proj};
use crate::observation::{Observation, PriceRelativeMode, portfolio_vector_at, price_relative};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
pub enum PamrVariant {
    #[strum(serialize = "PAMR0")]
    Pamr0,
    #[strum(serialize = "PAMR1")]
    Pamr1,
    #[strum(serialize = "PAMR2")]
    Pamr2,
}

#[derive(Debug, Clone)]
pub struct Pamr {
    sensitivity: f64,
    c: f64,
    variant: PamrVariant,
    step: u64,
}

impl Default for Pamr {
    fn default() -> Self {
        Self { sensitivity: 0.03, c: 2444.0, variant: PamrVariant::Pamr1, step: 0 }
    }
}

impl Pamr {
    pub fn new() -> Self {
        tracing::debug!("constructed PAMR agent");
        Self::default()
    }

    fn update(&self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let x_mean = x.mean();
        let portvar = b.dot(x);
        // The original leaves `le` from a prior call undefined once
        // `portvar` falls below threshold; clamping at zero here keeps the
        // loss well-defined on every call.
        let le = (portvar - (1.0 + self.sensitivity)).max(0.0);
        let norm_sq = (x.add_scalar(-x_mean)).norm_squared();
        let lam = match self.variant {
            PamrVariant::Pamr0 => le / (norm_sq + EPSILON),
            PamrVariant::Pamr1 => (le / (norm_sq + EPSILON)).min(self.c),
            PamrVariant::Pamr2 => le / (norm_sq + 0.5 / self.c + EPSILON),
        };
        let lam = lam.min(100_000.0);
        let updated = b + (x.add_scalar(-x_mean)) * lam;
        simplex_proj(&updated)
    }
}

impl Agent for Pamr {
    fn identifier(&self) -> &'static str {
        "PAMR"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, -2)?;
        let x = price_relative(obs, PriceRelativeMode::RatioPrevOverNow)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.sensitivity = params.get_f64("sensitivity")?;
        if params.contains_key("C") {
            self.c = params.get_f64("C")?;
        }
        let variant_str = params.get_str("variant")?;
        self.variant = variant_str.parse().map_err(|_| AgentError::InvalidParameter {
            name: "variant".to_string(),
            reason: format!("unknown PAMR variant '{variant_str}'"),
        })?;
        tracing::info!(sensitivity = self.sensitivity, variant = ?self.variant, "PAMR parameters updated");
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

    fn history() -> MarketHistory {
        let mut rows = Vec::new();
        for open in [100.0, 90.0, 95.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn zero_sensitivity_still_projects_onto_simplex() {
        let hist = history();
        let mut agent = Pamr { sensitivity: 0.0, ..Pamr::new() };
        agent.advance_step();
        agent.advance_step();
        let v = agent.rebalance(&hist.full_observation()).unwrap();
        assert!((v.sum() - 1.0).abs() < 1e-6);
        assert!(v.iter().all(|&x| x >= -1e-9));
    }

    #[test]
    fn set_params_parses_variant_name() {
        let mut agent = Pamr::new();
        let mut params = ParamMap::new();
        params.insert("sensitivity".to_string(), crate::agent::ParamValue::Float(0.05));
        params.insert("variant".to_string(), crate::agent::ParamValue::Str("PAMR2".to_string()));
        agent.set_params(&params).unwrap();
        assert_eq!(agent.variant, PamrVariant::Pamr2);
    }
}
