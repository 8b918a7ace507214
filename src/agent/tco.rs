//! Transaction-cost optimization wrapper (Li & Wang): damps an inner price
//! predictor's signal against round-trip trading cost. Grounded in `TCO`
//! from `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::{EPSILON, simplex_proj};
use crate::observation::{Observation, portfolio_vector_at};

/// A pluggable source of price-relative forecasts for [`Tco`] to trade on.
/// Returns a length-`n+1` vector (fiat slot included, conventionally `1.0`).
pub trait PricePredictor: Send {
    fn predict_price_relative(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>>;

    /// Forwards the whole parameter map verbatim; unrecognized keys are the
    /// predictor's own business, not TCO's.
    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        let _ = params;
        Ok(())
    }
}

/// Default predictor: ratio of a trailing open-price mean to the latest
/// open, the windowed forecast `TCO.predict` leaves commented
/// out as its intended default.
#[derive(Debug, Clone)]
pub struct MovingAveragePredictor {
    window: usize,
}

impl Default for MovingAveragePredictor {
    fn default() -> Self {
        Self { window: 7 }
    }
}

impl PricePredictor for MovingAveragePredictor {
    fn predict_price_relative(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n = obs.n_assets();
        let mut x = DVector::from_element(n + 1, 1.0);
        for (i, symbol) in obs.symbols.iter().enumerate() {
            let open = obs.open_series(symbol)?;
            let last = *open.last().unwrap();
            let start = open.len().saturating_sub(self.window);
            let window = &open[start..];
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            x[i] = crate::numeric::safe_div(mean, last + EPSILON);
        }
        Ok(x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        if params.contains_key("window") {
            self.window = params.get_i64("window")? as usize;
        }
        Ok(())
    }
}

pub struct Tco {
    toff: f64,
    predictor: Box<dyn PricePredictor>,
    step: u64,
}

impl Tco {
    pub fn new(predictor: Box<dyn PricePredictor>) -> Self {
        tracing::debug!("constructed TCO agent");
        Self { toff: 0.1, predictor, step: 0 }
    }

    fn update(&self, b: &DVector<f64>, x: &DVector<f64>) -> OlpsResult<DVector<f64>> {
        let denom = b.dot(x) + EPSILON;
        let vt = x.map(|v| v / denom);
        let vt_mean = vt.mean();
        let updated = b
            + DVector::from_iterator(
                vt.len(),
                vt.iter().map(|&v| {
                    let diff = v - vt_mean;
                    diff.signum() * (diff.abs() - self.toff).max(0.0)
                }),
            );
        simplex_proj(&updated)
    }
}

impl Agent for Tco {
    fn identifier(&self) -> &'static str {
        "TCO"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.step == 0 {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev = portfolio_vector_at(obs, -1)?;
        let x = self.predictor.predict_price_relative(obs)?;
        self.update(&prev, &x)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.toff = params.get_f64("toff")?;
        tracing::info!(toff = self.toff, "TCO parameters updated");
        self.predictor.set_params(params)
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
    fn stays_on_the_simplex() {
        let mut rows = Vec::new();
        for open in [100.0, 101.0, 99.0, 104.0, 103.0, 107.0, 105.0, 110.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        let hist = MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows);
        let mut agent = Tco::new(Box::new(MovingAveragePredictor::default()));
        for step in 0..hist.rows().len() {
            let v = agent.rebalance(&hist.observation_at(step)).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-6);
            agent.advance_step();
        }
    }
}
