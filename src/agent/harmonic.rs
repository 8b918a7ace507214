//! Fibonacci harmonic pattern trader (Gartley, butterfly, bat, crab).
//! Grounded in `HarmonicTrader` from `cryptotrader/agents/apriori.py`.
//!
//! Extreme points are labeled in reverse chronological order: `X` is the
//! most recent extreme, `D` the oldest of the five needed to evaluate a
//! pattern (`XA = A - X`, `AB = B - A`, `BC = C - B`, `CD = D - C`).

use nalgebra::DVector;

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::OlpsResult;
use crate::numeric::Activation;
use crate::observation::{Observation, combined_extremes, portfolio_vector};

#[derive(Debug, Clone, Copy)]
struct Intervals {
    xa: f64,
    ab: f64,
    bc: f64,
    cd: f64,
}

#[derive(Debug, Clone, Copy)]
struct PatternRatios {
    ab: (f64, f64),
    bc: (f64, f64),
    cd: (f64, f64),
}

const GARTLEY: PatternRatios = PatternRatios { ab: (0.618, 0.618), bc: (0.382, 0.886), cd: (1.27, 1.618) };
const BUTTERFLY: PatternRatios = PatternRatios { ab: (0.786, 0.786), bc: (0.382, 0.886), cd: (1.618, 2.618) };
const BAT: PatternRatios = PatternRatios { ab: (0.382, 0.5), bc: (0.382, 0.886), cd: (1.618, 2.618) };
const CRAB: PatternRatios = PatternRatios { ab: (0.382, 0.618), bc: (0.382, 0.886), cd: (2.24, 3.618) };

#[derive(Debug, Clone)]
pub struct HarmonicTrader {
    peak_order: usize,
    err_allowed: f64,
    decay: f64,
    alpha: (f64, f64),
    activation: Activation,
    step: u64,
}

impl Default for HarmonicTrader {
    fn default() -> Self {
        Self {
            peak_order: 7,
            err_allowed: 0.05,
            decay: 0.99,
            alpha: (1.0, 1.0),
            activation: Activation::Softmax,
            step: 0,
        }
    }
}

impl HarmonicTrader {
    pub fn new() -> Self {
        tracing::debug!("constructed HarmonicTrader agent");
        Self::default()
    }

    fn find_extreme(&self, open: &[f64]) -> Option<Intervals> {
        let idx = combined_extremes(open, self.peak_order);
        if idx.len() < 5 {
            return None;
        }
        let last = idx.len();
        let e = |back: usize| open[idx[last - back]];
        Some(Intervals { xa: e(2) - e(1), ab: e(3) - e(2), bc: e(4) - e(3), cd: e(5) - e(4) })
    }

    fn find_pattern(&self, intervals: Intervals, ratios: PatternRatios) -> i32 {
        let ab_range = (
            ratios.ab.0 - self.err_allowed,
            ratios.ab.1 + self.err_allowed,
        );
        let bc_range = (ratios.bc.0 - self.err_allowed, ratios.bc.1 + self.err_allowed);
        let cd_range = (ratios.cd.0 - self.err_allowed, ratios.cd.1 + self.err_allowed);

        let ab = (ab_range.0 * intervals.xa.abs(), ab_range.1 * intervals.xa.abs());
        let bc = (bc_range.0 * intervals.ab.abs(), bc_range.1 * intervals.ab.abs());
        let cd = (cd_range.0 * intervals.bc.abs(), cd_range.1 * intervals.bc.abs());

        let fits = ab.0 < intervals.ab.abs()
            && intervals.ab.abs() < ab.1
            && bc.0 < intervals.bc.abs()
            && intervals.bc.abs() < bc.1
            && cd.0 < intervals.cd.abs()
            && intervals.cd.abs() < cd.1;

        if !fits {
            return 0;
        }
        if intervals.xa > 0.0 && intervals.ab < 0.0 && intervals.bc > 0.0 && intervals.cd < 0.0 {
            1
        } else if intervals.xa < 0.0 && intervals.ab > 0.0 && intervals.bc < 0.0 && intervals.cd > 0.0 {
            -1
        } else {
            0
        }
    }

    fn pattern_score(&self, open: &[f64]) -> i32 {
        let Some(intervals) = self.find_extreme(open) else {
            return 0;
        };
        [GARTLEY, BUTTERFLY, BAT, CRAB]
            .iter()
            .map(|r| self.find_pattern(intervals, *r))
            .sum()
    }
}

impl Agent for HarmonicTrader {
    fn identifier(&self) -> &'static str {
        "HarmonicTrader"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n = obs.n_assets();
        if self.step == 0 {
            return Ok(first_step_portfolio(n));
        }
        let prev_port = portfolio_vector(obs)?;
        let mut port_vec = DVector::zeros(n + 1);
        for (i, symbol) in obs.symbols.iter().enumerate() {
            let open = obs.open_series(symbol)?;
            let action = self.pattern_score(&open) as f64;
            let alpha = if action >= 0.0 { self.alpha.0 } else { self.alpha.1 };
            port_vec[i] = (self.decay * prev_port[i] + (1.0 - self.decay) + alpha * action).max(0.0);
        }
        let rest: f64 = port_vec.rows(0, n).sum();
        port_vec[n] = (1.0 - rest).max(0.0);
        self.activation.apply(&port_vec)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.err_allowed = params.get_f64("err_allowed")?;
        self.peak_order = params.get_i64("peak_order")? as usize;
        self.decay = params.get_f64("decay")?;
        self.alpha = (params.get_f64("alpha_up")?, params.get_f64("alpha_down")?);
        tracing::info!(err_allowed = self.err_allowed, peak_order = self.peak_order, "HarmonicTrader parameters updated");
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

    fn zigzag_history() -> MarketHistory {
        let opens = [100.0, 110.0, 95.0, 108.0, 90.0, 112.0, 85.0, 120.0, 80.0, 130.0, 70.0, 140.0];
        let mut rows = Vec::new();
        for &open in &opens {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn produces_a_normalized_portfolio() {
        let hist = zigzag_history();
        let mut agent = HarmonicTrader { peak_order: 1, ..HarmonicTrader::new() };
        for step in 0..hist.rows().len() {
            agent.advance_step();
            let v = agent.rebalance(&hist.observation_at(step)).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-6);
            assert!(v.iter().all(|&x| x >= -1e-9));
        }
    }
}
