//! Anticor (anti-correlation) heuristic portfolio selection (Borodin,
//! El-Yaniv & Gogan, 2005). Grounded in `Anticor` from
//! `cryptotrader/agents/apriori.py`.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::agent::{Agent, ParamMap, ParamMapExt, first_step_portfolio};
use crate::error::{AgentError, OlpsResult};
use crate::numeric::{safe_div, simplex_proj};
use crate::observation::{Observation, portfolio_vector_at};

#[derive(Debug, Clone)]
pub struct Anticor {
    window: usize,
    step: u64,
}

impl Default for Anticor {
    fn default() -> Self {
        Self { window: 30, step: 0 }
    }
}

/// `window - 2` consecutive-pair log10 returns for every non-fiat asset,
/// one column per asset, over the half-window slice ending at `end`
/// (exclusive) and starting `window - 1` rows earlier.
fn log_return_block(obs: &Observation, window: usize, end: usize) -> OlpsResult<DMatrix<f64>> {
    let n = obs.n_assets();
    let start = end.saturating_sub(window - 1);
    let mut rows = Vec::new();
    for symbol in obs.symbols {
        let open = obs.open_series(symbol)?;
        let slice = &open[start.min(open.len())..end.min(open.len())];
        let returns: Vec<f64> = slice.iter().tuple_windows().map(|(a, b)| safe_div(*b, *a).log10()).collect();
        rows.push(returns);
    }
    let samples = rows.first().map(|r| r.len()).unwrap_or(0);
    Ok(DMatrix::from_fn(samples, n, |r, c| rows[c][r]))
}

fn zero_to_inf(v: f64) -> f64 {
    if v.abs() < 1e-12 { f64::INFINITY } else { v }
}

fn column_mean(m: &DMatrix<f64>, col: usize) -> f64 {
    m.column(col).iter().sum::<f64>() / m.nrows() as f64
}

fn column_std(m: &DMatrix<f64>, col: usize) -> f64 {
    let mean = column_mean(m, col);
    let var = m.column(col).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m.nrows() as f64;
    var.sqrt()
}

impl Anticor {
    pub fn new() -> Self {
        tracing::debug!("constructed Anticor agent");
        Self::default()
    }

    fn update(&self, b: &DVector<f64>, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let n_rows = obs.rows.len();
        let lx1 = log_return_block(obs, self.window, n_rows.saturating_sub(self.window))?;
        let lx2 = log_return_block(obs, self.window, n_rows)?;
        let n = b.len();

        let mean2: Vec<f64> = (0..n).map(|j| column_mean(&lx2, j)).collect();
        let std1: Vec<f64> = (0..n).map(|i| zero_to_inf(column_std(&lx1, i))).collect();
        let std2: Vec<f64> = (0..n).map(|j| zero_to_inf(column_std(&lx2, j))).collect();

        let samples = lx1.nrows().min(lx2.nrows());
        let mut corr = DMatrix::zeros(n, n);
        for i in 0..n {
            let mean1 = column_mean(&lx1, i);
            for j in 0..n {
                let mut acc = 0.0;
                for t in 0..samples {
                    acc += ((lx1[(t, i)] - mean1) / std1[i]) * ((lx2[(t, j)] - mean2[j]) / std2[j]);
                }
                corr[(i, j)] = acc;
            }
        }

        let mut claim = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if mean2[i] > mean2[j] && corr[(i, j)] > 0.0 {
                    let mut c = corr[(i, j)];
                    if corr[(i, i)] < 0.0 {
                        c += corr[(i, i)].abs();
                    }
                    if corr[(j, j)] < 0.0 {
                        c += corr[(j, j)].abs();
                    }
                    claim[(i, j)] = c;
                }
            }
        }

        let mut transfer = DMatrix::zeros(n, n);
        for i in 0..n {
            let total: f64 = claim.row(i).iter().sum();
            if total != 0.0 {
                for j in 0..n {
                    transfer[(i, j)] = b[i] * safe_div(claim[(i, j)], total);
                }
            }
        }

        let mut updated = b.clone();
        for i in 0..n {
            let received: f64 = transfer.column(i).iter().sum();
            let given: f64 = transfer.row(i).iter().sum();
            updated[i] += received - given;
        }

        let projected = simplex_proj(&updated)?;
        let mut full = DVector::zeros(n + 1);
        full.rows_mut(0, n).copy_from(&projected);
        Ok(full)
    }
}

impl Agent for Anticor {
    fn identifier(&self) -> &'static str {
        "Anticor"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        if self.window < 3 {
            return Err(AgentError::InvalidParameter {
                name: "window".to_string(),
                reason: "must be at least 3".to_string(),
            }
            .into());
        }
        if self.step == 0 || obs.rows.len() < 2 * self.window {
            return Ok(first_step_portfolio(obs.n_assets()));
        }
        let prev_full = portfolio_vector_at(obs, -1)?;
        let n = obs.n_assets();
        let prev = prev_full.rows(0, n).into_owned();
        self.update(&prev, obs)
    }

    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()> {
        self.window = params.get_i64("window")? as usize;
        tracing::info!(window = self.window, "Anticor parameters updated");
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

    fn history(n_rows: usize) -> MarketHistory {
        let mut rows = Vec::new();
        for i in 0..n_rows {
            let mut bars = BTreeMap::new();
            let base = 100.0 + (i as f64 * 0.37).sin() * 5.0;
            bars.insert("BTC".to_string(), Bar { open: base, close: base, holding: 0.0 });
            bars.insert("ETH".to_string(), Bar { open: base * 0.5, close: base * 0.5, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string(), "ETH".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn conserves_total_portfolio_mass() {
        let hist = history(80);
        let mut agent = Anticor { window: 10, step: 0 };
        for step in 0..hist.rows().len() {
            agent.advance_step();
            let v = agent.rebalance(&hist.observation_at(step)).unwrap();
            assert!((v.sum() - 1.0).abs() < 1e-6, "step {step}: sum = {}", v.sum());
            assert!(v.iter().all(|&x| x >= -1e-9));
        }
    }
}
