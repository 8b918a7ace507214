//! The observation adapter: reads a two-level-keyed tabular observation and
//! produces the vectors each agent needs. Grounded in
//! `APrioriAgent.get_portfolio_vector` from `cryptotrader/agents/apriori.py`,
//! generalized into free functions over a borrowed [`Observation`] rather
//! than methods tied to one base class.

use std::collections::BTreeMap;

use nalgebra::DVector;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{AgentError, OlpsResult};

pub type Symbol = String;

/// One bar of OHLC + holding data for a single non-fiat symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub open: f64,
    pub close: f64,
    /// Quantity of this asset currently held.
    pub holding: f64,
}

/// One time-indexed row of the observation: a bar per non-fiat symbol plus
/// the fiat balance.
#[derive(Debug, Clone)]
pub struct Row {
    pub bars: BTreeMap<Symbol, Bar>,
    pub fiat_balance: f64,
}

/// Owns the full rolling window of market history. `Observation` borrows a
/// suffix of it at decision time.
#[derive(Debug, Clone)]
pub struct MarketHistory {
    symbols: Vec<Symbol>,
    fiat: Symbol,
    rows: Vec<Row>,
}

impl MarketHistory {
    pub fn new(symbols: Vec<Symbol>, fiat: Symbol, rows: Vec<Row>) -> Self {
        Self { symbols, fiat, rows }
    }

    /// Builds a history from boundary data expressed in `rust_decimal::Decimal`,
    /// converting to `f64` exactly once: high-precision decimals at the
    /// ingestion boundary, double precision for everything agents compute.
    pub fn from_decimal_rows(
        symbols: Vec<Symbol>,
        fiat: Symbol,
        decimal_rows: Vec<(BTreeMap<Symbol, (Decimal, Decimal, Decimal)>, Decimal)>,
    ) -> OlpsResult<Self> {
        let mut rows = Vec::with_capacity(decimal_rows.len());
        for (bars, fiat_balance) in decimal_rows {
            let mut converted = BTreeMap::new();
            for (symbol, (open, close, holding)) in bars {
                converted.insert(
                    symbol,
                    Bar {
                        open: decimal_to_f64(open)?,
                        close: decimal_to_f64(close)?,
                        holding: decimal_to_f64(holding)?,
                    },
                );
            }
            rows.push(Row {
                bars: converted,
                fiat_balance: decimal_to_f64(fiat_balance)?,
            });
        }
        Ok(Self::new(symbols, fiat, rows))
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn fiat(&self) -> &str {
        &self.fiat
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Number of non-fiat assets.
    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    /// Borrows the window of rows up to and including `upto` (exclusive end
    /// is one past `upto`), the observation an agent sees at step `upto`.
    pub fn observation_at(&self, upto: usize) -> Observation<'_> {
        Observation {
            symbols: &self.symbols,
            fiat: &self.fiat,
            rows: &self.rows[..=upto],
        }
    }

    /// The full history as one observation (used by tests and the replay
    /// environment, which hands agents the whole window every step).
    pub fn full_observation(&self) -> Observation<'_> {
        Observation {
            symbols: &self.symbols,
            fiat: &self.fiat,
            rows: &self.rows,
        }
    }
}

fn decimal_to_f64(d: Decimal) -> OlpsResult<f64> {
    d.to_f64().ok_or_else(|| {
        AgentError::InvalidObservation(format!("decimal value {d} has no f64 representation"))
            .into()
    })
}

/// A borrowed, immutable snapshot of the market history as seen by an agent
/// at a single decision point. Rows are ordered by time ascending; the last
/// row is the most recent.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub symbols: &'a [Symbol],
    pub fiat: &'a str,
    pub rows: &'a [Row],
}

impl<'a> Observation<'a> {
    pub fn n_assets(&self) -> usize {
        self.symbols.len()
    }

    /// Resolves a possibly-negative "from end" index (`-1` = last row) to an
    /// absolute row index, matching the `index=-1` convention used
    /// throughout the portfolio-vector lookups below.
    fn resolve_index(&self, index: isize) -> OlpsResult<usize> {
        let len = self.rows.len() as isize;
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return Err(AgentError::InvalidObservation(format!(
                "row index {index} out of range for {len} rows"
            ))
            .into());
        }
        Ok(resolved as usize)
    }

    fn row_at(&self, index: isize) -> OlpsResult<&'a Row> {
        Ok(&self.rows[self.resolve_index(index)?])
    }

    /// Total portfolio open-price value (sum of `holding * open` across
    /// non-fiat assets, plus the fiat balance) at `index`.
    fn total_value(&self, index: isize) -> OlpsResult<f64> {
        let row = self.row_at(index)?;
        let mut portval = row.fiat_balance;
        for symbol in self.symbols {
            let bar = row.bars.get(symbol).ok_or_else(|| {
                AgentError::InvalidObservation(format!("missing bar for symbol {symbol}"))
            })?;
            portval += bar.holding * bar.open;
        }
        Ok(portval)
    }

    /// Open prices for `symbol` across the whole window, time ascending.
    pub fn open_series(&self, symbol: &str) -> OlpsResult<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| {
                row.bars
                    .get(symbol)
                    .map(|b| b.open)
                    .ok_or_else(|| {
                        AgentError::InvalidObservation(format!("missing bar for symbol {symbol}"))
                            .into()
                    })
            })
            .collect()
    }
}

/// Computes the realized portfolio vector at an arbitrary row index (negative
/// indices count from the end), grounded in `get_portfolio_vector`.
pub fn portfolio_vector_at(obs: &Observation, index: isize) -> OlpsResult<DVector<f64>> {
    let n = obs.n_assets();
    let portval = obs.total_value(index)?;
    let row = obs.row_at(index)?;
    let mut v = DVector::zeros(n + 1);
    for (i, symbol) in obs.symbols.iter().enumerate() {
        let bar = row.bars.get(symbol).ok_or_else(|| {
            AgentError::InvalidObservation(format!("missing bar for symbol {symbol}"))
        })?;
        v[i] = crate::numeric::safe_div(bar.holding * bar.open, portval);
    }
    v[n] = crate::numeric::safe_div(row.fiat_balance, portval);
    Ok(v)
}

/// The realized portfolio vector at the most recent row.
pub fn portfolio_vector(obs: &Observation) -> OlpsResult<DVector<f64>> {
    portfolio_vector_at(obs, -1)
}

/// Direction of the price-relative vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceRelativeMode {
    /// `x_i = open_i(t) / open_i(t-1)`.
    RatioNowOverPrev,
    /// `x_i = open_i(t-1) / open_i(t)`.
    RatioPrevOverNow,
    /// `x_i = open_i(t-1) / open_i(t) - 1`.
    DiffRatioMinusOne,
    /// `x_i = mean(open_i(t-window..t)) / open_i(t)`, the OLMAR reversion
    /// signal: how far the current price sits below its trailing mean.
    MaOverNow { window: usize },
}

/// Builds the length-`n+1` price-relative vector in the given mode. The
/// fiat slot is `1` for ratio/mean modes and `0` for the diff mode.
pub fn price_relative(obs: &Observation, mode: PriceRelativeMode) -> OlpsResult<DVector<f64>> {
    if let PriceRelativeMode::MaOverNow { window } = mode {
        return ma_over_now(obs, window);
    }

    let n = obs.n_assets();
    let mut x = DVector::zeros(n + 1);
    let now = obs.row_at(-1)?;
    let prev = obs.row_at(-2)?;
    for (i, symbol) in obs.symbols.iter().enumerate() {
        let now_open = now
            .bars
            .get(symbol)
            .ok_or_else(|| AgentError::InvalidObservation(format!("missing bar for {symbol}")))?
            .open;
        let prev_open = prev
            .bars
            .get(symbol)
            .ok_or_else(|| AgentError::InvalidObservation(format!("missing bar for {symbol}")))?
            .open;
        x[i] = match mode {
            PriceRelativeMode::RatioNowOverPrev => {
                crate::numeric::safe_div(now_open, prev_open)
            }
            PriceRelativeMode::RatioPrevOverNow => {
                crate::numeric::safe_div(prev_open, now_open + crate::numeric::EPSILON)
            }
            PriceRelativeMode::DiffRatioMinusOne => {
                crate::numeric::safe_div(prev_open, now_open + crate::numeric::EPSILON) - 1.0
            }
            PriceRelativeMode::MaOverNow { .. } => unreachable!("handled above"),
        };
    }
    x[n] = match mode {
        PriceRelativeMode::DiffRatioMinusOne => 0.0,
        _ => 1.0,
    };
    Ok(x)
}

/// `x_i = mean(open_i[t-window..t-1]) / open_i(t-1)`, per non-fiat asset;
/// fiat slot is `1`.
fn ma_over_now(obs: &Observation, window: usize) -> OlpsResult<DVector<f64>> {
    let n = obs.n_assets();
    let mut x = DVector::zeros(n + 1);
    for (i, symbol) in obs.symbols.iter().enumerate() {
        let open = obs.open_series(symbol)?;
        let last = *open
            .last()
            .ok_or_else(|| AgentError::InvalidObservation(format!("empty open series for {symbol}")))?;
        let len = open.len();
        let lookback_end = len.saturating_sub(1);
        let lookback_start = lookback_end.saturating_sub(window).min(lookback_end);
        let window_slice = &open[lookback_start..lookback_end];
        let mean = if window_slice.is_empty() {
            last
        } else {
            window_slice.iter().sum::<f64>() / window_slice.len() as f64
        };
        x[i] = crate::numeric::safe_div(mean, last + crate::numeric::EPSILON);
    }
    x[n] = 1.0;
    Ok(x)
}

/// Moving-average kind used by indicator-driven agents; implemented here
/// since no external indicator library is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaKind {
    Simple,
    Exponential,
    Kama,
}

/// Computes the full moving-average series for `kind`/`window`, one value
/// per input sample (shrinking window at the start rather than padding with
/// `NaN`, since agents read only the tail of the series).
pub fn moving_average_series(series: &[f64], kind: MaKind, window: usize) -> Vec<f64> {
    match kind {
        MaKind::Simple => sma_series(series, window),
        MaKind::Exponential => ema_series(series, window),
        MaKind::Kama => kama_series(series, window),
    }
}

fn sma_series(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    series
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let start = i.saturating_sub(window - 1);
            let slice = &series[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

fn ema_series(series: &[f64], window: usize) -> Vec<f64> {
    let alpha = 2.0 / (window.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(series.len());
    let mut prev = None;
    for &x in series {
        let y = match prev {
            None => x,
            Some(p) => alpha * x + (1.0 - alpha) * p,
        };
        out.push(y);
        prev = Some(y);
    }
    out
}

/// Kaufman's Adaptive Moving Average with the conventional fast/slow
/// smoothing constants (2-period fast, 30-period slow), `window` being the
/// efficiency-ratio lookback (talib's `timeperiod` convention).
fn kama_series(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let fast_sc = 2.0 / (2.0 + 1.0);
    let slow_sc = 2.0 / (30.0 + 1.0);
    let mut out = vec![0.0; series.len()];
    if series.is_empty() {
        return out;
    }
    out[0] = series[0];
    for i in 1..series.len() {
        if i < window {
            out[i] = series[i];
            continue;
        }
        let change = (series[i] - series[i - window]).abs();
        let volatility: f64 = (i - window + 1..=i)
            .map(|k| (series[k] - series[k - 1]).abs())
            .sum();
        let er = crate::numeric::safe_div(change, volatility);
        let sc = (er * (fast_sc - slow_sc) + slow_sc).powi(2);
        out[i] = out[i - 1] + sc * (series[i] - out[i - 1]);
    }
    out
}

/// Sample standard deviation (`ddof = 1`) of the last `window` samples.
pub fn trailing_stddev(series: &[f64], window: usize) -> f64 {
    let window = window.min(series.len()).max(1);
    let slice = &series[series.len() - window..];
    if slice.len() < 2 {
        return 0.0;
    }
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let var = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (slice.len() as f64 - 1.0);
    var.sqrt()
}

/// Centered rolling standard deviation at the last index, `min_periods = 1`,
/// matching pandas' `rolling(window, center=True, min_periods=1).std()`
/// read via `.iat[-1]` (used by `FactorTrader`). Centered windows can't
/// include future samples at the tail, so this degrades to a trailing
/// window there, mirroring pandas' own edge behavior.
pub fn centered_rolling_stddev_last(series: &[f64], window: usize) -> f64 {
    let n = series.len();
    if n == 0 {
        return 0.0;
    }
    let half = window / 2;
    let start = n.saturating_sub(1).saturating_sub(half).max(0);
    let slice = &series[start..n];
    if slice.len() < 2 {
        return 0.0;
    }
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let var = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (slice.len() as f64 - 1.0);
    var.sqrt()
}

/// Indices of local extremes: a point that is strictly greater (or less)
/// than all neighbors within `order` samples on both sides. The final
/// sample is always appended, mirroring `scipy.signal.argrelextrema` plus
/// `HarmonicTrader`'s own `obs.shape[0] - 1` tack-on.
pub fn local_extremes(series: &[f64], order: usize, greater: bool) -> Vec<usize> {
    let n = series.len();
    let mut out = Vec::new();
    if n == 0 {
        return out;
    }
    let order = order.max(1);
    for i in 0..n {
        let lo = i.saturating_sub(order);
        let hi = (i + order).min(n - 1);
        if lo == hi {
            continue;
        }
        let is_extreme = (lo..=hi).all(|j| {
            j == i
                || if greater {
                    series[i] > series[j]
                } else {
                    series[i] < series[j]
                }
        });
        if is_extreme {
            out.push(i);
        }
    }
    let last = n - 1;
    if out.last() != Some(&last) {
        out.push(last);
    }
    out
}

/// Merges local maxima and minima into one ascending, deduplicated list of
/// indices, with the series' final index always included.
pub fn combined_extremes(series: &[f64], order: usize) -> Vec<usize> {
    let mut all: Vec<usize> = local_extremes(series, order, true);
    all.extend(local_extremes(series, order, false));
    all.sort_unstable();
    all.dedup();
    all
}

/// Natural-log returns between consecutive samples: `ln(x[i] / x[i-1])`.
pub fn log_returns(series: &[f64]) -> Vec<f64> {
    series
        .windows(2)
        .map(|w| crate::numeric::safe_div(w[1], w[0]).ln())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_asset_history() -> MarketHistory {
        let opens = [100.0, 101.0, 102.0, 103.0];
        let mut rows = Vec::new();
        for &open in &opens {
            let mut bars = BTreeMap::new();
            bars.insert(
                "BTC".to_string(),
                Bar { open, close: open, holding: 1.0 },
            );
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn portfolio_vector_reflects_drifting_weights() {
        let hist = two_asset_history();
        let obs = hist.full_observation();
        let v = portfolio_vector(&obs).unwrap();
        // holding*open = 103, fiat balance = 100 -> weights 103/203, 100/203
        assert!((v[0] - 103.0 / 203.0).abs() < 1e-9);
        assert!((v[1] - 100.0 / 203.0).abs() < 1e-9);
        assert!((v.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn price_relative_ratio_now_over_prev() {
        let hist = two_asset_history();
        let obs = hist.full_observation();
        let x = price_relative(&obs, PriceRelativeMode::RatioNowOverPrev).unwrap();
        assert!((x[0] - 103.0 / 102.0).abs() < 1e-9);
        assert_eq!(x[1], 1.0);
    }

    #[test]
    fn price_relative_reciprocal() {
        let hist = two_asset_history();
        let obs = hist.full_observation();
        let x = price_relative(&obs, PriceRelativeMode::RatioPrevOverNow).unwrap();
        assert!((x[0] - 102.0 / 103.0).abs() < 1e-6);
    }

    #[test]
    fn moving_average_constant_series_is_constant() {
        let series = vec![5.0; 10];
        let sma = moving_average_series(&series, MaKind::Simple, 3);
        assert!(sma.iter().all(|&v| (v - 5.0).abs() < 1e-9));
        let ema = moving_average_series(&series, MaKind::Exponential, 3);
        assert!(ema.iter().all(|&v| (v - 5.0).abs() < 1e-9));
    }

    #[test]
    fn local_extremes_always_includes_last_point() {
        let series = [1.0, 3.0, 1.0, 4.0, 2.0];
        let idx = combined_extremes(&series, 1);
        assert_eq!(*idx.last().unwrap(), series.len() - 1);
    }

    #[test]
    fn log_returns_of_constant_series_is_zero() {
        let series = vec![10.0, 10.0, 10.0];
        let r = log_returns(&series);
        assert!(r.iter().all(|&v| v.abs() < 1e-12));
    }
}
