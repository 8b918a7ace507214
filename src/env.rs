//! The environment contract an [`crate::agent::Agent`] is evaluated
//! against, plus a minimal replay implementation over a [`MarketHistory`]
//! for tests and offline evaluation. A live exchange connector is an
//! external collaborator, not something this crate provides.

use std::collections::BTreeMap;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{EnvError, OlpsResult};
use crate::observation::{MarketHistory, Observation, portfolio_vector};

/// Outcome of stepping the environment forward by one period.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub reward: f64,
    pub status: EnvStatus,
}

/// Episode status flags surfaced to the evaluation loop and search driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvStatus {
    /// Out of historical data: no further steps are possible.
    pub ood: bool,
    /// The environment raised an error this step that callers should treat
    /// as episode-terminating rather than fatal.
    pub errored: bool,
    /// The requested rebalance only partially executed (e.g. a partial
    /// fill at the exchange boundary). A replay environment never sets
    /// this; a live connector does when its last fill didn't fully reach
    /// the requested portfolio.
    pub incomplete: bool,
}

/// The contract a backtest or live-trading driver steps through.
pub trait Environment {
    fn reset(&mut self) -> OlpsResult<Observation<'_>>;
    fn reset_status(&mut self);
    fn step(&mut self, action: &DVector<f64>) -> OlpsResult<StepOutcome>;
    fn get_observation(&self) -> Observation<'_>;

    fn fiat(&self) -> &str;
    fn period(&self) -> u64;
    fn data_length(&self) -> usize;
    fn obs_steps(&self) -> usize;
    fn timestamp(&self) -> usize;
    fn pairs(&self) -> &[String];
    fn symbols(&self) -> &[String];
    fn training(&self) -> bool;
    fn set_training(&mut self, training: bool);
    fn status(&self) -> EnvStatus;

    /// Total portfolio value at the current timestamp, in fiat units.
    fn calc_total_portval(&self) -> OlpsResult<f64>;

    /// Best constant-rebalanced portfolio in hindsight over the episode so
    /// far, used as a performance benchmark.
    fn optimize_benchmark(&self) -> OlpsResult<DVector<f64>>;

    /// Notifies an operator of an episode-ending condition. A no-op unless
    /// overridden; richer delivery is wired up through [`crate::live::EmailSink`].
    fn send_email(&self, _subject: &str, _body: &str) {}

    fn parse_error(&self, err: &EnvError) -> EnvStatus {
        match err {
            EnvError::OutOfData => EnvStatus { ood: true, ..EnvStatus::default() },
            EnvError::EnvironmentError(_) => EnvStatus { errored: true, ..EnvStatus::default() },
        }
    }
}

/// One logged decision: the portfolio vector an agent produced and the
/// realized reward for the period it covered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: usize,
    pub portfolio: Vec<f64>,
    pub reward: f64,
}

/// A replay environment stepping through a fixed, already-recorded
/// [`MarketHistory`]. Not a production backtest engine, since it ignores
/// slippage and order-book depth, but enough to drive the evaluation loop
/// and tests end to end.
pub struct ReplayEnvironment {
    history: MarketHistory,
    period: u64,
    obs_steps: usize,
    cursor: usize,
    training: bool,
    status: EnvStatus,
    pub portfolio_df: Vec<DecisionRecord>,
    pub action_df: Vec<Vec<f64>>,
}

impl ReplayEnvironment {
    pub fn new(history: MarketHistory, period: u64, obs_steps: usize) -> Self {
        Self {
            history,
            period,
            obs_steps,
            cursor: obs_steps.saturating_sub(1),
            training: false,
            status: EnvStatus::default(),
            portfolio_df: Vec::new(),
            action_df: Vec::new(),
        }
    }
}

impl Environment for ReplayEnvironment {
    fn reset(&mut self) -> OlpsResult<Observation<'_>> {
        self.cursor = self.obs_steps.saturating_sub(1);
        self.status = EnvStatus::default();
        self.portfolio_df.clear();
        self.action_df.clear();
        Ok(self.history.observation_at(self.cursor))
    }

    fn reset_status(&mut self) {
        self.status = EnvStatus::default();
    }

    fn step(&mut self, action: &DVector<f64>) -> OlpsResult<StepOutcome> {
        if self.cursor + 1 >= self.history.rows().len() {
            self.status = EnvStatus { ood: true, ..EnvStatus::default() };
            return Err(EnvError::OutOfData.into());
        }
        let portval_before = self.calc_total_portval()?;
        self.cursor += 1;
        let portval_after = self.calc_total_portval()?;
        let reward = crate::numeric::safe_div(portval_after, portval_before).ln();

        self.action_df.push(action.iter().copied().collect());
        self.portfolio_df.push(DecisionRecord {
            timestamp: self.cursor,
            portfolio: action.iter().copied().collect(),
            reward,
        });

        Ok(StepOutcome { reward, status: self.status })
    }

    fn get_observation(&self) -> Observation<'_> {
        self.history.observation_at(self.cursor)
    }

    fn fiat(&self) -> &str {
        self.history.fiat()
    }

    fn period(&self) -> u64 {
        self.period
    }

    fn data_length(&self) -> usize {
        self.history.rows().len()
    }

    fn obs_steps(&self) -> usize {
        self.obs_steps
    }

    fn timestamp(&self) -> usize {
        self.cursor
    }

    fn pairs(&self) -> &[String] {
        self.history.symbols()
    }

    fn symbols(&self) -> &[String] {
        self.history.symbols()
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn status(&self) -> EnvStatus {
        self.status
    }

    fn calc_total_portval(&self) -> OlpsResult<f64> {
        let obs = self.history.observation_at(self.cursor);
        let row = &self.history.rows()[self.cursor];
        let mut total = row.fiat_balance;
        for symbol in obs.symbols {
            if let Some(bar) = row.bars.get(symbol) {
                total += bar.holding * bar.open;
            }
        }
        Ok(total)
    }

    fn optimize_benchmark(&self) -> OlpsResult<DVector<f64>> {
        portfolio_vector(&self.history.observation_at(self.cursor))
    }
}

/// Structured per-step decision context an agent can log
/// (`Agent::log`'s consumer on the driver side).
pub fn merge_log(step: u64, extra: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::from([("step".to_string(), step.to_string())]);
    merged.extend(extra);
    merged
}
