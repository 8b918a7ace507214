//! Hyperparameter search driver: evaluates a grid of parameter
//! combinations in parallel and keeps the best-scoring one. Grounded in
//! `APrioriAgent.fit`/`FactorTrader.fit` from
//! `cryptotrader/agents/apriori.py`, generalized from its `optunity`-based
//! Bayesian search to an exhaustive grid since no pure-Rust Bayesian
//! optimizer is available.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::agent::{Agent, GridAxis, ParamMap, SearchSpace};
use crate::env::Environment;
use crate::eval::{EvaluationConfig, evaluate};
use crate::error::{AgentError, OlpsResult};

/// Score assigned to a parameter combination that violates a constraint,
/// steep enough that it never wins against a feasible combination under
/// realistic reward scales.
pub const CONSTRAINT_VIOLATION_SCORE: f64 = -100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// One evaluated point in the search: the parameters tried and the score
/// they earned.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub params: ParamMap,
    pub score: f64,
}

/// A constraint predicate over a candidate parameter map; returns `true`
/// when the combination is feasible.
pub type Constraint = Arc<dyn Fn(&ParamMap) -> bool + Send + Sync>;

pub struct SearchDriver {
    space: SearchSpace,
    constraints: Vec<Constraint>,
    state: SearchState,
    cancel: Arc<AtomicBool>,
}

impl SearchDriver {
    pub fn new(space: SearchSpace) -> Self {
        Self { space, constraints: Vec::new(), state: SearchState::Idle, cancel: Arc::new(AtomicBool::new(false)) }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// A handle that, when set, cancels the in-flight run after its current
    /// batch of in-flight evaluations completes.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_feasible(&self, params: &ParamMap) -> bool {
        self.constraints.iter().all(|c| c(params))
    }

    /// Evaluates every grid point, building a fresh agent and a fresh
    /// environment per point via the supplied factories so that parallel
    /// workers never share mutable state.
    pub fn run<A, E>(
        &mut self,
        make_agent: impl Fn(&ParamMap) -> OlpsResult<A> + Sync,
        make_env: impl Fn() -> E + Sync,
        config: &EvaluationConfig,
    ) -> OlpsResult<(SearchState, Option<SearchResult>)>
    where
        A: Agent,
        E: Environment,
    {
        self.state = SearchState::Running;
        self.cancel.store(false, Ordering::SeqCst);

        let grid = self.space.grid();
        let bar = progress_bar(grid.len() as u64)?;
        let cancel = Arc::clone(&self.cancel);
        let constraints = self.constraints.clone();
        let is_feasible = move |params: &ParamMap| constraints.iter().all(|c| c(params));

        let results: Vec<SearchResult> = grid
            .into_par_iter()
            .map_init(
                || (),
                |(), params| {
                    if cancel.load(Ordering::SeqCst) {
                        return None;
                    }
                    let result = if !is_feasible(&params) {
                        SearchResult { params, score: CONSTRAINT_VIOLATION_SCORE }
                    } else {
                        let mut agent = match make_agent(&params) {
                            Ok(a) => a,
                            Err(_) => {
                                bar.inc(1);
                                return Some(SearchResult { params, score: CONSTRAINT_VIOLATION_SCORE });
                            }
                        };
                        if agent.set_params(&params).is_err() {
                            bar.inc(1);
                            return Some(SearchResult { params, score: CONSTRAINT_VIOLATION_SCORE });
                        }
                        let mut env = make_env();
                        let score = evaluate(&mut agent, None, &mut env, config)
                            .map(|r| r.total_reward)
                            .unwrap_or(CONSTRAINT_VIOLATION_SCORE);
                        SearchResult { params, score }
                    };
                    bar.inc(1);
                    Some(result)
                },
            )
            .flatten()
            .collect();
        bar.finish_and_clear();

        let cancelled = self.cancel.load(Ordering::SeqCst);
        self.state = if cancelled { SearchState::Cancelled } else { SearchState::Completed };

        let best = results.into_iter().max_by_key(|r| OrderedFloat(r.score));
        Ok((self.state, best))
    }
}

fn progress_bar(capacity: u64) -> OlpsResult<ProgressBar> {
    let bar = ProgressBar::new(capacity);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise})")
            .map_err(AgentError::ProgressBar)?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

/// Builds the per-factor `<name>_weight` axes `FactorTrader::fit` adds on
/// top of its base search space.
pub fn factor_weight_axes(factor_names: &[&str]) -> OlpsResult<Vec<GridAxis>> {
    factor_names
        .iter()
        .map(|name| GridAxis::new(format!("{name}_weight"), "0.00001", "1", "0.1"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::constant_rebalance::ConstantRebalance;
    use crate::env::ReplayEnvironment;
    use crate::observation::{Bar, MarketHistory, Row};
    use std::collections::BTreeMap;

    fn history() -> MarketHistory {
        let mut rows = Vec::new();
        for open in [100.0, 101.0, 102.0, 103.0, 104.0] {
            let mut bars = BTreeMap::new();
            bars.insert("BTC".to_string(), Bar { open, close: open, holding: 0.0 });
            rows.push(Row { bars, fiat_balance: 100.0 });
        }
        MarketHistory::new(vec!["BTC".to_string()], "USDT".to_string(), rows)
    }

    #[test]
    fn violated_constraint_gets_the_penalty_score() {
        let mut space = SearchSpace::default();
        space.push(GridAxis::new("BTC", "0.0", "1.0", "0.5").unwrap());
        let mut driver = SearchDriver::new(space)
            .with_constraint(Arc::new(|_: &ParamMap| false));
        let (state, best) = driver
            .run(
                |_| Ok(ConstantRebalance::new()),
                || ReplayEnvironment::new(history(), 60, 2),
                &EvaluationConfig::default(),
            )
            .unwrap();
        assert_eq!(state, SearchState::Completed);
        assert_eq!(best.unwrap().score, CONSTRAINT_VIOLATION_SCORE);
    }

    #[test]
    fn feasible_grid_runs_to_completion() {
        let mut space = SearchSpace::default();
        space.push(GridAxis::new("BTC", "0.0", "1.0", "0.5").unwrap());
        let mut driver = SearchDriver::new(space);
        let (state, best) = driver
            .run(
                |_| Ok(ConstantRebalance::new()),
                || ReplayEnvironment::new(history(), 60, 2),
                &EvaluationConfig::default(),
            )
            .unwrap();
        assert_eq!(state, SearchState::Completed);
        assert!(best.is_some());
    }
}
