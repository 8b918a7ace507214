//! The agent contract and the hyperparameter grid machinery shared by every
//! concrete agent, generalized from discrete trade actions to continuous
//! portfolio vectors.

pub mod anticor;
pub mod buy_and_hold;
pub mod constant_rebalance;
pub mod cwmr;
pub mod factor;
pub mod harmonic;
pub mod momentum;
pub mod olmar;
pub mod ons;
pub mod pamr;
pub mod random_walk;
pub mod stmr;
pub mod tco;

use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::error::{AgentError, OlpsResult};
use crate::observation::Observation;

/// A single hyperparameter value, tagged rather than stringly-typed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// The parameter bag exchanged between the search driver and `Agent::set_params`.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Typed accessors over a [`ParamMap`], each returning
/// `AgentError::InvalidParameter` on a missing key or a type mismatch rather
/// than panicking, since parameter maps arrive from the search driver and
/// may be malformed.
pub trait ParamMapExt {
    fn get_f64(&self, key: &str) -> OlpsResult<f64>;
    fn get_i64(&self, key: &str) -> OlpsResult<i64>;
    fn get_str(&self, key: &str) -> OlpsResult<&str>;
    fn get_bool(&self, key: &str) -> OlpsResult<bool>;
}

impl ParamMapExt for ParamMap {
    fn get_f64(&self, key: &str) -> OlpsResult<f64> {
        match self.get(key) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "expected a float".to_string(),
            }
            .into()),
            None => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "missing".to_string(),
            }
            .into()),
        }
    }

    fn get_i64(&self, key: &str) -> OlpsResult<i64> {
        match self.get(key) {
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(_) => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "expected an int".to_string(),
            }
            .into()),
            None => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "missing".to_string(),
            }
            .into()),
        }
    }

    fn get_str(&self, key: &str) -> OlpsResult<&str> {
        match self.get(key) {
            Some(ParamValue::Str(v)) => Ok(v.as_str()),
            Some(_) => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "expected a string".to_string(),
            }
            .into()),
            None => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "missing".to_string(),
            }
            .into()),
        }
    }

    fn get_bool(&self, key: &str) -> OlpsResult<bool> {
        match self.get(key) {
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(_) => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "expected a bool".to_string(),
            }
            .into()),
            None => Err(AgentError::InvalidParameter {
                name: key.to_string(),
                reason: "missing".to_string(),
            }
            .into()),
        }
    }
}

/// The shared agent contract every concrete strategy implements.
///
/// The step counter is read-only from the agent's perspective: the driver
/// that owns the evaluation loop increments it via [`Agent::advance_step`],
/// so an agent can distinguish its first decision (where it has no history
/// to react to) from later ones without tracking the bookkeeping itself.
pub trait Agent: Send {
    /// Short, stable name used in logs and leaderboards.
    fn identifier(&self) -> &'static str;

    /// Raw, pre-projection directional signal for diagnostics: not
    /// guaranteed to lie on the simplex. Most agents fold this straight
    /// into their [`Agent::rebalance`] step and have no separate signal
    /// worth exposing, so the default returns an empty vector.
    fn predict(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        let _ = obs;
        Ok(DVector::zeros(0))
    }

    /// Produces the next portfolio vector `b` given the current
    /// observation, with `b` always a point on the simplex (non-negative,
    /// sums to one). This is the decision a driver actually commits.
    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>>;

    /// Overwrites hyperparameters from a search-driver-supplied map.
    fn set_params(&mut self, params: &ParamMap) -> OlpsResult<()>;

    /// Current step count, as last set by [`Agent::advance_step`].
    fn step(&self) -> u64;

    /// Advances the step counter. Owned by the evaluation loop, not the
    /// agent, so a single driver can keep several agents' counters in sync.
    fn advance_step(&mut self);

    /// A structured snapshot of the agent's decision-relevant state for
    /// this step, used by the evaluation loop's logging.
    fn log(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("step".to_string(), self.step().to_string())])
    }
}

/// Shared first-step policy: every agent starts uniformly split across the
/// non-fiat assets with zero fiat, `(1/n, ..., 1/n, 0)`, since it has no
/// realized price history to react to yet.
pub fn first_step_portfolio(n_assets: usize) -> DVector<f64> {
    let mut v = DVector::zeros(n_assets + 1);
    if n_assets > 0 {
        let uniform = 1.0 / n_assets as f64;
        for i in 0..n_assets {
            v[i] = uniform;
        }
    }
    v
}

/// One axis of a nested hyperparameter grid: a string-parsed
/// `start..=end` range walked in `step` increments, with the decimal
/// precision inferred from the step's own string representation so that
/// `0.1 + 0.1 + 0.1` reports as `0.3`, not `0.30000000000000004`.
#[derive(Debug, Clone)]
pub struct GridAxis {
    pub name: String,
    start: f64,
    end: f64,
    step: f64,
    precision: usize,
}

impl GridAxis {
    pub fn new(name: impl Into<String>, start: &str, end: &str, step: &str) -> OlpsResult<Self> {
        let parse = |s: &str, field: &str| -> OlpsResult<f64> {
            s.parse::<f64>().map_err(|_| {
                AgentError::InvalidParameter {
                    name: field.to_string(),
                    reason: format!("'{s}' is not a valid number"),
                }
                .into()
            })
        };
        let start_v = parse(start, "start")?;
        let end_v = parse(end, "end")?;
        let step_v = parse(step, "step")?;
        if step_v <= 0.0 {
            return Err(AgentError::InvalidParameter {
                name: "step".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        let precision = step
            .split_once('.')
            .map(|(_, frac)| frac.trim_end_matches('0').len())
            .unwrap_or(0);
        Ok(Self { name: name.into(), start: start_v, end: end_v, step: step_v, precision })
    }

    /// All values on this axis, rounded to the step's inferred precision.
    pub fn values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let scale = 10f64.powi(self.precision as i32);
        let mut v = self.start;
        let mut guard = 0;
        while v <= self.end + 1e-9 && guard < 1_000_000 {
            out.push((v * scale).round() / scale);
            v += self.step;
            guard += 1;
        }
        out
    }
}

/// A full grid over possibly many axes, evaluated as their cartesian
/// product by the search driver.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    pub axes: Vec<GridAxis>,
}

impl SearchSpace {
    pub fn new(axes: Vec<GridAxis>) -> Self {
        Self { axes }
    }

    pub fn push(&mut self, axis: GridAxis) {
        self.axes.push(axis);
    }

    /// Cartesian product of every axis's values, each combination expressed
    /// as a [`ParamMap`].
    pub fn grid(&self) -> Vec<ParamMap> {
        let mut combos: Vec<ParamMap> = vec![ParamMap::new()];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(combos.len() * axis.values().len());
            for combo in &combos {
                for value in axis.values() {
                    let mut extended = combo.clone();
                    extended.insert(axis.name.clone(), ParamValue::Float(value));
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }
}
