//! Dummy trader sampling uniform random actions, used as a baseline.
//! Grounded in `RandomWalk` from `cryptotrader/agents/apriori.py`.

use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::agent::{Agent, ParamMap};
use crate::error::OlpsResult;
use crate::numeric::Activation;
use crate::observation::Observation;

#[derive(Debug, Clone)]
pub struct RandomWalk {
    activation: Activation,
    step: u64,
}

impl RandomWalk {
    pub fn new(activation: Activation) -> Self {
        tracing::debug!("constructed RandomWalk agent");
        Self { activation, step: 0 }
    }
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self::new(Activation::default())
    }
}

impl Agent for RandomWalk {
    fn identifier(&self) -> &'static str {
        "RandomWalk"
    }

    fn rebalance(&mut self, obs: &Observation) -> OlpsResult<DVector<f64>> {
        // No first-step special case: a random walk has nothing to condition
        // on at any step, so it samples uniformly from the very first one.
        let mut rng = rand::rng();
        let n = obs.n_assets() + 1;
        let unit = Uniform::new(0.0, 1.0).expect("bounds are a valid range");
        let raw = DVector::from_fn(n, |_, _| unit.sample(&mut rng));
        self.activation.apply(&raw)
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
