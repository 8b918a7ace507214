//! The evaluation loop: drives an [`Agent`] against an [`Environment`] for
//! one episode and accumulates the statistics the search driver scores
//! against. Grounded in `APrioriAgent.test` from
//! `cryptotrader/agents/apriori.py`.

use tracing::{debug, warn};

use crate::agent::Agent;
use crate::env::Environment;
use crate::error::OlpsResult;

/// Optional warmup policy run before the agent under test takes over,
/// mirroring `test`'s `nb_max_start_steps`/`start_step_policy` parameters.
pub struct EvaluationConfig {
    pub warmup_steps: usize,
    pub max_episode_steps: Option<usize>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { warmup_steps: 0, max_episode_steps: None }
    }
}

impl EvaluationConfig {
    pub fn with_warmup_steps(mut self, steps: usize) -> Self {
        self.warmup_steps = steps;
        self
    }

    pub fn with_max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }
}

/// Episode-level statistics the search driver's score function consumes.
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub total_reward: f64,
    pub steps: usize,
    pub portval_std: f64,
}

/// Runs `agent` against `env` for one episode under `config`.
pub fn evaluate(
    agent: &mut dyn Agent,
    warmup: Option<&mut dyn Agent>,
    env: &mut dyn Environment,
    config: &EvaluationConfig,
) -> OlpsResult<EvaluationReport> {
    env.reset_status();
    env.reset()?;

    if let Some(warmup_agent) = warmup {
        for _ in 0..config.warmup_steps {
            let obs = env.get_observation();
            let action = warmup_agent.rebalance(&obs)?;
            match env.step(&action) {
                Ok(outcome) if outcome.status.ood => {
                    debug!("evaluation loop ran out of data during warmup");
                    return Ok(EvaluationReport::default());
                }
                Ok(_) => warmup_agent.advance_step(),
                Err(err) => {
                    warn!(error = %err, "evaluation loop warmup step errored, aborting episode");
                    return Ok(EvaluationReport::default());
                }
            }
        }
    }

    let max_steps = config.max_episode_steps.unwrap_or_else(|| env.data_length());
    let mut total_reward = 0.0;
    let mut rewards = Vec::new();
    let mut steps = 0;

    while steps < max_steps {
        let obs = env.get_observation();
        let action = agent.rebalance(&obs)?;
        match env.step(&action) {
            Ok(outcome) => {
                total_reward += outcome.reward;
                rewards.push(outcome.reward);
                agent.advance_step();
                steps += 1;
                if outcome.status.ood {
                    debug!(steps, "evaluation loop terminated: out of historical data");
                    break;
                }
            }
            Err(err) => {
                warn!(steps, error = %err, "evaluation loop terminated on environment error");
                break;
            }
        }
    }
    if steps == max_steps {
        debug!(steps, "evaluation loop terminated: step cap reached");
    }

    let portval_std = if rewards.len() > 1 {
        let mean = rewards.iter().sum::<f64>() / rewards.len() as f64;
        (rewards.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rewards.len() as f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    Ok(EvaluationReport { total_reward, steps, portval_std })
}
