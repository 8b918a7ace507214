//! The live-trading loop boundary: sleeps until the next bar boundary,
//! asks the agent for a decision, retries transient transport failures, and
//! persists the portfolio/action history to disk. Grounded in
//! `APrioriAgent.trade` from `cryptotrader/agents/apriori.py`; the actual
//! exchange connector is an external collaborator this crate only defines
//! the seam for.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::env::Environment;
use crate::error::{LiveLoopError, OlpsError, OlpsResult};

/// The start of the bar that contains `now`, per `period_seconds`.
fn floor_to_bar_boundary(now: DateTime<Utc>, period_seconds: u64) -> DateTime<Utc> {
    let period = period_seconds.max(1) as i64;
    let floored = (now.timestamp() / period) * period;
    DateTime::from_timestamp(floored, 0).unwrap_or(now)
}

/// How long to sleep from `now` until the next bar boundary, plus a small
/// random jitter so a fleet of agents doesn't hammer the exchange in lockstep.
fn sleep_until_next_boundary(now: DateTime<Utc>, period_seconds: u64) -> Duration {
    let period = period_seconds.max(1);
    let current_boundary = floor_to_bar_boundary(now, period);
    let next_boundary = current_boundary + chrono::Duration::seconds(period as i64);
    let jitter = rand::rng().random_range(0..=2_000);
    let wait = (next_boundary - now).num_milliseconds().max(0) as u64 + jitter;
    Duration::from_millis(wait)
}

/// A sink for operator notifications on episode-ending conditions. Default
/// implementation logs and otherwise does nothing; wiring up email/SMS/chat
/// delivery is left to the embedding application.
pub trait EmailSink: Send + Sync {
    fn notify(&self, subject: &str, body: &str) {
        info!(subject, body, "live loop notification");
    }
}

#[derive(Debug, Default)]
pub struct NoopEmailSink;
impl EmailSink for NoopEmailSink {}

#[derive(Debug, Clone)]
pub struct LiveLoopConfig {
    pub period_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub output_dir: PathBuf,
    pub agent_name: String,
    pub init_time: u64,
    /// Reserved for a future per-call exchange request deadline; the
    /// current retry loop bounds attempts by count, not wall-clock time.
    pub timeout: Duration,
}

impl LiveLoopConfig {
    pub fn new(agent_name: impl Into<String>, period_seconds: u64, output_dir: impl Into<PathBuf>, init_time: u64) -> Self {
        Self {
            period_seconds,
            max_retries: 5,
            retry_backoff: Duration::from_secs(5),
            output_dir: output_dir.into(),
            agent_name: agent_name.into(),
            init_time,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn portfolio_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}_portfolio_df_{}min_{}.json",
            self.agent_name,
            self.period_seconds / 60,
            self.init_time
        ))
    }

    pub fn action_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}_action_df_{}min_{}.json",
            self.agent_name,
            self.period_seconds / 60,
            self.init_time
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
struct LoggedStep {
    timestamp: u64,
    portfolio: Vec<f64>,
    reward: f64,
    log: std::collections::BTreeMap<String, String>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> OlpsResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| LiveLoopError::RetryExhausted(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| LiveLoopError::RetryExhausted(e.to_string()).into())
}

/// Runs the live trading loop until `cancel` is set. Retries a failed
/// environment step up to `config.max_retries` times with a fixed backoff
/// before giving up and returning [`LiveLoopError::RetryExhausted`].
pub async fn run(
    agent: &mut dyn Agent,
    env: &mut dyn Environment,
    email: &dyn EmailSink,
    config: &LiveLoopConfig,
    mut cancel: watch::Receiver<bool>,
) -> OlpsResult<()> {
    env.reset_status();
    env.reset()?;

    let mut history = Vec::new();
    let mut actions = Vec::new();
    let mut timestamp: u64 = 0;

    loop {
        if *cancel.borrow() {
            info!("live loop cancelled by operator");
            return Err(LiveLoopError::Cancelled.into());
        }

        let mut attempt = 0;
        let outcome = loop {
            let obs = env.get_observation();
            let action = agent.rebalance(&obs)?;
            match env.step(&action) {
                Ok(outcome) => break Ok((action, outcome)),
                Err(err) if attempt < config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "live loop step failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(config.retry_backoff) => {}
                        _ = cancel.changed() => {
                            if *cancel.borrow() {
                                break Err(OlpsError::from(LiveLoopError::Cancelled));
                            }
                        }
                    }
                }
                Err(err) => {
                    break Err(LiveLoopError::RetryExhausted(err.to_string()).into());
                }
            }
        };

        let (action, outcome) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                email.notify("live loop stopped", &err.to_string());
                write_json(&config.portfolio_path(), &history)?;
                write_json(&config.action_path(), &actions)?;
                return Err(err);
            }
        };

        agent.advance_step();
        timestamp += 1;
        actions.push(action.iter().copied().collect::<Vec<f64>>());

        let mut log = agent.log();
        if outcome.status.incomplete {
            log.insert("Trade_incomplete".to_string(), "true".to_string());
            warn!(timestamp, "trade only partially completed this bar");
        }
        history.push(LoggedStep { timestamp, portfolio: action.iter().copied().collect(), reward: outcome.reward, log });

        if outcome.status.ood {
            email.notify("live loop out of data", "environment ran out of historical data");
            write_json(&config.portfolio_path(), &history)?;
            write_json(&config.action_path(), &actions)?;
            return Ok(());
        }

        let wait = sleep_until_next_boundary(Utc::now(), config.period_seconds);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.changed() => {}
        }
    }
}
