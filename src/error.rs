use thiserror::Error;

/// Crate-wide result alias, mirroring the one error type per concern convention
/// used throughout this codebase.
pub type OlpsResult<T> = Result<T, OlpsError>;

#[derive(Debug, Error)]
pub enum OlpsError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    LiveLoop(#[from] LiveLoopError),
}

/// Errors raised while an agent validates parameters or observes market data.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("invalid search progress bar template")]
    ProgressBar(#[from] indicatif::style::TemplateError),
}

/// Errors raised by the numeric core (projections, QP solves, matrix algebra).
#[derive(Debug, Error)]
pub enum NumericError {
    #[error("invalid input to {op}: {reason}")]
    InvalidInput { op: String, reason: String },

    #[error("QP solver failed to converge: {0}")]
    SolverFailure(String),

    #[error("matrix became singular during {op}")]
    SingularMatrix { op: String },
}

/// Errors surfaced by the environment contract.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment ran out of historical data")]
    OutOfData,

    #[error("environment error: {0}")]
    EnvironmentError(String),
}

/// Errors specific to the live trading loop boundary.
#[derive(Debug, Error)]
pub enum LiveLoopError {
    #[error("retry budget exhausted talking to the exchange: {0}")]
    RetryExhausted(String),

    #[error("cancelled by operator interrupt")]
    Cancelled,
}
