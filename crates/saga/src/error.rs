use std::time::Duration;

use thiserror::Error;

use crate::steps::StepKind;

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The request itself is malformed; repeating it cannot succeed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("user `{0}` is not connected")]
    NotConnected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("attempt did not finish within {0:?}")]
    Timeout(Duration),
}

impl StepError {
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidPayload(_))
    }
}

/// Terminal failure of a step, recorded as the saga's failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("{step} step failed on attempt {attempt} with a non-retryable error: {error}")]
    NonRetryable { step: StepKind, attempt: u32, error: StepError },
    #[error("{step} step gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { step: StepKind, attempts: u32, last_error: String },
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("robot_id is required")]
    MissingRobotId,
    #[error("workflow `{workflow_id}` is already running as run `{run_id}`")]
    AlreadyRunning { workflow_id: String, run_id: String },
    #[error("saga engine unavailable: {0:#}")]
    EngineUnavailable(anyhow::Error),
}
