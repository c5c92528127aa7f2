//! Crate-level error aggregation (§7): every component owns its own
//! `thiserror` enum; `EngineError` composes them via `#[from]` for the
//! Orchestrator's public `Result<DebateOutcome, EngineError>`.

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::consensus::ConsensusError;
use crate::repair::RepairError;
use crate::retry::RetryError;
use crate::round_runner::RoundRunnerError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error(transparent)]
    Repair(#[from] RepairError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    RoundRunner(#[from] RoundRunnerError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("session timed out after {0}ms")]
    SessionTimeout(u64),
    #[error("round timed out after {0}ms")]
    RoundTimeout(u64),
    #[error("resource limit exceeded: {0}")]
    LimitExceeded(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_composes_into_engine_error() {
        let config_err = ConfigError::Invalid(1, "topic must not be empty".to_string());
        let engine_err: EngineError = config_err.into();
        assert!(engine_err.to_string().contains("topic must not be empty"));
    }

    #[test]
    fn state_error_composes_into_engine_error() {
        let state_err = StateError::VerdictAlreadySet;
        let engine_err: EngineError = state_err.into();
        assert!(matches!(engine_err, EngineError::State(_)));
    }
}
