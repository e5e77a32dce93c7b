//! Error taxonomy for the correction engine.
//!
//! `StageError` never leaves a stage: every stage converts it into its
//! degraded output and keeps the cycle alive. `EngineError` is the only
//! error the public API returns.

use thiserror::Error;
use vantage_env::EnvError;

/// A failure local to one correction stage.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The learned component failed or timed out
    #[error("inference failed: {0}")]
    Inference(#[from] EnvError),

    /// The learned component returned a vector of the wrong shape
    #[error("malformed model output: expected {expected} values, got {actual}")]
    MalformedOutput { expected: usize, actual: usize },

    /// A reading cannot be processed (non-finite distance, etc.)
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// A spawned stage task panicked or was aborted
    #[error("stage task failed: {0}")]
    TaskFailed(String),
}

impl StageError {
    pub fn malformed(expected: usize, actual: usize) -> Self {
        Self::MalformedOutput { expected, actual }
    }
}

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has been shut down; no further cycles are accepted
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
