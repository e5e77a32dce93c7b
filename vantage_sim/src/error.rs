//! Harness errors.

use thiserror::Error;
use vantage_core::EngineError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("engine configuration rejected: {0}")]
    Config(#[from] EngineError),

    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}
