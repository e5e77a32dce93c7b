//! Error types for the Vantage environment abstraction.

use thiserror::Error;

/// Errors that can occur at the environment boundary.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// No model artifact exists for the requested capability
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// A model artifact exists but could not be loaded
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// An inference call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// An inference call exceeded its configured budget
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates an inference error.
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Creates an unavailable error for a named capability.
    pub fn unavailable(capability: impl std::fmt::Display) -> Self {
        Self::ModelUnavailable(capability.to_string())
    }
}
