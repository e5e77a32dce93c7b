//! Contract for pluggable learned inference components.
//!
//! A learned component is a flat-vector model: it consumes `f32` features
//! and returns `f32` outputs. Each correction stage defines its own feature
//! layout and validates the output length, so a model only has to agree
//! with the stage it is loaded for.

use crate::error::EnvError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The four independently loadable learned capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Fusion,
    NoiseReduction,
    TrajectoryPrediction,
    LandmarkClassification,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Fusion,
        Capability::NoiseReduction,
        Capability::TrajectoryPrediction,
        Capability::LandmarkClassification,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Fusion => "fusion",
            Capability::NoiseReduction => "noise_reduction",
            Capability::TrajectoryPrediction => "trajectory_prediction",
            Capability::LandmarkClassification => "landmark_classification",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded model.
///
/// Calls may suspend (accelerator queues, remote runtimes). Implementations
/// must be shareable across the per-cycle task and its sub-tasks.
#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    /// Runs one forward pass.
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError>;

    /// Frees runtime resources. Called once during engine shutdown.
    fn release(&self) {}
}

/// Probes and loads model artifacts.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Loads the model for `capability`.
    ///
    /// # Returns
    /// * `Ok(engine)` - The capability runs on the learned path
    /// * `Err(EnvError::ModelUnavailable)` - No artifact; heuristic path
    /// * `Err(EnvError::ModelLoad)` - Artifact present but unusable; heuristic path
    async fn load(&self, capability: Capability) -> Result<Arc<dyn InferenceEngine>, EnvError>;
}

/// Loader for deployments without any model artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModels;

#[async_trait]
impl ModelLoader for NoModels {
    async fn load(&self, capability: Capability) -> Result<Arc<dyn InferenceEngine>, EnvError> {
        Err(EnvError::unavailable(capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_models_reports_every_capability_unavailable() {
        for cap in Capability::ALL {
            match NoModels.load(cap).await {
                Err(EnvError::ModelUnavailable(name)) => assert_eq!(name, cap.name()),
                Err(other) => panic!("unexpected error {other}"),
                Ok(_) => panic!("{cap} should be unavailable"),
            }
        }
    }
}
