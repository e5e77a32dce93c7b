//! Scripted inference engines.
//!
//! Stand-ins for real model artifacts. Each follows the feature layout of
//! the stage it is loaded for and answers deterministically, so scenario
//! results depend only on the seed.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use vantage_core::fusion::FUSION_FEATURES;
use vantage_core::landmarks::LANDMARK_OUTPUTS;
use vantage_core::trajectory::TRAJECTORY_FEATURES;
use vantage_env::{Capability, EnvError, InferenceEngine, ModelLoader};

/// How the scripted engines answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBehavior {
    /// Plausible outputs in the right shape
    WellBehaved,
    /// Every call errors
    AlwaysFail,
}

/// Loads scripted engines for a chosen set of capabilities.
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    available: BTreeSet<Capability>,
    behavior: ModelBehavior,
    horizon: usize,
}

impl ScriptedLoader {
    pub fn new(available: impl IntoIterator<Item = Capability>, behavior: ModelBehavior, horizon: usize) -> Self {
        Self {
            available: available.into_iter().collect(),
            behavior,
            horizon,
        }
    }

    /// Every capability available.
    pub fn all(behavior: ModelBehavior, horizon: usize) -> Self {
        Self::new(Capability::ALL, behavior, horizon)
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&self, capability: Capability) -> Result<Arc<dyn InferenceEngine>, EnvError> {
        if !self.available.contains(&capability) {
            return Err(EnvError::unavailable(capability));
        }
        debug!(capability = %capability, behavior = ?self.behavior, "loading scripted model");

        let engine: Arc<dyn InferenceEngine> = match self.behavior {
            ModelBehavior::AlwaysFail => Arc::new(FailingModel { capability }),
            ModelBehavior::WellBehaved => match capability {
                Capability::Fusion => Arc::new(FusionModel),
                Capability::NoiseReduction => Arc::new(DenoiseModel),
                Capability::TrajectoryPrediction => Arc::new(TrajectoryModel { horizon: self.horizon }),
                Capability::LandmarkClassification => Arc::new(LandmarkModel::default()),
            },
        };
        Ok(engine)
    }
}

struct FailingModel {
    capability: Capability,
}

#[async_trait]
impl InferenceEngine for FailingModel {
    async fn infer(&self, _input: &[f32]) -> Result<Vec<f32>, EnvError> {
        Err(EnvError::inference(format!("{} model crashed", self.capability)))
    }
}

/// Keeps each distance, reports high confidence and quality = accuracy.
struct FusionModel;

#[async_trait]
impl InferenceEngine for FusionModel {
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError> {
        Ok(input
            .chunks_exact(FUSION_FEATURES)
            .flat_map(|f| [f[0], f[1], 0.85, f[1]])
            .collect())
    }
}

/// Reports a small constant noise level.
struct DenoiseModel;

#[async_trait]
impl InferenceEngine for DenoiseModel {
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError> {
        match input.first() {
            Some(distance) => Ok(vec![*distance, 0.1]),
            None => Err(EnvError::inference("empty denoise input")),
        }
    }
}

/// Constant-velocity rollout over one-second steps.
struct TrajectoryModel {
    horizon: usize,
}

#[async_trait]
impl InferenceEngine for TrajectoryModel {
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError> {
        let points: Vec<&[f32]> = input.chunks_exact(TRAJECTORY_FEATURES).collect();
        // Times are relative to the current point; padding repeats it at t = 0
        let current = points
            .iter()
            .find(|p| p[3] == 0.0)
            .ok_or_else(|| EnvError::inference("no current point in window"))?;
        let velocity = match points.iter().rev().find(|p| p[3] < 0.0) {
            Some(prev) => [0, 1, 2].map(|i| (current[i] - prev[i]) / -prev[3]),
            None => [0.0; 3],
        };

        Ok((1..=self.horizon)
            .flat_map(|k| {
                let k = k as f32;
                [
                    current[0] + velocity[0] * k,
                    current[1] + velocity[1] * k,
                    current[2] + velocity[2] * k,
                    0.9,
                ]
            })
            .collect())
    }
}

/// Category from the landmark's x coordinate; confidence alternates 0.9 / 0.4.
#[derive(Default)]
struct LandmarkModel {
    calls: AtomicUsize,
}

#[async_trait]
impl InferenceEngine for LandmarkModel {
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let x = input.first().copied().unwrap_or(0.0);
        let category = (x.abs().round() as usize) % 7;

        let mut out = vec![0.05; LANDMARK_OUTPUTS];
        out[category] = 0.7;
        out[LANDMARK_OUTPUTS - 2] = if call % 2 == 0 { 0.9 } else { 0.4 };
        out[LANDMARK_OUTPUTS - 1] = 0.8;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_capabilities_are_reported() {
        let loader = ScriptedLoader::new([Capability::Fusion], ModelBehavior::WellBehaved, 10);
        assert!(loader.load(Capability::Fusion).await.is_ok());
        assert!(matches!(
            loader.load(Capability::NoiseReduction).await,
            Err(EnvError::ModelUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_trajectory_model_extrapolates() {
        let loader = ScriptedLoader::all(ModelBehavior::WellBehaved, 3);
        let model = loader.load(Capability::TrajectoryPrediction).await.unwrap();

        // prev (0,0,0) at -1 s, current (1,0,0), then padding
        let input = [0.0, 0.0, 0.0, -1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let out = model.infer(&input).await.unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[8], 4.0);
    }

    #[tokio::test]
    async fn test_failing_behavior_errors() {
        let loader = ScriptedLoader::all(ModelBehavior::AlwaysFail, 10);
        let model = loader.load(Capability::Fusion).await.unwrap();
        assert!(model.infer(&[1.0; 6]).await.is_err());
    }
}
