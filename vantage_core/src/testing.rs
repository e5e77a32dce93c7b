//! Fixtures shared by the unit tests.

use crate::registry::ModelHandle;
use crate::types::FusionContext;
use async_trait::async_trait;
use nalgebra::Vector3;
use std::sync::Arc;
use vantage_env::{BasePoseEstimate, Capability, EnvError, InferenceEngine, RangingModality, RangingReading};

/// An inference engine backed by a plain closure.
pub struct FnEngine<F>(pub F);

#[async_trait]
impl<F> InferenceEngine for FnEngine<F>
where
    F: Fn(&[f32]) -> Result<Vec<f32>, EnvError> + Send + Sync + 'static,
{
    async fn infer(&self, input: &[f32]) -> Result<Vec<f32>, EnvError> {
        (self.0)(input)
    }
}

pub fn model<F>(capability: Capability, f: F) -> ModelHandle
where
    F: Fn(&[f32]) -> Result<Vec<f32>, EnvError> + Send + Sync + 'static,
{
    ModelHandle::new(capability, Arc::new(FnEngine(f)), None)
}

pub fn failing_model(capability: Capability) -> ModelHandle {
    model(capability, |_| Err(EnvError::inference("scripted failure")))
}

pub fn wifi(id: &str, distance: f64, accuracy: f64) -> RangingReading {
    RangingReading::new(id, distance, accuracy, RangingModality::WifiRtt, 0)
}

pub fn context_at(cycle: u64, readings: Vec<RangingReading>, position: Vector3<f64>) -> FusionContext {
    FusionContext::new(
        cycle,
        readings,
        cycle * 1000,
        BasePoseEstimate::at(position, 0.7),
    )
}

pub fn context(cycle: u64, readings: Vec<RangingReading>) -> FusionContext {
    context_at(cycle, readings, Vector3::zeros())
}
