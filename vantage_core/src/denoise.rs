//! Noise Reduction Stage.
//!
//! Second pass over the fusion output. The heuristic path is a short moving
//! average against recent same-modality distances; the learned path asks
//! the model for a denoised distance and a noise level per reading. Any
//! failure hands the fusion output back unchanged.

use crate::config::DenoiseConfig;
use crate::error::StageError;
use crate::registry::ModelHandle;
use crate::types::{clamp_unit, mean, window, EnhancedReading, FusionContext, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Features per reading: `[corrected_distance, corrected_accuracy, modality]`
pub const DENOISE_FEATURES: usize = 3;

/// Outputs per reading: `[denoised_distance, noise_level]`
pub const DENOISE_OUTPUTS: usize = 2;

#[async_trait]
pub trait DenoiseStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn denoise(
        &self,
        readings: &[EnhancedReading],
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedReading>, StageError>;
}

/// Averages each reading with the recent same-modality mean.
#[derive(Debug, Clone)]
pub struct MovingAverageStrategy {
    history_window: usize,
}

impl MovingAverageStrategy {
    pub fn new(config: &DenoiseConfig) -> Self {
        Self {
            history_window: config.history_window,
        }
    }
}

#[async_trait]
impl DenoiseStrategy for MovingAverageStrategy {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    async fn denoise(
        &self,
        readings: &[EnhancedReading],
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedReading>, StageError> {
        let recent = window(history, self.history_window);

        Ok(readings
            .iter()
            .map(|reading| {
                let history_mean = mean(
                    recent
                        .iter()
                        .flat_map(|c| c.readings_of(reading.modality()))
                        .map(|r| r.distance)
                        .filter(|d| d.is_finite()),
                );
                let mut smoothed = reading.clone();
                if let Some(m) = history_mean {
                    smoothed.corrected_distance = (reading.corrected_distance + m) / 2.0;
                }
                smoothed
            })
            .collect())
    }
}

/// Per-reading learned denoising.
#[derive(Debug, Clone)]
pub struct LearnedDenoise {
    model: ModelHandle,
}

impl LearnedDenoise {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    async fn denoise_one(&self, reading: &EnhancedReading) -> Result<EnhancedReading, StageError> {
        let input = [
            reading.corrected_distance as f32,
            reading.corrected_accuracy as f32,
            reading.modality().index() as f32,
        ];
        let out = self.model.run(&input, DENOISE_OUTPUTS).await?;

        let distance = out[0] as f64;
        if !distance.is_finite() {
            return Err(StageError::InvalidReading(format!("model returned distance {distance}")));
        }
        let noise = clamp_unit(out[1] as f64);

        Ok(EnhancedReading::new(
            reading.original.clone(),
            distance,
            reading.corrected_accuracy * (1.0 - noise),
            reading.inference_confidence,
            reading.quality_score * (1.0 - noise * 0.5),
        ))
    }
}

#[async_trait]
impl DenoiseStrategy for LearnedDenoise {
    fn name(&self) -> &'static str {
        "learned"
    }

    async fn denoise(
        &self,
        readings: &[EnhancedReading],
        _history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedReading>, StageError> {
        let mut out = Vec::with_capacity(readings.len());
        for reading in readings {
            out.push(self.denoise_one(reading).await?);
        }
        Ok(out)
    }
}

pub struct NoiseReductionStage {
    strategy: Box<dyn DenoiseStrategy>,
}

impl NoiseReductionStage {
    pub fn new(config: &DenoiseConfig, model: Option<ModelHandle>) -> Self {
        let strategy: Box<dyn DenoiseStrategy> = match model {
            Some(model) => Box::new(LearnedDenoise::new(model)),
            None => Box::new(MovingAverageStrategy::new(config)),
        };
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Smooths `readings`; on any failure returns them unchanged.
    pub async fn reduce(
        &self,
        readings: Vec<EnhancedReading>,
        history: &[Arc<FusionContext>],
    ) -> StageOutput<Vec<EnhancedReading>> {
        match self.strategy.denoise(&readings, history).await {
            Ok(smoothed) if smoothed.len() == readings.len() => StageOutput::clean(smoothed),
            Ok(smoothed) => {
                warn!(expected = readings.len(), actual = smoothed.len(), "denoise changed reading count, keeping input");
                StageOutput::degraded(readings)
            }
            Err(e) => {
                warn!(error = %e, "noise reduction failed, keeping input");
                StageOutput::degraded(readings)
            }
        }
    }
}
