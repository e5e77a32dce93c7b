//! Sensor Fusion Corrector.
//!
//! Turns each raw ranging reading of a cycle into an [`EnhancedReading`].
//! The learned path batches every reading into one inference call; the
//! heuristic path pulls outliers toward the per-modality median of recent
//! history. Either way the output has the same length and order as the
//! input, and a reading that cannot be corrected is passed through with
//! the failure score instead of aborting the cycle.

use crate::config::FusionConfig;
use crate::error::StageError;
use crate::registry::ModelHandle;
use crate::types::{window, EnhancedReading, FusionContext, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use vantage_env::{RangingModality, RangingReading};

/// Features per reading: `[distance, accuracy, modality, base_x, base_y, base_z]`
pub const FUSION_FEATURES: usize = 6;

/// Outputs per reading: `[distance, accuracy, confidence, quality]`
pub const FUSION_OUTPUTS: usize = 4;

/// One way of correcting a cycle's readings.
#[async_trait]
pub trait FusionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns one result per reading, in input order. An outer error
    /// fails the whole batch.
    async fn correct(
        &self,
        context: &FusionContext,
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<Result<EnhancedReading, StageError>>, StageError>;
}

// ============================================================================
// HEURISTIC PATH
// ============================================================================

/// Median of the finite same-modality distances in `history`.
pub fn modality_median(history: &[Arc<FusionContext>], modality: RangingModality) -> Option<f64> {
    let mut distances: Vec<f64> = history
        .iter()
        .flat_map(|c| c.readings_of(modality))
        .map(|r| r.distance)
        .filter(|d| d.is_finite())
        .collect();

    if distances.is_empty() {
        return None;
    }
    distances.sort_by(f64::total_cmp);

    let mid = distances.len() / 2;
    if distances.len() % 2 == 0 {
        Some((distances[mid - 1] + distances[mid]) / 2.0)
    } else {
        Some(distances[mid])
    }
}

/// Pulls readings that stray too far from the recent median back toward it.
#[derive(Debug, Clone)]
pub struct MedianOutlierStrategy {
    history_window: usize,
    outlier_deviation: f64,
    original_weight: f64,
    confidence: f64,
}

impl MedianOutlierStrategy {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            history_window: config.history_window,
            outlier_deviation: config.outlier_deviation,
            original_weight: config.blend_original_weight,
            confidence: config.heuristic_confidence,
        }
    }

    pub fn correct_reading(
        &self,
        reading: &RangingReading,
        history: &[Arc<FusionContext>],
    ) -> Result<EnhancedReading, StageError> {
        if !reading.distance.is_finite() {
            return Err(StageError::InvalidReading(format!(
                "{} reported distance {}",
                reading.source_id, reading.distance
            )));
        }

        let recent = window(history, self.history_window);
        let corrected = match modality_median(recent, reading.modality) {
            Some(median) if median > 0.0 => {
                let deviation = (reading.distance - median).abs() / median;
                if deviation > self.outlier_deviation {
                    self.original_weight * reading.distance + (1.0 - self.original_weight) * median
                } else {
                    reading.distance
                }
            }
            _ => reading.distance,
        };

        Ok(EnhancedReading::new(
            reading.clone(),
            corrected,
            reading.accuracy,
            self.confidence,
            reading.accuracy,
        ))
    }
}

#[async_trait]
impl FusionStrategy for MedianOutlierStrategy {
    fn name(&self) -> &'static str {
        "median_outlier"
    }

    async fn correct(
        &self,
        context: &FusionContext,
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<Result<EnhancedReading, StageError>>, StageError> {
        Ok(context
            .readings
            .iter()
            .map(|r| self.correct_reading(r, history))
            .collect())
    }
}

// ============================================================================
// LEARNED PATH
// ============================================================================

/// Batched learned correction.
#[derive(Debug, Clone)]
pub struct LearnedFusion {
    model: ModelHandle,
}

impl LearnedFusion {
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    fn features(context: &FusionContext) -> Vec<f32> {
        let base = context.base.position;
        context
            .readings
            .iter()
            .flat_map(|r| {
                [
                    r.distance as f32,
                    r.accuracy as f32,
                    r.modality.index() as f32,
                    base.x as f32,
                    base.y as f32,
                    base.z as f32,
                ]
            })
            .collect()
    }
}

#[async_trait]
impl FusionStrategy for LearnedFusion {
    fn name(&self) -> &'static str {
        "learned"
    }

    async fn correct(
        &self,
        context: &FusionContext,
        _history: &[Arc<FusionContext>],
    ) -> Result<Vec<Result<EnhancedReading, StageError>>, StageError> {
        if context.readings.is_empty() {
            return Ok(Vec::new());
        }

        let input = Self::features(context);
        let output = self
            .model
            .run(&input, context.readings.len() * FUSION_OUTPUTS)
            .await?;

        Ok(context
            .readings
            .iter()
            .zip(output.chunks_exact(FUSION_OUTPUTS))
            .map(|(reading, out)| {
                let distance = out[0] as f64;
                if !distance.is_finite() {
                    return Err(StageError::InvalidReading(format!(
                        "model returned distance {distance} for {}",
                        reading.source_id
                    )));
                }
                Ok(EnhancedReading::new(
                    reading.clone(),
                    distance,
                    out[1] as f64,
                    out[2] as f64,
                    out[3] as f64,
                ))
            })
            .collect())
    }
}

// ============================================================================
// STAGE
// ============================================================================

/// The fusion stage: a strategy plus the per-reading failure policy.
pub struct SensorFusionCorrector {
    strategy: Box<dyn FusionStrategy>,
    failure_score: f64,
}

impl SensorFusionCorrector {
    /// Uses the learned path when a model is given, else the heuristic.
    pub fn new(config: &FusionConfig, model: Option<ModelHandle>) -> Self {
        let strategy: Box<dyn FusionStrategy> = match model {
            Some(model) => Box::new(LearnedFusion::new(model)),
            None => Box::new(MedianOutlierStrategy::new(config)),
        };
        Self {
            strategy,
            failure_score: config.failure_score,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Corrects every reading of `context`. Never fails.
    pub async fn correct(
        &self,
        context: &FusionContext,
        history: &[Arc<FusionContext>],
    ) -> StageOutput<Vec<EnhancedReading>> {
        let results = match self.strategy.correct(context, history).await {
            Ok(results) if results.len() == context.readings.len() => results,
            Ok(results) => {
                warn!(
                    cycle = context.cycle,
                    expected = context.readings.len(),
                    actual = results.len(),
                    "fusion strategy dropped readings, passing all through"
                );
                return StageOutput::degraded(self.degrade(&context.readings));
            }
            Err(e) => {
                warn!(cycle = context.cycle, error = %e, "fusion batch failed, passing all through");
                return StageOutput::degraded(self.degrade(&context.readings));
            }
        };

        let mut degraded = false;
        let readings = results
            .into_iter()
            .zip(&context.readings)
            .map(|(result, original)| match result {
                Ok(enhanced) => enhanced,
                Err(e) => {
                    warn!(cycle = context.cycle, source = %original.source_id, error = %e, "reading passed through uncorrected");
                    degraded = true;
                    self.fail_reading(original)
                }
            })
            .collect();

        StageOutput { value: readings, degraded }
    }

    /// The failure-policy output for a whole batch.
    pub fn degrade(&self, readings: &[RangingReading]) -> Vec<EnhancedReading> {
        readings.iter().map(|r| self.fail_reading(r)).collect()
    }

    fn fail_reading(&self, reading: &RangingReading) -> EnhancedReading {
        EnhancedReading::passthrough(reading.clone(), self.failure_score, self.failure_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, failing_model, model, wifi};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use vantage_env::Capability;

    fn heuristic() -> SensorFusionCorrector {
        SensorFusionCorrector::new(&FusionConfig::default(), None)
    }

    #[tokio::test]
    async fn test_outlier_pulled_toward_median() {
        let history = vec![Arc::new(context(0, vec![wifi("a", 5.0, 0.9), wifi("b", 5.1, 0.85)]))];
        let current = context(
            1,
            vec![wifi("a", 5.0, 0.9), wifi("b", 5.1, 0.85), wifi("c", 50.0, 0.8)],
        );

        let out = heuristic().correct(&current, &history).await;
        assert!(!out.degraded);
        let readings = out.value;

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].corrected_distance, 5.0);
        assert_eq!(readings[1].corrected_distance, 5.1);
        assert_relative_eq!(readings[2].corrected_distance, 0.3 * 50.0 + 0.7 * 5.05, epsilon = 1e-9);
        assert_relative_eq!(readings[2].corrected_distance, 18.535, epsilon = 1e-9);

        for r in &readings {
            assert_eq!(r.inference_confidence, 0.6);
            assert_eq!(r.quality_score, r.original.accuracy);
        }
    }

    #[tokio::test]
    async fn test_median_ignores_other_modalities_and_old_history() {
        let mut acoustic = wifi("s", 40.0, 0.9);
        acoustic.modality = RangingModality::AcousticChirp;

        // Only the newest five contexts count
        let mut history: Vec<_> = (0..3).map(|i| Arc::new(context(i, vec![wifi("a", 100.0, 0.9)]))).collect();
        history.extend((3..8).map(|i| Arc::new(context(i, vec![wifi("a", 10.0, 0.9), acoustic.clone()]))));

        assert_eq!(modality_median(&history[3..], RangingModality::WifiRtt), Some(10.0));
        let out = heuristic().correct(&context(9, vec![wifi("a", 10.5, 0.9)]), &history).await;
        assert_eq!(out.value[0].corrected_distance, 10.5);
    }

    #[tokio::test]
    async fn test_no_history_passes_through() {
        let out = heuristic().correct(&context(0, vec![wifi("a", 50.0, 0.4)]), &[]).await;
        assert_eq!(out.value[0].corrected_distance, 50.0);
        assert_eq!(out.value[0].quality_score, 0.4);
    }

    #[tokio::test]
    async fn test_invalid_reading_does_not_abort_cycle() {
        let current = context(0, vec![wifi("a", 4.0, 0.9), wifi("bad", f64::NAN, 0.9), wifi("c", 6.0, 0.7)]);
        let out = heuristic().correct(&current, &[]).await;

        assert!(out.degraded);
        assert_eq!(out.value.len(), 3);
        assert_eq!(out.value[0].inference_confidence, 0.6);
        assert_eq!(out.value[1].inference_confidence, 0.5);
        assert_eq!(out.value[1].quality_score, 0.5);
        assert_eq!(out.value[2].corrected_distance, 6.0);
    }

    #[tokio::test]
    async fn test_learned_batch_maps_outputs_in_order() {
        let handle = model(Capability::Fusion, |input: &[f32]| {
            Ok(input
                .chunks_exact(FUSION_FEATURES)
                .flat_map(|f| [f[0] + 1.0, 0.9, 0.95, 0.8])
                .collect())
        });
        let stage = SensorFusionCorrector::new(&FusionConfig::default(), Some(handle));
        assert_eq!(stage.strategy_name(), "learned");

        let out = stage.correct(&context(0, vec![wifi("a", 2.0, 0.5), wifi("b", 3.0, 0.5)]), &[]).await;
        assert!(!out.degraded);
        assert_relative_eq!(out.value[0].corrected_distance, 3.0);
        assert_relative_eq!(out.value[1].corrected_distance, 4.0);
        assert_relative_eq!(out.value[1].inference_confidence, 0.95, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn test_learned_failure_passes_everything_through() {
        let stage = SensorFusionCorrector::new(&FusionConfig::default(), Some(failing_model(Capability::Fusion)));
        let out = stage.correct(&context(0, vec![wifi("a", 2.0, 0.9), wifi("b", 3.0, 0.8)]), &[]).await;

        assert!(out.degraded);
        for (r, d) in out.value.iter().zip([2.0, 3.0]) {
            assert_eq!(r.corrected_distance, d);
            assert_eq!(r.inference_confidence, 0.5);
            assert_eq!(r.quality_score, 0.5);
        }
    }

    #[tokio::test]
    async fn test_learned_malformed_output_degrades() {
        let handle = model(Capability::Fusion, |_: &[f32]| Ok(vec![1.0; 3]));
        let stage = SensorFusionCorrector::new(&FusionConfig::default(), Some(handle));
        let out = stage.correct(&context(0, vec![wifi("a", 2.0, 0.9)]), &[]).await;

        assert!(out.degraded);
        assert_eq!(out.value[0].corrected_distance, 2.0);
    }

    #[tokio::test]
    async fn test_heuristic_is_idempotent() {
        let history = vec![Arc::new(context(0, vec![wifi("a", 5.0, 0.9), wifi("b", 5.1, 0.9)]))];
        let current = context(1, vec![wifi("a", 9.0, 0.9), wifi("b", 5.0, 0.3)]);
        let stage = heuristic();

        let first = stage.correct(&current, &history).await;
        let second = stage.correct(&current, &history).await;
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_output_preserves_length_and_order(
            distances in prop::collection::vec(0.1f64..200.0, 0..24),
            history in prop::collection::vec(0.1f64..200.0, 0..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let readings: Vec<_> = distances
                .iter()
                .enumerate()
                .map(|(i, d)| wifi(&format!("src-{i}"), *d, 0.8))
                .collect();
            let history = vec![Arc::new(context(
                0,
                history.iter().map(|d| wifi("h", *d, 0.8)).collect(),
            ))];

            let out = rt.block_on(heuristic().correct(&context(1, readings.clone()), &history));
            prop_assert_eq!(out.value.len(), readings.len());
            for (enhanced, original) in out.value.iter().zip(&readings) {
                prop_assert_eq!(&enhanced.original, original);
                prop_assert!((0.0..=1.0).contains(&enhanced.inference_confidence));
                prop_assert!((0.0..=1.0).contains(&enhanced.quality_score));
            }
        }
    }
}
