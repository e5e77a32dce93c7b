//! Landmark Enhancer.
//!
//! Annotates the base estimate's landmarks with a category, a reliability
//! and a temporal-stability score. Only the learned path filters: a
//! classification at or below the confidence threshold is dropped, never
//! emitted with a low score. The heuristic path labels every landmark
//! `Unknown` with fixed scores and keeps all of them.

use crate::config::LandmarkConfig;
use crate::error::StageError;
use crate::registry::ModelHandle;
use crate::types::{clamp_unit, mean, EnhancedLandmark, EnhancedReading, FusionContext, LandmarkCategory, StageOutput};
use async_trait::async_trait;
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::{debug, warn};
use vantage_env::BasePoseEstimate;

/// Features per landmark: `[x, y, z, range_to_base, nearest_reading, mean_accuracy]`
pub const LANDMARK_FEATURES: usize = 6;

/// Outputs per landmark: 7 category probabilities, confidence, reliability
pub const LANDMARK_OUTPUTS: usize = LandmarkCategory::ALL.len() + 2;

#[async_trait]
pub trait LandmarkStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enhance(
        &self,
        base: &BasePoseEstimate,
        readings: &[EnhancedReading],
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedLandmark>, StageError>;
}

/// Fixed-score labelling that keeps every landmark.
#[derive(Debug, Clone)]
pub struct FixedLabelStrategy {
    confidence: f64,
    reliability: f64,
    stability: f64,
}

impl FixedLabelStrategy {
    pub fn new(config: &LandmarkConfig) -> Self {
        Self {
            confidence: config.fallback_confidence,
            reliability: config.fallback_reliability,
            stability: config.fallback_stability,
        }
    }

    pub fn label(&self, landmarks: &[Vector3<f64>]) -> Vec<EnhancedLandmark> {
        landmarks
            .iter()
            .map(|position| EnhancedLandmark {
                position: *position,
                category: LandmarkCategory::Unknown,
                classification_confidence: self.confidence,
                reliability: self.reliability,
                temporal_stability: self.stability,
            })
            .collect()
    }
}

#[async_trait]
impl LandmarkStrategy for FixedLabelStrategy {
    fn name(&self) -> &'static str {
        "fixed_label"
    }

    async fn enhance(
        &self,
        base: &BasePoseEstimate,
        _readings: &[EnhancedReading],
        _history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedLandmark>, StageError> {
        Ok(self.label(&base.landmarks))
    }
}

/// Fraction of buffered cycles that saw a landmark within `radius` of `position`.
pub fn temporal_stability(position: &Vector3<f64>, history: &[Arc<FusionContext>], radius: f64) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let seen = history
        .iter()
        .filter(|c| c.base.landmarks.iter().any(|l| (l - position).norm() <= radius))
        .count();
    seen as f64 / history.len() as f64
}

/// Per-landmark learned classification with threshold filtering.
#[derive(Debug, Clone)]
pub struct LearnedLandmarks {
    model: ModelHandle,
    threshold: f64,
    match_radius: f64,
}

impl LearnedLandmarks {
    pub fn new(model: ModelHandle, config: &LandmarkConfig) -> Self {
        Self {
            model,
            threshold: config.confidence_threshold,
            match_radius: config.match_radius,
        }
    }

    fn features(position: &Vector3<f64>, base: &BasePoseEstimate, readings: &[EnhancedReading]) -> [f32; LANDMARK_FEATURES] {
        let range = (position - base.position).norm();
        let nearest = readings
            .iter()
            .map(|r| r.corrected_distance)
            .filter(|d| d.is_finite())
            .min_by(|a, b| (a - range).abs().total_cmp(&(b - range).abs()))
            .unwrap_or(0.0);
        let accuracy = mean(readings.iter().map(|r| r.corrected_accuracy)).unwrap_or(0.0);

        [
            position.x as f32,
            position.y as f32,
            position.z as f32,
            range as f32,
            nearest as f32,
            accuracy as f32,
        ]
    }
}

#[async_trait]
impl LandmarkStrategy for LearnedLandmarks {
    fn name(&self) -> &'static str {
        "learned"
    }

    async fn enhance(
        &self,
        base: &BasePoseEstimate,
        readings: &[EnhancedReading],
        history: &[Arc<FusionContext>],
    ) -> Result<Vec<EnhancedLandmark>, StageError> {
        let mut kept = Vec::with_capacity(base.landmarks.len());

        for position in &base.landmarks {
            let input = Self::features(position, base, readings);
            let out = self.model.run(&input, LANDMARK_OUTPUTS).await?;

            let (probabilities, scores) = out.split_at(LandmarkCategory::ALL.len());
            let best = probabilities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(LandmarkCategory::ALL.len() - 1);
            let confidence = clamp_unit(scores[0] as f64);

            if confidence <= self.threshold {
                debug!(x = position.x, y = position.y, confidence, "landmark below threshold, dropped");
                continue;
            }
            kept.push(EnhancedLandmark {
                position: *position,
                category: LandmarkCategory::from_index(best),
                classification_confidence: confidence,
                reliability: clamp_unit(scores[1] as f64),
                temporal_stability: temporal_stability(position, history, self.match_radius),
            });
        }

        Ok(kept)
    }
}

/// The landmark stage. A learned failure falls back to fixed labels.
pub struct LandmarkEnhancer {
    strategy: Box<dyn LandmarkStrategy>,
    fallback: FixedLabelStrategy,
}

impl LandmarkEnhancer {
    pub fn new(config: &LandmarkConfig, model: Option<ModelHandle>) -> Self {
        let fallback = FixedLabelStrategy::new(config);
        let strategy: Box<dyn LandmarkStrategy> = match model {
            Some(model) => Box::new(LearnedLandmarks::new(model, config)),
            None => Box::new(fallback.clone()),
        };
        Self { strategy, fallback }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn enhance(
        &self,
        base: &BasePoseEstimate,
        readings: &[EnhancedReading],
        history: &[Arc<FusionContext>],
    ) -> StageOutput<Vec<EnhancedLandmark>> {
        match self.strategy.enhance(base, readings, history).await {
            Ok(landmarks) => StageOutput::clean(landmarks),
            Err(e) => {
                warn!(error = %e, landmarks = base.landmarks.len(), "landmark classification failed, using fixed labels");
                StageOutput::degraded(self.fallback.label(&base.landmarks))
            }
        }
    }

    /// Fixed labels for every landmark of `base`.
    pub fn degrade(&self, base: &BasePoseEstimate) -> Vec<EnhancedLandmark> {
        self.fallback.label(&base.landmarks)
    }
}
