//! Data model shared by the correction stages.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;
use vantage_env::{BasePoseEstimate, InertialReading, RangingModality, RangingReading};

/// Clamps a score into [0, 1]. NaN maps to 0.
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean, `None` for an empty input.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// The newest `n` entries of an oldest-first history slice.
pub(crate) fn window<T>(history: &[T], n: usize) -> &[T] {
    &history[history.len().saturating_sub(n)..]
}

// ============================================================================
// CYCLE INPUT
// ============================================================================

/// One processing cycle's bundle of sensor input and base estimate.
///
/// Created per cycle and afterwards only held, immutably, by the
/// measurement buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionContext {
    /// Arrival sequence number
    pub cycle: u64,

    pub readings: Vec<RangingReading>,
    pub inertial: Option<InertialReading>,

    /// Arrival timestamp (ms since epoch)
    pub timestamp_ms: u64,

    /// Shallow copy of the upstream estimate at processing time
    pub base: BasePoseEstimate,
}

impl FusionContext {
    pub fn new(cycle: u64, readings: Vec<RangingReading>, timestamp_ms: u64, base: BasePoseEstimate) -> Self {
        Self {
            cycle,
            readings,
            inertial: None,
            timestamp_ms,
            base,
        }
    }

    /// Readings of one modality, in arrival order.
    pub fn readings_of(&self, modality: RangingModality) -> impl Iterator<Item = &RangingReading> {
        self.readings.iter().filter(move |r| r.modality == modality)
    }

    /// The base position of this cycle as a trajectory sample.
    pub fn trajectory_point(&self) -> TrajectoryPoint {
        TrajectoryPoint {
            position: self.base.position,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// A timestamped position on the device's past path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub position: Vector3<f64>,
    pub timestamp_ms: u64,
}

impl TrajectoryPoint {
    pub fn new(position: Vector3<f64>, timestamp_ms: u64) -> Self {
        Self { position, timestamp_ms }
    }
}

// ============================================================================
// STAGE OUTPUTS
// ============================================================================

/// A ranging reading after correction. Always wraps exactly one original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedReading {
    pub original: RangingReading,
    pub corrected_distance: f64,
    pub corrected_accuracy: f64,
    pub inference_confidence: f64,
    pub quality_score: f64,
}

impl EnhancedReading {
    /// Creates an enhanced reading, clamping every score to [0, 1].
    pub fn new(
        original: RangingReading,
        corrected_distance: f64,
        corrected_accuracy: f64,
        inference_confidence: f64,
        quality_score: f64,
    ) -> Self {
        Self {
            original,
            corrected_distance,
            corrected_accuracy: clamp_unit(corrected_accuracy),
            inference_confidence: clamp_unit(inference_confidence),
            quality_score: clamp_unit(quality_score),
        }
    }

    /// The original reading, untouched, with the given scores.
    pub fn passthrough(original: RangingReading, inference_confidence: f64, quality_score: f64) -> Self {
        let distance = original.distance;
        let accuracy = original.accuracy;
        Self::new(original, distance, accuracy, inference_confidence, quality_score)
    }

    pub fn modality(&self) -> RangingModality {
        self.original.modality
    }
}

/// One step of the predicted near-future path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedWaypoint {
    pub position: Vector3<f64>,
    pub confidence: f64,

    /// 1-based step index
    pub steps_ahead: u32,

    /// Projected timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

/// Closed set of landmark categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkCategory {
    Wall,
    Corner,
    Pillar,
    Furniture,
    Door,
    Window,
    Unknown,
}

impl LandmarkCategory {
    /// Categories in model output order.
    pub const ALL: [LandmarkCategory; 7] = [
        LandmarkCategory::Wall,
        LandmarkCategory::Corner,
        LandmarkCategory::Pillar,
        LandmarkCategory::Furniture,
        LandmarkCategory::Door,
        LandmarkCategory::Window,
        LandmarkCategory::Unknown,
    ];

    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or(LandmarkCategory::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            LandmarkCategory::Wall => "wall",
            LandmarkCategory::Corner => "corner",
            LandmarkCategory::Pillar => "pillar",
            LandmarkCategory::Furniture => "furniture",
            LandmarkCategory::Door => "door",
            LandmarkCategory::Window => "window",
            LandmarkCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LandmarkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A landmark from the base estimate with classification attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedLandmark {
    pub position: Vector3<f64>,
    pub category: LandmarkCategory,
    pub classification_confidence: f64,
    pub reliability: f64,
    pub temporal_stability: f64,
}

/// Per-cycle quality report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub measurement_confidence: f64,
    pub trajectory_confidence: f64,

    /// Mean of measurement and trajectory confidence
    pub overall_confidence: f64,

    /// Named [0, 1] indicators (`measurement_quality`, `prediction_quality`, ...)
    pub indicators: BTreeMap<String, f64>,
}

impl ConfidenceReport {
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    AccuracyImprovement,
    SensorPerformance,
    TrajectoryPrediction,
}

/// A derived, human-relevant statement. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub category: InsightCategory,
    pub message: String,
    pub confidence: f64,
    pub value: f64,
    pub timestamp_ms: u64,
}

impl Insight {
    pub fn new(category: InsightCategory, message: String, confidence: f64, value: f64, timestamp_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            message,
            confidence: clamp_unit(confidence),
            value,
            timestamp_ms,
        }
    }
}

/// Tuning advice for the upstream estimator, from rolling history trends.
///
/// The three flags are independent; any combination may be raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecommendation {
    pub tracking_stability: f64,
    pub sensor_performance: f64,
    pub environment_complexity: f64,

    pub increase_process_noise: bool,
    pub increase_measurement_noise: bool,
    pub increase_particle_count: bool,

    /// Buffered cycles the assessment was computed over
    pub sample_count: usize,

    pub timestamp_ms: u64,
}

impl ParameterRecommendation {
    pub fn any_raised(&self) -> bool {
        self.increase_process_noise || self.increase_measurement_noise || self.increase_particle_count
    }
}

/// The correction stages, named for degradation reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fusion,
    NoiseReduction,
    Trajectory,
    Landmarks,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Fusion, Stage::NoiseReduction, Stage::Trajectory, Stage::Landmarks];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Fusion => "fusion",
            Stage::NoiseReduction => "noise_reduction",
            Stage::Trajectory => "trajectory",
            Stage::Landmarks => "landmarks",
        }
    }
}

/// A stage result and whether the stage fell back to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> StageOutput<T> {
    pub fn clean(value: T) -> Self {
        Self { value, degraded: false }
    }

    pub fn degraded(value: T) -> Self {
        Self { value, degraded: true }
    }
}

/// The full record published for every completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedState {
    pub cycle: u64,
    pub base: BasePoseEstimate,
    pub readings: Vec<EnhancedReading>,
    pub trajectory: Vec<PredictedWaypoint>,
    pub landmarks: Vec<EnhancedLandmark>,
    pub confidence: ConfidenceReport,

    /// Wall time spent in the correction stages
    pub latency: Duration,

    pub timestamp_ms: u64,

    /// Stages that fell back to a degraded output this cycle
    pub degraded: Vec<Stage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
        assert_eq!(clamp_unit(3.0), 1.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean([1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn test_window_takes_newest() {
        let history = [1, 2, 3, 4, 5];
        assert_eq!(window(&history, 2), &[4, 5]);
        assert_eq!(window(&history, 9), &history[..]);
        assert!(window(&history, 0).is_empty());
    }

    #[test]
    fn test_passthrough_keeps_original_values() {
        let reading = RangingReading::new("ap", 7.5, 0.8, RangingModality::WifiRtt, 1);
        let enhanced = EnhancedReading::passthrough(reading.clone(), 0.5, 1.4);

        assert_eq!(enhanced.original, reading);
        assert_eq!(enhanced.corrected_distance, 7.5);
        assert_eq!(enhanced.corrected_accuracy, 0.8);
        assert_eq!(enhanced.quality_score, 1.0);
    }

    #[test]
    fn test_landmark_category_index_roundtrip() {
        for (i, cat) in LandmarkCategory::ALL.iter().enumerate() {
            assert_eq!(LandmarkCategory::from_index(i), *cat);
        }
        assert_eq!(LandmarkCategory::from_index(99), LandmarkCategory::Unknown);
    }
}
