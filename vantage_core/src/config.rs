//! Engine configuration.
//!
//! Every constant the correction stages use lives here with its default,
//! so deployments can retune blend ratios and thresholds without code
//! changes. All sections accept partial JSON (`#[serde(default)]`).

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Rolling history buffer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of buffered cycles (default: 500)
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 500 }
    }
}

/// Sensor Fusion Corrector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Buffered cycles consulted for the per-modality median (default: 5)
    pub history_window: usize,

    /// Relative deviation from the median that marks an outlier (default: 0.30)
    pub outlier_deviation: f64,

    /// Weight of the original distance in the outlier blend (default: 0.3)
    pub blend_original_weight: f64,

    /// Confidence assigned by the heuristic path (default: 0.6)
    pub heuristic_confidence: f64,

    /// Confidence and quality assigned to a reading that failed correction (default: 0.5)
    pub failure_score: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            outlier_deviation: 0.30,
            blend_original_weight: 0.3,
            heuristic_confidence: 0.6,
            failure_score: 0.5,
        }
    }
}

/// Noise Reduction Stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Buffered cycles in the moving average (default: 3)
    pub history_window: usize,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self { history_window: 3 }
    }
}

/// Trajectory Predictor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Number of predicted waypoints (default: 10)
    pub horizon: usize,

    /// Historical points fed to the learned model (default: 10)
    pub model_window: usize,

    /// Spacing between predicted waypoints in ms (default: 1000)
    pub step_ms: u64,

    /// Confidence of the first extrapolated waypoint (default: 0.8)
    pub start_confidence: f64,

    /// Confidence lost per extrapolated step (default: 0.1)
    pub confidence_decay: f64,

    /// Lowest extrapolated confidence (default: 0.3)
    pub confidence_floor: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            horizon: 10,
            model_window: 10,
            step_ms: 1000,
            start_confidence: 0.8,
            confidence_decay: 0.1,
            confidence_floor: 0.3,
        }
    }
}

/// Landmark Enhancer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// Learned classifications at or below this confidence are dropped (default: 0.7)
    pub confidence_threshold: f64,

    /// Heuristic classification confidence (default: 0.5)
    pub fallback_confidence: f64,

    /// Heuristic reliability (default: 0.6)
    pub fallback_reliability: f64,

    /// Heuristic temporal stability (default: 0.7)
    pub fallback_stability: f64,

    /// Distance under which a buffered landmark counts as the same one (default: 0.5 m)
    pub match_radius: f64,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            fallback_confidence: 0.5,
            fallback_reliability: 0.6,
            fallback_stability: 0.7,
            match_radius: 0.5,
        }
    }
}

/// Insight Generator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Minimum improvement over the base estimate (default: 0.1)
    pub improvement_threshold: f64,

    /// Quality score under which a reading counts as poor (default: 0.5)
    pub low_quality_threshold: f64,

    /// Mean waypoint confidence above which prediction is reported (default: 0.8)
    pub trajectory_threshold: f64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            improvement_threshold: 0.1,
            low_quality_threshold: 0.5,
            trajectory_threshold: 0.8,
        }
    }
}

/// Parameter Advisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Cadence of the background assessment in ms (default: 5000)
    pub interval_ms: u64,

    /// Below this, recommend more process noise (default: 0.6)
    pub stability_threshold: f64,

    /// Below this, recommend more measurement noise (default: 0.7)
    pub sensor_threshold: f64,

    /// Above this, recommend more particles (default: 0.8)
    pub complexity_threshold: f64,

    /// Landmark count that maps to full complexity (default: 50)
    pub complexity_landmark_scale: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            stability_threshold: 0.6,
            sensor_threshold: 0.7,
            complexity_threshold: 0.8,
            complexity_landmark_scale: 50.0,
        }
    }
}

impl AdvisorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Event stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Per-subscriber queue length; older events are dropped for laggards (default: 256)
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Root configuration for the correction engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub fusion: FusionConfig,
    pub denoise: DenoiseConfig,
    pub trajectory: TrajectoryConfig,
    pub landmarks: LandmarkConfig,
    pub insights: InsightConfig,
    pub advisor: AdvisorConfig,
    pub events: EventConfig,

    /// Budget for a single inference call in ms, measured on the engine
    /// context's clock (virtual time under simulation). `None` waits
    /// indefinitely.
    pub inference_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Parses a (possibly partial) JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects settings that would break stage invariants.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buffer.capacity == 0 {
            return Err(EngineError::Config("buffer.capacity must be > 0".into()));
        }
        if self.trajectory.horizon == 0 {
            return Err(EngineError::Config("trajectory.horizon must be > 0".into()));
        }
        if self.trajectory.step_ms == 0 {
            return Err(EngineError::Config("trajectory.step_ms must be > 0".into()));
        }
        if self.advisor.interval_ms == 0 {
            return Err(EngineError::Config("advisor.interval_ms must be > 0".into()));
        }
        if self.events.channel_capacity == 0 {
            return Err(EngineError::Config("events.channel_capacity must be > 0".into()));
        }

        let unit_fields = [
            ("fusion.outlier_deviation", self.fusion.outlier_deviation),
            ("fusion.blend_original_weight", self.fusion.blend_original_weight),
            ("fusion.heuristic_confidence", self.fusion.heuristic_confidence),
            ("fusion.failure_score", self.fusion.failure_score),
            ("trajectory.start_confidence", self.trajectory.start_confidence),
            ("trajectory.confidence_decay", self.trajectory.confidence_decay),
            ("trajectory.confidence_floor", self.trajectory.confidence_floor),
            ("landmarks.confidence_threshold", self.landmarks.confidence_threshold),
            ("landmarks.fallback_confidence", self.landmarks.fallback_confidence),
            ("landmarks.fallback_reliability", self.landmarks.fallback_reliability),
            ("landmarks.fallback_stability", self.landmarks.fallback_stability),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!("{name} must be in [0, 1], got {value}")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer.capacity, 500);
        assert_eq!(config.fusion.history_window, 5);
        assert_eq!(config.denoise.history_window, 3);
        assert_eq!(config.trajectory.horizon, 10);
        assert_eq!(config.landmarks.confidence_threshold, 0.7);
        assert_eq!(config.advisor.interval(), Duration::from_secs(5));
        assert!(config.inference_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "trajectory": { "horizon": 5 }, "inference_timeout_ms": 250 }"#,
        )
        .unwrap();

        assert_eq!(config.trajectory.horizon, 5);
        assert_eq!(config.trajectory.step_ms, 1000);
        assert_eq!(config.fusion.blend_original_weight, 0.3);
        assert_eq!(config.inference_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "buffer": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{ "fusion": { "failure_score": 1.5 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("fusion.failure_score"));

        assert!(matches!(
            EngineConfig::from_json_str("{ not json"),
            Err(EngineError::Json(_))
        ));
    }
}
