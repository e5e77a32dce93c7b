//! Parameter Advisor.
//!
//! Reads the whole measurement buffer on its own slow cadence and turns
//! three rolling metrics into tuning flags for the upstream estimator:
//!
//! | metric                 | source                                   | flag when            |
//! |------------------------|------------------------------------------|----------------------|
//! | tracking stability     | mean − std-dev of base confidence        | < stability threshold |
//! | sensor performance     | mean stated accuracy of buffered readings | < sensor threshold    |
//! | environment complexity | mean landmark count / scale              | > complexity threshold |

use crate::config::AdvisorConfig;
use crate::types::{clamp_unit, mean, FusionContext, ParameterRecommendation};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ParameterAdvisor {
    config: AdvisorConfig,
}

impl ParameterAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Assesses `history`. An empty history yields no recommendation.
    pub fn assess(&self, history: &[Arc<FusionContext>], timestamp_ms: u64) -> Option<ParameterRecommendation> {
        let confidences: Vec<f64> = history.iter().map(|c| c.base.confidence).collect();
        let mean_confidence = mean(confidences.iter().copied())?;
        let variance = mean(confidences.iter().map(|c| (c - mean_confidence).powi(2))).unwrap_or(0.0);
        let stability = clamp_unit(mean_confidence - variance.sqrt());

        // No readings at all says nothing bad about the sensors
        let sensor_performance = clamp_unit(
            mean(
                history
                    .iter()
                    .flat_map(|c| c.readings.iter())
                    .map(|r| r.accuracy),
            )
            .unwrap_or(1.0),
        );

        let scale = self.config.complexity_landmark_scale.max(f64::EPSILON);
        let complexity = clamp_unit(
            mean(history.iter().map(|c| c.base.landmarks.len() as f64)).unwrap_or(0.0) / scale,
        );

        Some(ParameterRecommendation {
            tracking_stability: stability,
            sensor_performance,
            environment_complexity: complexity,
            increase_process_noise: stability < self.config.stability_threshold,
            increase_measurement_noise: sensor_performance < self.config.sensor_threshold,
            increase_particle_count: complexity > self.config.complexity_threshold,
            sample_count: history.len(),
            timestamp_ms,
        })
    }
}

impl Default for ParameterAdvisor {
    fn default() -> Self {
        Self::new(AdvisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wifi;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use vantage_env::BasePoseEstimate;

    fn ctx(confidence: f64, accuracy: f64, landmarks: usize) -> Arc<FusionContext> {
        let base = BasePoseEstimate::at(Vector3::zeros(), confidence)
            .with_landmarks(vec![Vector3::zeros(); landmarks]);
        Arc::new(FusionContext::new(0, vec![wifi("a", 3.0, accuracy)], 0, base))
    }

    #[test]
    fn test_empty_history_has_no_recommendation() {
        assert!(ParameterAdvisor::default().assess(&[], 0).is_none());
    }

    #[test]
    fn test_healthy_history_raises_nothing() {
        let history: Vec<_> = (0..10).map(|_| ctx(0.9, 0.9, 5)).collect();
        let rec = ParameterAdvisor::default().assess(&history, 7).unwrap();

        assert_relative_eq!(rec.tracking_stability, 0.9, epsilon = 1e-9);
        assert_relative_eq!(rec.sensor_performance, 0.9, epsilon = 1e-9);
        assert_relative_eq!(rec.environment_complexity, 0.1, epsilon = 1e-9);
        assert!(!rec.any_raised());
        assert_eq!(rec.sample_count, 10);
        assert_eq!(rec.timestamp_ms, 7);
    }

    #[test]
    fn test_flags_are_independent() {
        // Jittery confidence, poor sensors, crowded scene
        let history: Vec<_> = (0..10)
            .map(|i| ctx(if i % 2 == 0 { 0.9 } else { 0.3 }, 0.5, 45))
            .collect();
        let rec = ParameterAdvisor::default().assess(&history, 0).unwrap();

        // mean 0.6, std-dev 0.3
        assert_relative_eq!(rec.tracking_stability, 0.3, epsilon = 1e-9);
        assert!(rec.increase_process_noise);
        assert!(rec.increase_measurement_noise);
        assert!(rec.increase_particle_count);

        let history: Vec<_> = (0..4).map(|_| ctx(0.9, 0.4, 0)).collect();
        let rec = ParameterAdvisor::default().assess(&history, 0).unwrap();
        assert!(!rec.increase_process_noise);
        assert!(rec.increase_measurement_noise);
        assert!(!rec.increase_particle_count);
    }
}
