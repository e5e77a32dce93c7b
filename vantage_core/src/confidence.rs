//! Confidence Aggregator.

use crate::types::{clamp_unit, mean, ConfidenceReport, EnhancedLandmark, EnhancedReading, PredictedWaypoint};
use std::collections::{BTreeMap, HashSet};
use vantage_env::RangingModality;

pub const MEASUREMENT_QUALITY: &str = "measurement_quality";
pub const PREDICTION_QUALITY: &str = "prediction_quality";
pub const TEMPORAL_CONSISTENCY: &str = "temporal_consistency";
pub const SENSOR_COVERAGE: &str = "sensor_coverage";
pub const LANDMARK_QUALITY: &str = "landmark_quality";

/// Trajectory confidence reported when nothing was predicted.
pub const EMPTY_TRAJECTORY_CONFIDENCE: f64 = 0.5;

/// Folds one cycle's stage outputs into a [`ConfidenceReport`].
///
/// Remembers the previous cycle's overall confidence for the
/// `temporal_consistency` indicator, so one aggregator serves one stream
/// of cycles.
#[derive(Debug, Default)]
pub struct ConfidenceAggregator {
    previous_overall: Option<f64>,
}

impl ConfidenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(
        &mut self,
        readings: &[EnhancedReading],
        trajectory: &[PredictedWaypoint],
        landmarks: &[EnhancedLandmark],
    ) -> ConfidenceReport {
        let measurement = clamp_unit(mean(readings.iter().map(|r| r.inference_confidence)).unwrap_or(0.0));
        let prediction = clamp_unit(
            mean(trajectory.iter().map(|w| w.confidence)).unwrap_or(EMPTY_TRAJECTORY_CONFIDENCE),
        );
        let overall = clamp_unit((measurement + prediction) / 2.0);

        let consistency = match self.previous_overall.replace(overall) {
            Some(previous) => clamp_unit(1.0 - (overall - previous).abs()),
            None => 1.0,
        };

        let modalities: HashSet<RangingModality> = readings.iter().map(|r| r.modality()).collect();

        let mut indicators = BTreeMap::new();
        indicators.insert(
            MEASUREMENT_QUALITY.to_string(),
            clamp_unit(mean(readings.iter().map(|r| r.quality_score)).unwrap_or(0.0)),
        );
        indicators.insert(PREDICTION_QUALITY.to_string(), prediction);
        indicators.insert(TEMPORAL_CONSISTENCY.to_string(), consistency);
        indicators.insert(
            SENSOR_COVERAGE.to_string(),
            modalities.len() as f64 / RangingModality::ALL.len() as f64,
        );
        if let Some(reliability) = mean(landmarks.iter().map(|l| l.reliability)) {
            indicators.insert(LANDMARK_QUALITY.to_string(), clamp_unit(reliability));
        }

        ConfidenceReport {
            measurement_confidence: measurement,
            trajectory_confidence: prediction,
            overall_confidence: overall,
            indicators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wifi;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use proptest::prelude::*;
    use vantage_env::RangingReading;

    fn waypoint(confidence: f64, k: u32) -> PredictedWaypoint {
        PredictedWaypoint {
            position: Vector3::zeros(),
            confidence,
            steps_ahead: k,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_empty_inputs_use_defaults() {
        let mut aggregator = ConfidenceAggregator::new();
        let report = aggregator.aggregate(&[], &[], &[]);

        assert_eq!(report.measurement_confidence, 0.0);
        assert_eq!(report.trajectory_confidence, 0.5);
        assert_eq!(report.overall_confidence, 0.25);
        assert_eq!(report.indicator(TEMPORAL_CONSISTENCY), Some(1.0));
        assert_eq!(report.indicator(SENSOR_COVERAGE), Some(0.0));
        assert_eq!(report.indicator(LANDMARK_QUALITY), None);
    }

    #[test]
    fn test_means_and_consistency() {
        let mut aggregator = ConfidenceAggregator::new();
        let readings = vec![
            EnhancedReading::new(wifi("a", 1.0, 0.9), 1.0, 0.9, 0.6, 0.9),
            EnhancedReading::new(wifi("b", 2.0, 0.7), 2.0, 0.7, 0.8, 0.5),
        ];
        let trajectory = vec![waypoint(0.8, 1), waypoint(0.6, 2)];

        let first = aggregator.aggregate(&readings, &trajectory, &[]);
        assert_relative_eq!(first.measurement_confidence, 0.7, epsilon = 1e-9);
        assert_relative_eq!(first.trajectory_confidence, 0.7, epsilon = 1e-9);
        assert_relative_eq!(first.overall_confidence, 0.7, epsilon = 1e-9);
        assert_relative_eq!(first.indicator(MEASUREMENT_QUALITY).unwrap(), 0.7, epsilon = 1e-9);
        assert_relative_eq!(first.indicator(SENSOR_COVERAGE).unwrap(), 1.0 / 3.0, epsilon = 1e-9);

        // overall drops to 0.25 → consistency 1 - 0.45
        let second = aggregator.aggregate(&[], &[], &[]);
        assert_relative_eq!(second.indicator(TEMPORAL_CONSISTENCY).unwrap(), 0.55, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_report_always_in_unit_range(
            confidences in prop::collection::vec(-1.0f64..2.0, 0..16),
            waypoints in prop::collection::vec(-1.0f64..2.0, 0..12),
        ) {
            let mut aggregator = ConfidenceAggregator::new();
            let readings: Vec<_> = confidences
                .iter()
                .map(|c| EnhancedReading::new(RangingReading::new("s", 1.0, 0.5, RangingModality::AcousticChirp, 0), 1.0, *c, *c, *c))
                .collect();
            let trajectory: Vec<_> = waypoints
                .iter()
                .zip(1u32..)
                .map(|(c, k)| waypoint(*c, k))
                .collect();

            for _ in 0..2 {
                let report = aggregator.aggregate(&readings, &trajectory, &[]);
                prop_assert!((0.0..=1.0).contains(&report.measurement_confidence));
                prop_assert!((0.0..=1.0).contains(&report.trajectory_confidence));
                prop_assert!((0.0..=1.0).contains(&report.overall_confidence));
                for value in report.indicators.values() {
                    prop_assert!((0.0..=1.0).contains(value));
                }
            }
        }
    }
}
