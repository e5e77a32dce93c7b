//! Insight Generator.
//!
//! A flat rule set evaluated once per cycle over the finished state. Rules
//! are independent; a cycle can yield zero, one or all of them.

use crate::config::InsightConfig;
use crate::types::{mean, EnhancedState, Insight, InsightCategory};

#[derive(Debug, Clone)]
pub struct InsightGenerator {
    config: InsightConfig,
}

impl InsightGenerator {
    pub fn new(config: InsightConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self, state: &EnhancedState) -> Vec<Insight> {
        let mut insights = Vec::new();
        let ts = state.timestamp_ms;
        let overall = state.confidence.overall_confidence;

        let improvement = overall - state.base.confidence;
        if improvement > self.config.improvement_threshold {
            insights.push(Insight::new(
                InsightCategory::AccuracyImprovement,
                format!("Correction improved confidence by {:.0}%", improvement * 100.0),
                overall,
                improvement,
                ts,
            ));
        }

        let poor = state
            .readings
            .iter()
            .filter(|r| r.quality_score < self.config.low_quality_threshold)
            .count();
        if poor > 0 {
            insights.push(Insight::new(
                InsightCategory::SensorPerformance,
                format!("{poor} of {} readings have low sensor quality", state.readings.len()),
                state.confidence.measurement_confidence,
                poor as f64,
                ts,
            ));
        }

        if let Some(predicted) = mean(state.trajectory.iter().map(|w| w.confidence)) {
            if predicted > self.config.trajectory_threshold {
                insights.push(Insight::new(
                    InsightCategory::TrajectoryPrediction,
                    format!(
                        "High-confidence path predicted {} steps ahead",
                        state.trajectory.len()
                    ),
                    predicted,
                    predicted,
                    ts,
                ));
            }
        }

        insights
    }
}

impl Default for InsightGenerator {
    fn default() -> Self {
        Self::new(InsightConfig::default())
    }
}
