//! Trajectory Predictor.
//!
//! Projects `horizon` future positions from the recent path. The learned
//! path maps a fixed window of past points to the whole horizon in one
//! call; the heuristic path extrapolates the latest velocity at a fixed
//! step with linearly decaying confidence. Fewer than two points of
//! history is not an error: either path returns an empty sequence, and the
//! learned window is padded only once a velocity can be observed.
//!
//! ```text
//!   history (oldest → newest)        horizon
//!   ●────●────●────◉ current  ┄┄▸ ○ k=1 ┄▸ ○ k=2 ┄▸ … ○ k=horizon
//! ```

use crate::config::TrajectoryConfig;
use crate::error::StageError;
use crate::registry::ModelHandle;
use crate::types::{clamp_unit, window, PredictedWaypoint, StageOutput, TrajectoryPoint};
use async_trait::async_trait;
use nalgebra::Vector3;
use tracing::warn;

/// Features per history point: `[x, y, z, t_seconds]`
pub const TRAJECTORY_FEATURES: usize = 4;

/// Outputs per waypoint: `[x, y, z, confidence]`
pub const TRAJECTORY_OUTPUTS: usize = 4;

#[async_trait]
pub trait TrajectoryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Predicts from `history`, oldest first; the last point is the current position.
    async fn predict(&self, history: &[TrajectoryPoint]) -> Result<Vec<PredictedWaypoint>, StageError>;
}

/// Constant-velocity extrapolation from the two newest points.
#[derive(Debug, Clone)]
pub struct LinearExtrapolation {
    horizon: usize,
    step_ms: u64,
    start_confidence: f64,
    confidence_decay: f64,
    confidence_floor: f64,
}

impl LinearExtrapolation {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            horizon: config.horizon,
            step_ms: config.step_ms,
            start_confidence: config.start_confidence,
            confidence_decay: config.confidence_decay,
            confidence_floor: config.confidence_floor,
        }
    }

    /// Confidence of the `step`-th waypoint (1-based).
    pub fn step_confidence(&self, step: u32) -> f64 {
        let decayed = self.start_confidence - self.confidence_decay * f64::from(step.saturating_sub(1));
        clamp_unit(decayed.max(self.confidence_floor))
    }

    pub fn extrapolate(&self, history: &[TrajectoryPoint]) -> Vec<PredictedWaypoint> {
        let [prev, last] = match window(history, 2) {
            [a, b] => [*a, *b],
            _ => return Vec::new(),
        };

        let dt_ms = last.timestamp_ms as i64 - prev.timestamp_ms as i64;
        let velocity = if dt_ms > 0 {
            (last.position - prev.position) / (dt_ms as f64 / 1000.0)
        } else {
            Vector3::zeros()
        };
        let step_secs = self.step_ms as f64 / 1000.0;

        (1..=self.horizon as u32)
            .map(|k| PredictedWaypoint {
                position: last.position + velocity * (step_secs * f64::from(k)),
                confidence: self.step_confidence(k),
                steps_ahead: k,
                timestamp_ms: last.timestamp_ms + self.step_ms * u64::from(k),
            })
            .collect()
    }
}

#[async_trait]
impl TrajectoryStrategy for LinearExtrapolation {
    fn name(&self) -> &'static str {
        "linear_extrapolation"
    }

    async fn predict(&self, history: &[TrajectoryPoint]) -> Result<Vec<PredictedWaypoint>, StageError> {
        Ok(self.extrapolate(history))
    }
}

/// Whole-horizon learned prediction.
#[derive(Debug, Clone)]
pub struct LearnedTrajectory {
    model: ModelHandle,
    horizon: usize,
    model_window: usize,
    step_ms: u64,
}

impl LearnedTrajectory {
    pub fn new(model: ModelHandle, config: &TrajectoryConfig) -> Self {
        Self {
            model,
            horizon: config.horizon,
            model_window: config.model_window.max(1),
            step_ms: config.step_ms,
        }
    }

    /// `model_window` points, oldest first, padded with the current position.
    /// Times are seconds relative to the current point.
    fn features(&self, history: &[TrajectoryPoint], current: TrajectoryPoint) -> Vec<f32> {
        let recent = window(history, self.model_window);
        let padding = std::iter::repeat(current).take(self.model_window - recent.len());

        recent
            .iter()
            .copied()
            .chain(padding)
            .flat_map(|p| {
                let t = (p.timestamp_ms as f64 - current.timestamp_ms as f64) / 1000.0;
                [p.position.x as f32, p.position.y as f32, p.position.z as f32, t as f32]
            })
            .collect()
    }
}

#[async_trait]
impl TrajectoryStrategy for LearnedTrajectory {
    fn name(&self) -> &'static str {
        "learned"
    }

    async fn predict(&self, history: &[TrajectoryPoint]) -> Result<Vec<PredictedWaypoint>, StageError> {
        let Some(current) = history.last().copied() else {
            return Ok(Vec::new());
        };

        let input = self.features(history, current);
        let output = self.model.run(&input, self.horizon * TRAJECTORY_OUTPUTS).await?;

        output
            .chunks_exact(TRAJECTORY_OUTPUTS)
            .zip(1u32..)
            .map(|(out, k)| {
                let position = Vector3::new(out[0] as f64, out[1] as f64, out[2] as f64);
                if !position.iter().all(|v| v.is_finite()) {
                    return Err(StageError::InvalidReading(format!("non-finite waypoint at step {k}")));
                }
                Ok(PredictedWaypoint {
                    position,
                    confidence: clamp_unit(out[3] as f64),
                    steps_ahead: k,
                    timestamp_ms: current.timestamp_ms + self.step_ms * u64::from(k),
                })
            })
            .collect()
    }
}

/// The trajectory stage. A learned failure falls back to extrapolation.
pub struct TrajectoryPredictor {
    strategy: Box<dyn TrajectoryStrategy>,
    fallback: LinearExtrapolation,
}

impl TrajectoryPredictor {
    pub fn new(config: &TrajectoryConfig, model: Option<ModelHandle>) -> Self {
        let fallback = LinearExtrapolation::new(config);
        let strategy: Box<dyn TrajectoryStrategy> = match model {
            Some(model) => Box::new(LearnedTrajectory::new(model, config)),
            None => Box::new(fallback.clone()),
        };
        Self { strategy, fallback }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn predict(&self, history: &[TrajectoryPoint]) -> StageOutput<Vec<PredictedWaypoint>> {
        if history.len() < 2 {
            return StageOutput::clean(Vec::new());
        }
        match self.strategy.predict(history).await {
            Ok(waypoints) => StageOutput::clean(waypoints),
            Err(e) => {
                warn!(error = %e, "trajectory prediction failed, extrapolating");
                StageOutput::degraded(self.fallback.extrapolate(history))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failing_model, model};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vantage_env::Capability;

    fn point(x: f64, t: u64) -> TrajectoryPoint {
        TrajectoryPoint::new(Vector3::new(x, 0.0, 0.0), t)
    }

    fn config(horizon: usize) -> TrajectoryConfig {
        TrajectoryConfig {
            horizon,
            ..TrajectoryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_linear_extrapolation_scenario() {
        let predictor = TrajectoryPredictor::new(&config(5), None);
        let out = predictor.predict(&[point(0.0, 0), point(1.0, 1000)]).await;
        let waypoints = out.value;

        assert_eq!(waypoints.len(), 5);
        assert_relative_eq!(waypoints[0].position, Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(waypoints[0].confidence, 0.8, epsilon = 1e-9);
        assert_relative_eq!(waypoints[4].position, Vector3::new(6.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(waypoints[4].confidence, 0.4, epsilon = 1e-9);
        assert_eq!(waypoints[4].timestamp_ms, 6000);
    }

    #[test]
    fn test_confidence_is_floored() {
        let linear = LinearExtrapolation::new(&TrajectoryConfig::default());
        assert_relative_eq!(linear.step_confidence(6), 0.3, epsilon = 1e-9);
        assert_relative_eq!(linear.step_confidence(10), 0.3, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_short_history_is_empty_not_error() {
        let predictor = TrajectoryPredictor::new(&config(5), None);
        assert!(predictor.predict(&[]).await.value.is_empty());

        let out = predictor.predict(&[point(3.0, 0)]).await;
        assert!(out.value.is_empty());
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn test_zero_dt_holds_position() {
        let predictor = TrajectoryPredictor::new(&config(3), None);
        let out = predictor.predict(&[point(0.0, 500), point(4.0, 500)]).await;
        assert_eq!(out.value.len(), 3);
        for w in &out.value {
            assert_relative_eq!(w.position.x, 4.0);
        }
    }

    #[tokio::test]
    async fn test_learned_pads_window_and_maps_outputs() {
        let handle = model(Capability::TrajectoryPrediction, |input: &[f32]| {
            // 10 points x 4 features; the padded tail repeats the current point at t=0
            assert_eq!(input.len(), 40);
            assert_eq!(&input[36..40], &[1.0, 0.0, 0.0, 0.0]);
            assert_eq!(input[3], -1.0);
            Ok((1..=3).flat_map(|k| [k as f32, 0.0, 0.0, 0.9]).collect())
        });
        let predictor = TrajectoryPredictor::new(&config(3), Some(handle));
        let out = predictor.predict(&[point(0.0, 0), point(1.0, 1000)]).await;

        assert!(!out.degraded);
        let steps: Vec<u32> = out.value.iter().map(|w| w.steps_ahead).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_relative_eq!(out.value[2].position.x, 3.0);
        assert_relative_eq!(out.value[0].confidence, 0.9, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn test_learned_path_needs_two_points() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = Arc::clone(&calls);
            model(Capability::TrajectoryPrediction, move |_: &[f32]| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok((1..=10).flat_map(|k| [k as f32, 0.0, 0.0, 0.9]).collect())
            })
        };
        let predictor = TrajectoryPredictor::new(&config(10), Some(handle));

        let out = predictor.predict(&[point(0.0, 0)]).await;
        assert!(out.value.is_empty());
        assert!(!out.degraded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let out = predictor.predict(&[point(0.0, 0), point(1.0, 1000)]).await;
        assert_eq!(out.value.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_learned_failure_falls_back_to_extrapolation() {
        let predictor = TrajectoryPredictor::new(&config(5), Some(failing_model(Capability::TrajectoryPrediction)));
        let out = predictor.predict(&[point(0.0, 0), point(1.0, 1000)]).await;

        assert!(out.degraded);
        assert_eq!(out.value.len(), 5);
        assert_relative_eq!(out.value[0].position.x, 2.0, epsilon = 1e-9);
    }

    proptest! {
        #[test]
        fn prop_waypoints_ordered_and_sized(
            xs in prop::collection::vec(-100.0f64..100.0, 0..8),
            horizon in 1usize..20,
        ) {
            let history: Vec<_> = xs
                .iter()
                .enumerate()
                .map(|(i, x)| point(*x, i as u64 * 250))
                .collect();
            let linear = LinearExtrapolation::new(&config(horizon));
            let waypoints = linear.extrapolate(&history);

            if history.len() >= 2 {
                prop_assert_eq!(waypoints.len(), horizon);
            } else {
                prop_assert!(waypoints.is_empty());
            }
            for (i, w) in waypoints.iter().enumerate() {
                prop_assert_eq!(w.steps_ahead as usize, i + 1);
                prop_assert!((0.0..=1.0).contains(&w.confidence));
            }
        }
    }
}
