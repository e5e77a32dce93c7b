//! One processing cycle.
//!
//! ```text
//!            ┌──────────┐   ┌──────────┐   ┌─▶ trajectory ─┐   ┌────────────┐   ┌──────────┐
//!  context ─▶│  fusion  │──▶│ denoise  │───┤               ├──▶│ confidence │──▶│ insights │
//!            └──────────┘   └──────────┘   └─▶ landmarks ──┘   └────────────┘   └──────────┘
//! ```
//!
//! Each stage body runs as its own tokio task so a panic inside a strategy
//! (or a learned model) surfaces as a `JoinError` and degrades only that
//! stage. Trajectory and landmarks share only read-only inputs and run
//! concurrently. The pipeline owns every stage task it spawns; dropping an
//! in-flight [`CorrectionPipeline::process`] future leaves them tracked
//! until [`CorrectionPipeline::cancel_in_flight`] aborts and awaits them.

use crate::buffer::MeasurementBuffer;
use crate::config::EngineConfig;
use crate::confidence::ConfidenceAggregator;
use crate::denoise::NoiseReductionStage;
use crate::error::StageError;
use crate::fusion::SensorFusionCorrector;
use crate::insights::InsightGenerator;
use crate::landmarks::LandmarkEnhancer;
use crate::registry::CapabilityRegistry;
use crate::trajectory::TrajectoryPredictor;
use crate::types::{EnhancedState, FusionContext, Insight, Stage, StageOutput, TrajectoryPoint};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use vantage_env::Capability;

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub state: Arc<EnhancedState>,
    pub insights: Vec<Insight>,
}

/// Stage tasks spawned by the pipeline that have not been joined yet.
#[derive(Default)]
struct StageTasks {
    set: JoinSet<()>,
}

impl StageTasks {
    /// Spawns a stage body; its output arrives on the returned receiver.
    fn spawn<T, F>(&mut self, task: F) -> oneshot::Receiver<StageOutput<T>>
    where
        T: Send + 'static,
        F: Future<Output = StageOutput<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.set.spawn(async move {
            let _ = tx.send(task.await);
        });
        rx
    }

    /// Joins tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.set.try_join_next() {
            if let Err(e) = result {
                debug!(error = %e, "stage task joined abnormally");
            }
        }
    }

    /// Aborts every tracked task and waits until none is left running.
    async fn cancel(&mut self) {
        if self.set.is_empty() {
            return;
        }
        let in_flight = self.set.len();
        self.set.abort_all();
        while self.set.join_next().await.is_some() {}
        debug!(in_flight, "stage tasks cancelled");
    }
}

/// Waits for a stage task's output. A task that panicked drops its sender.
async fn contain<T>(output: oneshot::Receiver<StageOutput<T>>) -> Result<StageOutput<T>, StageError> {
    output
        .await
        .map_err(|_| StageError::TaskFailed("stage task panicked".into()))
}

/// Unwraps a contained stage result, recording degradation.
fn settle<T>(
    stage: Stage,
    result: Result<StageOutput<T>, StageError>,
    degraded: &mut Vec<Stage>,
    fallback: impl FnOnce() -> T,
) -> T {
    match result {
        Ok(out) => {
            if out.degraded {
                degraded.push(stage);
            }
            out.value
        }
        Err(e) => {
            warn!(stage = stage.name(), error = %e, "stage task failed, using degraded output");
            degraded.push(stage);
            fallback()
        }
    }
}

/// The per-cycle chain of correction stages.
pub struct CorrectionPipeline {
    fusion: Arc<SensorFusionCorrector>,
    denoise: Arc<NoiseReductionStage>,
    trajectory: Arc<TrajectoryPredictor>,
    landmarks: Arc<LandmarkEnhancer>,
    aggregator: ConfidenceAggregator,
    insights: InsightGenerator,
    buffer: Arc<MeasurementBuffer>,
    tasks: StageTasks,
}

impl CorrectionPipeline {
    /// Builds every stage on the path the registry resolved for it.
    pub fn new(config: &EngineConfig, registry: &CapabilityRegistry, buffer: Arc<MeasurementBuffer>) -> Self {
        Self {
            fusion: Arc::new(SensorFusionCorrector::new(
                &config.fusion,
                registry.model(Capability::Fusion),
            )),
            denoise: Arc::new(NoiseReductionStage::new(
                &config.denoise,
                registry.model(Capability::NoiseReduction),
            )),
            trajectory: Arc::new(TrajectoryPredictor::new(
                &config.trajectory,
                registry.model(Capability::TrajectoryPrediction),
            )),
            landmarks: Arc::new(LandmarkEnhancer::new(
                &config.landmarks,
                registry.model(Capability::LandmarkClassification),
            )),
            aggregator: ConfidenceAggregator::new(),
            insights: InsightGenerator::new(config.insights.clone()),
            buffer,
            tasks: StageTasks::default(),
        }
    }

    /// The strategy each stage runs.
    pub fn strategies(&self) -> [(Stage, &'static str); 4] {
        [
            (Stage::Fusion, self.fusion.strategy_name()),
            (Stage::NoiseReduction, self.denoise.strategy_name()),
            (Stage::Trajectory, self.trajectory.strategy_name()),
            (Stage::Landmarks, self.landmarks.strategy_name()),
        ]
    }

    /// Aborts the stage tasks of an interrupted cycle and waits for them to
    /// stop. A task blocked inside a model call finishes that call first.
    pub async fn cancel_in_flight(&mut self) {
        self.tasks.cancel().await;
    }

    /// Runs one cycle and appends `context` to the buffer. Always produces
    /// a complete state.
    pub async fn process(&mut self, context: FusionContext) -> CycleOutput {
        let started = Instant::now();
        self.tasks.reap();
        let context = Arc::new(context);
        let history: Arc<[Arc<FusionContext>]> = self.buffer.snapshot().into();
        let mut degraded = Vec::new();

        // Fusion
        let result = {
            let (stage, ctx, hist) = (Arc::clone(&self.fusion), Arc::clone(&context), Arc::clone(&history));
            contain(self.tasks.spawn(async move { stage.correct(&ctx, &hist).await })).await
        };
        let fused = settle(Stage::Fusion, result, &mut degraded, || {
            self.fusion.degrade(&context.readings)
        });

        // Noise reduction
        let result = {
            let (stage, input, hist) = (Arc::clone(&self.denoise), fused.clone(), Arc::clone(&history));
            contain(self.tasks.spawn(async move { stage.reduce(input, &hist).await })).await
        };
        let readings = settle(Stage::NoiseReduction, result, &mut degraded, || fused);

        // Trajectory and landmarks, concurrently
        let path: Arc<[TrajectoryPoint]> = history
            .iter()
            .map(|c| c.trajectory_point())
            .chain(std::iter::once(context.trajectory_point()))
            .collect();
        let trajectory_task = {
            let stage = Arc::clone(&self.trajectory);
            self.tasks.spawn(async move { stage.predict(&path).await })
        };
        let landmark_task = {
            let (stage, ctx, input, hist) = (
                Arc::clone(&self.landmarks),
                Arc::clone(&context),
                readings.clone(),
                Arc::clone(&history),
            );
            self.tasks.spawn(async move { stage.enhance(&ctx.base, &input, &hist).await })
        };
        let (trajectory, landmarks) = tokio::join!(contain(trajectory_task), contain(landmark_task));
        let trajectory = settle(Stage::Trajectory, trajectory, &mut degraded, Vec::new);
        let landmarks = settle(Stage::Landmarks, landmarks, &mut degraded, || {
            self.landmarks.degrade(&context.base)
        });

        let confidence = self.aggregator.aggregate(&readings, &trajectory, &landmarks);
        let latency = started.elapsed();

        let state = EnhancedState {
            cycle: context.cycle,
            base: context.base.clone(),
            readings,
            trajectory,
            landmarks,
            confidence,
            latency,
            timestamp_ms: context.timestamp_ms,
            degraded,
        };

        self.buffer.push(Arc::clone(&context));
        let insights = self.insights.generate(&state);

        debug!(
            cycle = state.cycle,
            readings = state.readings.len(),
            waypoints = state.trajectory.len(),
            landmarks = state.landmarks.len(),
            overall = state.confidence.overall_confidence,
            latency_us = latency.as_micros() as u64,
            "cycle processed"
        );

        CycleOutput {
            state: Arc::new(state),
            insights,
        }
    }
}
