//! Scenario runner - drives the correction engine against the oracle.

use crate::context::SimContext;
use crate::models::{ModelBehavior, ScriptedLoader};
use crate::oracle::{Oracle, OracleStep};
use crate::scenarios::ScenarioId;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vantage_core::{Engine, EngineConfig, EnhancedState, EventStream, ParameterRecommendation, Stage};
use vantage_env::{Capability, EngineContext, ModelLoader, NoModels, SharedPose};

/// Wall-clock budget for the final advisor round.
const ADVISOR_WAIT: Duration = Duration::from_secs(1);

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    #[serde(serialize_with = "serialize_scenario")]
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames submitted
    pub cycles: u64,

    /// Every assertion that failed, in the order it was hit
    pub failures: Vec<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    /// The first failure, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failures.first().map(String::as_str)
    }
}

fn serialize_scenario<S: serde::Serializer>(scenario: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(scenario.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Enhanced states received from the engine
    pub states_received: u64,

    /// Stage degradations summed over all states
    pub degraded_stages: u64,

    pub insights: u64,
    pub recommendations: u64,

    /// Events the runner's subscriptions lost to lag
    pub dropped_events: u64,

    pub outliers_injected: u64,

    /// Mean |raw - truth| over injected outliers (m)
    pub raw_outlier_error: f64,

    /// Mean |corrected - truth| over injected outliers (m)
    pub corrected_outlier_error: f64,

    pub landmarks_kept: u64,
    pub landmarks_offered: u64,

    /// Mean overall confidence across states
    pub mean_confidence: f64,

    pub final_recommendation: Option<ParameterRecommendation>,
}

/// Runs correction-engine scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frames per run
    cycles: u64,

    config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            cycles: 120,
            config: EngineConfig::default(),
        }
    }

    /// Sets the number of frames per run.
    pub fn with_cycles(mut self, cycles: u64) -> Self {
        self.cycles = cycles.max(2);
        self
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let context = SimContext::shared(self.seed);
        let horizon = self.config.trajectory.horizon;

        let oracle = match scenario {
            ScenarioId::OutlierBurst => Oracle::new(context.derive_seed(1)).with_outliers(0.2),
            // Enough decay that the buffered mean ends well below the sensor threshold
            ScenarioId::AdvisorDrift => {
                Oracle::new(context.derive_seed(1)).with_accuracy_drift(0.5 / self.cycles as f64)
            }
            _ => Oracle::new(context.derive_seed(1)),
        };
        let loader: Box<dyn ModelLoader> = match scenario {
            ScenarioId::ModelFailure => Box::new(ScriptedLoader::all(ModelBehavior::AlwaysFail, horizon)),
            ScenarioId::Learned => Box::new(ScriptedLoader::all(ModelBehavior::WellBehaved, horizon)),
            _ => Box::new(NoModels),
        };

        let mut run = Run::new(scenario, self.seed, self.cycles);
        if let Err(reason) = self.drive(&mut run, context, oracle, loader.as_ref()).await {
            run.fail(reason);
        }
        run.finish()
    }

    async fn drive(
        &self,
        run: &mut Run,
        context: Arc<SimContext>,
        mut oracle: Oracle,
        loader: &dyn ModelLoader,
    ) -> Result<(), String> {
        let first = oracle.step();
        let pose = SharedPose::new(first.base.clone());
        let engine = Engine::start(Arc::clone(&context), self.config.clone(), loader, Arc::new(pose.clone()))
            .await
            .map_err(|e| format!("engine failed to start: {e}"))?;

        let mut states = engine.subscribe_states().map_err(|e| e.to_string())?;
        let mut insights = engine.subscribe_insights().map_err(|e| e.to_string())?;
        let mut recommendations = engine.subscribe_recommendations().map_err(|e| e.to_string())?;

        self.check_registry(run, &engine);

        let step_interval = Duration::from_millis(oracle.step_interval_ms());
        let mut step = first;
        for cycle in 0..self.cycles {
            if cycle > 0 {
                step = oracle.step();
            }
            pose.publish(step.base.clone());
            context.advance_time(step_interval);
            if let Err(e) = engine.submit(step.frame.clone()) {
                run.fail(format!("submit failed at cycle {cycle}: {e}"));
                break;
            }

            let Some(state) = states.next().await else {
                run.fail(format!("state stream closed at cycle {cycle}"));
                break;
            };
            run.metrics.states_received += 1;
            self.check_state(run, cycle, &step, &state);

            while insights.try_next().is_some() {
                run.metrics.insights += 1;
            }
            while recommendations.try_next().is_some() {
                run.metrics.recommendations += 1;
            }

            if cycle % 20 == 0 {
                debug!(
                    "  cycle={} | overall={:.2} | degraded={} | landmarks={}",
                    cycle,
                    state.confidence.overall_confidence,
                    state.degraded.len(),
                    state.landmarks.len()
                );
            }
        }

        // One more advisor round over the full history
        let final_ts = context.timestamp_ms() + self.config.advisor.interval_ms;
        context.advance_time(self.config.advisor.interval());
        let recommendation = await_recommendation(&mut recommendations, final_ts, &mut run.metrics.recommendations).await;
        run.metrics.final_recommendation = recommendation.or_else(|| engine.latest_recommendation());

        engine.shutdown().await;
        run.metrics.dropped_events = states.dropped() + insights.dropped() + recommendations.dropped();

        if states.next().await.is_some() {
            run.fail("state published after shutdown");
        }
        if engine.submit(step.frame).is_ok() {
            run.fail("submit accepted after shutdown");
        }

        let stats = engine.stats();
        if stats.cycles_processed != self.cycles {
            run.fail(format!("engine processed {} of {} cycles", stats.cycles_processed, self.cycles));
        }
        Ok(())
    }

    fn check_registry(&self, run: &mut Run, engine: &Engine<SimContext>) {
        let expected_learned = match run.scenario {
            ScenarioId::ModelFailure | ScenarioId::Learned => Capability::ALL.len(),
            _ => 0,
        };
        let learned = engine.registry().learned_count();
        if learned != expected_learned {
            run.fail(format!("{learned} learned capabilities, expected {expected_learned}"));
        }

        for (stage, strategy) in engine.strategies() {
            let is_learned = *strategy == "learned";
            if is_learned != (expected_learned > 0) {
                run.fail(format!("{} stage runs strategy {strategy}", stage.name()));
            }
        }
    }

    fn check_state(&self, run: &mut Run, cycle: u64, step: &OracleStep, state: &EnhancedState) {
        let horizon = self.config.trajectory.horizon;
        let threshold = self.config.landmarks.confidence_threshold;

        if state.cycle != cycle {
            run.fail(format!("state for cycle {} arrived at cycle {cycle}", state.cycle));
        }
        if state.readings.len() != step.frame.readings.len() {
            run.fail(format!(
                "cycle {cycle}: {} enhanced readings for {} raw",
                state.readings.len(),
                step.frame.readings.len()
            ));
        }
        // Cycle 0 has no buffered history, so no velocity to predict from
        let expected_waypoints = if cycle == 0 { 0 } else { horizon };
        if state.trajectory.len() != expected_waypoints {
            run.fail(format!(
                "cycle {cycle}: {} waypoints, expected {expected_waypoints}",
                state.trajectory.len()
            ));
        }
        let c = &state.confidence;
        for value in [c.measurement_confidence, c.trajectory_confidence, c.overall_confidence] {
            if !(0.0..=1.0).contains(&value) {
                run.fail(format!("cycle {cycle}: confidence {value} out of range"));
            }
        }

        run.metrics.degraded_stages += state.degraded.len() as u64;
        run.metrics.mean_confidence += c.overall_confidence;
        run.metrics.landmarks_offered += step.base.landmarks.len() as u64;
        run.metrics.landmarks_kept += state.landmarks.len() as u64;

        match run.scenario {
            ScenarioId::FallbackOnly | ScenarioId::OutlierBurst | ScenarioId::AdvisorDrift => {
                if !state.degraded.is_empty() {
                    run.fail(format!("cycle {cycle}: heuristic stages degraded: {:?}", state.degraded));
                }
                if state.landmarks.len() != step.base.landmarks.len() {
                    run.fail(format!("cycle {cycle}: fixed labels dropped landmarks"));
                }
            }
            ScenarioId::ModelFailure => {
                for stage in Stage::ALL {
                    // No trajectory model call is made without two points
                    let expect_degraded = cycle > 0 || stage != Stage::Trajectory;
                    match (expect_degraded, state.degraded.contains(&stage)) {
                        (true, false) => {
                            run.fail(format!("cycle {cycle}: {} survived a failing model", stage.name()))
                        }
                        (false, true) => {
                            run.fail(format!("cycle {cycle}: {} degraded without a model call", stage.name()))
                        }
                        _ => {}
                    }
                }
                if (c.measurement_confidence - self.config.fusion.failure_score).abs() > 1e-9 {
                    run.fail(format!(
                        "cycle {cycle}: measurement confidence {} after fusion failure",
                        c.measurement_confidence
                    ));
                }
            }
            ScenarioId::Learned => {
                if !state.degraded.is_empty() {
                    run.fail(format!("cycle {cycle}: learned stages degraded: {:?}", state.degraded));
                }
                if let Some(l) = state.landmarks.iter().find(|l| l.classification_confidence <= threshold) {
                    run.fail(format!(
                        "cycle {cycle}: landmark kept at confidence {}",
                        l.classification_confidence
                    ));
                }
            }
        }

        if run.scenario == ScenarioId::OutlierBurst && cycle > 0 {
            for outlier in &step.outliers {
                let (Some(raw), Some(corrected)) = (
                    step.frame.readings.get(outlier.index),
                    state.readings.get(outlier.index),
                ) else {
                    continue;
                };
                run.metrics.outliers_injected += 1;
                run.metrics.raw_outlier_error += (raw.distance - outlier.true_distance).abs();
                run.metrics.corrected_outlier_error += (corrected.corrected_distance - outlier.true_distance).abs();
            }
        }
    }
}

/// Waits for the advisor round stamped at or after `final_ts`.
async fn await_recommendation(
    stream: &mut EventStream<ParameterRecommendation>,
    final_ts: u64,
    received: &mut u64,
) -> Option<ParameterRecommendation> {
    let deadline = tokio::time::Instant::now() + ADVISOR_WAIT;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(recommendation)) => {
                *received += 1;
                if recommendation.timestamp_ms >= final_ts {
                    return Some(recommendation);
                }
            }
            Ok(None) => return None,
            Err(_) => {
                warn!("no advisor round within {:?}", ADVISOR_WAIT);
                return None;
            }
        }
    }
}

/// Accumulates one scenario's assertions and metrics.
struct Run {
    scenario: ScenarioId,
    seed: u64,
    cycles: u64,
    failures: Vec<String>,
    metrics: ScenarioMetrics,
}

impl Run {
    fn new(scenario: ScenarioId, seed: u64, cycles: u64) -> Self {
        Self {
            scenario,
            seed,
            cycles,
            failures: Vec::new(),
            metrics: ScenarioMetrics::default(),
        }
    }

    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("assertion failed: {}", reason);
        self.failures.push(reason);
    }

    fn finish(mut self) -> ScenarioResult {
        let m = &mut self.metrics;
        if m.states_received > 0 {
            m.mean_confidence /= m.states_received as f64;
        }
        if m.outliers_injected > 0 {
            m.raw_outlier_error /= m.outliers_injected as f64;
            m.corrected_outlier_error /= m.outliers_injected as f64;
        }

        match self.scenario {
            ScenarioId::OutlierBurst => {
                if m.outliers_injected == 0 {
                    self.failures.push("no outliers were injected".into());
                } else if m.corrected_outlier_error >= m.raw_outlier_error {
                    self.failures.push(format!(
                        "corrected outlier error {:.2}m not below raw {:.2}m",
                        m.corrected_outlier_error, m.raw_outlier_error
                    ));
                }
            }
            ScenarioId::Learned => {
                if m.landmarks_kept >= m.landmarks_offered {
                    self.failures.push("threshold filtering dropped no landmarks".into());
                }
            }
            ScenarioId::AdvisorDrift => match &m.final_recommendation {
                Some(r) if r.increase_measurement_noise => {}
                Some(r) => self.failures.push(format!(
                    "sensor performance {:.2} did not trigger measurement-noise advice",
                    r.sensor_performance
                )),
                None => self.failures.push("advisor produced no recommendation".into()),
            },
            _ => {}
        }

        let passed = self.failures.is_empty();
        if passed {
            info!(
                "✓ {} complete: {} states, mean confidence {:.2}",
                self.scenario.name(),
                self.metrics.states_received,
                self.metrics.mean_confidence
            );
        }

        ScenarioResult {
            scenario: self.scenario,
            seed: self.seed,
            passed,
            cycles: self.cycles,
            failures: self.failures,
            metrics: self.metrics,
        }
    }
}
