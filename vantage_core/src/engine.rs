//! Engine Runtime - owns the buffer, the registry and the background tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              Engine                               │
//! │                                                                   │
//! │  submit() ──▶ unbounded intake ──▶ cycle task ──▶ EventBus        │
//! │                                      │  ▲          ├─ states      │
//! │                     PoseSource ──────┘  │          ├─ insights    │
//! │                                         │          └─ recommend.  │
//! │                              MeasurementBuffer          ▲         │
//! │                                         │               │         │
//! │                                         └──▶ advisor task         │
//! │                                              (every interval)     │
//! │                                                                   │
//! │  shutdown() ── watch signal ──▶ both tasks stop, engines released │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Frames are processed strictly in arrival order by a single cycle task,
//! so the buffer always holds cycle N−1 when cycle N starts. The advisor
//! runs on its own cadence and only ever reads buffer snapshots.
//!
//! # Usage
//!
//! ```ignore
//! use vantage_core::{Engine, EngineConfig};
//! use vantage_env::{NoModels, SharedPose, TokioContext};
//!
//! let pose = SharedPose::default();
//! let engine = Engine::start(TokioContext::shared(), EngineConfig::default(), &NoModels, Arc::new(pose)).await?;
//! let mut states = engine.subscribe_states()?;
//!
//! engine.submit(frame)?;
//! let state = states.next().await;
//!
//! engine.shutdown().await;
//! ```

use crate::advisor::ParameterAdvisor;
use crate::buffer::MeasurementBuffer;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventBus, EventStream};
use crate::pipeline::CorrectionPipeline;
use crate::registry::{CallBudget, CapabilityRegistry};
use crate::types::{EnhancedState, FusionContext, Insight, ParameterRecommendation, Stage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vantage_env::{EngineContext, ModelLoader, PoseSource, SensorFrame};

/// Running totals since start.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub cycles_processed: u64,

    /// Stage degradations summed over all cycles
    pub degraded_stages: u64,

    pub insights_emitted: u64,
    pub recommendations_emitted: u64,

    /// Mean stage-processing latency per cycle
    pub mean_latency: Duration,
}

#[derive(Debug, Default)]
struct StatsCounters {
    cycles: AtomicU64,
    degraded: AtomicU64,
    insights: AtomicU64,
    recommendations: AtomicU64,
    latency_us: AtomicU64,
}

impl StatsCounters {
    fn record_cycle(&self, state: &EnhancedState, insights: usize) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.degraded.fetch_add(state.degraded.len() as u64, Ordering::Relaxed);
        self.insights.fetch_add(insights as u64, Ordering::Relaxed);
        self.latency_us
            .fetch_add(state.latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        let cycles = self.cycles.load(Ordering::Relaxed);
        let mean_latency = match cycles {
            0 => Duration::ZERO,
            n => Duration::from_micros(self.latency_us.load(Ordering::Relaxed) / n),
        };
        EngineStats {
            cycles_processed: cycles,
            degraded_stages: self.degraded.load(Ordering::Relaxed),
            insights_emitted: self.insights.load(Ordering::Relaxed),
            recommendations_emitted: self.recommendations.load(Ordering::Relaxed),
            mean_latency,
        }
    }
}

/// The adaptive correction engine.
///
/// Generic over the environment context so the same engine runs against
/// the tokio wall clock in production and a virtual clock in simulation.
pub struct Engine<Ctx: EngineContext> {
    context: Arc<Ctx>,
    intake: Mutex<Option<mpsc::UnboundedSender<SensorFrame>>>,
    bus: RwLock<Option<EventBus>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    buffer: Arc<MeasurementBuffer>,
    registry: Arc<CapabilityRegistry>,
    stats: Arc<StatsCounters>,
    latest_recommendation: Arc<RwLock<Option<ParameterRecommendation>>>,
    strategies: [(Stage, &'static str); 4],
}

impl<Ctx: EngineContext> Engine<Ctx> {
    /// Probes every capability through `loader` and starts the cycle and
    /// advisor tasks. Must be called inside a tokio runtime.
    pub async fn start(
        context: Arc<Ctx>,
        config: EngineConfig,
        loader: &dyn ModelLoader,
        source: Arc<dyn PoseSource>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let budget = config
            .inference_timeout()
            .map(|limit| CallBudget::on_clock(limit, Arc::clone(&context)));
        let registry = CapabilityRegistry::probe(loader, budget).await;
        Self::with_registry(context, config, Arc::new(registry), source)
    }

    /// Starts the engine on an already-probed registry.
    pub fn with_registry(
        context: Arc<Ctx>,
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        source: Arc<dyn PoseSource>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let buffer = Arc::new(MeasurementBuffer::new(config.buffer.capacity));
        let bus = EventBus::new(config.events.channel_capacity);
        let stats = Arc::new(StatsCounters::default());
        let latest_recommendation = Arc::new(RwLock::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();

        let pipeline = CorrectionPipeline::new(&config, &registry, Arc::clone(&buffer));
        let strategies = pipeline.strategies();
        for (stage, strategy) in strategies {
            debug!(stage = stage.name(), strategy, "stage strategy selected");
        }

        let cycle_task = context.spawn(
            "vantage-cycle",
            run_cycles(CycleTask {
                context: Arc::clone(&context),
                pipeline,
                intake: intake_rx,
                source,
                bus: bus.clone(),
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx.clone(),
            }),
        );
        let advisor_task = context.spawn(
            "vantage-advisor",
            run_advisor(AdvisorTask {
                context: Arc::clone(&context),
                advisor: ParameterAdvisor::new(config.advisor.clone()),
                buffer: Arc::clone(&buffer),
                bus: bus.clone(),
                stats: Arc::clone(&stats),
                latest: Arc::clone(&latest_recommendation),
                shutdown: shutdown_rx,
            }),
        );

        info!(
            buffer_capacity = buffer.capacity(),
            learned = registry.learned_count(),
            advisor_interval_ms = config.advisor.interval_ms,
            seed = context.seed(),
            "correction engine started"
        );

        Ok(Self {
            context,
            intake: Mutex::new(Some(intake_tx)),
            bus: RwLock::new(Some(bus)),
            shutdown_tx,
            tasks: Mutex::new(vec![cycle_task, advisor_task]),
            buffer,
            registry,
            stats,
            latest_recommendation,
            strategies,
        })
    }

    /// Enqueues one frame. Never blocks; fails only after shutdown.
    pub fn submit(&self, frame: SensorFrame) -> Result<(), EngineError> {
        match lock(&self.intake).as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| EngineError::ShuttingDown),
            None => Err(EngineError::ShuttingDown),
        }
    }

    pub fn subscribe_states(&self) -> Result<EventStream<Arc<EnhancedState>>, EngineError> {
        self.with_bus(EventBus::subscribe_states)
    }

    pub fn subscribe_insights(&self) -> Result<EventStream<Insight>, EngineError> {
        self.with_bus(EventBus::subscribe_insights)
    }

    pub fn subscribe_recommendations(&self) -> Result<EventStream<ParameterRecommendation>, EngineError> {
        self.with_bus(EventBus::subscribe_recommendations)
    }

    pub fn buffer(&self) -> &Arc<MeasurementBuffer> {
        &self.buffer
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    /// The strategy each stage was built with.
    pub fn strategies(&self) -> &[(Stage, &'static str); 4] {
        &self.strategies
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// The advisor's most recent recommendation.
    pub fn latest_recommendation(&self) -> Option<ParameterRecommendation> {
        self.latest_recommendation
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Stops both tasks, drops queued frames and releases every learned
    /// engine once no stage task is left running. No event is published
    /// after this returns. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        lock(&self.intake).take();
        self.bus.write().unwrap_or_else(|e| e.into_inner()).take();

        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }

        self.registry.release_all();
        info!(stats = ?self.stats(), "correction engine stopped");
    }

    fn with_bus<T>(&self, f: impl FnOnce(&EventBus) -> T) -> Result<T, EngineError> {
        self.bus
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(f)
            .ok_or(EngineError::ShuttingDown)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

struct CycleTask<Ctx> {
    context: Arc<Ctx>,
    pipeline: CorrectionPipeline,
    intake: mpsc::UnboundedReceiver<SensorFrame>,
    source: Arc<dyn PoseSource>,
    bus: EventBus,
    stats: Arc<StatsCounters>,
    shutdown: watch::Receiver<bool>,
}

async fn run_cycles<Ctx: EngineContext>(mut task: CycleTask<Ctx>) {
    let mut cycle = 0u64;

    while !*task.shutdown.borrow() {
        let frame = tokio::select! {
            biased;
            _ = task.shutdown.changed() => break,
            frame = task.intake.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let timestamp_ms = match frame.timestamp_ms {
            0 => task.context.timestamp_ms(),
            ts => ts,
        };
        let mut context = FusionContext::new(cycle, frame.readings, timestamp_ms, task.source.current_estimate());
        context.inertial = frame.inertial;
        cycle += 1;

        // An in-flight cycle is dropped, not finished, on shutdown
        let output = tokio::select! {
            biased;
            _ = task.shutdown.changed() => break,
            output = task.pipeline.process(context) => output,
        };
        if *task.shutdown.borrow() {
            break;
        }

        task.stats.record_cycle(&output.state, output.insights.len());
        task.bus.publish_state(output.state);
        for insight in output.insights {
            debug!(category = ?insight.category, message = %insight.message, "insight");
            task.bus.publish_insight(insight);
        }
    }

    // Stage tasks of an interrupted cycle must stop before engines are released
    task.pipeline.cancel_in_flight().await;
    debug!(cycles = cycle, "cycle task stopped");
}

struct AdvisorTask<Ctx> {
    context: Arc<Ctx>,
    advisor: ParameterAdvisor,
    buffer: Arc<MeasurementBuffer>,
    bus: EventBus,
    stats: Arc<StatsCounters>,
    latest: Arc<RwLock<Option<ParameterRecommendation>>>,
    shutdown: watch::Receiver<bool>,
}

async fn run_advisor<Ctx: EngineContext>(mut task: AdvisorTask<Ctx>) {
    let interval = task.advisor.config().interval();

    while !*task.shutdown.borrow() {
        tokio::select! {
            biased;
            _ = task.shutdown.changed() => break,
            _ = task.context.sleep(interval) => {}
        }

        let history = task.buffer.snapshot();
        let Some(recommendation) = task.advisor.assess(&history, task.context.timestamp_ms()) else {
            debug!("advisor skipped, history empty");
            continue;
        };

        if recommendation.any_raised() {
            info!(
                stability = recommendation.tracking_stability,
                sensors = recommendation.sensor_performance,
                complexity = recommendation.environment_complexity,
                process_noise = recommendation.increase_process_noise,
                measurement_noise = recommendation.increase_measurement_noise,
                particles = recommendation.increase_particle_count,
                "tuning recommended"
            );
        } else {
            debug!(samples = recommendation.sample_count, "advisor: no tuning needed");
        }

        *task.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(recommendation.clone());
        task.stats.recommendations.fetch_add(1, Ordering::Relaxed);
        task.bus.publish_recommendation(recommendation);
    }

    debug!("advisor task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wifi;
    use async_trait::async_trait;
    use nalgebra::Vector3;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use vantage_env::{
        BasePoseEstimate, Capability, EnvError, InferenceEngine, NoModels, SharedPose, TokioContext,
    };

    fn frame(n: u64) -> SensorFrame {
        SensorFrame::new(
            vec![wifi("a", 5.0, 0.9), wifi("b", 5.1, 0.85), wifi("c", 50.0, 0.8)],
            1_000 + n * 100,
        )
    }

    fn pose() -> Arc<SharedPose> {
        Arc::new(SharedPose::new(
            BasePoseEstimate::at(Vector3::new(1.0, 2.0, 0.0), 0.6)
                .with_landmarks(vec![Vector3::new(4.0, 0.0, 0.0)]),
        ))
    }

    async fn heuristic_engine(config: EngineConfig) -> Engine<TokioContext> {
        Engine::start(TokioContext::shared(), config, &NoModels, pose())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_models_unavailable_still_produces_complete_states() {
        let engine = heuristic_engine(EngineConfig::default()).await;
        assert_eq!(engine.registry().learned_count(), 0);
        let mut states = engine.subscribe_states().unwrap();

        for n in 0..5 {
            engine.submit(frame(n)).unwrap();
        }

        for n in 0..5 {
            let state = states.next().await.unwrap();
            assert_eq!(state.cycle, n);
            assert_eq!(state.timestamp_ms, 1_000 + n * 100);
            assert_eq!(state.readings.len(), 3);
            assert_eq!(state.landmarks.len(), 1);
            assert!(state.degraded.is_empty());
            assert!((0.0..=1.0).contains(&state.confidence.overall_confidence));
            if n >= 1 {
                assert_eq!(state.trajectory.len(), 10);
            }
        }

        assert_eq!(engine.buffer().len(), 5);
        assert_eq!(engine.stats().cycles_processed, 5);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_insights_are_streamed() {
        let engine = heuristic_engine(EngineConfig::default()).await;
        let mut insights = engine.subscribe_insights().unwrap();

        let mut poor = frame(0);
        poor.readings = vec![wifi("a", 5.0, 0.2)];
        engine.submit(poor).unwrap();

        let insight = insights.next().await.unwrap();
        assert_eq!(insight.category, crate::types::InsightCategory::SensorPerformance);
        assert_eq!(insight.value, 1.0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_processing() {
        let mut config = EngineConfig::default();
        config.events.channel_capacity = 4;
        let engine = heuristic_engine(config).await;
        let mut slow = engine.subscribe_states().unwrap();

        for n in 0..50 {
            engine.submit(frame(n)).unwrap();
        }
        while engine.stats().cycles_processed < 50 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let first = slow.next().await.unwrap();
        assert_eq!(first.cycle, 46);
        assert_eq!(slow.dropped(), 46);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisor_publishes_on_its_cadence() {
        let mut config = EngineConfig::default();
        config.advisor.interval_ms = 100;
        let engine = heuristic_engine(config).await;
        let mut recommendations = engine.subscribe_recommendations().unwrap();
        let mut states = engine.subscribe_states().unwrap();

        engine.submit(frame(0)).unwrap();
        states.next().await.unwrap();

        let rec = recommendations.next().await.unwrap();
        assert_eq!(rec.sample_count, 1);
        // Stated accuracies average 0.85, one landmark is a simple scene
        assert!(!rec.increase_measurement_noise);
        assert!(!rec.increase_particle_count);
        assert_eq!(engine.latest_recommendation(), Some(rec));
        engine.shutdown().await;
    }

    struct CountingEngine(Arc<AtomicUsize>);

    #[async_trait]
    impl InferenceEngine for CountingEngine {
        async fn infer(&self, _input: &[f32]) -> Result<Vec<f32>, EnvError> {
            Err(EnvError::inference("always fails"))
        }

        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingLoader(Arc<AtomicUsize>);

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, _capability: Capability) -> Result<Arc<dyn InferenceEngine>, EnvError> {
            Ok(Arc::new(CountingEngine(Arc::clone(&self.0))))
        }
    }

    #[tokio::test]
    async fn test_failing_models_degrade_but_complete() {
        let released = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader(Arc::clone(&released));
        let engine = Engine::start(TokioContext::shared(), EngineConfig::default(), &loader, pose())
            .await
            .unwrap();
        assert_eq!(engine.registry().learned_count(), 4);

        let mut states = engine.subscribe_states().unwrap();
        engine.submit(frame(0)).unwrap();
        engine.submit(frame(1)).unwrap();
        states.next().await.unwrap();
        let state = states.next().await.unwrap();

        assert_eq!(state.readings.len(), 3);
        assert!(state.readings.iter().all(|r| r.inference_confidence == 0.5));
        assert_eq!(state.trajectory.len(), 10);
        assert_eq!(state.landmarks.len(), 1);
        assert_eq!(state.degraded.len(), 4);

        engine.shutdown().await;
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[derive(Default)]
    struct SlowCall {
        started: AtomicBool,
        finished: AtomicBool,
        released: AtomicBool,
        used_after_release: AtomicBool,
    }

    /// Fusion model that holds its worker thread for 300 ms per call.
    struct BlockingFusion(Arc<SlowCall>);

    #[async_trait]
    impl InferenceEngine for BlockingFusion {
        async fn infer(&self, _input: &[f32]) -> Result<Vec<f32>, EnvError> {
            self.0.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            if self.0.released.load(Ordering::SeqCst) {
                self.0.used_after_release.store(true, Ordering::SeqCst);
            }
            self.0.finished.store(true, Ordering::SeqCst);
            Err(EnvError::inference("interrupted"))
        }

        fn release(&self) {
            self.0.released.store(true, Ordering::SeqCst);
        }
    }

    struct BlockingLoader(Arc<SlowCall>);

    #[async_trait]
    impl ModelLoader for BlockingLoader {
        async fn load(&self, capability: Capability) -> Result<Arc<dyn InferenceEngine>, EnvError> {
            match capability {
                Capability::Fusion => Ok(Arc::new(BlockingFusion(Arc::clone(&self.0)))),
                other => Err(EnvError::unavailable(other)),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_waits_for_running_inference() {
        let call = Arc::new(SlowCall::default());
        let loader = BlockingLoader(Arc::clone(&call));
        let engine = Engine::start(TokioContext::shared(), EngineConfig::default(), &loader, pose())
            .await
            .unwrap();

        engine.submit(frame(0)).unwrap();
        while !call.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        engine.shutdown().await;

        assert!(call.finished.load(Ordering::SeqCst));
        assert!(call.released.load(Ordering::SeqCst));
        assert!(!call.used_after_release.load(Ordering::SeqCst));
        assert_eq!(engine.stats().cycles_processed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let engine = heuristic_engine(EngineConfig::default()).await;
        let mut states = engine.subscribe_states().unwrap();

        engine.submit(frame(0)).unwrap();
        states.next().await.unwrap();

        engine.shutdown().await;
        engine.shutdown().await;

        assert!(!engine.is_running());
        assert!(matches!(engine.submit(frame(1)), Err(EngineError::ShuttingDown)));
        assert!(matches!(engine.subscribe_insights(), Err(EngineError::ShuttingDown)));
        assert!(states.next().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.trajectory.horizon = 0;
        let result = Engine::start(TokioContext::shared(), config, &NoModels, pose()).await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
