//! Virtual-clock `EngineContext` for reproducible engine runs.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug_span, Instrument};
use vantage_env::EngineContext;

/// 2024-01-01 00:00:00 UTC, where every run's wall clock starts.
const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Engine context whose clock moves only when the harness says so.
///
/// Clones share the clock and the sleeper list, so the runner can hold one
/// handle while the engine's tasks sleep on another. Tasks still run on
/// the ambient tokio runtime; only time is virtual.
#[derive(Clone)]
pub struct SimContext {
    seed: u64,

    /// Elapsed virtual nanoseconds
    clock_ns: Arc<Mutex<u64>>,

    /// Signalled on every clock advance
    wake: Arc<Notify>,

    /// Wall-clock instant of virtual time zero
    origin: SystemTime,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock_ns: Arc::new(Mutex::new(0)),
            wake: Arc::new(Notify::new()),
            origin: UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS),
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Moves the clock forward and wakes sleepers so they can re-check
    /// their deadlines.
    pub fn advance_time(&self, step: Duration) {
        *self.clock() += step.as_nanos() as u64;
        self.wake.notify_waiters();
    }

    pub fn time_ns(&self) -> u64 {
        *self.clock()
    }

    /// Seed for one component (oracle, models, ...), stable per `stream`.
    pub fn derive_seed(&self, stream: u64) -> u64 {
        self.seed.wrapping_mul(0x517cc1b727220a95) ^ stream
    }

    fn clock(&self) -> MutexGuard<'_, u64> {
        self.clock_ns.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EngineContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.origin + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        loop {
            let woken = self.wake.notified();
            tokio::pin!(woken);
            // Register before checking so an advance in between is not lost
            woken.as_mut().enable();

            if self.now() >= deadline {
                return;
            }
            woken.await;
        }
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future.instrument(debug_span!("sim_task", name, seed = self.seed)))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
