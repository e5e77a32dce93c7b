//! Wall-clock `EngineContext` on the ambient tokio runtime.

use crate::EngineContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug_span, Instrument};

/// The production context: system clock, `tokio::time`, `tokio::spawn`.
#[derive(Debug, Clone, Copy)]
pub struct TokioContext {
    /// Origin of `now()`
    started: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineContext for TokioContext {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future.instrument(debug_span!("task", name)))
    }

    /// Always 0; production runs are not seeded.
    fn seed(&self) -> u64 {
        0
    }
}
