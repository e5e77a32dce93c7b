//! The engine's view of time and task spawning.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Everything the engine needs from its surroundings besides data.
///
/// The engine is generic over this trait, so the same cycle and advisor
/// tasks run on the wall clock (`TokioContext`) or on a harness-driven
/// virtual clock.
#[async_trait]
pub trait EngineContext: Send + Sync + 'static {
    /// Monotonic time since the context was created.
    fn now(&self) -> Duration;

    /// Wall-clock time for event timestamps.
    fn system_time(&self) -> SystemTime;

    /// Resolves once `duration` has passed on this context's clock.
    async fn sleep(&self, duration: Duration);

    /// Starts a named background task. The owner awaits the handle on
    /// shutdown.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;

    /// Master seed of a reproducible run; 0 when unseeded.
    fn seed(&self) -> u64;

    /// Milliseconds since the Unix epoch according to `system_time()`.
    fn timestamp_ms(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
