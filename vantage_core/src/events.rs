//! Observer event streams.
//!
//! Three independent broadcast streams: the full state per cycle, insights,
//! and advisor recommendations. Each subscriber has its own bounded queue;
//! when a subscriber falls behind, its oldest undelivered events are
//! dropped and it resumes from the oldest one still queued. Publishing
//! never waits on a subscriber and succeeds with no subscribers at all.

use crate::types::{EnhancedState, Insight, ParameterRecommendation};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

/// A subscription to one event stream.
#[derive(Debug)]
pub struct EventStream<T> {
    rx: broadcast::Receiver<T>,
    dropped: u64,
}

impl<T: Clone> EventStream<T> {
    fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx, dropped: 0 }
    }

    /// Waits for the next event. `None` once the engine has shut down and
    /// every queued event has been read.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => {
                    debug!(skipped = n, "slow subscriber dropped oldest events");
                    self.dropped += n;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next already-queued event, if any.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.dropped += n,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this subscriber lost to lagging.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Senders for the three streams.
#[derive(Debug, Clone)]
pub struct EventBus {
    states: broadcast::Sender<Arc<EnhancedState>>,
    insights: broadcast::Sender<Insight>,
    recommendations: broadcast::Sender<ParameterRecommendation>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            states: broadcast::channel(capacity).0,
            insights: broadcast::channel(capacity).0,
            recommendations: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe_states(&self) -> EventStream<Arc<EnhancedState>> {
        EventStream::new(self.states.subscribe())
    }

    pub fn subscribe_insights(&self) -> EventStream<Insight> {
        EventStream::new(self.insights.subscribe())
    }

    pub fn subscribe_recommendations(&self) -> EventStream<ParameterRecommendation> {
        EventStream::new(self.recommendations.subscribe())
    }

    // send() only errs when nobody is subscribed, which is not a failure here.

    pub fn publish_state(&self, state: Arc<EnhancedState>) {
        let _ = self.states.send(state);
    }

    pub fn publish_insight(&self, insight: Insight) {
        let _ = self.insights.send(insight);
    }

    pub fn publish_recommendation(&self, recommendation: ParameterRecommendation) {
        let _ = self.recommendations.send(recommendation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InsightCategory;

    fn insight(value: f64) -> Insight {
        Insight::new(InsightCategory::SensorPerformance, "x".into(), 0.5, value, 0)
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe_insights();
        let mut b = bus.subscribe_insights();

        bus.publish_insight(insight(1.0));
        bus.publish_insight(insight(2.0));

        assert_eq!(a.next().await.unwrap().value, 1.0);
        assert_eq!(a.next().await.unwrap().value, 2.0);
        assert_eq!(b.next().await.unwrap().value, 1.0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_insights();

        for i in 0..10 {
            bus.publish_insight(insight(i as f64));
        }

        // Only the newest four survive
        assert_eq!(slow.next().await.unwrap().value, 6.0);
        assert_eq!(slow.dropped(), 6);
        assert_eq!(slow.try_next().unwrap().value, 7.0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_and_close() {
        let bus = EventBus::new(2);
        bus.publish_insight(insight(0.0));

        let mut late = bus.subscribe_insights();
        assert!(late.try_next().is_none());

        drop(bus);
        assert!(late.next().await.is_none());
    }
}
