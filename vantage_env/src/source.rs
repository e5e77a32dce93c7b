//! Upstream estimator boundary.

use crate::types::BasePoseEstimate;
use std::sync::{Arc, RwLock};

/// Pull interface to the upstream pose/landmark estimator.
///
/// The engine calls this once per cycle and treats the result as a
/// read-only snapshot.
pub trait PoseSource: Send + Sync + 'static {
    fn current_estimate(&self) -> BasePoseEstimate;
}

/// A latest-value cell the upstream estimator publishes into.
#[derive(Debug, Clone, Default)]
pub struct SharedPose {
    inner: Arc<RwLock<BasePoseEstimate>>,
}

impl SharedPose {
    pub fn new(initial: BasePoseEstimate) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Replaces the current estimate.
    pub fn publish(&self, estimate: BasePoseEstimate) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *slot = estimate;
    }
}

impl PoseSource for SharedPose {
    fn current_estimate(&self) -> BasePoseEstimate {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
