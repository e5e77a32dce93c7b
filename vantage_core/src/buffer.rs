//! The rolling history of processed cycles.
//!
//! A strict FIFO ring: appending beyond capacity evicts the oldest entry.
//! Entries are `Arc<FusionContext>` and are never mutated once stored, so
//! readers take a copy-on-read snapshot (a vector of `Arc` clones) and
//! iterate it without holding the lock. The per-cycle task appends while
//! the advisor task iterates; neither blocks the other for longer than a
//! pointer copy.

use crate::types::{FusionContext, TrajectoryPoint};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bounded, reader-writer-safe history of fusion contexts.
#[derive(Debug)]
pub struct MeasurementBuffer {
    entries: RwLock<VecDeque<Arc<FusionContext>>>,
    capacity: usize,
}

impl MeasurementBuffer {
    /// Creates an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Appends a context, evicting the oldest entries when full.
    pub fn push(&self, context: Arc<FusionContext>) {
        let mut entries = self.write();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(context);
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<FusionContext>> {
        self.read().iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<FusionContext>> {
        let entries = self.read();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<FusionContext>> {
        self.read().back().cloned()
    }

    /// Base positions of the newest `n` entries, oldest first.
    pub fn trajectory(&self, n: usize) -> Vec<TrajectoryPoint> {
        self.recent(n).iter().map(|c| c.trajectory_point()).collect()
    }

    // push is a single pop/push pair, so a poisoned lock still guards a
    // consistent deque.
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<FusionContext>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Arc<FusionContext>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MeasurementBuffer {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use vantage_env::BasePoseEstimate;

    fn context(cycle: u64) -> Arc<FusionContext> {
        let base = BasePoseEstimate::at(Vector3::new(cycle as f64, 0.0, 0.0), 0.8);
        Arc::new(FusionContext::new(cycle, vec![], cycle * 100, base))
    }

    #[test]
    fn test_buffer_evicts_oldest_first() {
        let buffer = MeasurementBuffer::new(3);
        for cycle in 0..5 {
            buffer.push(context(cycle));
        }

        assert_eq!(buffer.len(), 3);
        let cycles: Vec<u64> = buffer.snapshot().iter().map(|c| c.cycle).collect();
        assert_eq!(cycles, vec![2, 3, 4]);
        assert_eq!(buffer.latest().unwrap().cycle, 4);
    }

    #[test]
    fn test_recent_returns_newest_in_order() {
        let buffer = MeasurementBuffer::new(10);
        for cycle in 0..6 {
            buffer.push(context(cycle));
        }

        let cycles: Vec<u64> = buffer.recent(2).iter().map(|c| c.cycle).collect();
        assert_eq!(cycles, vec![4, 5]);
        assert_eq!(buffer.recent(50).len(), 6);

        let path = buffer.trajectory(2);
        assert_eq!(path[0].position.x, 4.0);
        assert_eq!(path[1].timestamp_ms, 500);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let buffer = MeasurementBuffer::new(0);
        buffer.push(context(1));
        buffer.push(context(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_concurrent_append_and_snapshot() {
        let buffer = Arc::new(MeasurementBuffer::new(64));

        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for cycle in 0..2_000 {
                    buffer.push(context(cycle));
                }
            })
        };
        let reader = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snap = buffer.snapshot();
                    assert!(snap.len() <= 64);
                    // Snapshots are always contiguous and ordered
                    for pair in snap.windows(2) {
                        assert_eq!(pair[1].cycle, pair[0].cycle + 1);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.latest().unwrap().cycle, 1_999);
    }
}
