//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated room:
//! - The true device path (a slow loop around the room centre)
//! - One ranging anchor per modality and a fixed set of landmarks
//! - Noisy ranging frames and a noisy upstream estimate, per step
//!
//! Noise, outliers and accuracy drift all come from one seeded ChaCha8
//! stream, so a seed reproduces a run exactly.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use vantage_env::{BasePoseEstimate, RangingModality, RangingReading, SensorFrame};

/// A fixed ranging peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub position: Vector3<f64>,
    pub modality: RangingModality,
}

/// A reading the oracle deliberately corrupted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjectedOutlier {
    /// Index into the frame's readings
    pub index: usize,

    /// True distance before corruption
    pub true_distance: f64,
}

/// Everything the oracle produced for one step.
#[derive(Debug, Clone)]
pub struct OracleStep {
    pub frame: SensorFrame,
    pub base: BasePoseEstimate,
    pub true_position: Vector3<f64>,
    pub outliers: Vec<InjectedOutlier>,
}

/// Ranging noise standard deviation per modality (meters).
pub fn noise_std(modality: RangingModality) -> f64 {
    match modality {
        RangingModality::WifiRtt => 1.0,
        RangingModality::ChannelSounding => 0.3,
        RangingModality::AcousticChirp => 0.1,
    }
}

/// Stated accuracy of a fresh sensor per modality.
pub fn base_accuracy(modality: RangingModality) -> f64 {
    match modality {
        RangingModality::WifiRtt => 0.75,
        RangingModality::ChannelSounding => 0.85,
        RangingModality::AcousticChirp => 0.95,
    }
}

/// The Oracle - owns ground truth and generates sensor input.
pub struct Oracle {
    /// RNG for noise and random events
    rng: ChaCha8Rng,

    anchors: Vec<Anchor>,
    landmarks: Vec<Vector3<f64>>,

    /// Steps taken so far
    step: u64,

    /// Step length in ms
    step_ms: u64,

    /// Virtual start time (ms since epoch)
    start_ms: u64,

    /// Radius of the device loop (meters)
    path_radius: f64,

    /// Angular speed along the loop (rad/s)
    angular_speed: f64,

    /// Upstream estimate position noise (meters)
    estimate_noise_std: f64,

    /// Probability that a reading is replaced by a 10x outlier
    outlier_rate: f64,

    /// Stated accuracy lost per step
    accuracy_drift: f64,
}

impl Oracle {
    /// Creates a new Oracle with the given seed.
    pub fn new(seed: u64) -> Self {
        let anchors = vec![
            Anchor {
                id: "ap-1".into(),
                position: Vector3::new(12.0, 0.0, 2.5),
                modality: RangingModality::WifiRtt,
            },
            Anchor {
                id: "cs-1".into(),
                position: Vector3::new(-8.0, 6.0, 1.0),
                modality: RangingModality::ChannelSounding,
            },
            Anchor {
                id: "spk-1".into(),
                position: Vector3::new(0.0, -7.0, 1.5),
                modality: RangingModality::AcousticChirp,
            },
        ];
        let landmarks = vec![
            Vector3::new(5.0, 5.0, 0.0),
            Vector3::new(-5.0, 5.0, 0.0),
            Vector3::new(-5.0, -5.0, 0.0),
            Vector3::new(5.0, -5.0, 0.0),
            Vector3::new(0.0, 6.0, 1.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];

        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            anchors,
            landmarks,
            step: 0,
            step_ms: 100,
            start_ms: 1704067200_000,
            path_radius: 3.0,
            angular_speed: 0.2,
            estimate_noise_std: 0.2,
            outlier_rate: 0.0,
            accuracy_drift: 0.0,
        }
    }

    /// Sets the probability of a 10x outlier per reading.
    pub fn with_outliers(mut self, rate: f64) -> Self {
        self.outlier_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the stated accuracy lost per step.
    pub fn with_accuracy_drift(mut self, per_step: f64) -> Self {
        self.accuracy_drift = per_step.max(0.0);
        self
    }

    pub fn step_interval_ms(&self) -> u64 {
        self.step_ms
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn landmarks(&self) -> &[Vector3<f64>] {
        &self.landmarks
    }

    /// True device position at `step`.
    pub fn true_position_at(&self, step: u64) -> Vector3<f64> {
        let t = (step * self.step_ms) as f64 / 1000.0;
        let angle = self.angular_speed * t;
        Vector3::new(
            self.path_radius * angle.cos(),
            self.path_radius * angle.sin(),
            1.0,
        )
    }

    /// Advances one step and returns its frame and upstream estimate.
    pub fn step(&mut self) -> OracleStep {
        let timestamp_ms = self.start_ms + self.step * self.step_ms;
        let truth = self.true_position_at(self.step);
        let drift = self.accuracy_drift * self.step as f64;

        let mut readings = Vec::with_capacity(self.anchors.len());
        let mut outliers = Vec::new();

        for (index, anchor) in self.anchors.iter().enumerate() {
            let true_distance = (anchor.position - truth).norm();
            let noise = Normal::new(0.0, noise_std(anchor.modality))
                .map(|n| n.sample(&mut self.rng))
                .unwrap_or(0.0);
            let mut distance = (true_distance + noise).max(0.05);

            if self.rng.gen_bool(self.outlier_rate) {
                distance = true_distance * 10.0;
                outliers.push(InjectedOutlier { index, true_distance });
            }

            let accuracy = (base_accuracy(anchor.modality) - drift).clamp(0.0, 1.0);
            readings.push(RangingReading::new(
                anchor.id.clone(),
                distance,
                accuracy,
                anchor.modality,
                timestamp_ms,
            ));
        }

        let base = self.estimate(truth, drift);
        self.step += 1;

        OracleStep {
            frame: SensorFrame::new(readings, timestamp_ms),
            base,
            true_position: truth,
            outliers,
        }
    }

    fn estimate(&mut self, truth: Vector3<f64>, drift: f64) -> BasePoseEstimate {
        let normal = Normal::new(0.0, self.estimate_noise_std).ok();
        let mut jitter = || normal.map(|n| n.sample(&mut self.rng)).unwrap_or(0.0);

        let position = truth + Vector3::new(jitter(), jitter(), jitter() * 0.5);
        let landmarks = self
            .landmarks
            .clone()
            .into_iter()
            .map(|l| l + Vector3::new(jitter() * 0.1, jitter() * 0.1, 0.0))
            .collect();
        let confidence = (0.75 - drift * 0.5 + jitter() * 0.1).clamp(0.0, 1.0);

        BasePoseEstimate::at(position, confidence).with_landmarks(landmarks)
    }
}
