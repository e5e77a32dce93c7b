//! Boundary types exchanged with sensor acquisition and the upstream estimator.

use nalgebra::{DMatrix, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a ranging peer (access point, beacon, speaker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three physical ranging techniques, each with its own noise profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangingModality {
    /// Radio round-trip time (802.11mc FTM)
    WifiRtt,
    /// Radio channel-phase sounding
    ChannelSounding,
    /// Acoustic frequency-sweep echo
    AcousticChirp,
}

impl RangingModality {
    /// All modalities in index order.
    pub const ALL: [RangingModality; 3] = [
        RangingModality::WifiRtt,
        RangingModality::ChannelSounding,
        RangingModality::AcousticChirp,
    ];

    /// Stable index used in model feature vectors.
    pub fn index(self) -> usize {
        match self {
            RangingModality::WifiRtt => 0,
            RangingModality::ChannelSounding => 1,
            RangingModality::AcousticChirp => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RangingModality::WifiRtt => "wifi_rtt",
            RangingModality::ChannelSounding => "channel_sounding",
            RangingModality::AcousticChirp => "acoustic_chirp",
        }
    }
}

impl fmt::Display for RangingModality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single distance measurement. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingReading {
    /// Peer that produced the measurement
    pub source_id: SourceId,

    /// Measured distance in meters
    pub distance: f64,

    /// Stated accuracy [0.0 - 1.0]
    pub accuracy: f64,

    /// Physical technique used
    pub modality: RangingModality,

    /// Arrival timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

impl RangingReading {
    /// Creates a reading; accuracy is clamped to [0, 1].
    pub fn new(
        source_id: impl Into<String>,
        distance: f64,
        accuracy: f64,
        modality: RangingModality,
        timestamp_ms: u64,
    ) -> Self {
        let accuracy = if accuracy.is_nan() {
            0.0
        } else {
            accuracy.clamp(0.0, 1.0)
        };
        Self {
            source_id: SourceId::new(source_id),
            distance,
            accuracy,
            modality,
            timestamp_ms,
        }
    }
}

/// Inertial sample. The magnetometer is optional on many devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InertialReading {
    /// Linear acceleration [ax, ay, az] in m/s²
    pub acceleration: Vector3<f64>,

    /// Angular rate [wx, wy, wz] in rad/s
    pub angular_rate: Vector3<f64>,

    /// Magnetic field in µT, if a magnetometer is present
    pub magnetic_field: Option<Vector3<f64>>,

    pub timestamp_ms: u64,
}

/// Snapshot of the upstream estimator's state.
///
/// Owned by the upstream estimator; the engine only ever reads a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePoseEstimate {
    /// Device position [x, y, z] in meters (local frame)
    pub position: Vector3<f64>,

    /// Device attitude
    pub orientation: UnitQuaternion<f64>,

    /// Mapped landmark positions
    pub landmarks: Vec<Vector3<f64>>,

    /// State covariance (dimension chosen by the estimator)
    pub covariance: DMatrix<f64>,

    /// Estimator's own confidence [0.0 - 1.0]
    pub confidence: f64,
}

impl BasePoseEstimate {
    /// Creates an estimate at `position` with identity attitude and no landmarks.
    pub fn at(position: Vector3<f64>, confidence: f64) -> Self {
        Self {
            position,
            orientation: UnitQuaternion::identity(),
            landmarks: Vec::new(),
            covariance: DMatrix::identity(3, 3),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Adds landmarks (builder style).
    pub fn with_landmarks(mut self, landmarks: Vec<Vector3<f64>>) -> Self {
        self.landmarks = landmarks;
        self
    }
}

impl Default for BasePoseEstimate {
    fn default() -> Self {
        Self::at(Vector3::zeros(), 0.5)
    }
}

/// One acquisition cycle's worth of raw sensor input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub readings: Vec<RangingReading>,
    pub inertial: Option<InertialReading>,

    /// Arrival timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

impl SensorFrame {
    pub fn new(readings: Vec<RangingReading>, timestamp_ms: u64) -> Self {
        Self {
            readings,
            inertial: None,
            timestamp_ms,
        }
    }

    pub fn with_inertial(mut self, inertial: InertialReading) -> Self {
        self.inertial = Some(inertial);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_accuracy_is_clamped() {
        let r = RangingReading::new("ap-1", 4.0, 1.7, RangingModality::WifiRtt, 10);
        assert_eq!(r.accuracy, 1.0);

        let r = RangingReading::new("ap-1", 4.0, f64::NAN, RangingModality::WifiRtt, 10);
        assert_eq!(r.accuracy, 0.0);
    }

    #[test]
    fn test_modality_indices_are_stable() {
        for (i, m) in RangingModality::ALL.iter().enumerate() {
            assert_eq!(m.index(), i);
        }
        assert_eq!(RangingModality::ChannelSounding.to_string(), "channel_sounding");
    }

    #[test]
    fn test_frame_without_inertial() {
        let frame = SensorFrame::new(vec![], 5);
        assert!(frame.inertial.is_none());
        assert_eq!(frame.timestamp_ms, 5);
    }
}
