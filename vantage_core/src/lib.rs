//! Vantage Core - Adaptive Correction Engine
//!
//! Sits downstream of a pose/landmark estimator and upgrades its output
//! every cycle by fusing three ranging modalities with recent history:
//! 1. **Measurement correction**: outlier pull-in and temporal smoothing of raw ranges
//! 2. **Prediction**: a short horizon of future positions with per-step confidence
//! 3. **Annotation**: landmark classification, a confidence report, insights and tuning advice
//!
//! Every stage runs a learned model when one loads and a deterministic
//! heuristic otherwise, so a cycle always produces a complete state.

pub mod advisor;
pub mod buffer;
pub mod confidence;
pub mod config;
pub mod denoise;
pub mod engine;
pub mod error;
pub mod events;
pub mod fusion;
pub mod insights;
pub mod landmarks;
pub mod pipeline;
pub mod registry;
pub mod trajectory;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use buffer::MeasurementBuffer;
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, StageError};
pub use events::{EventBus, EventStream};
pub use pipeline::{CorrectionPipeline, CycleOutput};
pub use registry::{CallBudget, CapabilityRegistry, CapabilityStatus, ModelHandle};
pub use types::{
    ConfidenceReport, EnhancedLandmark, EnhancedReading, EnhancedState, FusionContext, Insight,
    InsightCategory, LandmarkCategory, ParameterRecommendation, PredictedWaypoint, Stage,
    TrajectoryPoint,
};
