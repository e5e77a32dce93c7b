//! Vantage Environment Abstraction Layer
//!
//! This crate is the boundary between the adaptive correction engine and
//! everything it does not own:
//! - Time and task spawning (`now()`, `sleep()`, `spawn()`)
//! - The upstream pose/landmark estimator (`PoseSource`)
//! - Sensor acquisition frames (`SensorFrame`)
//! - Pluggable learned inference components (`ModelLoader`, `InferenceEngine`)
//!
//! The engine is written against these traits so the same code runs in
//! **Production** (tokio wall clock) and **Simulation** (virtual clock).
//!
//! # Example
//!
//! ```ignore
//! use vantage_env::{EngineContext, TokioContext};
//!
//! async fn advisor_loop<Ctx: EngineContext>(ctx: &Ctx) {
//!     loop {
//!         ctx.sleep(Duration::from_secs(5)).await;
//!         assess();
//!     }
//! }
//! ```

mod context;
mod error;
mod inference;
mod source;
mod tokio_impl;
mod types;

pub use context::EngineContext;
pub use error::EnvError;
pub use inference::{Capability, InferenceEngine, ModelLoader, NoModels};
pub use source::{PoseSource, SharedPose};
pub use tokio_impl::TokioContext;
pub use types::{
    BasePoseEstimate, InertialReading, RangingModality, RangingReading, SensorFrame, SourceId,
};
