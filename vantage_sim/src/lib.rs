//! Vantage Deterministic Simulation Harness
//!
//! Runs the correction engine end to end against a seeded ground-truth
//! oracle, with nothing left to chance:
//! - **Time**: a virtual clock that moves only when the runner advances it
//! - **Sensors**: ranging frames and upstream estimates from one ChaCha8 stream
//! - **Models**: scripted inference engines that answer deterministically
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │                                                          │
//! │  Oracle ──frames──▶ Engine<SimContext> ──states──▶ checks│
//! │    │                   ▲          │                      │
//! │    └──base estimate──▶ SharedPose │                      │
//! │                                   ▼                      │
//! │  ScriptedLoader ──models──▶ CapabilityRegistry           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vantage_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::OutlierBurst).await;
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod models;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use models::{ModelBehavior, ScriptedLoader};
pub use oracle::{Anchor, InjectedOutlier, Oracle, OracleStep};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
