//! Correction Policy Registry.
//!
//! Probes every learned capability once at startup and records whether it
//! runs on the learned or the heuristic path. Capabilities are probed
//! independently: a load failure for one never disables another.
//! Stages ask the registry for a [`ModelHandle`] when they are built and
//! pick their strategy from the answer; nothing downstream re-checks.

use crate::error::StageError;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vantage_env::{Capability, EngineContext, EnvError, InferenceEngine, ModelLoader};

/// Which path a capability resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityStatus {
    Learned,
    Heuristic { reason: String },
}

struct Entry {
    status: CapabilityStatus,
    engine: Option<Arc<dyn InferenceEngine>>,
}

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Resolves once the given duration has passed on some clock.
pub type Timer = Arc<dyn Fn(Duration) -> Sleep + Send + Sync>;

/// Time limit for one inference call, measured on the engine's clock.
#[derive(Clone)]
pub struct CallBudget {
    limit: Duration,
    timer: Timer,
}

impl CallBudget {
    pub fn new(limit: Duration, timer: Timer) -> Self {
        Self { limit, timer }
    }

    /// A budget that elapses with `context`'s clock, virtual or not.
    pub fn on_clock<Ctx: EngineContext>(limit: Duration, context: Arc<Ctx>) -> Self {
        let timer: Timer = Arc::new(move |duration: Duration| -> Sleep {
            let context = Arc::clone(&context);
            Box::pin(async move { context.sleep(duration).await })
        });
        Self::new(limit, timer)
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl fmt::Debug for CallBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBudget").field("limit", &self.limit).finish()
    }
}

/// A loaded model bound to its capability and call budget.
#[derive(Clone)]
pub struct ModelHandle {
    capability: Capability,
    engine: Arc<dyn InferenceEngine>,
    budget: Option<CallBudget>,
}

impl ModelHandle {
    pub fn new(capability: Capability, engine: Arc<dyn InferenceEngine>, budget: Option<CallBudget>) -> Self {
        Self {
            capability,
            engine,
            budget,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Runs one inference call and checks the output length.
    pub async fn run(&self, input: &[f32], expected_len: usize) -> Result<Vec<f32>, StageError> {
        let output = match &self.budget {
            Some(budget) => tokio::select! {
                biased;
                output = self.engine.infer(input) => output?,
                _ = (budget.timer)(budget.limit) => {
                    return Err(EnvError::Timeout(budget.limit.as_millis() as u64).into());
                }
            },
            None => self.engine.infer(input).await?,
        };

        if output.len() != expected_len {
            return Err(StageError::malformed(expected_len, output.len()));
        }
        Ok(output)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("capability", &self.capability)
            .field("budget", &self.budget)
            .finish()
    }
}

/// Per-capability switch between learned and heuristic correction.
pub struct CapabilityRegistry {
    entries: BTreeMap<Capability, Entry>,
    budget: Option<CallBudget>,
    released: AtomicBool,
}

impl CapabilityRegistry {
    /// Loads every capability through `loader` and logs the outcome.
    pub async fn probe(loader: &dyn ModelLoader, budget: Option<CallBudget>) -> Self {
        let mut entries = BTreeMap::new();

        for capability in Capability::ALL {
            let entry = match loader.load(capability).await {
                Ok(engine) => {
                    info!(capability = %capability, "learned model loaded");
                    Entry {
                        status: CapabilityStatus::Learned,
                        engine: Some(engine),
                    }
                }
                Err(EnvError::ModelUnavailable(_)) => {
                    info!(capability = %capability, "no model artifact, using heuristic");
                    Entry {
                        status: CapabilityStatus::Heuristic {
                            reason: "model unavailable".into(),
                        },
                        engine: None,
                    }
                }
                Err(e) => {
                    warn!(capability = %capability, error = %e, "model failed to load, using heuristic");
                    Entry {
                        status: CapabilityStatus::Heuristic { reason: e.to_string() },
                        engine: None,
                    }
                }
            };
            entries.insert(capability, entry);
        }

        let registry = Self {
            entries,
            budget,
            released: AtomicBool::new(false),
        };
        info!(
            learned = registry.learned_count(),
            total = Capability::ALL.len(),
            "capability probe complete"
        );
        registry
    }

    /// A registry with every capability on the heuristic path.
    pub fn heuristic_only() -> Self {
        let entries = Capability::ALL
            .into_iter()
            .map(|c| {
                (
                    c,
                    Entry {
                        status: CapabilityStatus::Heuristic {
                            reason: "heuristic only".into(),
                        },
                        engine: None,
                    },
                )
            })
            .collect();
        Self {
            entries,
            budget: None,
            released: AtomicBool::new(false),
        }
    }

    pub fn status(&self, capability: Capability) -> CapabilityStatus {
        self.entries
            .get(&capability)
            .map(|e| e.status.clone())
            .unwrap_or(CapabilityStatus::Heuristic {
                reason: "not probed".into(),
            })
    }

    pub fn is_learned(&self, capability: Capability) -> bool {
        matches!(self.status(capability), CapabilityStatus::Learned)
    }

    pub fn learned_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == CapabilityStatus::Learned)
            .count()
    }

    /// The loaded model for `capability`, if it runs on the learned path.
    pub fn model(&self, capability: Capability) -> Option<ModelHandle> {
        self.entries
            .get(&capability)
            .and_then(|e| e.engine.clone())
            .map(|engine| ModelHandle::new(capability, engine, self.budget.clone()))
    }

    /// Releases every loaded engine. Only the first call has an effect.
    pub fn release_all(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for (capability, entry) in &self.entries {
            if let Some(engine) = &entry.engine {
                engine.release();
                info!(capability = %capability, "learned model released");
            }
        }
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let statuses: BTreeMap<_, _> = self.entries.iter().map(|(c, e)| (c.name(), &e.status)).collect();
        f.debug_struct("CapabilityRegistry")
            .field("statuses", &statuses)
            .field("budget", &self.budget)
            .finish()
    }
}
