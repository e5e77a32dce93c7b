//! Simulation scenarios for the correction engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: No models, every stage on its heuristic
    FallbackOnly,

    /// SIM-002: 10x range outliers on the heuristic fusion path
    OutlierBurst,

    /// SIM-003: Every model loads but every call fails
    ModelFailure,

    /// SIM-004: All four learned capabilities
    Learned,

    /// SIM-005: Sensor accuracy decays until the advisor reacts
    AdvisorDrift,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::FallbackOnly,
            ScenarioId::OutlierBurst,
            ScenarioId::ModelFailure,
            ScenarioId::Learned,
            ScenarioId::AdvisorDrift,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::FallbackOnly => "fallback_only",
            ScenarioId::OutlierBurst => "outlier_burst",
            ScenarioId::ModelFailure => "model_failure",
            ScenarioId::Learned => "learned",
            ScenarioId::AdvisorDrift => "advisor_drift",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::FallbackOnly => "No model artifacts, verify complete heuristic states",
            ScenarioId::OutlierBurst => "20% of ranges are 10x outliers, verify median pull-in",
            ScenarioId::ModelFailure => "Every inference call errors, verify per-stage degradation",
            ScenarioId::Learned => "All capabilities learned, verify landmark threshold filtering",
            ScenarioId::AdvisorDrift => "Stated accuracy decays, verify measurement-noise advice",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fallback_only" | "fallback" | "sim-001" => Ok(ScenarioId::FallbackOnly),
            "outlier_burst" | "outliers" | "sim-002" => Ok(ScenarioId::OutlierBurst),
            "model_failure" | "failure" | "sim-003" => Ok(ScenarioId::ModelFailure),
            "learned" | "sim-004" => Ok(ScenarioId::Learned),
            "advisor_drift" | "drift" | "sim-005" => Ok(ScenarioId::AdvisorDrift),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
