//! Shared types for the OODA orchestration skeleton.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::detector::Mode;

/// Compute tier requested by an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTier {
    Light,
    Standard,
    DeepSearch,
}

impl Default for ComputeTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl std::fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Light => "light",
            Self::Standard => "standard",
            Self::DeepSearch => "deep_search",
        };
        write!(f, "{}", s)
    }
}

/// Breadcrumb left in the limits envelope when an intervention is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionNote {
    pub parameter: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Resource limits resolved from the compute tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_wall_time_ms: u64,
    pub max_tokens: u64,
    pub max_subgoals: usize,
    pub model_slot: Option<String>,
    pub validation_regime: String,
    /// Interventions applied by an active experiment
    #[serde(default)]
    pub interventions: Vec<InterventionNote>,
}

impl ResourceLimits {
    /// Fixed limits table keyed on tier.
    pub fn for_tier(tier: ComputeTier) -> Self {
        match tier {
            ComputeTier::Light => Self {
                max_wall_time_ms: 5_000,
                max_tokens: 2_000,
                max_subgoals: 4,
                model_slot: None,
                validation_regime: "basic".to_string(),
                interventions: Vec::new(),
            },
            ComputeTier::Standard => Self {
                max_wall_time_ms: 30_000,
                max_tokens: 8_000,
                max_subgoals: 12,
                model_slot: None,
                validation_regime: "full".to_string(),
                interventions: Vec::new(),
            },
            ComputeTier::DeepSearch => Self {
                max_wall_time_ms: 120_000,
                max_tokens: 32_000,
                max_subgoals: 32,
                model_slot: None,
                validation_regime: "exhaustive".to_string(),
                interventions: Vec::new(),
            },
        }
    }
}

/// How one phase output influenced the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfluenceType {
    Pattern,
    Constraint,
    Heuristic,
    Dependency,
}

/// One entry in the traceable execution narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFlowEntry {
    pub timestamp: DateTime<Utc>,
    /// OODA phase that emitted the entry
    pub phase: String,
    pub source: String,
    pub target: String,
    pub influence_type: InfluenceType,
    pub weight: f64,
    pub note: String,
}

impl ContextFlowEntry {
    pub fn new(
        phase: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        influence_type: InfluenceType,
        weight: f64,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase: phase.into(),
            source: source.into(),
            target: target.into(),
            influence_type,
            weight,
            note: note.into(),
        }
    }
}

/// Typed intent produced once per query by the detector. Immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category: Mode,
    pub confidence: f64,
    pub domain: Option<String>,
    pub problem_type: Option<String>,
    #[serde(default)]
    pub compute_tier: ComputeTier,
}

impl Intent {
    pub fn new(category: Mode, confidence: f64) -> Self {
        Self {
            category,
            confidence,
            domain: None,
            problem_type: None,
            compute_tier: ComputeTier::Standard,
        }
    }
}

/// Abstract problem record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: String,
    pub expressions: Vec<String>,
    pub variables: Vec<String>,
    pub constraints: Vec<String>,
    pub assumptions: Vec<String>,
    pub goal: Option<String>,
}

impl Problem {
    pub fn new() -> Self {
        Self {
            problem_id: Uuid::new_v4().to_string(),
            expressions: Vec::new(),
            variables: Vec::new(),
            constraints: Vec::new(),
            assumptions: Vec::new(),
            goal: None,
        }
    }
}

impl Default for Problem {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of a solution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgoal {
    pub subgoal_id: String,
    pub description: String,
    pub method: String,
    pub backend: String,
    pub inputs: Value,
    pub expected_output: String,
    pub is_verification: bool,
}

/// A plan: subgoal DAG plus its execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub subgoals: Vec<Subgoal>,
    pub execution_order: Vec<String>,
    pub backends_required: Vec<String>,
}

/// Raw outcome of executing a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub final_answer: Option<Value>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub duration_ms: f64,
    pub cost: f64,
}

/// A single named validation check over a solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub check_type: String,
    pub passed: bool,
    pub confidence_contribution: f64,
    pub details: String,
    pub time_ms: f64,
}

/// Ordered validation checks with the derived verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence: f64,
    pub checks: Vec<ValidationCheck>,
    pub suggested_review: bool,
}

impl ValidationReport {
    /// Identifier of the validation regime: the ordered set of check
    /// types that ran. Shadows are only comparable when this matches.
    pub fn regime_signature(&self) -> String {
        let mut types: Vec<&str> = self.checks.iter().map(|c| c.check_type.as_str()).collect();
        types.sort();
        types.dedup();
        types.join("+")
    }
}

/// World impact category and score for one episode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldImpactAssessment {
    pub category: Option<String>,
    pub impact_score: f64,
    #[serde(default)]
    pub description: String,
}

/// What is missing from a solution, and what would complete it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IncompletenessAssessment {
    pub score: f64,
    #[serde(default)]
    pub missing_elements: Vec<String>,
    #[serde(default)]
    pub partial_elements: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// Narrative summary of what the loop observed, oriented on, and did.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CognitionSummary {
    pub observed: String,
    pub oriented: String,
    pub acted: String,
    pub key_decision: String,
    pub confidence_rationale: String,
}

/// One tile of the display grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorTile {
    pub color: String,
    pub label: String,
}

/// 3x3 color tile grid for downstream display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorTileGrid {
    pub tiles: Vec<ColorTile>,
}

impl ColorTileGrid {
    pub fn new(tiles: Vec<ColorTile>) -> Self {
        debug_assert_eq!(tiles.len(), 9, "tile grid is 3x3");
        Self { tiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_limits_monotonic() {
        let light = ResourceLimits::for_tier(ComputeTier::Light);
        let standard = ResourceLimits::for_tier(ComputeTier::Standard);
        let deep = ResourceLimits::for_tier(ComputeTier::DeepSearch);
        assert!(light.max_wall_time_ms < standard.max_wall_time_ms);
        assert!(standard.max_wall_time_ms < deep.max_wall_time_ms);
        assert!(light.max_tokens < deep.max_tokens);
    }

    #[test]
    fn test_regime_signature_order_insensitive() {
        let make = |types: &[&str]| ValidationReport {
            valid: true,
            confidence: 0.9,
            checks: types
                .iter()
                .map(|t| ValidationCheck {
                    name: format!("check_{t}"),
                    check_type: t.to_string(),
                    passed: true,
                    confidence_contribution: 0.3,
                    details: String::new(),
                    time_ms: 0.1,
                })
                .collect(),
            suggested_review: false,
        };
        assert_eq!(
            make(&["core", "numeric"]).regime_signature(),
            make(&["numeric", "core"]).regime_signature()
        );
        assert_ne!(
            make(&["core"]).regime_signature(),
            make(&["core", "numeric"]).regime_signature()
        );
    }
}
