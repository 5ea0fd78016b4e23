//! Pre-registered policy experiments and their shadow executions.
//!
//! Every policy change is an experiment: target effect, required sample
//! size, stress scenarios, and success criteria are all declared before
//! data collection starts. This locks causal and stress expectations
//! together and prevents after-the-fact criteria shopping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Policy domains that can be tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDomain {
    Temperature,
    ModelSlot,
    ValidationRegime,
    ResourceLimits,
    TimeoutBudget,
    TreatyRequirement,
}

impl std::fmt::Display for PolicyDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Temperature => "temperature",
            Self::ModelSlot => "model_slot",
            Self::ValidationRegime => "validation_regime",
            Self::ResourceLimits => "resource_limits",
            Self::TimeoutBudget => "timeout_budget",
            Self::TreatyRequirement => "treaty_requirement",
        };
        write!(f, "{}", s)
    }
}

/// Type of policy intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    ParameterChange,
    SlotDowngrade,
    RegimeSimplification,
    ValidationTightening,
    ConstraintAddition,
}

/// Pre-registered success criteria for a policy experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub min_effect_size: f64,
    pub confidence_level: f64,
    pub max_ci_width: f64,
    pub min_episodes_per_stratum: usize,
    pub min_overlap_per_stratum: f64,
    pub max_latency_regression_pct: f64,
    pub max_cost_increase_pct: f64,
    pub no_new_failure_modes: bool,
    pub stress_scenarios_pass: bool,
    pub max_validity_concerns: usize,
    pub no_unmeasured_confounding_flags: bool,
    pub observation_days: u32,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            min_effect_size: 0.10,
            confidence_level: 0.95,
            max_ci_width: 0.20,
            min_episodes_per_stratum: 30,
            min_overlap_per_stratum: 0.10,
            max_latency_regression_pct: 5.0,
            max_cost_increase_pct: 10.0,
            no_new_failure_modes: true,
            stress_scenarios_pass: true,
            max_validity_concerns: 1,
            no_unmeasured_confounding_flags: false,
            observation_days: 7,
        }
    }
}

/// What changed in a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyIntervention {
    pub intervention_id: String,
    pub timestamp: DateTime<Utc>,
    pub domain: PolicyDomain,
    pub intervention_type: InterventionType,
    pub parameter_name: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Why the change is expected to help
    pub hypothesis: String,
    /// How the change is expected to work
    pub mechanism: String,
    pub triggered_by: String,
}

impl PolicyIntervention {
    pub fn new(
        domain: PolicyDomain,
        intervention_type: InterventionType,
        parameter_name: impl Into<String>,
        old_value: Value,
        new_value: Value,
    ) -> Self {
        Self {
            intervention_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            domain,
            intervention_type,
            parameter_name: parameter_name.into(),
            old_value,
            new_value,
            hypothesis: String::new(),
            mechanism: String::new(),
            triggered_by: String::new(),
        }
    }

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = hypothesis.into();
        self
    }

    pub fn with_mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.mechanism = mechanism.into();
        self
    }

    pub fn triggered_by(mut self, trigger: impl Into<String>) -> Self {
        self.triggered_by = trigger.into();
        self
    }
}

/// Re-running an episode under a candidate policy.
///
/// The shadow pairs an actual execution with its counterfactual. Only
/// pairs produced under the same validation regime are comparable; the
/// rest are kept for the record but never enter a causal summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowExecution {
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the paired episode
    pub episode_id: String,

    pub actual_success: bool,
    pub actual_confidence: f64,
    pub actual_latency_ms: f64,
    pub actual_cost: f64,
    #[serde(default)]
    pub actual_errors: Vec<String>,

    pub shadow_success: bool,
    pub shadow_confidence: f64,
    pub shadow_latency_ms: f64,
    pub shadow_cost: f64,
    #[serde(default)]
    pub shadow_errors: Vec<String>,

    pub validation_regime_identical: bool,
    #[serde(default)]
    pub validation_mismatch_reason: String,

    // Derived by compute_deltas
    pub comparable: bool,
    pub outcome_changed: bool,
    pub confidence_delta: f64,
    pub latency_delta_pct: f64,
    pub cost_delta_pct: f64,
}

impl ShadowExecution {
    pub fn new(episode_id: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            episode_id: episode_id.into(),
            actual_success: false,
            actual_confidence: 0.0,
            actual_latency_ms: 0.0,
            actual_cost: 0.0,
            actual_errors: Vec::new(),
            shadow_success: false,
            shadow_confidence: 0.0,
            shadow_latency_ms: 0.0,
            shadow_cost: 0.0,
            shadow_errors: Vec::new(),
            validation_regime_identical: false,
            validation_mismatch_reason: String::new(),
            comparable: false,
            outcome_changed: false,
            confidence_delta: 0.0,
            latency_delta_pct: 0.0,
            cost_delta_pct: 0.0,
        }
    }

    /// Populate the derived comparison fields.
    pub fn compute_deltas(&mut self) {
        if self.actual_latency_ms > 0.0 {
            self.latency_delta_pct =
                (self.shadow_latency_ms - self.actual_latency_ms) / self.actual_latency_ms * 100.0;
        }
        if self.actual_cost > 0.0 {
            self.cost_delta_pct = (self.shadow_cost - self.actual_cost) / self.actual_cost * 100.0;
        }
        self.confidence_delta = self.shadow_confidence - self.actual_confidence;
        self.outcome_changed = self.actual_success != self.shadow_success;
        self.comparable = self.validation_regime_identical;
    }
}

/// Promotion recommendation derived from a causal summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionRecommendation {
    Promote,
    Hold,
    Investigate,
    Inconclusive,
}

/// Causal effect estimate with explicit validity transparency.
///
/// `validity_concerns` is mandatory transparency: the estimator records
/// every caveat it knows about and nothing downstream may elide the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalSummary {
    pub summary_id: String,
    pub timestamp: DateTime<Utc>,
    pub effect_estimate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub method: String,
    pub sample_size: usize,
    pub sample_size_per_stratum_min: usize,
    pub sample_size_per_stratum_max: usize,
    pub overlap_check_passed: bool,
    pub min_overlap_observed: f64,
    pub validity_concerns: Vec<String>,
    pub promotion_recommendation: PromotionRecommendation,
}

impl CausalSummary {
    /// True if the 95% CI spans zero (effect not significant).
    pub fn ci_contains_zero(&self) -> bool {
        self.ci_lower <= 0.0 && 0.0 <= self.ci_upper
    }

    /// True if any concern is blocking.
    pub fn has_blocking_concerns(&self) -> bool {
        const BLOCKING: [&str; 2] = ["unmeasured_confounding", "severe_heterogeneity"];
        self.validity_concerns
            .iter()
            .any(|c| BLOCKING.iter().any(|kw| c.contains(kw)))
    }
}

/// Pre-registered policy experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyExperiment {
    pub experiment_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub description: String,
    pub intervention: PolicyIntervention,
    pub target_effect: f64,
    pub required_sample_size: usize,
    pub success_criteria: SuccessCriteria,
    /// Stress scenarios that must pass before promotion
    pub stress_scenarios: Vec<String>,
    pub scheduled_duration_days: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether treatment assignment is randomized (vs. observational)
    pub randomized: bool,
    pub causal_summary: Option<CausalSummary>,
    pub promotion_approved: bool,
    #[serde(default)]
    pub promotion_approved_by: String,
    pub promotion_approved_at: Option<DateTime<Utc>>,
}

impl PolicyExperiment {
    pub fn new(name: impl Into<String>, intervention: PolicyIntervention) -> Self {
        Self {
            experiment_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            name: name.into(),
            description: String::new(),
            intervention,
            target_effect: 0.10,
            required_sample_size: 30,
            success_criteria: SuccessCriteria::default(),
            stress_scenarios: Vec::new(),
            scheduled_duration_days: 7,
            started_at: None,
            ended_at: None,
            randomized: true,
            causal_summary: None,
            promotion_approved: false,
            promotion_approved_by: String::new(),
            promotion_approved_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn observational(mut self) -> Self {
        self.randomized = false;
        self
    }

    /// True if the experiment is currently running.
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    /// True if the experiment has ended.
    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// True if the causal summary recommends promotion.
    pub fn promotion_eligible(&self) -> bool {
        self.causal_summary
            .as_ref()
            .map(|s| s.promotion_recommendation == PromotionRecommendation::Promote)
            .unwrap_or(false)
    }
}

/// Complete audit trail for a policy change: intervention + shadows +
/// causal analysis + promotion decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyChangeReceipt {
    pub experiment: PolicyExperiment,
    pub promoted: bool,
    pub promotion_reason: String,
    pub guardian_approved: bool,
    #[serde(default)]
    pub guardian_notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_snapshot: Option<HashMap<String, Value>>,
}

impl PolicyChangeReceipt {
    pub fn new(experiment: PolicyExperiment, promoted: bool, reason: impl Into<String>) -> Self {
        Self {
            experiment,
            promoted,
            promotion_reason: reason.into(),
            guardian_approved: false,
            guardian_notes: String::new(),
            metrics_snapshot: None,
        }
    }
}
