//! Invariant and enforcement types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::ContextFlowEntry;
use crate::receipt::ReceiptStore;

/// Severity of a constitutional invariant.
///
/// Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// When an invariant applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantPhase {
    Pre,
    Post,
    Both,
}

impl InvariantPhase {
    pub fn applies_pre(&self) -> bool {
        matches!(self, Self::Pre | Self::Both)
    }

    pub fn applies_post(&self) -> bool {
        matches!(self, Self::Post | Self::Both)
    }
}

/// Outcome of evaluating a single invariant predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub reason: String,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// A treaty declared by a council synthesis, scoping permitted actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treaty {
    pub parties: Vec<String>,
    pub permitted_actions: Vec<String>,
}

/// The fields of an intent the enforcer actually consumes.
///
/// Upstream producers fill this explicitly; there is no attribute probing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentSummary {
    pub intent_id: String,
    /// Actions the intent commits the system to take
    pub actions: Vec<String>,
    pub domain: Option<String>,
}

/// Council synthesis as consumed by the enforcer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CouncilSynthesis {
    pub synthesis_id: String,
    pub decision: String,
    pub confidence: f64,
    pub risk_level: Option<String>,
    pub world_impact_category: Option<String>,
    pub treaty: Option<Treaty>,
}

/// Evaluation context passed to invariant predicates.
///
/// Receipts are referenced by id and resolved through the owning store;
/// the context never holds raw back-pointers into it.
#[derive(Clone, Copy, Default)]
pub struct EvaluationContext<'a> {
    pub mode: Option<&'a str>,
    pub query: Option<&'a str>,
    pub intent: Option<&'a IntentSummary>,
    pub synthesis: Option<&'a CouncilSynthesis>,
    pub world_impact_category: Option<&'a str>,
    pub validation_confidence: Option<f64>,
    pub suggested_review: Option<bool>,
    pub review_honored: Option<bool>,
    pub context_flow: &'a [ContextFlowEntry],
    pub referenced_receipts: &'a [String],
    pub store: Option<&'a ReceiptStore>,
    pub result_timestamp: Option<DateTime<Utc>>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) type Predicate = Arc<dyn Fn(&EvaluationContext<'_>) -> CheckOutcome + Send + Sync>;

/// A safety law with an explicit precedence and a pure predicate.
#[derive(Clone)]
pub struct ConstitutionalInvariant {
    pub invariant_id: String,
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub phase: InvariantPhase,
    /// Lower value = higher priority. Required explicitly; the enforcer
    /// never infers priority from registration order.
    pub precedence: u32,
    predicate: Predicate,
}

impl ConstitutionalInvariant {
    pub fn new(
        invariant_id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
        phase: InvariantPhase,
        precedence: u32,
        predicate: impl Fn(&EvaluationContext<'_>) -> CheckOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            invariant_id: invariant_id.into(),
            name: name.into(),
            category: category.into(),
            severity,
            phase,
            precedence,
            predicate: Arc::new(predicate),
        }
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> CheckOutcome {
        (self.predicate)(ctx)
    }

    pub fn as_ref_summary(&self) -> InvariantRef {
        InvariantRef {
            invariant_id: self.invariant_id.clone(),
            name: self.name.clone(),
            severity: self.severity,
            precedence: self.precedence,
        }
    }
}

impl std::fmt::Debug for ConstitutionalInvariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstitutionalInvariant")
            .field("invariant_id", &self.invariant_id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("phase", &self.phase)
            .field("precedence", &self.precedence)
            .finish()
    }
}

/// Lightweight reference to an invariant, safe to embed in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantRef {
    pub invariant_id: String,
    pub name: String,
    pub severity: Severity,
    pub precedence: u32,
}

/// Result of a pre- or post-condition sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub allowed: bool,
    pub passed_checks: Vec<String>,
    pub failed_checks: Vec<String>,
    pub blocking_invariant: Option<InvariantRef>,
    pub blocking_reason: Option<String>,
    pub warnings: Vec<String>,
    pub check_time_ms: f64,
}

impl EnforcementResult {
    pub(crate) fn empty() -> Self {
        Self {
            allowed: true,
            passed_checks: Vec::new(),
            failed_checks: Vec::new(),
            blocking_invariant: None,
            blocking_reason: None,
            warnings: Vec::new(),
            check_time_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_phase_applicability() {
        assert!(InvariantPhase::Both.applies_pre());
        assert!(InvariantPhase::Both.applies_post());
        assert!(InvariantPhase::Pre.applies_pre());
        assert!(!InvariantPhase::Pre.applies_post());
    }
}
