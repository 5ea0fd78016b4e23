//! Runtime enforcement of constitutional invariants.
//!
//! Pre-conditions run before the act phase; post-conditions run after.
//! Severity handling:
//! - critical failing: execution blocks, a block receipt is due
//! - high failing: execution continues, warnings populated, violation receipt due
//! - medium/low failing: logged only

use std::time::Instant;

use tracing::{debug, info, warn};

use super::invariants::standard_invariants;
use super::types::{
    ConstitutionalInvariant, EnforcementResult, EvaluationContext, InvariantPhase, Severity,
};
use crate::receipt::{
    ConstitutionalBlockReceipt, ConstitutionalPassReceipt, ConstitutionalViolationReceipt,
    ReceiptBody,
};

/// Holds the ordered invariant registry and runs pre/post sweeps.
pub struct ConstitutionalEnforcer {
    invariants: Vec<ConstitutionalInvariant>,
}

impl ConstitutionalEnforcer {
    /// An enforcer with no invariants registered.
    pub fn empty() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// An enforcer loaded with the standard invariant set.
    pub fn new() -> Self {
        Self {
            invariants: standard_invariants(),
        }
    }

    pub fn register(&mut self, invariant: ConstitutionalInvariant) {
        self.invariants.push(invariant);
    }

    pub fn invariants(&self) -> &[ConstitutionalInvariant] {
        &self.invariants
    }

    /// Evaluate all `pre` and `both` invariants.
    pub fn check_pre_conditions(&self, ctx: &EvaluationContext<'_>) -> EnforcementResult {
        self.check(ctx, |phase| phase.applies_pre())
    }

    /// Evaluate all `post` and `both` invariants.
    pub fn check_post_conditions(&self, ctx: &EvaluationContext<'_>) -> EnforcementResult {
        self.check(ctx, |phase| phase.applies_post())
    }

    fn check(
        &self,
        ctx: &EvaluationContext<'_>,
        applies: impl Fn(&InvariantPhase) -> bool,
    ) -> EnforcementResult {
        let start = Instant::now();
        let mut result = EnforcementResult::empty();

        let mut applicable: Vec<&ConstitutionalInvariant> = self
            .invariants
            .iter()
            .filter(|inv| applies(&inv.phase))
            .collect();
        // (precedence asc, severity desc): explicit precedence always wins;
        // registration order is never consulted.
        applicable.sort_by(|a, b| {
            a.precedence
                .cmp(&b.precedence)
                .then_with(|| b.severity.cmp(&a.severity))
        });

        for invariant in applicable {
            let outcome = invariant.evaluate(ctx);
            if outcome.passed {
                result.passed_checks.push(invariant.name.clone());
                continue;
            }

            result.failed_checks.push(invariant.name.clone());
            match invariant.severity {
                Severity::Critical => {
                    result.allowed = false;
                    result.blocking_invariant = Some(invariant.as_ref_summary());
                    result.blocking_reason = Some(outcome.reason.clone());
                    info!(
                        invariant = %invariant.name,
                        reason = %outcome.reason,
                        "critical invariant failed, blocking"
                    );
                    // First critical failure short-circuits everything at
                    // lower precedence with equal or lower severity, which
                    // at Critical is the entire remainder.
                    break;
                }
                Severity::High => {
                    warn!(invariant = %invariant.name, reason = %outcome.reason, "invariant violated");
                    result.warnings.push(format!(
                        "{}: {}",
                        invariant.name, outcome.reason
                    ));
                }
                Severity::Medium | Severity::Low => {
                    debug!(invariant = %invariant.name, reason = %outcome.reason, "invariant failed");
                }
            }
        }

        result.check_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        result
    }

    /// Resolve a conflict between two invariants: higher precedence wins,
    /// ties break by severity, then by stable id order.
    ///
    /// Conflicts are not detected automatically; this answers the question
    /// when a caller asks it.
    pub fn resolve_conflict<'a>(
        &self,
        a: &'a ConstitutionalInvariant,
        b: &'a ConstitutionalInvariant,
    ) -> &'a ConstitutionalInvariant {
        match a
            .precedence
            .cmp(&b.precedence)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.invariant_id.cmp(&b.invariant_id))
        {
            std::cmp::Ordering::Greater => b,
            _ => a,
        }
    }

    /// Build the receipt this sweep owes the store.
    pub fn receipt_for(
        &self,
        result: &EnforcementResult,
        phase: &str,
        blocked_action: &str,
    ) -> ReceiptBody {
        if !result.allowed {
            let blocking = result
                .blocking_invariant
                .as_ref()
                .expect("blocked result without blocking invariant");
            // A pre-phase critical failure blocks the action; the same
            // failure found post-hoc is a violation of an already-run
            // execution and escalates instead.
            if phase == "pre" {
                return ReceiptBody::ConstitutionalBlock(ConstitutionalBlockReceipt {
                    invariant_id: blocking.invariant_id.clone(),
                    invariant_name: blocking.name.clone(),
                    severity: blocking.severity,
                    blocked_action: blocked_action.to_string(),
                    block_reason: result.blocking_reason.clone().unwrap_or_default(),
                    intent_id: None,
                    synthesis_id: None,
                    risk_level: None,
                    domain: None,
                });
            }
            return ReceiptBody::ConstitutionalViolation(ConstitutionalViolationReceipt {
                invariant_id: blocking.invariant_id.clone(),
                invariant_name: blocking.name.clone(),
                severity: blocking.severity,
                phase: phase.to_string(),
                violation_description: result.blocking_reason.clone().unwrap_or_default(),
                escalated_to_guardian: true,
            });
        }

        if !result.warnings.is_empty() {
            // High-severity failures: report the first as the immediate cause.
            let first = result
                .failed_checks
                .first()
                .cloned()
                .unwrap_or_default();
            return ReceiptBody::ConstitutionalViolation(ConstitutionalViolationReceipt {
                invariant_id: first.clone(),
                invariant_name: first,
                severity: Severity::High,
                phase: phase.to_string(),
                violation_description: result.warnings.join("; "),
                escalated_to_guardian: true,
            });
        }

        ReceiptBody::ConstitutionalPass(ConstitutionalPassReceipt {
            phase: phase.to_string(),
            invariants_checked: result.passed_checks.len() + result.failed_checks.len(),
            invariants_passed: result.passed_checks.len(),
            check_time_ms: result.check_time_ms,
            warnings: result.warnings.clone(),
        })
    }
}

impl Default for ConstitutionalEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutional::types::CheckOutcome;

    fn always_fail(
        id: &str,
        severity: Severity,
        phase: InvariantPhase,
        precedence: u32,
    ) -> ConstitutionalInvariant {
        ConstitutionalInvariant::new(
            id,
            id,
            "test",
            severity,
            phase,
            precedence,
            |_ctx| CheckOutcome::fail("always fails"),
        )
    }

    fn always_pass(id: &str, precedence: u32) -> ConstitutionalInvariant {
        ConstitutionalInvariant::new(
            id,
            id,
            "test",
            Severity::Medium,
            InvariantPhase::Both,
            precedence,
            |_ctx| CheckOutcome::pass(),
        )
    }

    #[test]
    fn test_critical_failure_blocks_and_short_circuits() {
        let mut enforcer = ConstitutionalEnforcer::empty();
        enforcer.register(always_fail("crit", Severity::Critical, InvariantPhase::Pre, 1));
        enforcer.register(always_fail("high", Severity::High, InvariantPhase::Pre, 2));

        let result = enforcer.check_pre_conditions(&EvaluationContext::new());
        assert!(!result.allowed);
        assert_eq!(result.blocking_invariant.as_ref().unwrap().name, "crit");
        // Short-circuit: the high invariant at lower precedence never ran.
        assert_eq!(result.failed_checks, vec!["crit".to_string()]);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_high_failure_warns_but_allows() {
        let mut enforcer = ConstitutionalEnforcer::empty();
        enforcer.register(always_fail("high", Severity::High, InvariantPhase::Post, 1));
        enforcer.register(always_pass("ok", 2));

        let result = enforcer.check_post_conditions(&EvaluationContext::new());
        assert!(result.allowed);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.passed_checks, vec!["ok".to_string()]);
    }

    #[test]
    fn test_medium_failure_logged_only() {
        let mut enforcer = ConstitutionalEnforcer::empty();
        enforcer.register(always_fail("med", Severity::Medium, InvariantPhase::Pre, 1));

        let result = enforcer.check_pre_conditions(&EvaluationContext::new());
        assert!(result.allowed);
        assert!(result.warnings.is_empty());
        assert_eq!(result.failed_checks, vec!["med".to_string()]);
    }

    #[test]
    fn test_precedence_order_not_registration_order() {
        let mut enforcer = ConstitutionalEnforcer::empty();
        // Registered second, but higher priority by precedence.
        enforcer.register(always_fail("late", Severity::Critical, InvariantPhase::Pre, 50));
        enforcer.register(always_fail("first", Severity::Critical, InvariantPhase::Pre, 1));

        let result = enforcer.check_pre_conditions(&EvaluationContext::new());
        assert_eq!(result.blocking_invariant.as_ref().unwrap().name, "first");
    }

    #[test]
    fn test_resolve_conflict() {
        let enforcer = ConstitutionalEnforcer::empty();
        let a = always_fail("a", Severity::High, InvariantPhase::Pre, 10);
        let b = always_fail("b", Severity::Critical, InvariantPhase::Pre, 5);
        assert_eq!(enforcer.resolve_conflict(&a, &b).invariant_id, "b");

        // Same precedence: severity breaks the tie.
        let c = always_fail("c", Severity::Critical, InvariantPhase::Pre, 10);
        assert_eq!(enforcer.resolve_conflict(&a, &c).invariant_id, "c");

        // Same precedence and severity: stable id order.
        let d = always_fail("d", Severity::Critical, InvariantPhase::Pre, 10);
        assert_eq!(enforcer.resolve_conflict(&d, &c).invariant_id, "c");
    }

    #[test]
    fn test_pass_receipt_shape() {
        let mut enforcer = ConstitutionalEnforcer::empty();
        enforcer.register(always_pass("ok", 1));
        let result = enforcer.check_pre_conditions(&EvaluationContext::new());
        match enforcer.receipt_for(&result, "pre", "query") {
            ReceiptBody::ConstitutionalPass(pass) => {
                assert_eq!(pass.invariants_checked, 1);
                assert_eq!(pass.invariants_passed, 1);
            }
            other => panic!("expected pass receipt, got {:?}", other),
        }
    }
}
