//! The standard invariant set.
//!
//! Precedence values are spaced so operators can interleave their own
//! invariants without renumbering.

use super::types::{
    CheckOutcome, ConstitutionalInvariant, EvaluationContext, InvariantPhase, Severity,
};

/// Treaty compliance: high-stakes work requires a treaty, and a declared
/// treaty scopes the intent's action set.
pub fn treaty_compliance() -> ConstitutionalInvariant {
    ConstitutionalInvariant::new(
        "INV-TREATY",
        "Treaty Compliance",
        "governance",
        Severity::Critical,
        InvariantPhase::Pre,
        5,
        |ctx: &EvaluationContext<'_>| {
            let high_stakes = ctx.world_impact_category == Some("high_stakes")
                || ctx
                    .synthesis
                    .and_then(|s| s.world_impact_category.as_deref())
                    == Some("high_stakes");

            let treaty = ctx.synthesis.and_then(|s| s.treaty.as_ref());

            match (high_stakes, treaty) {
                (true, None) => {
                    CheckOutcome::fail("high-stakes execution requires a declared treaty")
                }
                (_, Some(treaty)) => {
                    let actions: &[String] = ctx
                        .intent
                        .map(|i| i.actions.as_slice())
                        .unwrap_or(&[]);
                    let outside: Vec<&String> = actions
                        .iter()
                        .filter(|a| !treaty.permitted_actions.contains(a))
                        .collect();
                    if outside.is_empty() {
                        CheckOutcome::pass()
                    } else {
                        CheckOutcome::fail(format!(
                            "actions outside treaty scope: {}",
                            outside
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ))
                    }
                }
                (false, None) => CheckOutcome::pass(),
            }
        },
    )
}

/// Tri-temporal ordering: referenced receipts precede the result, and the
/// context flow is weakly monotonic in timestamp within each phase.
pub fn tri_temporal() -> ConstitutionalInvariant {
    ConstitutionalInvariant::new(
        "INV-TRITEMPORAL",
        "Tri-Temporal Ordering",
        "integrity",
        Severity::High,
        InvariantPhase::Post,
        10,
        |ctx: &EvaluationContext<'_>| {
            if let (Some(store), Some(result_ts)) = (ctx.store, ctx.result_timestamp) {
                let records = match store.read_all(false, true) {
                    Ok(records) => records,
                    Err(e) => return CheckOutcome::fail(format!("receipt store unreadable: {e}")),
                };
                for id in ctx.referenced_receipts {
                    if let Some(record) = records
                        .iter()
                        .find(|r| r.receipt.receipt_id.to_string() == *id)
                    {
                        if record.receipt.timestamp > result_ts {
                            return CheckOutcome::fail(format!(
                                "receipt {} postdates the result it supports",
                                id
                            ));
                        }
                    }
                }
            }

            let mut last_by_phase: std::collections::HashMap<&str, chrono::DateTime<chrono::Utc>> =
                std::collections::HashMap::new();
            for entry in ctx.context_flow {
                if let Some(prev) = last_by_phase.get(entry.phase.as_str()) {
                    if entry.timestamp < *prev {
                        return CheckOutcome::fail(format!(
                            "context flow not monotonic within phase {}",
                            entry.phase
                        ));
                    }
                }
                last_by_phase.insert(entry.phase.as_str(), entry.timestamp);
            }

            CheckOutcome::pass()
        },
    )
}

/// Dignity floor: high-stakes results must carry enough validation
/// confidence, and a suggested review must actually be honored.
pub fn dignity_floor() -> ConstitutionalInvariant {
    ConstitutionalInvariant::new(
        "INV-DIGNITY",
        "Dignity Floor",
        "safety",
        Severity::High,
        InvariantPhase::Post,
        20,
        |ctx: &EvaluationContext<'_>| {
            if ctx.world_impact_category != Some("high_stakes") {
                return CheckOutcome::pass();
            }
            match ctx.validation_confidence {
                Some(confidence) if confidence < 0.6 => {
                    return CheckOutcome::fail(format!(
                        "high-stakes result with validation confidence {:.2} < 0.60",
                        confidence
                    ));
                }
                None => {
                    return CheckOutcome::fail("high-stakes result without validation");
                }
                _ => {}
            }
            if ctx.suggested_review == Some(true) && ctx.review_honored != Some(true) {
                return CheckOutcome::fail("suggested review was not honored");
            }
            CheckOutcome::pass()
        },
    )
}

/// Receipt continuity: every referenced receipt id resolves in the store.
pub fn receipt_continuity() -> ConstitutionalInvariant {
    ConstitutionalInvariant::new(
        "INV-CONTINUITY",
        "Receipt Continuity",
        "integrity",
        Severity::High,
        InvariantPhase::Both,
        30,
        |ctx: &EvaluationContext<'_>| {
            if ctx.referenced_receipts.is_empty() {
                return CheckOutcome::pass();
            }
            let store = match ctx.store {
                Some(store) => store,
                None => return CheckOutcome::fail("receipts referenced but no store attached"),
            };
            for id in ctx.referenced_receipts {
                match store.contains(id) {
                    Ok(true) => {}
                    Ok(false) => {
                        return CheckOutcome::fail(format!("receipt {} does not resolve", id))
                    }
                    Err(e) => {
                        return CheckOutcome::fail(format!("receipt store unreadable: {e}"))
                    }
                }
            }
            CheckOutcome::pass()
        },
    )
}

/// The full standard set in precedence order.
pub fn standard_invariants() -> Vec<ConstitutionalInvariant> {
    vec![
        treaty_compliance(),
        tri_temporal(),
        dignity_floor(),
        receipt_continuity(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constitutional::types::{CouncilSynthesis, IntentSummary, Treaty};

    #[test]
    fn test_treaty_blocks_high_stakes_without_treaty() {
        let invariant = treaty_compliance();
        let ctx = EvaluationContext {
            world_impact_category: Some("high_stakes"),
            ..EvaluationContext::new()
        };
        let outcome = invariant.evaluate(&ctx);
        assert!(!outcome.passed);
        assert!(outcome.reason.contains("treaty"));
    }

    #[test]
    fn test_treaty_scopes_actions() {
        let invariant = treaty_compliance();
        let synthesis = CouncilSynthesis {
            treaty: Some(Treaty {
                parties: vec!["guardian".into()],
                permitted_actions: vec!["solve".into()],
            }),
            ..CouncilSynthesis::default()
        };
        let intent = IntentSummary {
            intent_id: "i1".into(),
            actions: vec!["solve".into(), "deploy".into()],
            domain: None,
        };
        let ctx = EvaluationContext {
            synthesis: Some(&synthesis),
            intent: Some(&intent),
            ..EvaluationContext::new()
        };
        let outcome = invariant.evaluate(&ctx);
        assert!(!outcome.passed);
        assert!(outcome.reason.contains("deploy"));
    }

    #[test]
    fn test_dignity_floor_low_stakes_passes() {
        let invariant = dignity_floor();
        let ctx = EvaluationContext {
            validation_confidence: Some(0.1),
            ..EvaluationContext::new()
        };
        assert!(invariant.evaluate(&ctx).passed);
    }

    #[test]
    fn test_dignity_floor_high_stakes_needs_confidence() {
        let invariant = dignity_floor();
        let ctx = EvaluationContext {
            world_impact_category: Some("high_stakes"),
            validation_confidence: Some(0.4),
            ..EvaluationContext::new()
        };
        assert!(!invariant.evaluate(&ctx).passed);
    }

    #[test]
    fn test_standard_set_has_explicit_precedence() {
        let invariants = standard_invariants();
        let mut precedences: Vec<u32> = invariants.iter().map(|i| i.precedence).collect();
        precedences.dedup();
        assert_eq!(precedences.len(), invariants.len());
    }
}
