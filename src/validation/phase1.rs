//! Phase 1: fixture validation over exported episodes.
//!
//! Four invariants: episodes are structurally sound, policy
//! recommendations derived from them are coherent, a pre-promotion
//! stress gate exists, and receipts survive a construct-hash-persist-
//! reload round trip. The phase mints its own receipt recording the
//! fixture hash and per-check outcomes.

use std::path::Path;

use serde_json::json;
use sha2::{Digest, Sha256};

use super::types::{ValidationCheckResult, ValidationSummary};
use crate::error::Result;
use crate::experiment::{
    InterventionType, PolicyChangeReceipt, PolicyDomain, PolicyExperiment, PolicyIntervention,
};
use crate::orchestrator::Episode;
use crate::receipt::{
    compute_receipt_hash, PhaseValidationReceipt, Receipt, ReceiptBody, ReceiptStore,
};
use crate::stress::CoverageTracker;

/// Phase 1 output: the rollup plus the phase receipt.
#[derive(Debug)]
pub struct Phase1Report {
    pub summary: ValidationSummary,
    pub receipt: Receipt,
}

/// Episode export is structurally sane.
pub fn check_episode_quality(episodes: &[Episode]) -> ValidationCheckResult {
    let mut check = ValidationCheckResult::new("episode_quality");

    if episodes.is_empty() {
        check.errors.push("no episodes found in export".to_string());
        check.details = json!({ "episode_count": 0 });
        return check;
    }

    let mut missing_fields = 0usize;
    let mut unfinished = Vec::new();
    for episode in episodes {
        if episode.episode_id.is_empty() || episode.query.is_empty() {
            missing_fields += 1;
        }
        if episode.finished_at.is_none() {
            unfinished.push(episode.episode_id.clone());
        }
        if episode.result.is_none() {
            missing_fields += 1;
        }
    }

    if missing_fields > 0 {
        check
            .errors
            .push(format!("{missing_fields} required fields missing across episodes"));
    }
    if !unfinished.is_empty() {
        check
            .errors
            .push(format!("{} episodes were never finalized", unfinished.len()));
    }

    check.passed = check.errors.is_empty();
    check.details = json!({
        "episode_count": episodes.len(),
        "missing_fields": missing_fields,
        "unfinished": unfinished,
    });
    check
}

/// Per-lever recommendation derived from episode outcomes.
fn analyze_lever(episodes: &[Episode], lever: &str) -> (String, f64) {
    let total = episodes.len().max(1) as f64;
    let successes = episodes
        .iter()
        .filter(|e| e.result.as_ref().map(|r| r.success).unwrap_or(false))
        .count() as f64;
    let success_rate = successes / total;
    let avg_confidence = episodes
        .iter()
        .filter_map(|e| e.validation.as_ref().map(|v| v.confidence))
        .sum::<f64>()
        / total;

    let action = match lever {
        "temperature_cap" if success_rate < 0.5 => "lower",
        "validation_regime" if avg_confidence < 0.5 => "tighten",
        "model_slot" if success_rate < 0.3 => "downgrade",
        _ => "hold",
    };
    // Confidence in the recommendation tracks how much signal there is.
    let confidence = (success_rate * 0.5 + avg_confidence * 0.5).clamp(0.0, 1.0);
    (action.to_string(), confidence)
}

/// Recommendations over these episodes are coherent.
pub fn check_recommendations(episodes: &[Episode]) -> ValidationCheckResult {
    let mut check = ValidationCheckResult::new("recommendations");

    if episodes.is_empty() {
        check
            .errors
            .push("cannot check recommendations without episodes".to_string());
        return check;
    }

    let levers = ["temperature_cap", "validation_regime", "model_slot"];
    let mut tested = Vec::new();
    let mut scores = Vec::new();
    for lever in levers {
        let (action, confidence) = analyze_lever(episodes, lever);
        scores.push(confidence);
        tested.push(json!({
            "lever": lever,
            "action": action,
            "confidence": confidence,
        }));
    }

    let avg_confidence = scores.iter().sum::<f64>() / scores.len() as f64;
    if avg_confidence < 0.6 {
        check.errors.push(format!(
            "average recommendation confidence below threshold: {avg_confidence:.2} < 0.6"
        ));
    }

    check.passed = check.errors.is_empty();
    check.details = json!({
        "levers_tested": tested,
        "avg_confidence": avg_confidence,
    });
    check
}

/// A pre-promotion stress gate exists and is invocable.
///
/// Soft-fail information: without a programmatic gate the check reports
/// `passed=false` with a warning and no errors, so Phase 1's gate stays
/// open while higher phases can tighten the requirement.
pub fn check_stress_gates(tracker: Option<&CoverageTracker>) -> ValidationCheckResult {
    let mut check = ValidationCheckResult::new("stress_gates");
    match tracker {
        Some(tracker) => match tracker.coverage_report() {
            Ok(report) => {
                check.passed = true;
                check.details = json!({
                    "mode": "programmatic",
                    "scenarios": report.total_scenarios,
                });
            }
            Err(e) => {
                check.errors.push(format!("stress gate unusable: {e}"));
            }
        },
        None => {
            check
                .warnings
                .push("stress gates available only via CLI; no importable API wired".to_string());
            check.details = json!({ "mode": "cli_only" });
        }
    }
    check
}

/// Receipts can be constructed, hashed, persisted, reloaded, and re-hash
/// identically.
pub fn check_receipt_chain(store_root: &Path) -> ValidationCheckResult {
    let mut check = ValidationCheckResult::new("receipt_chain");

    let intervention = PolicyIntervention::new(
        PolicyDomain::Temperature,
        InterventionType::ParameterChange,
        "temperature_cap",
        json!(0.7),
        json!(0.75),
    )
    .with_hypothesis("validation fixture intervention")
    .triggered_by("phase1_validation");

    let mut experiment = PolicyExperiment::new("Phase 1 Validation Test", intervention);
    experiment.required_sample_size = 15;
    experiment.stress_scenarios = vec!["solver_overflow".to_string()];

    let mut policy_receipt = PolicyChangeReceipt::new(
        experiment,
        true,
        "phase 1 validation round trip",
    );
    policy_receipt.guardian_approved = true;

    let receipt = Receipt::policy_change(policy_receipt);
    let pre_hash = match compute_receipt_hash(&receipt) {
        Ok(hash) => hash,
        Err(e) => {
            check.errors.push(format!("failed to hash receipt: {e}"));
            return check;
        }
    };

    let round_trip = (|| -> Result<String> {
        let store = ReceiptStore::open(store_root.join("receipts.jsonl"))?;
        let appended = store.append(receipt)?;
        let loaded = store.read_all(true, false)?;
        let last = loaded
            .last()
            .ok_or_else(|| crate::error::Error::Internal("receipt not persisted".to_string()))?;
        if last.receipt_hash != appended.receipt_hash {
            return Err(crate::error::Error::Internal(
                "stored hash does not match appended hash".to_string(),
            ));
        }
        compute_receipt_hash(&last.receipt)
    })();

    match round_trip {
        Ok(post_hash) => {
            if post_hash == pre_hash {
                check.passed = true;
                check.details = json!({
                    "hash_prefix": &pre_hash[..16],
                    "round_trip": "identical",
                });
            } else {
                check.errors.push(format!(
                    "hash changed across round trip: {} != {}",
                    &pre_hash[..16],
                    &post_hash[..16]
                ));
            }
        }
        Err(e) => {
            check.errors.push(format!("receipt round trip failed: {e}"));
        }
    }
    check
}

/// Run all Phase 1 checks and mint the phase receipt.
pub fn run_phase1_validation(
    episodes: &[Episode],
    store_root: &Path,
    tracker: Option<&CoverageTracker>,
) -> Result<Phase1Report> {
    let checks = vec![
        check_episode_quality(episodes),
        check_recommendations(episodes),
        check_stress_gates(tracker),
        check_receipt_chain(store_root),
    ];
    let summary = ValidationSummary::new(checks);

    let fixture_hash = {
        let serialized = serde_json::to_string(episodes)?;
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    let receipt = Receipt::new(ReceiptBody::PhaseValidation(PhaseValidationReceipt {
        phase: "phase1".to_string(),
        config_hash: fixture_hash,
        checks_run: summary.total_checks(),
        checks_passed: summary.passed_checks(),
        failures: summary.failures(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    }));

    Ok(Phase1Report { summary, receipt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Mode;
    use crate::orchestrator::{EpisodeOutcome, ValidationReport};

    fn good_episode(confidence: f64) -> Episode {
        let mut episode = Episode::begin("solve x^2 - 4 = 0", Mode::Math);
        episode.result = Some(EpisodeOutcome {
            success: true,
            final_answer: Some(serde_json::json!([2.0, -2.0])),
            errors: vec![],
            cost: 0.001,
        });
        episode.validation = Some(ValidationReport {
            valid: true,
            confidence,
            checks: vec![],
            suggested_review: false,
        });
        episode.finalize();
        episode
    }

    #[test]
    fn test_episode_quality_requires_episodes() {
        let check = check_episode_quality(&[]);
        assert!(check.has_failures());
    }

    #[test]
    fn test_episode_quality_passes_on_finalized_episodes() {
        let episodes = vec![good_episode(0.8), good_episode(0.9)];
        let check = check_episode_quality(&episodes);
        assert!(check.passed, "{:?}", check.errors);
    }

    #[test]
    fn test_unfinalized_episode_fails_quality() {
        let mut episode = good_episode(0.8);
        episode.finished_at = None;
        let check = check_episode_quality(&[episode]);
        assert!(check.has_failures());
    }

    #[test]
    fn test_recommendations_confidence_gate() {
        let strong = vec![good_episode(0.9), good_episode(0.85)];
        assert!(check_recommendations(&strong).passed);

        let mut weak = good_episode(0.1);
        weak.result.as_mut().unwrap().success = false;
        assert!(check_recommendations(&[weak]).has_failures());
    }

    #[test]
    fn test_stress_gate_soft_fails_without_api() {
        let check = check_stress_gates(None);
        assert!(!check.passed);
        assert!(check.errors.is_empty());
        assert_eq!(check.warnings.len(), 1);

        let tracker = CoverageTracker::in_memory().unwrap();
        let check = check_stress_gates(Some(&tracker));
        assert!(check.passed);
    }

    #[test]
    fn test_receipt_chain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let check = check_receipt_chain(dir.path());
        assert!(check.passed, "{:?}", check.errors);
    }

    #[test]
    fn test_full_phase1_gate_open_with_cli_only_stress() {
        let dir = tempfile::tempdir().unwrap();
        let episodes = vec![good_episode(0.85), good_episode(0.9)];
        let report = run_phase1_validation(&episodes, dir.path(), None).unwrap();

        // stress_gates soft-fails, so not everything passed, but nothing
        // hard-failed either: the gate stays open.
        assert!(!report.summary.all_passed());
        assert!(report.summary.gate_open());
        assert_eq!(report.summary.total_checks(), 4);

        match &report.receipt.body {
            ReceiptBody::PhaseValidation(phase) => {
                assert_eq!(phase.phase, "phase1");
                assert_eq!(phase.checks_run, 4);
                assert_eq!(phase.checks_passed, 3);
                assert!(phase.failures.is_empty());
                assert!(!phase.config_hash.is_empty());
            }
            other => panic!("expected phase receipt, got {:?}", other),
        }
    }
}
