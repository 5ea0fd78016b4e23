//! Promotion decisions from shadow to production.
//!
//! Eligibility is judged against coverage statistics. A promotion
//! persists the policy change and emits a receipt; a rollback restores
//! the exact prior values and automatically creates a regression
//! scenario with stricter criteria, so a bad promotion becomes a test
//! that prevents its own recurrence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::coverage::{CoverageTracker, ScenarioStats};
use super::scenario::{
    EdgeCase, ExpectedResult, PromotionConfig, PromotionCriteria, StressScenario,
};
use crate::error::{Error, Result};
use crate::experiment::{
    InterventionType, PolicyChangeReceipt, PolicyDomain, PolicyExperiment, PolicyIntervention,
};
use crate::receipt::{Receipt, ReceiptStore, ReceiptWithHash};

/// Which checks passed during an eligibility evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PromotionChecks {
    pub min_runs: bool,
    pub failure_rate: bool,
    pub avg_confidence: bool,
}

/// Promotion eligibility decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub scenario_id: String,
    pub eligible: bool,
    pub reason: String,
    pub stats: ScenarioStats,
    pub confidence_score: f64,
    pub checks_passed: PromotionChecks,
}

/// One entry in the promotion audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionAction {
    pub action_id: String,
    pub timestamp: chrono::DateTime<Utc>,
    /// "promote" or "rollback"
    pub action: String,
    pub scenario_id: String,
    pub changes: HashMap<String, Value>,
    /// Values before the change, for exact restoration
    pub prior: HashMap<String, Value>,
    pub reason: String,
}

/// Manages promotion from shadow (test) to production.
pub struct PromotionManager {
    tracker: CoverageTracker,
    receipts: Arc<ReceiptStore>,
    active_policy: Mutex<HashMap<String, Value>>,
    history: Mutex<Vec<PromotionAction>>,
}

impl PromotionManager {
    pub fn new(tracker: CoverageTracker, receipts: Arc<ReceiptStore>) -> Self {
        Self {
            tracker,
            receipts,
            active_policy: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn tracker(&self) -> &CoverageTracker {
        &self.tracker
    }

    /// Current active policy envelope values.
    pub fn active_policy(&self) -> HashMap<String, Value> {
        self.active_policy
            .lock()
            .expect("promotion policy lock poisoned")
            .clone()
    }

    pub fn history(&self) -> Vec<PromotionAction> {
        self.history
            .lock()
            .expect("promotion history lock poisoned")
            .clone()
    }

    /// Judge whether a scenario has earned promotion.
    pub fn check_promotion_eligibility(
        &self,
        scenario_id: &str,
        criteria: PromotionCriteria,
    ) -> Result<PromotionDecision> {
        let stats = self.tracker.scenario_stats(scenario_id)?;

        let mut reasons = Vec::new();
        let mut checks = PromotionChecks::default();

        checks.min_runs = stats.total_runs >= criteria.min_runs;
        if checks.min_runs {
            reasons.push(format!(
                "runs threshold met: {} >= {}",
                stats.total_runs, criteria.min_runs
            ));
        } else {
            reasons.push(format!(
                "insufficient runs: {} < {} required",
                stats.total_runs, criteria.min_runs
            ));
        }

        let failure_rate = stats.failure_rate();
        checks.failure_rate = failure_rate <= criteria.max_failure_rate;
        if checks.failure_rate {
            reasons.push(format!(
                "failure rate acceptable: {:.1}% <= {:.1}%",
                failure_rate * 100.0,
                criteria.max_failure_rate * 100.0
            ));
        } else {
            reasons.push(format!(
                "failure rate too high: {:.1}% > {:.1}%",
                failure_rate * 100.0,
                criteria.max_failure_rate * 100.0
            ));
        }

        checks.avg_confidence = stats.avg_confidence >= criteria.min_avg_confidence;
        if checks.avg_confidence {
            reasons.push(format!(
                "confidence threshold met: {:.2} >= {:.2}",
                stats.avg_confidence, criteria.min_avg_confidence
            ));
        } else {
            reasons.push(format!(
                "confidence too low: {:.2} < {:.2}",
                stats.avg_confidence, criteria.min_avg_confidence
            ));
        }

        let eligible = checks.min_runs && checks.failure_rate && checks.avg_confidence;
        let confidence_score = Self::confidence_score(&stats, &criteria);

        info!(
            scenario_id,
            eligible, confidence_score, "promotion eligibility check"
        );

        Ok(PromotionDecision {
            scenario_id: scenario_id.to_string(),
            eligible,
            reason: reasons.join("\n"),
            stats,
            confidence_score,
            checks_passed: checks,
        })
    }

    /// Weighted promotion-likelihood score: 0.4 runs completeness,
    /// 0.3 failure-rate margin, 0.3 confidence margin.
    fn confidence_score(stats: &ScenarioStats, criteria: &PromotionCriteria) -> f64 {
        let runs_complete = (stats.total_runs as f64 / criteria.min_runs.max(1) as f64).min(1.0);

        let failure_rate = stats.failure_rate();
        let failure_margin = if failure_rate <= criteria.max_failure_rate {
            let margin = (criteria.max_failure_rate - failure_rate) / criteria.max_failure_rate;
            (margin * 1.5).min(1.0)
        } else {
            0.0
        };

        let confidence_margin = if stats.avg_confidence >= criteria.min_avg_confidence {
            let margin = (stats.avg_confidence - criteria.min_avg_confidence)
                / (1.0 - criteria.min_avg_confidence);
            margin.min(1.0)
        } else {
            0.0
        };

        (0.4 * runs_complete + 0.3 * failure_margin + 0.3 * confidence_margin).clamp(0.0, 1.0)
    }

    /// Persist a promotion: apply the policy changes, record the action,
    /// and emit a policy-change receipt.
    pub fn execute_promotion(
        &self,
        scenario_id: &str,
        decision: &PromotionDecision,
        policy_changes: HashMap<String, Value>,
    ) -> Result<ReceiptWithHash> {
        if !decision.eligible {
            return Err(Error::Config(format!(
                "scenario {scenario_id} is not promotion-eligible"
            )));
        }

        let prior: HashMap<String, Value> = {
            let mut policy = self.active_policy.lock().expect("promotion policy lock poisoned");
            let prior = policy_changes
                .keys()
                .map(|k| (k.clone(), policy.get(k).cloned().unwrap_or(Value::Null)))
                .collect();
            for (key, value) in &policy_changes {
                policy.insert(key.clone(), value.clone());
            }
            prior
        };

        let action = PromotionAction {
            action_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: "promote".to_string(),
            scenario_id: scenario_id.to_string(),
            changes: policy_changes.clone(),
            prior: prior.clone(),
            reason: decision.reason.clone(),
        };
        self.history
            .lock()
            .expect("promotion history lock poisoned")
            .push(action);

        let receipt = self.policy_change_receipt(
            scenario_id,
            &prior,
            &policy_changes,
            true,
            &format!("promotion of scenario {scenario_id}"),
        );
        let stored = self.receipts.append(Receipt::policy_change(receipt))?;
        info!(scenario_id, "promotion executed");
        Ok(stored)
    }

    /// Roll back the most recent promotion for a scenario.
    ///
    /// Restores the exact prior policy values, emits a rollback receipt,
    /// and registers a regression scenario with stricter promotion
    /// criteria so the failure signature stays under test.
    pub fn rollback_promotion(
        &self,
        scenario_id: &str,
        reason: &str,
    ) -> Result<(ReceiptWithHash, StressScenario)> {
        let promote_action = {
            let history = self.history.lock().expect("promotion history lock poisoned");
            history
                .iter()
                .rev()
                .find(|a| a.scenario_id == scenario_id && a.action == "promote")
                .cloned()
        }
        .ok_or_else(|| {
            Error::Config(format!("no promotion on record for scenario {scenario_id}"))
        })?;

        {
            let mut policy = self.active_policy.lock().expect("promotion policy lock poisoned");
            for (key, value) in &promote_action.prior {
                if value.is_null() {
                    policy.remove(key);
                } else {
                    policy.insert(key.clone(), value.clone());
                }
            }
        }

        let rollback_action = PromotionAction {
            action_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: "rollback".to_string(),
            scenario_id: scenario_id.to_string(),
            changes: promote_action.prior.clone(),
            prior: promote_action.changes.clone(),
            reason: reason.to_string(),
        };
        self.history
            .lock()
            .expect("promotion history lock poisoned")
            .push(rollback_action);

        let receipt = self.policy_change_receipt(
            scenario_id,
            &promote_action.changes,
            &promote_action.prior,
            false,
            reason,
        );
        let stored = self.receipts.append(Receipt::policy_change(receipt))?;

        let regression = self.create_regression_scenario(scenario_id, reason)?;
        warn!(
            scenario_id,
            regression_id = %regression.scenario_id,
            "promotion rolled back, regression scenario created"
        );

        Ok((stored, regression))
    }

    fn create_regression_scenario(
        &self,
        scenario_id: &str,
        failure_signature: &str,
    ) -> Result<StressScenario> {
        let short_id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        let scenario = StressScenario {
            scenario_id: format!("regression-{scenario_id}-{short_id}"),
            name: format!("Regression guard for {scenario_id}"),
            description: format!(
                "Created automatically after rolling back the promotion of {scenario_id}"
            ),
            category: "regression".to_string(),
            domain: "policy".to_string(),
            tags: vec!["regression".to_string(), scenario_id.to_string()],
            stress_config: Default::default(),
            edge_cases: vec![EdgeCase {
                case_id: format!("failing-signature-{short_id}"),
                category: "regression".to_string(),
                problem: json!({
                    "source_scenario": scenario_id,
                    "failure_signature": failure_signature,
                }),
                expected_result: ExpectedResult {
                    outcome: "no_regression".to_string(),
                    confidence_min: 0.7,
                },
            }],
            promotion_config: Some(PromotionConfig {
                shadow_mode: true,
                promotion_criteria: PromotionCriteria {
                    min_runs: 40,
                    max_failure_rate: 0.10,
                    min_avg_confidence: 0.70,
                },
            }),
        };

        self.tracker.record_scenario(
            &scenario.scenario_id,
            &scenario.name,
            &scenario.category,
            &scenario.domain,
        )?;
        Ok(scenario)
    }

    fn policy_change_receipt(
        &self,
        scenario_id: &str,
        old: &HashMap<String, Value>,
        new: &HashMap<String, Value>,
        promoted: bool,
        reason: &str,
    ) -> PolicyChangeReceipt {
        let intervention = PolicyIntervention::new(
            PolicyDomain::ResourceLimits,
            InterventionType::ParameterChange,
            "policy_envelope",
            serde_json::to_value(old).unwrap_or(Value::Null),
            serde_json::to_value(new).unwrap_or(Value::Null),
        )
        .triggered_by(format!("stress_promotion:{scenario_id}"));

        let mut experiment =
            PolicyExperiment::new(format!("promotion:{scenario_id}"), intervention);
        experiment.description = reason.to_string();

        PolicyChangeReceipt::new(experiment, promoted, reason)
    }

    /// Bucket every tracked scenario by promotion readiness.
    pub fn promotion_summary(&self, criteria: PromotionCriteria) -> Result<PromotionSummary> {
        let mut ready = Vec::new();
        let mut near = Vec::new();
        let mut not_ready = Vec::new();

        for scenario in self.tracker.store().all_scenarios()? {
            let decision = self.check_promotion_eligibility(&scenario.scenario_id, criteria)?;
            let entry = PromotionSummaryEntry {
                scenario_id: scenario.scenario_id.clone(),
                name: scenario.name.clone(),
                confidence_score: decision.confidence_score,
                missing_checks: missing_checks(&decision.checks_passed),
            };
            if decision.eligible {
                ready.push(entry);
            } else if decision.confidence_score >= 0.5 {
                near.push(entry);
            } else {
                not_ready.push(entry);
            }
        }

        let total = ready.len() + near.len() + not_ready.len();
        Ok(PromotionSummary {
            promotion_ready_pct: if total > 0 {
                ready.len() as f64 / total as f64
            } else {
                0.0
            },
            ready_for_promotion: ready,
            near_promotion_ready: near,
            not_ready,
            total_scenarios: total,
        })
    }
}

fn missing_checks(checks: &PromotionChecks) -> Vec<String> {
    let mut missing = Vec::new();
    if !checks.min_runs {
        missing.push("min_runs".to_string());
    }
    if !checks.failure_rate {
        missing.push("failure_rate".to_string());
    }
    if !checks.avg_confidence {
        missing.push("avg_confidence".to_string());
    }
    missing
}

/// One scenario's entry in a promotion summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionSummaryEntry {
    pub scenario_id: String,
    pub name: String,
    pub confidence_score: f64,
    pub missing_checks: Vec<String>,
}

/// Promotion readiness across all scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionSummary {
    pub ready_for_promotion: Vec<PromotionSummaryEntry>,
    pub near_promotion_ready: Vec<PromotionSummaryEntry>,
    pub not_ready: Vec<PromotionSummaryEntry>,
    pub total_scenarios: usize,
    pub promotion_ready_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::ReceiptBody;
    use crate::stress::coverage::TestRunRecord;

    fn manager(dir: &std::path::Path) -> PromotionManager {
        let tracker = CoverageTracker::in_memory().unwrap();
        let receipts = Arc::new(ReceiptStore::open(dir.join("receipts.jsonl")).unwrap());
        PromotionManager::new(tracker, receipts)
    }

    fn seed_runs(manager: &PromotionManager, scenario: &str, passed: u32, failed: u32, conf: f64) {
        manager
            .tracker()
            .record_scenario(scenario, scenario, "edge_cases", "algebra")
            .unwrap();
        for _ in 0..passed {
            let mut run = TestRunRecord::new(scenario, "case");
            run.passed = true;
            run.confidence = conf;
            manager.tracker().record_run(&run).unwrap();
        }
        for _ in 0..failed {
            let mut run = TestRunRecord::new(scenario, "case");
            run.passed = false;
            run.confidence = conf * 0.5;
            manager.tracker().record_run(&run).unwrap();
        }
    }

    #[test]
    fn test_eligibility_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        seed_runs(&manager, "good", 24, 1, 0.85);

        let decision = manager
            .check_promotion_eligibility("good", PromotionCriteria::default())
            .unwrap();
        assert!(decision.eligible);
        assert!(decision.checks_passed.min_runs);
        assert!(decision.checks_passed.failure_rate);
        assert!(decision.checks_passed.avg_confidence);
        assert!(decision.confidence_score > 0.5);
    }

    #[test]
    fn test_not_eligible_with_few_runs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        seed_runs(&manager, "thin", 5, 0, 0.9);

        let decision = manager
            .check_promotion_eligibility("thin", PromotionCriteria::default())
            .unwrap();
        assert!(!decision.eligible);
        assert!(!decision.checks_passed.min_runs);
        assert!(decision.reason.contains("insufficient runs"));
    }

    #[test]
    fn test_promotion_and_rollback_restores_prior_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        seed_runs(&manager, "good", 24, 1, 0.82);

        let decision = manager
            .check_promotion_eligibility("good", PromotionCriteria::default())
            .unwrap();
        assert!(decision.eligible);

        let mut changes = HashMap::new();
        changes.insert("validation_regime".to_string(), json!("basic"));
        let stored = manager
            .execute_promotion("good", &decision, changes)
            .unwrap();
        assert!(matches!(
            stored.receipt.body,
            ReceiptBody::PolicyChange(ref pc) if pc.promoted
        ));
        assert_eq!(manager.active_policy().get("validation_regime"), Some(&json!("basic")));

        // Follow-on metrics regressed: roll back.
        let (rollback_receipt, regression) = manager
            .rollback_promotion("good", "timeout rate 30% after promotion")
            .unwrap();
        assert!(matches!(
            rollback_receipt.receipt.body,
            ReceiptBody::PolicyChange(ref pc) if !pc.promoted
        ));
        // Exact prior restoration: the key did not exist before.
        assert!(manager.active_policy().get("validation_regime").is_none());

        // Regression scenario closes the loop.
        assert_eq!(regression.category, "regression");
        assert!(regression.tags.contains(&"regression".to_string()));
        assert!(regression.tags.contains(&"good".to_string()));
        let criteria = regression.promotion_criteria();
        assert!(criteria.min_runs > PromotionCriteria::default().min_runs);
        assert!(criteria.max_failure_rate < PromotionCriteria::default().max_failure_rate);

        // And it is tracked.
        let tracked = manager.tracker().store().all_scenarios().unwrap();
        assert!(tracked
            .iter()
            .any(|s| s.scenario_id == regression.scenario_id));

        let history = manager.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, "rollback");
    }

    #[test]
    fn test_promotion_refused_when_ineligible() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        seed_runs(&manager, "thin", 2, 0, 0.9);

        let decision = manager
            .check_promotion_eligibility("thin", PromotionCriteria::default())
            .unwrap();
        let result = manager.execute_promotion("thin", &decision, HashMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_promotion_summary_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        seed_runs(&manager, "ready", 24, 1, 0.85);
        seed_runs(&manager, "near", 15, 1, 0.80);
        seed_runs(&manager, "cold", 1, 3, 0.2);

        let summary = manager
            .promotion_summary(PromotionCriteria::default())
            .unwrap();
        assert_eq!(summary.total_scenarios, 3);
        assert_eq!(summary.ready_for_promotion.len(), 1);
        assert_eq!(summary.near_promotion_ready.len(), 1);
        assert_eq!(summary.not_ready.len(), 1);
        assert_eq!(
            summary.near_promotion_ready[0].missing_checks,
            vec!["min_runs".to_string()]
        );
    }
}
