//! Shared currency for validation checks across phases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Atomic validation result for a single named check.
///
/// A check can be "not passed" without being a failure: `has_failures`
/// requires errors. Soft-fails (passed=false, no errors) carry
/// information without blocking a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub details: Value,
}

impl ValidationCheckResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            warnings: Vec::new(),
            errors: Vec::new(),
            details: Value::Null,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.passed && !self.errors.is_empty()
    }
}

/// Rollup of multiple check results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub checks: Vec<ValidationCheckResult>,
}

impl ValidationSummary {
    pub fn new(checks: Vec<ValidationCheckResult>) -> Self {
        Self { checks }
    }

    pub fn passed_checks(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn warnings_count(&self) -> usize {
        self.checks.iter().map(|c| c.warnings.len()).sum()
    }

    /// Names of checks that have hard failures.
    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.has_failures())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// The phase gate: no check with hard errors.
    pub fn gate_open(&self) -> bool {
        self.failures().is_empty()
    }

    pub fn total_checks(&self) -> usize {
        self.checks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_fail_is_not_a_failure() {
        let mut check = ValidationCheckResult::new("stress_gates");
        check.passed = false;
        check.warnings.push("CLI only".to_string());
        assert!(!check.has_failures());

        let summary = ValidationSummary::new(vec![check]);
        assert!(!summary.all_passed());
        assert!(summary.gate_open());
    }

    #[test]
    fn test_hard_failure_closes_gate() {
        let mut check = ValidationCheckResult::new("episode_quality");
        check.errors.push("no episodes".to_string());
        let summary = ValidationSummary::new(vec![check]);
        assert!(!summary.gate_open());
        assert_eq!(summary.failures(), vec!["episode_quality".to_string()]);
    }
}
