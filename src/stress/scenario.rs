//! YAML-backed stress scenario definitions.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;

/// One budget tier to sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetTier {
    pub tier: String,
}

/// Tolerance ranges to sweep.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToleranceSweep {
    #[serde(default)]
    pub absolute: Vec<f64>,
    #[serde(default)]
    pub relative: Vec<f64>,
}

/// Stress configuration block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default)]
    pub budget_tiers: Vec<BudgetTier>,
    #[serde(default)]
    pub tolerance_sweep: ToleranceSweep,
    #[serde(default)]
    pub expected_behavior: Value,
}

/// Expected result for one edge case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedResult {
    pub outcome: String,
    #[serde(default)]
    pub confidence_min: f64,
}

/// One edge case within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCase {
    pub case_id: String,
    pub category: String,
    pub problem: Value,
    pub expected_result: ExpectedResult,
}

/// Eligibility criteria carried by a scenario's promotion config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionCriteria {
    pub min_runs: u32,
    pub max_failure_rate: f64,
    pub min_avg_confidence: f64,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self {
            min_runs: 20,
            max_failure_rate: 0.15,
            min_avg_confidence: 0.60,
        }
    }
}

/// Promotion block on a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionConfig {
    #[serde(default)]
    pub shadow_mode: bool,
    #[serde(default)]
    pub promotion_criteria: PromotionCriteria,
}

/// Declarative stress testing scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub scenario_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// "edge_cases" | "budget_sweep" | "tolerance_analysis" | "regression"
    pub category: String,
    pub domain: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stress_config: StressConfig,
    #[serde(default)]
    pub edge_cases: Vec<EdgeCase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_config: Option<PromotionConfig>,
}

impl StressScenario {
    /// Load a scenario from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let scenario = Self::from_yaml(&text)?;
        info!(scenario_id = %scenario.scenario_id, path = %path.as_ref().display(), "loaded stress scenario");
        Ok(scenario)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Edge cases, optionally filtered by category.
    pub fn edge_cases(&self, category: Option<&str>) -> Vec<&EdgeCase> {
        self.edge_cases
            .iter()
            .filter(|case| category.map_or(true, |c| case.category == c))
            .collect()
    }

    /// Budget tier names, defaulting to "standard".
    pub fn budget_tiers(&self) -> Vec<String> {
        if self.stress_config.budget_tiers.is_empty() {
            return vec!["standard".to_string()];
        }
        self.stress_config
            .budget_tiers
            .iter()
            .map(|t| t.tier.clone())
            .collect()
    }

    /// True when the scenario participates in shadow-mode promotion.
    pub fn is_promotion_enabled(&self) -> bool {
        self.promotion_config
            .as_ref()
            .map(|p| p.shadow_mode)
            .unwrap_or(false)
    }

    /// Promotion criteria, falling back to the global defaults.
    pub fn promotion_criteria(&self) -> PromotionCriteria {
        self.promotion_config
            .as_ref()
            .map(|p| p.promotion_criteria)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
scenario_id: solver-overflow
name: Solver overflow handling
description: Large-magnitude inputs must degrade gracefully.
category: edge_cases
domain: algebra
tags: [overflow, robustness]
stress_config:
  budget_tiers:
    - tier: light
    - tier: standard
  tolerance_sweep:
    absolute: [1.0e-9, 1.0e-6]
    relative: [1.0e-6, 1.0e-3]
  expected_behavior:
    degrades: gracefully
edge_cases:
  - case_id: huge-coefficients
    category: overflow
    problem:
      query: "solve 1e308*x = 1e308"
    expected_result:
      outcome: solved
      confidence_min: 0.5
promotion_config:
  shadow_mode: true
  promotion_criteria:
    min_runs: 25
    max_failure_rate: 0.10
    min_avg_confidence: 0.70
"#;

    #[test]
    fn test_yaml_round_trip() {
        let scenario = StressScenario::from_yaml(SAMPLE).unwrap();
        assert_eq!(scenario.scenario_id, "solver-overflow");
        assert_eq!(scenario.budget_tiers(), vec!["light", "standard"]);
        assert_eq!(scenario.edge_cases(Some("overflow")).len(), 1);
        assert!(scenario.is_promotion_enabled());
        assert_eq!(scenario.promotion_criteria().min_runs, 25);

        let yaml = scenario.to_yaml().unwrap();
        let back = StressScenario::from_yaml(&yaml).unwrap();
        assert_eq!(scenario, back);
    }

    #[test]
    fn test_defaults_without_promotion_config() {
        let minimal = r#"
scenario_id: s1
name: Minimal
category: edge_cases
domain: calculus
"#;
        let scenario = StressScenario::from_yaml(minimal).unwrap();
        assert!(!scenario.is_promotion_enabled());
        let criteria = scenario.promotion_criteria();
        assert_eq!(criteria.min_runs, 20);
        assert!((criteria.max_failure_rate - 0.15).abs() < 1e-9);
        assert_eq!(scenario.budget_tiers(), vec!["standard"]);
    }
}
