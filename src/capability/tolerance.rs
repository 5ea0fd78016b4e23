//! Tolerance-governed verification predicates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::backend::{EvalOutcome, SolverBackend};
use crate::error::Result;

/// Tolerances governing substitution and gradient cross-checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceConfig {
    pub absolute: f64,
    pub relative: f64,
    /// Magnitude cap: values above this are treated as this magnitude
    /// when scaling the relative term.
    pub max_magnitude: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-6,
            max_magnitude: 1e12,
        }
    }
}

impl ToleranceConfig {
    pub fn new(absolute: f64, relative: f64) -> Self {
        Self {
            absolute,
            relative,
            ..Self::default()
        }
    }

    /// Allowed residual for an expected magnitude.
    pub fn budget(&self, expected_magnitude: f64) -> f64 {
        let magnitude = expected_magnitude.abs().min(self.max_magnitude);
        self.absolute + self.relative * magnitude
    }
}

/// Result of a substitution check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionCheck {
    pub passed: bool,
    pub residual: f64,
    pub message: String,
}

/// Verify a solution by substituting it back into the expression.
///
/// Passes when the residual cancels to an exact symbolic zero, or when
/// `|residual| <= absolute + relative * |expected_magnitude|` with the
/// expected magnitude taken from the largest bound value.
pub fn substitution_check(
    backend: &dyn SolverBackend,
    expression: &str,
    assignment: &HashMap<String, f64>,
    tolerance: &ToleranceConfig,
) -> Result<SubstitutionCheck> {
    let outcome = backend.evaluate(expression, assignment)?;

    match outcome {
        EvalOutcome::ExactZero => Ok(SubstitutionCheck {
            passed: true,
            residual: 0.0,
            message: "residual cancelled symbolically".to_string(),
        }),
        EvalOutcome::Numeric(residual) => {
            if !residual.is_finite() {
                return Ok(SubstitutionCheck {
                    passed: false,
                    residual,
                    message: format!("residual is not finite: {}", residual),
                });
            }

            let expected_magnitude = assignment
                .values()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            let budget = tolerance.budget(expected_magnitude);
            let passed = residual.abs() <= budget;

            let message = if passed {
                format!("|residual| {:.3e} within budget {:.3e}", residual.abs(), budget)
            } else {
                format!("|residual| {:.3e} exceeds budget {:.3e}", residual.abs(), budget)
            };

            Ok(SubstitutionCheck {
                passed,
                residual,
                message,
            })
        }
    }
}

/// One component comparison from a gradient check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientComparison {
    pub variable: String,
    pub symbolic: f64,
    pub numeric: f64,
    pub diff: f64,
}

/// Result of a finite-difference gradient check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientCheck {
    pub passed: bool,
    pub comparisons: Vec<GradientComparison>,
    pub message: String,
}

/// Cross-check a symbolic gradient against centered finite differences.
///
/// For each variable, the numeric partial `(f(x+h) - f(x-h)) / 2h` must
/// match the symbolic component within tolerance. All components must
/// match for the check to pass.
pub fn finite_difference_gradient_check(
    backend: &dyn SolverBackend,
    symbolic_gradient: &[f64],
    expression: &str,
    variables: &[String],
    point: &HashMap<String, f64>,
    h: f64,
    tolerance: &ToleranceConfig,
) -> Result<GradientCheck> {
    if symbolic_gradient.len() != variables.len() {
        return Ok(GradientCheck {
            passed: false,
            comparisons: Vec::new(),
            message: format!(
                "gradient has {} components but {} variables",
                symbolic_gradient.len(),
                variables.len()
            ),
        });
    }

    let mut comparisons = Vec::with_capacity(variables.len());
    let mut passed = true;

    for (variable, &symbolic) in variables.iter().zip(symbolic_gradient) {
        let mut plus = point.clone();
        let mut minus = point.clone();
        let center = point.get(variable).copied().unwrap_or(0.0);
        plus.insert(variable.clone(), center + h);
        minus.insert(variable.clone(), center - h);

        let f_plus = backend.evaluate(expression, &plus)?.as_f64();
        let f_minus = backend.evaluate(expression, &minus)?.as_f64();
        let numeric = (f_plus - f_minus) / (2.0 * h);

        let diff = (symbolic - numeric).abs();
        if diff > tolerance.budget(symbolic) {
            passed = false;
        }

        comparisons.push(GradientComparison {
            variable: variable.clone(),
            symbolic,
            numeric,
            diff,
        });
    }

    let message = if passed {
        format!("all {} components match", comparisons.len())
    } else {
        let max_diff = comparisons.iter().map(|c| c.diff).fold(0.0_f64, f64::max);
        format!("component mismatch, max diff {:.3e}", max_diff)
    };

    Ok(GradientCheck {
        passed,
        comparisons,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::backend::testing::FnBackend;

    /// Evaluates x^2 - 4 with x bound from the assignment.
    fn quadratic_backend() -> impl SolverBackend {
        FnBackend::new("test", |_expr, assignment: &HashMap<String, f64>| {
            let x = assignment.get("x").copied().unwrap_or(0.0);
            Ok(EvalOutcome::Numeric(x * x - 4.0))
        })
    }

    #[test]
    fn test_substitution_passes_for_root() {
        let backend = quadratic_backend();
        let assignment: HashMap<String, f64> = [("x".to_string(), 2.0)].into();
        let check = substitution_check(
            &backend,
            "x^2 - 4",
            &assignment,
            &ToleranceConfig::default(),
        )
        .unwrap();
        assert!(check.passed);
        assert_eq!(check.residual, 0.0);
    }

    #[test]
    fn test_substitution_fails_for_non_root() {
        let backend = quadratic_backend();
        let assignment: HashMap<String, f64> = [("x".to_string(), 3.0)].into();
        let check = substitution_check(
            &backend,
            "x^2 - 4",
            &assignment,
            &ToleranceConfig::default(),
        )
        .unwrap();
        assert!(!check.passed);
        assert!((check.residual - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_substitution_sign_symmetric_and_monotone_in_absolute() {
        // |residual| governs: +r and -r behave identically, and widening
        // the absolute tolerance can only turn failures into passes.
        for residual in [0.5_f64, -0.5] {
            let backend = FnBackend::new("test", move |_e, _a: &HashMap<String, f64>| {
                Ok(EvalOutcome::Numeric(residual))
            });
            let assignment: HashMap<String, f64> = [("x".to_string(), 1.0)].into();

            let tight = substitution_check(
                &backend,
                "f",
                &assignment,
                &ToleranceConfig::new(1e-3, 0.0),
            )
            .unwrap();
            let loose = substitution_check(
                &backend,
                "f",
                &assignment,
                &ToleranceConfig::new(1.0, 0.0),
            )
            .unwrap();

            assert!(!tight.passed);
            assert!(loose.passed);
        }
    }

    #[test]
    fn test_exact_zero_passes_any_tolerance() {
        let backend = FnBackend::new("test", |_e, _a: &HashMap<String, f64>| {
            Ok(EvalOutcome::ExactZero)
        });
        let assignment = HashMap::new();
        let check = substitution_check(
            &backend,
            "f",
            &assignment,
            &ToleranceConfig::new(0.0, 0.0),
        )
        .unwrap();
        assert!(check.passed);
    }

    #[test]
    fn test_gradient_check_matches_quadratic() {
        // f(x, y) = x^2 + 3y; grad = (2x, 3)
        let backend = FnBackend::new("test", |_e, a: &HashMap<String, f64>| {
            let x = a.get("x").copied().unwrap_or(0.0);
            let y = a.get("y").copied().unwrap_or(0.0);
            Ok(EvalOutcome::Numeric(x * x + 3.0 * y))
        });

        let point: HashMap<String, f64> =
            [("x".to_string(), 1.5), ("y".to_string(), -2.0)].into();
        let variables = vec!["x".to_string(), "y".to_string()];

        let check = finite_difference_gradient_check(
            &backend,
            &[3.0, 3.0],
            "x^2 + 3*y",
            &variables,
            &point,
            1e-6,
            &ToleranceConfig::new(1e-4, 1e-4),
        )
        .unwrap();
        assert!(check.passed, "{}", check.message);

        let wrong = finite_difference_gradient_check(
            &backend,
            &[5.0, 3.0],
            "x^2 + 3*y",
            &variables,
            &point,
            1e-6,
            &ToleranceConfig::new(1e-4, 1e-4),
        )
        .unwrap();
        assert!(!wrong.passed);
    }

    #[test]
    fn test_gradient_length_mismatch() {
        let backend = quadratic_backend();
        let point: HashMap<String, f64> = [("x".to_string(), 1.0)].into();
        let check = finite_difference_gradient_check(
            &backend,
            &[1.0, 2.0],
            "x^2 - 4",
            &["x".to_string()],
            &point,
            1e-6,
            &ToleranceConfig::default(),
        )
        .unwrap();
        assert!(!check.passed);
        assert!(check.comparisons.is_empty());
    }
}
