//! Solution normalization.
//!
//! Upstream solvers return answers in several vector forms (a bare value,
//! a map, a list of maps, a list of values). Normalization maps any of
//! them into one stable shape so validators and consumers never branch on
//! the solver's output convention.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonically ordered solution set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSolution {
    /// One assignment map per solution.
    pub solutions: Vec<BTreeMap<String, Value>>,
    /// All variables seen, in canonical order.
    pub variable_order: Vec<String>,
}

/// Canonical variable order: single letters first (alphabetical), then
/// multi-character names (lexicographic). Total order, pure in the input
/// set — duplicates collapse, input order is irrelevant.
pub fn canonical_variable_order<I, S>(variables: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let unique: BTreeSet<String> = variables.into_iter().map(Into::into).collect();
    let mut ordered: Vec<String> = unique.into_iter().collect();
    ordered.sort_by(|a, b| {
        let a_multi = a.chars().count() > 1;
        let b_multi = b.chars().count() > 1;
        a_multi.cmp(&b_multi).then_with(|| a.cmp(b))
    });
    ordered
}

/// Normalize a raw solver output against the goal variables.
pub fn normalize_solution(raw: &Value, goals: &[String]) -> NormalizedSolution {
    let solutions: Vec<BTreeMap<String, Value>> = match raw {
        Value::Object(map) => {
            vec![map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()]
        }
        Value::Array(items) => {
            if items.iter().all(|item| item.is_object()) && !items.is_empty() {
                items
                    .iter()
                    .filter_map(|item| item.as_object())
                    .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .collect()
            } else if let Some(goal) = goals.first() {
                // A vector of scalar solutions for the primary goal.
                items
                    .iter()
                    .map(|item| {
                        let mut map = BTreeMap::new();
                        map.insert(goal.clone(), item.clone());
                        map
                    })
                    .collect()
            } else {
                Vec::new()
            }
        }
        Value::Null => Vec::new(),
        scalar => {
            if let Some(goal) = goals.first() {
                let mut map = BTreeMap::new();
                map.insert(goal.clone(), scalar.clone());
                vec![map]
            } else {
                Vec::new()
            }
        }
    };

    let mut variables: BTreeSet<String> = goals.iter().cloned().collect();
    for solution in &solutions {
        variables.extend(solution.keys().cloned());
    }

    NormalizedSolution {
        solutions,
        variable_order: canonical_variable_order(variables),
    }
}

impl NormalizedSolution {
    /// Re-serialize as the canonical list-of-maps value.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.solutions
                .iter()
                .map(|map| {
                    Value::Object(
                        map.iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_canonical_order_singles_before_multi() {
        let ordered = canonical_variable_order(vec!["theta", "y", "x", "alpha", "z"]);
        assert_eq!(ordered, vec!["x", "y", "z", "alpha", "theta"]);
    }

    #[test]
    fn test_canonical_order_pure_in_input_set() {
        let a = canonical_variable_order(vec!["y", "x", "x", "y"]);
        let b = canonical_variable_order(vec!["x", "y"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scalar_with_goal() {
        let normalized = normalize_solution(&json!(2.0), &["x".to_string()]);
        assert_eq!(normalized.solutions.len(), 1);
        assert_eq!(normalized.solutions[0].get("x"), Some(&json!(2.0)));
        assert_eq!(normalized.variable_order, vec!["x"]);
    }

    #[test]
    fn test_vector_of_scalars() {
        let normalized = normalize_solution(&json!([2.0, -2.0]), &["x".to_string()]);
        assert_eq!(normalized.solutions.len(), 2);
        assert_eq!(normalized.solutions[1].get("x"), Some(&json!(-2.0)));
    }

    #[test]
    fn test_list_of_maps_passthrough() {
        let raw = json!([{"x": 1.0, "y": 2.0}]);
        let normalized = normalize_solution(&raw, &[]);
        assert_eq!(normalized.solutions.len(), 1);
        assert_eq!(normalized.variable_order, vec!["x", "y"]);
    }

    #[test]
    fn test_idempotent() {
        let raw = json!([3.0, -3.0]);
        let goals = vec!["x".to_string()];
        let once = normalize_solution(&raw, &goals);
        let twice = normalize_solution(&once.to_value(), &goals);
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn prop_canonical_order_is_total_and_pure(
            mut names in proptest::collection::vec("[a-z]{1,5}", 0..12)
        ) {
            let forward = canonical_variable_order(names.clone());
            names.reverse();
            let backward = canonical_variable_order(names);
            prop_assert_eq!(&forward, &backward);

            // Sorted output is itself a fixed point.
            let again = canonical_variable_order(forward.clone());
            prop_assert_eq!(forward, again);
        }

        #[test]
        fn prop_normalize_idempotent(values in proptest::collection::vec(-100.0f64..100.0, 0..6)) {
            let raw = serde_json::to_value(&values).unwrap();
            let goals = vec!["x".to_string()];
            let once = normalize_solution(&raw, &goals);
            let twice = normalize_solution(&once.to_value(), &goals);
            prop_assert_eq!(once, twice);
        }
    }
}
