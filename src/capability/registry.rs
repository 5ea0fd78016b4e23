//! Capability registry for solver backends.
//!
//! The planner consults this table before emitting a subgoal: if no
//! backend declares the needed capability, planning fails with a single
//! unrecoverable error-subgoal rather than a mid-execution surprise.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::SolverBackend;

/// Operations a solver backend may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SolveEquation,
    SolveSystem,
    Integrate,
    Differentiate,
    Simplify,
    Factor,
    Expand,
    Limit,
    Series,
    Gradient,
    Hessian,
    NumericEval,
    Optimize,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SolveEquation => "solve_equation",
            Self::SolveSystem => "solve_system",
            Self::Integrate => "integrate",
            Self::Differentiate => "differentiate",
            Self::Simplify => "simplify",
            Self::Factor => "factor",
            Self::Expand => "expand",
            Self::Limit => "limit",
            Self::Series => "series",
            Self::Gradient => "gradient",
            Self::Hessian => "hessian",
            Self::NumericEval => "numeric_eval",
            Self::Optimize => "optimize",
        };
        write!(f, "{}", s)
    }
}

/// A single capability declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub available: bool,
    #[serde(default)]
    pub required_libs: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl CapabilityEntry {
    pub fn available() -> Self {
        Self {
            available: true,
            required_libs: Vec::new(),
            notes: String::new(),
        }
    }

    pub fn unavailable(notes: impl Into<String>) -> Self {
        Self {
            available: false,
            required_libs: Vec::new(),
            notes: notes.into(),
        }
    }
}

/// Process-wide table keyed by `(backend_name, capability)`.
pub struct CapabilityRegistry {
    entries: Mutex<HashMap<(String, Capability), CapabilityEntry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a single capability declaration.
    pub fn declare(
        &self,
        backend: impl Into<String>,
        capability: Capability,
        entry: CapabilityEntry,
    ) {
        let mut entries = self.entries.lock().expect("capability registry lock poisoned");
        entries.insert((backend.into(), capability), entry);
    }

    /// Register everything a backend declares about itself.
    pub fn register_backend(&self, backend: &dyn SolverBackend) {
        let available = backend.is_available();
        for capability in backend.capabilities() {
            self.declare(
                backend.name(),
                capability,
                CapabilityEntry {
                    available,
                    required_libs: Vec::new(),
                    notes: String::new(),
                },
            );
        }
    }

    /// Backends that declare the capability as available.
    pub fn capable_backends(&self, capability: Capability) -> Vec<String> {
        let entries = self.entries.lock().expect("capability registry lock poisoned");
        let mut backends: Vec<String> = entries
            .iter()
            .filter(|((_, cap), entry)| *cap == capability && entry.available)
            .map(|((name, _), _)| name.clone())
            .collect();
        backends.sort();
        backends
    }

    pub fn is_capable(&self, backend: &str, capability: Capability) -> bool {
        let entries = self.entries.lock().expect("capability registry lock poisoned");
        entries
            .get(&(backend.to_string(), capability))
            .map(|e| e.available)
            .unwrap_or(false)
    }

    pub fn entry(&self, backend: &str, capability: Capability) -> Option<CapabilityEntry> {
        let entries = self.entries.lock().expect("capability registry lock poisoned");
        entries.get(&(backend.to_string(), capability)).cloned()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capable_backends_filters_unavailable() {
        let registry = CapabilityRegistry::new();
        registry.declare("symbolic", Capability::SolveEquation, CapabilityEntry::available());
        registry.declare(
            "numeric",
            Capability::SolveEquation,
            CapabilityEntry::unavailable("library missing"),
        );
        registry.declare("numeric", Capability::NumericEval, CapabilityEntry::available());

        assert_eq!(
            registry.capable_backends(Capability::SolveEquation),
            vec!["symbolic".to_string()]
        );
        assert!(registry.capable_backends(Capability::Optimize).is_empty());
        assert!(registry.is_capable("numeric", Capability::NumericEval));
        assert!(!registry.is_capable("numeric", Capability::SolveEquation));
    }
}
