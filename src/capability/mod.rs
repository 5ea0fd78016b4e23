//! Backend capabilities, tolerance checks, and solution normalization.

mod backend;
mod normalize;
mod registry;
mod tolerance;

pub use backend::{EvalOutcome, SolverBackend};
pub use normalize::{canonical_variable_order, normalize_solution, NormalizedSolution};
pub use registry::{Capability, CapabilityEntry, CapabilityRegistry};
pub use tolerance::{
    finite_difference_gradient_check, substitution_check, GradientCheck, GradientComparison,
    SubstitutionCheck, ToleranceConfig,
};
