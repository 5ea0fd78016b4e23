//! Constitutional invariants and their runtime enforcement.

mod enforcer;
mod invariants;
mod types;

pub use enforcer::ConstitutionalEnforcer;
pub use invariants::{
    dignity_floor, receipt_continuity, standard_invariants, treaty_compliance, tri_temporal,
};
pub use types::{
    CheckOutcome, ConstitutionalInvariant, CouncilSynthesis, EnforcementResult, EvaluationContext,
    IntentSummary, InvariantPhase, InvariantRef, Severity, Treaty,
};
