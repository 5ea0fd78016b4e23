//! Collaborator interfaces the OODA engine drives.
//!
//! Detectors, parsers, planners, executors, and validators live outside
//! the kernel; the engine consumes them through these traits. Producers
//! fill the typed records explicitly — there is no attribute probing.

use async_trait::async_trait;

use super::types::{
    ExecutionOutcome, Intent, Plan, Problem, ResourceLimits, ValidationReport,
};
use crate::capability::CapabilityRegistry;
use crate::constitutional::CouncilSynthesis;
use crate::error::ModeError;

/// Produces a typed intent for a query.
pub trait IntentDetector: Send + Sync {
    fn detect(&self, query: &str, synthesis: Option<&CouncilSynthesis>) -> Intent;
}

/// Turns a query plus intent into an abstract problem record.
pub trait ProblemParser: Send + Sync {
    fn parse(&self, query: &str, intent: &Intent) -> Result<Problem, ModeError>;
}

/// Plans subgoals for a problem, gated by the capability registry.
///
/// When no backend declares a needed capability, the planner returns a
/// `BACKEND_UNAVAILABLE` error rather than a plan with a hole in it.
pub trait SolutionPlanner: Send + Sync {
    fn plan(
        &self,
        problem: &Problem,
        capabilities: &CapabilityRegistry,
    ) -> Result<Plan, ModeError>;
}

/// Executes a plan within the resolved resource limits.
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    async fn execute(
        &self,
        plan: &Plan,
        problem: &Problem,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, ModeError>;
}

/// Validates an execution outcome against the problem.
pub trait ResultValidator: Send + Sync {
    fn validate(&self, outcome: &ExecutionOutcome, problem: &Problem) -> ValidationReport;
}

/// Optional hook consulted when validation fails and iterations remain.
pub trait CorrectionHook: Send + Sync {
    /// A retry hint, or `None` to give up.
    fn suggest_retry(&self, outcome: &ExecutionOutcome, report: &ValidationReport)
        -> Option<String>;
}
