//! Pre-registered policy experiments, shadow executions, and the hook
//! that wires them into episode execution.

mod hook;
mod registry;
mod types;

pub use hook::{ExecutionSample, ExperimentContext, ExperimentHook, StratificationCovariates};
pub use registry::ExperimentRegistry;
pub use types::{
    CausalSummary, InterventionType, PolicyChangeReceipt, PolicyDomain, PolicyExperiment,
    PolicyIntervention, PromotionRecommendation, ShadowExecution, SuccessCriteria,
};
