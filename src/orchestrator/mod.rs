//! OODA orchestration skeleton shared by all execution modes.

mod engine;
mod episode;
mod traits;
mod types;

pub use engine::{DebateSummary, Engine, EngineBuilder, EngineConfig, EpisodeResult};
pub use episode::{Episode, EpisodeLog, EpisodeMetadata, EpisodeOutcome};
pub use traits::{
    CorrectionHook, IntentDetector, PlanExecutor, ProblemParser, ResultValidator, SolutionPlanner,
};
pub use types::{
    CognitionSummary, ColorTile, ColorTileGrid, ComputeTier, ContextFlowEntry, ExecutionOutcome,
    IncompletenessAssessment, InfluenceType, Intent, InterventionNote, Plan, Problem,
    ResourceLimits, Subgoal, ValidationCheck, ValidationReport, WorldImpactAssessment,
};
