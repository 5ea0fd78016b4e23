//! # helm-core
//!
//! A governed orchestration kernel for AI-assisted work. Queries route
//! to an execution mode and run inside a receipt-producing audit
//! envelope: constitutional pre/post checks, adversarial confidence
//! calibration, causal experimentation with shadow execution, and a
//! self-healing policy controller that changes its own policies based on
//! observed outcomes.
//!
//! ## Core Components
//!
//! - **Receipt**: append-only hash-chained JSONL log with tamper detection
//! - **Constitutional**: ordered invariants enforced pre- and post-execution
//! - **Experiment**: pre-registered policy experiments with shadow capture
//! - **Causal**: stratified treatment-effect estimation over episode logs
//! - **Health**: five-state self-healing FSM with hysteresis and rollback
//! - **Stress**: coverage tracking, gap detection, promotion with regression guards
//! - **Orchestrator**: the OODA skeleton every execution walks
//!
//! ## Example
//!
//! ```rust,ignore
//! use helm_core::{Engine, EngineBuilder, EngineConfig};
//!
//! let engine = EngineBuilder::new(EngineConfig::default(), /* collaborators */)
//!     .with_debate(helm_core::DebateLoop::offline())
//!     .build();
//! let result = engine.process("solve x^2 - 4 = 0", None).await?;
//! println!("{}", result.conversation_response);
//! ```

pub mod capability;
pub mod causal;
pub mod confidence;
pub mod constitutional;
pub mod debate;
pub mod detector;
pub mod error;
pub mod experiment;
pub mod health;
pub mod model;
pub mod orchestrator;
pub mod receipt;
pub mod stress;
pub mod validation;

// Re-exports for convenience
pub use capability::{
    canonical_variable_order, finite_difference_gradient_check, normalize_solution,
    substitution_check, Capability, CapabilityEntry, CapabilityRegistry, EvalOutcome,
    GradientCheck, NormalizedSolution, SolverBackend, SubstitutionCheck, ToleranceConfig,
};
pub use causal::{
    generate_causal_dataset, stratified_treatment_effect, summarize_effect, CausalDataset,
    CausalRecord, OutcomeVar, ShadowFields, StratumEffect, TreatmentEffect,
};
pub use confidence::{ParseConfidence, RoutingConfidence, ValidationConfidence};
pub use constitutional::{
    standard_invariants, CheckOutcome, ConstitutionalEnforcer, ConstitutionalInvariant,
    CouncilSynthesis, EnforcementResult, EvaluationContext, IntentSummary, InvariantPhase,
    InvariantRef, Severity, Treaty,
};
pub use debate::{blend_confidence, DebateConfig, DebateLoop, DebateMove, DebateResult, Verdict};
pub use detector::{
    train_from_episodes, ClassificationMethod, ClassificationResult, DetectorStats, Mode,
    ProbabilisticDetector, TrainingExample,
};
pub use error::{Error, ErrorCode, ModeError, OrganismAction, Result};
pub use experiment::{
    CausalSummary, ExecutionSample, ExperimentContext, ExperimentHook, ExperimentRegistry,
    InterventionType, PolicyChangeReceipt, PolicyDomain, PolicyExperiment, PolicyIntervention,
    PromotionRecommendation, ShadowExecution, StratificationCovariates, SuccessCriteria,
};
pub use health::{
    HealthObservation, HealthState, PolicyEnvelope, RollbackMetadata, SelfHealingController,
    StateTransition, WindowedMetrics,
};
pub use model::{FabricClient, ModelFabric, SlotMessage, SlotRequest, SlotResponse};
pub use orchestrator::{
    CognitionSummary, ColorTile, ColorTileGrid, ComputeTier, ContextFlowEntry, CorrectionHook,
    DebateSummary, Engine, EngineBuilder, EngineConfig, Episode, EpisodeLog, EpisodeMetadata,
    EpisodeOutcome, EpisodeResult, ExecutionOutcome, IncompletenessAssessment, InfluenceType,
    Intent, IntentDetector, InterventionNote, Plan, PlanExecutor, Problem, ProblemParser,
    ResourceLimits, ResultValidator, SolutionPlanner, Subgoal, ValidationCheck, ValidationReport,
    WorldImpactAssessment,
};
pub use receipt::{
    compute_receipt_hash, ConstitutionalBlockReceipt, ConstitutionalPassReceipt,
    ConstitutionalViolationReceipt, EpisodeFailureReceipt, HealthEscalationReceipt,
    IntegrityReport, IntegrityStatus, ModelCallReceipt, ModelTimeoutReceipt,
    PhaseValidationReceipt, Receipt, ReceiptBody, ReceiptFilter, ReceiptId, ReceiptStore,
    ReceiptWithHash,
};
pub use stress::{
    CoverageGap, CoverageReport, CoverageStore, CoverageTracker, GapType, MemoryCoverageStore,
    PromotionCriteria, PromotionDecision, PromotionManager, ScenarioStats, SqliteCoverageStore,
    StressScenario, TestRunRecord,
};
pub use validation::{
    run_phase1_validation, run_phase2_validation, Phase1Report, Phase2Report,
    ValidationCheckResult, ValidationSummary,
};
