//! The OODA engine.
//!
//! One engine instance serves one execution mode. `process` drives a
//! query through observe, orient, decide, act, verify, and finalize,
//! emitting context-flow entries as it goes, consulting the enforcer and
//! the experiment hook, feeding the self-healing controller, and leaving
//! every notable event as a receipt.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::episode::{Episode, EpisodeLog, EpisodeMetadata, EpisodeOutcome};
use super::traits::{
    CorrectionHook, IntentDetector, PlanExecutor, ProblemParser, ResultValidator, SolutionPlanner,
};
use super::types::{
    CognitionSummary, ColorTile, ColorTileGrid, ContextFlowEntry, ExecutionOutcome,
    IncompletenessAssessment, InfluenceType, Intent, Plan, Problem, ResourceLimits,
    ValidationReport, WorldImpactAssessment,
};
use crate::confidence::{ParseConfidence, RoutingConfidence, ValidationConfidence};
use crate::constitutional::{
    ConstitutionalEnforcer, CouncilSynthesis, EvaluationContext, IntentSummary,
};
use crate::debate::{blend_confidence, DebateLoop, Verdict};
use crate::detector::Mode;
use crate::error::{ErrorCode, ModeError, OrganismAction, Result};
use crate::experiment::{ExecutionSample, ExperimentContext, ExperimentHook};
use crate::health::{HealthObservation, SelfHealingController};
use crate::receipt::{Receipt, ReceiptBody, ReceiptStore};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The mode this engine serves; other intents short-circuit.
    pub mode: Mode,
    /// Retry budget for the act phase
    pub max_iterations: u32,
    /// Validation confidence needed to exit the retry loop
    pub confidence_threshold: f64,
    /// Intent confidence below which the query is not applicable
    pub min_intent_confidence: f64,
    pub enable_debate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Math,
            max_iterations: 3,
            confidence_threshold: 0.6,
            min_intent_confidence: 0.6,
            enable_debate: false,
        }
    }
}

/// Debate outcome summary carried on the episode result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSummary {
    pub debate_id: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub proposer_won: bool,
    pub rounds_completed: usize,
    pub judge_reasoning: String,
    pub duration_ms: f64,
}

/// Final result of processing one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub result_id: String,
    pub episode_id: String,
    pub mode: Mode,
    pub success: bool,
    pub errors: Vec<ModeError>,
    pub context_flow: Vec<ContextFlowEntry>,
    pub color_tiles: ColorTileGrid,
    pub cognition: CognitionSummary,
    pub incompleteness: IncompletenessAssessment,
    pub world_impact: WorldImpactAssessment,
    pub total_time_ms: f64,
    pub intent: Option<Intent>,
    pub problem: Option<Problem>,
    pub plan: Option<Plan>,
    pub outcome: Option<ExecutionOutcome>,
    pub validation: Option<ValidationReport>,
    pub iterations: u32,
    pub debate: Option<DebateSummary>,
    pub conversation_response: String,
}

/// The OODA orchestration engine.
pub struct Engine {
    config: EngineConfig,
    detector: Arc<dyn IntentDetector>,
    parser: Arc<dyn ProblemParser>,
    planner: Arc<dyn SolutionPlanner>,
    executor: Arc<dyn PlanExecutor>,
    validator: Arc<dyn ResultValidator>,
    correction: Option<Arc<dyn CorrectionHook>>,
    capabilities: Arc<crate::capability::CapabilityRegistry>,
    enforcer: ConstitutionalEnforcer,
    receipts: Arc<ReceiptStore>,
    episodes: Arc<EpisodeLog>,
    experiment_hook: Option<Arc<ExperimentHook>>,
    health: Arc<Mutex<SelfHealingController>>,
    debate: Option<DebateLoop>,
}

/// Builder wiring the engine's collaborators and governance handles.
pub struct EngineBuilder {
    config: EngineConfig,
    detector: Arc<dyn IntentDetector>,
    parser: Arc<dyn ProblemParser>,
    planner: Arc<dyn SolutionPlanner>,
    executor: Arc<dyn PlanExecutor>,
    validator: Arc<dyn ResultValidator>,
    correction: Option<Arc<dyn CorrectionHook>>,
    capabilities: Arc<crate::capability::CapabilityRegistry>,
    enforcer: Option<ConstitutionalEnforcer>,
    receipts: Arc<ReceiptStore>,
    episodes: Arc<EpisodeLog>,
    experiment_hook: Option<Arc<ExperimentHook>>,
    health: Option<Arc<Mutex<SelfHealingController>>>,
    debate: Option<DebateLoop>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        detector: Arc<dyn IntentDetector>,
        parser: Arc<dyn ProblemParser>,
        planner: Arc<dyn SolutionPlanner>,
        executor: Arc<dyn PlanExecutor>,
        validator: Arc<dyn ResultValidator>,
        capabilities: Arc<crate::capability::CapabilityRegistry>,
        receipts: Arc<ReceiptStore>,
        episodes: Arc<EpisodeLog>,
    ) -> Self {
        Self {
            config,
            detector,
            parser,
            planner,
            executor,
            validator,
            correction: None,
            capabilities,
            enforcer: None,
            receipts,
            episodes,
            experiment_hook: None,
            health: None,
            debate: None,
        }
    }

    pub fn with_enforcer(mut self, enforcer: ConstitutionalEnforcer) -> Self {
        self.enforcer = Some(enforcer);
        self
    }

    pub fn with_correction_hook(mut self, hook: Arc<dyn CorrectionHook>) -> Self {
        self.correction = Some(hook);
        self
    }

    pub fn with_experiment_hook(mut self, hook: Arc<ExperimentHook>) -> Self {
        self.experiment_hook = Some(hook);
        self
    }

    pub fn with_health_controller(mut self, health: Arc<Mutex<SelfHealingController>>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_debate(mut self, debate: DebateLoop) -> Self {
        self.debate = Some(debate);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            detector: self.detector,
            parser: self.parser,
            planner: self.planner,
            executor: self.executor,
            validator: self.validator,
            correction: self.correction,
            capabilities: self.capabilities,
            enforcer: self.enforcer.unwrap_or_default(),
            receipts: self.receipts,
            episodes: self.episodes,
            experiment_hook: self.experiment_hook,
            health: self
                .health
                .unwrap_or_else(|| Arc::new(Mutex::new(SelfHealingController::new()))),
            debate: self.debate,
        }
    }
}

struct Phases;

impl Phases {
    const OBSERVE: &'static str = "observe";
    const ORIENT: &'static str = "orient";
    const DECIDE: &'static str = "decide";
    const ACT: &'static str = "act";
    const VERIFY: &'static str = "verify";
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full OODA loop processing of one query.
    #[instrument(skip_all, fields(mode = %self.config.mode))]
    pub async fn process(
        &self,
        query: &str,
        synthesis: Option<&CouncilSynthesis>,
    ) -> Result<EpisodeResult> {
        let start = Instant::now();
        let mut flow: Vec<ContextFlowEntry> = Vec::new();
        let mut episode = Episode::begin(query, self.config.mode);

        // ---- Observe -------------------------------------------------
        flow.push(ContextFlowEntry::new(
            Phases::OBSERVE,
            "query",
            "intent",
            InfluenceType::Pattern,
            1.0,
            "detecting intent",
        ));
        let intent = self.detector.detect(query, synthesis);

        if intent.category != self.config.mode
            || intent.confidence < self.config.min_intent_confidence
        {
            let error = ModeError::new(
                ErrorCode::IntentUnclear,
                "detect",
                format!(
                    "query classified as {} ({:.2}), not applicable to {} mode",
                    intent.category, intent.confidence, self.config.mode
                ),
            )
            .with_suggested_action("rephrase or route to another mode");
            return self
                .finish_failure(start, episode, flow, Some(intent), None, None, error, None)
                .await;
        }

        flow.push(ContextFlowEntry::new(
            Phases::OBSERVE,
            "intent",
            "problem",
            InfluenceType::Pattern,
            intent.confidence,
            format!(
                "{} detected: {}/{}",
                intent.category,
                intent.domain.as_deref().unwrap_or("unknown"),
                intent.problem_type.as_deref().unwrap_or("unknown")
            ),
        ));

        let problem = match self.parser.parse(query, &intent) {
            Ok(problem) => problem,
            Err(error) => {
                return self
                    .finish_failure(start, episode, flow, Some(intent), None, None, error, None)
                    .await;
            }
        };

        // ---- Orient --------------------------------------------------
        flow.push(ContextFlowEntry::new(
            Phases::ORIENT,
            "problem",
            "plan",
            InfluenceType::Heuristic,
            0.8,
            "creating solution plan",
        ));
        if let Some(synthesis) = synthesis {
            flow.push(ContextFlowEntry::new(
                Phases::DECIDE,
                "council",
                "plan",
                InfluenceType::Constraint,
                synthesis.confidence,
                format!("council decision: {}", synthesis.decision),
            ));
        }

        let plan = match self.planner.plan(&problem, &self.capabilities) {
            Ok(plan) => plan,
            Err(error) => {
                return self
                    .finish_failure(
                        start,
                        episode,
                        flow,
                        Some(intent),
                        Some(problem),
                        None,
                        error,
                        None,
                    )
                    .await;
            }
        };

        // ---- Decide --------------------------------------------------
        let world_impact = self.assess_world_impact(&problem, &intent);
        let mut limits = ResourceLimits::for_tier(intent.compute_tier);
        flow.push(ContextFlowEntry::new(
            Phases::DECIDE,
            "plan",
            "execution",
            InfluenceType::Constraint,
            0.9,
            format!("compute tier: {}", intent.compute_tier),
        ));

        let health_policy = {
            let health = self.health.lock().expect("health controller lock poisoned");
            health.get_current_policy()
        };
        if health_policy.block_all_new_queries {
            let error = ModeError::new(
                ErrorCode::PolicyDenied,
                "decide",
                format!("health state {} blocks new queries", health_policy.state),
            )
            .with_organism_action(OrganismAction::Block)
            .recoverable(false);
            return self
                .finish_failure(
                    start,
                    episode,
                    flow,
                    Some(intent),
                    Some(problem),
                    Some(plan),
                    error,
                    Some(world_impact),
                )
                .await;
        }

        let experiment_ctx: Option<ExperimentContext> = self
            .experiment_hook
            .as_ref()
            .and_then(|hook| hook.check_and_assign(query, &intent, Some(&world_impact)));
        if let Some(ctx) = &experiment_ctx {
            episode.metadata = self.experiment_metadata(ctx, &intent, &world_impact);
            if ctx.is_treatment {
                if let Some(hook) = &self.experiment_hook {
                    hook.apply_intervention(&mut limits, &ctx.intervention);
                }
                flow.push(ContextFlowEntry::new(
                    Phases::DECIDE,
                    "experiment_hook",
                    "execution",
                    InfluenceType::Constraint,
                    1.0,
                    format!("intervention applied: {}", ctx.intervention.parameter_name),
                ));
            }
        } else {
            episode.metadata = EpisodeMetadata {
                domain: intent.domain.clone(),
                problem_type: intent.problem_type.clone(),
                compute_tier: Some(intent.compute_tier.to_string()),
                world_impact_category: world_impact.category.clone(),
                ..EpisodeMetadata::default()
            };
        }

        // ---- Constitutional pre-check --------------------------------
        let intent_summary = self.intent_summary(&intent, &plan);
        let pre = {
            let ctx = EvaluationContext {
                mode: Some(self.config.mode.as_str()),
                query: Some(query),
                intent: Some(&intent_summary),
                synthesis,
                world_impact_category: world_impact.category.as_deref(),
                context_flow: &flow,
                store: Some(self.receipts.as_ref()),
                ..EvaluationContext::new()
            };
            self.enforcer.check_pre_conditions(&ctx)
        };
        flow.push(ContextFlowEntry::new(
            Phases::DECIDE,
            "constitutional_enforcer",
            "execution",
            InfluenceType::Constraint,
            if pre.allowed { 1.0 } else { 0.0 },
            format!(
                "pre-check: {} ({} passed)",
                if pre.allowed { "PASS" } else { "BLOCKED" },
                pre.passed_checks.len()
            ),
        ));
        self.receipts
            .append(Receipt::new(self.enforcer.receipt_for(&pre, "pre", query)))?;

        if !pre.allowed {
            let blocking = pre.blocking_invariant.as_ref();
            let error = ModeError::new(
                ErrorCode::WorldImpactBlocked,
                "decide",
                format!(
                    "constitutional pre-check blocked: {}",
                    blocking.map(|b| b.name.as_str()).unwrap_or("unknown")
                ),
            )
            .with_details(serde_json::json!({
                "invariant_id": blocking.map(|b| b.invariant_id.clone()),
                "reason": pre.blocking_reason,
                "passed_checks": pre.passed_checks,
                "failed_checks": pre.failed_checks,
            }))
            .with_organism_action(OrganismAction::Block)
            .recoverable(false);
            return self
                .finish_failure(
                    start,
                    episode,
                    flow,
                    Some(intent),
                    Some(problem),
                    Some(plan),
                    error,
                    Some(world_impact),
                )
                .await;
        }

        // ---- Act: retry loop -----------------------------------------
        let mut outcome: Option<ExecutionOutcome> = None;
        let mut validation: Option<ValidationReport> = None;
        let mut errors: Vec<ModeError> = Vec::new();
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            flow.push(ContextFlowEntry::new(
                Phases::ACT,
                "plan",
                "result",
                InfluenceType::Dependency,
                1.0,
                format!("execution iteration {iterations}"),
            ));

            match self.executor.execute(&plan, &problem, &limits).await {
                Ok(executed) => {
                    let failed = !executed.success;
                    outcome = Some(executed);
                    if failed {
                        if iterations < self.config.max_iterations {
                            continue;
                        }
                        break;
                    }
                }
                Err(error) => {
                    let retriable = error.recoverable && iterations < self.config.max_iterations;
                    errors.push(error);
                    if retriable {
                        continue;
                    }
                    break;
                }
            }

            let report = self
                .validator
                .validate(outcome.as_ref().expect("outcome set above"), &problem);
            flow.push(ContextFlowEntry::new(
                Phases::VERIFY,
                "result",
                "validation",
                InfluenceType::Pattern,
                report.confidence,
                format!("validation: {:.2} confidence", report.confidence),
            ));

            let good_enough =
                report.valid && report.confidence >= self.config.confidence_threshold;
            validation = Some(report);
            if good_enough {
                break;
            }

            if iterations < self.config.max_iterations {
                if let (Some(hook), Some(outcome_ref), Some(report_ref)) =
                    (&self.correction, outcome.as_ref(), validation.as_ref())
                {
                    if let Some(hint) = hook.suggest_retry(outcome_ref, report_ref) {
                        flow.push(ContextFlowEntry::new(
                            Phases::ACT,
                            "correction_hook",
                            "plan",
                            InfluenceType::Heuristic,
                            0.5,
                            hint,
                        ));
                    }
                }
            }
        }

        let executed_ok = outcome.as_ref().map(|o| o.success).unwrap_or(false);

        // ---- Verify: debate ------------------------------------------
        let mut debate_summary = None;
        if self.config.enable_debate && executed_ok {
            if let Some(debate) = &self.debate {
                flow.push(ContextFlowEntry::new(
                    Phases::VERIFY,
                    "validation",
                    "debate",
                    InfluenceType::Pattern,
                    0.9,
                    "running adversarial debate",
                ));
                let solution = outcome
                    .as_ref()
                    .and_then(|o| o.final_answer.as_ref())
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                let mut debate_receipts = Vec::new();
                let result = debate.run(query, &solution, &mut debate_receipts).await;
                for body in debate_receipts {
                    self.receipts.append(Receipt::new(body))?;
                }
                flow.push(ContextFlowEntry::new(
                    Phases::VERIFY,
                    "debate",
                    "confidence",
                    InfluenceType::Pattern,
                    result.confidence,
                    format!("debate verdict: {:?} at {:.2}", result.verdict, result.confidence),
                ));
                if let Some(report) = validation.as_mut() {
                    report.confidence = blend_confidence(report.confidence, result.confidence);
                }
                debate_summary = Some(DebateSummary {
                    debate_id: result.debate_id.clone(),
                    verdict: result.verdict,
                    confidence: result.confidence,
                    proposer_won: result.proposer_won,
                    rounds_completed: result.rounds_completed,
                    judge_reasoning: result.judge_reasoning.clone(),
                    duration_ms: result.duration_ms,
                });
            }
        }

        // ---- Verify: constitutional post-check -----------------------
        let post = {
            let ctx = EvaluationContext {
                mode: Some(self.config.mode.as_str()),
                query: Some(query),
                intent: Some(&intent_summary),
                synthesis,
                world_impact_category: world_impact.category.as_deref(),
                validation_confidence: validation.as_ref().map(|v| v.confidence),
                suggested_review: validation.as_ref().map(|v| v.suggested_review),
                review_honored: validation.as_ref().map(|v| v.suggested_review),
                context_flow: &flow,
                store: Some(self.receipts.as_ref()),
                result_timestamp: Some(chrono::Utc::now()),
                ..EvaluationContext::new()
            };
            self.enforcer.check_post_conditions(&ctx)
        };
        flow.push(ContextFlowEntry::new(
            Phases::VERIFY,
            "constitutional_enforcer",
            "result",
            InfluenceType::Pattern,
            if post.allowed { 1.0 } else { 0.5 },
            format!(
                "post-check: {} ({} passed)",
                if post.allowed { "PASS" } else { "VIOLATION" },
                post.passed_checks.len()
            ),
        ));
        self.receipts
            .append(Receipt::new(self.enforcer.receipt_for(&post, "post", query)))?;
        for warning in &post.warnings {
            errors.push(
                ModeError::new(ErrorCode::VerificationFailed, "verify", warning.clone())
                    .recoverable(false)
                    .with_organism_action(OrganismAction::Warn),
            );
        }

        // High-severity post violations mark the result unsuccessful.
        let success = executed_ok && post.allowed && post.warnings.is_empty();

        if let Some(outcome) = outcome.as_ref() {
            for message in &outcome.errors {
                errors.push(
                    ModeError::new(ErrorCode::ExecutionError, "act", message.clone())
                        .recoverable(false),
                );
            }
        }
        if outcome.is_none() && errors.is_empty() {
            errors.push(ModeError::new(
                ErrorCode::ExecutionError,
                "act",
                "execution produced no result",
            ));
        }

        if !success {
            if let Some(first) = errors.first() {
                self.receipts.append(Receipt::new(ReceiptBody::EpisodeFailure(
                    crate::receipt::EpisodeFailureReceipt {
                        episode_id: episode.episode_id.clone(),
                        code: first.code.to_string(),
                        stage: first.stage.clone(),
                        message: first.message.clone(),
                        recoverable: first.recoverable,
                    },
                )))?;
            }
        }

        // ---- Health feedback -----------------------------------------
        self.feed_health(success, validation.as_ref(), &errors, start)?;

        // ---- Shadow capture ------------------------------------------
        if let (Some(hook), Some(ctx)) = (&self.experiment_hook, &experiment_ctx) {
            let sample = ExecutionSample {
                success,
                confidence: validation.as_ref().map(|v| v.confidence).unwrap_or(0.0),
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                cost: outcome.as_ref().map(|o| o.cost).unwrap_or(0.0),
            };
            let regime = validation
                .as_ref()
                .map(|v| v.regime_signature())
                .unwrap_or_else(|| limits.validation_regime.clone());
            hook.capture_shadow_async(ctx, sample, None, &regime, &regime);
        }

        // ---- Finalize ------------------------------------------------
        let routing = RoutingConfidence::new(
            ParseConfidence::new(intent.confidence, intent.confidence, intent.confidence),
            validation
                .as_ref()
                .map(|v| {
                    ValidationConfidence::new(
                        v.confidence,
                        v.confidence,
                        v.confidence,
                        v.confidence,
                    )
                })
                .unwrap_or_else(|| ValidationConfidence::new(0.0, 0.0, 0.0, 0.0)),
        );

        let cognition = self.build_cognition(&intent, &plan, iterations, validation.as_ref());
        let incompleteness =
            self.assess_incompleteness(success, validation.as_ref(), routing.requires_escalation());
        let tiles = self.build_tiles(&intent, success, validation.as_ref());
        let response = self.build_response(success, outcome.as_ref(), validation.as_ref());

        episode.result = Some(EpisodeOutcome {
            success,
            final_answer: outcome.as_ref().and_then(|o| o.final_answer.clone()),
            errors: errors.clone(),
            cost: outcome.as_ref().map(|o| o.cost).unwrap_or(0.0),
        });
        episode.validation = validation.clone();
        episode.world_impact = world_impact.clone();
        episode.incompleteness = incompleteness.clone();
        episode.trust_score = routing.combined();
        episode.finalize();
        self.episodes.append(&episode)?;

        info!(
            episode_id = %episode.episode_id,
            success,
            iterations,
            "episode complete"
        );

        Ok(EpisodeResult {
            result_id: Uuid::new_v4().to_string(),
            episode_id: episode.episode_id,
            mode: self.config.mode,
            success,
            errors,
            context_flow: flow,
            color_tiles: tiles,
            cognition,
            incompleteness,
            world_impact,
            total_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            intent: Some(intent),
            problem: Some(problem),
            plan: Some(plan),
            outcome,
            validation,
            iterations,
            debate: debate_summary,
            conversation_response: response,
        })
    }

    /// Finish an episode that failed before the act phase completed.
    #[allow(clippy::too_many_arguments)]
    async fn finish_failure(
        &self,
        start: Instant,
        mut episode: Episode,
        flow: Vec<ContextFlowEntry>,
        intent: Option<Intent>,
        problem: Option<Problem>,
        plan: Option<Plan>,
        error: ModeError,
        world_impact: Option<WorldImpactAssessment>,
    ) -> Result<EpisodeResult> {
        let world_impact = world_impact.unwrap_or_default();
        let response = match error.code {
            ErrorCode::IntentUnclear => {
                "This query doesn't fit this mode. Try rephrasing or another mode.".to_string()
            }
            ErrorCode::ParseError => {
                "I had trouble understanding the problem. Could you rephrase?".to_string()
            }
            ErrorCode::BackendUnavailable => {
                format!("A required backend is unavailable: {}", error.message)
            }
            ErrorCode::WorldImpactBlocked => format!(
                "Constitutional block: {}. Provide a treaty or reduce scope before retrying.",
                error.message
            ),
            ErrorCode::PolicyDenied => format!(
                "The system is in a protective state and refused this query: {}",
                error.message
            ),
            _ => format!("The query could not be completed: {}", error.message),
        };

        self.feed_health(false, None, std::slice::from_ref(&error), start)?;
        self.receipts.append(Receipt::new(ReceiptBody::EpisodeFailure(
            crate::receipt::EpisodeFailureReceipt {
                episode_id: episode.episode_id.clone(),
                code: error.code.to_string(),
                stage: error.stage.clone(),
                message: error.message.clone(),
                recoverable: error.recoverable,
            },
        )))?;

        episode.result = Some(EpisodeOutcome {
            success: false,
            final_answer: None,
            errors: vec![error.clone()],
            cost: 0.0,
        });
        episode.world_impact = world_impact.clone();
        episode.incompleteness = IncompletenessAssessment {
            score: 0.0,
            missing_elements: vec!["solution".to_string()],
            partial_elements: Vec::new(),
            next_steps: vec![error
                .suggested_action
                .clone()
                .unwrap_or_else(|| "review input and retry".to_string())],
        };
        episode.finalize();
        self.episodes.append(&episode)?;

        warn!(episode_id = %episode.episode_id, code = %error.code, "episode failed");

        let intent_for_tiles = intent.clone();
        Ok(EpisodeResult {
            result_id: Uuid::new_v4().to_string(),
            episode_id: episode.episode_id,
            mode: self.config.mode,
            success: false,
            errors: vec![error],
            context_flow: flow,
            color_tiles: self.build_tiles(
                &intent_for_tiles.unwrap_or_else(|| Intent::new(self.config.mode, 0.0)),
                false,
                None,
            ),
            cognition: CognitionSummary::default(),
            incompleteness: episode_incompleteness_placeholder(),
            world_impact,
            total_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            intent,
            problem,
            plan,
            outcome: None,
            validation: None,
            iterations: 0,
            debate: None,
            conversation_response: response,
        })
    }

    fn feed_health(
        &self,
        success: bool,
        validation: Option<&ValidationReport>,
        errors: &[ModeError],
        start: Instant,
    ) -> Result<()> {
        let confidence = validation.map(|v| v.confidence).unwrap_or(0.0);
        let mut harm: f64 = 0.05;
        if !success {
            harm += 0.35;
        }
        if errors
            .iter()
            .any(|e| e.organism_action == OrganismAction::Block)
        {
            harm += 0.30;
        }
        harm += (self.config.confidence_threshold - confidence).max(0.0) * 0.5;

        let observation = HealthObservation {
            harm_probability: harm.clamp(0.0, 1.0),
            validation_confidence: confidence,
            parse_confidence: 0.5,
            error_rate: if success { 0.0 } else { 1.0 },
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            cost_per_query: 0.0,
            ..HealthObservation::default()
        };

        let escalation = {
            let mut health = self.health.lock().expect("health controller lock poisoned");
            health.observe(observation);
            health.take_escalation()
        };
        if let Some(escalation) = escalation {
            self.receipts
                .append(Receipt::new(ReceiptBody::HealthEscalation(escalation)))?;
        }
        Ok(())
    }

    fn intent_summary(&self, intent: &Intent, plan: &Plan) -> IntentSummary {
        let mut actions: Vec<String> = plan.subgoals.iter().map(|s| s.method.clone()).collect();
        actions.sort();
        actions.dedup();
        IntentSummary {
            intent_id: Uuid::new_v4().to_string(),
            actions,
            domain: intent.domain.clone(),
        }
    }

    fn experiment_metadata(
        &self,
        ctx: &ExperimentContext,
        intent: &Intent,
        world_impact: &WorldImpactAssessment,
    ) -> EpisodeMetadata {
        EpisodeMetadata {
            experiment_id: Some(ctx.experiment_id.clone()),
            is_treatment: Some(ctx.is_treatment),
            propensity_score: Some(ctx.propensity_score),
            stratification_key: Some(ctx.stratification_key.clone()),
            correlation_id: Some(ctx.correlation_id.clone()),
            domain: intent.domain.clone(),
            problem_type: intent.problem_type.clone(),
            compute_tier: Some(intent.compute_tier.to_string()),
            world_impact_category: world_impact.category.clone(),
        }
    }

    fn assess_world_impact(&self, problem: &Problem, intent: &Intent) -> WorldImpactAssessment {
        // Domain heuristic: statistics and optimization influence
        // decisions; constraint-heavy problems raise the score.
        let domain = intent.domain.as_deref().unwrap_or("");
        let (category, score, description) = match domain {
            "statistics" => (
                Some("decision_support".to_string()),
                0.5,
                "data analysis may influence decisions",
            ),
            "optimization" => (
                Some("resource_allocation".to_string()),
                0.6,
                "optimization affects resource allocation",
            ),
            "safety" | "medical" | "finance" => (
                Some("high_stakes".to_string()),
                0.9,
                "outputs feed a high-stakes domain",
            ),
            _ => (None, 0.1, "routine computation"),
        };
        let score: f64 = if problem.constraints.len() > 3 {
            (score + 0.1_f64).min(1.0_f64)
        } else {
            score
        };
        WorldImpactAssessment {
            category,
            impact_score: score,
            description: description.to_string(),
        }
    }

    fn build_cognition(
        &self,
        intent: &Intent,
        plan: &Plan,
        iterations: u32,
        validation: Option<&ValidationReport>,
    ) -> CognitionSummary {
        let confidence_rationale = match validation.map(|v| v.confidence) {
            Some(c) if c >= 0.9 => "high confidence: multiple verification methods passed",
            Some(c) if c >= 0.7 => "good confidence: core verifications passed",
            Some(c) if c >= 0.5 => "moderate confidence: some checks passed",
            Some(_) => "low confidence: verification incomplete",
            None => "no validation performed",
        };
        CognitionSummary {
            observed: format!(
                "{} problem: {}/{}",
                intent.category,
                intent.domain.as_deref().unwrap_or("unknown"),
                intent.problem_type.as_deref().unwrap_or("unknown")
            ),
            oriented: format!(
                "planned {} steps using {}",
                plan.subgoals.len(),
                plan.backends_required.join(", ")
            ),
            acted: match validation {
                Some(v) => format!(
                    "executed in {} iteration(s), confidence {:.2}",
                    iterations, v.confidence
                ),
                None => "execution failed".to_string(),
            },
            key_decision: format!(
                "used {} as primary solver",
                plan.backends_required
                    .first()
                    .map(String::as_str)
                    .unwrap_or("default")
            ),
            confidence_rationale: confidence_rationale.to_string(),
        }
    }

    fn assess_incompleteness(
        &self,
        success: bool,
        validation: Option<&ValidationReport>,
        requires_escalation: bool,
    ) -> IncompletenessAssessment {
        if !success {
            return IncompletenessAssessment {
                score: 0.0,
                missing_elements: vec!["solution".to_string()],
                partial_elements: Vec::new(),
                next_steps: vec!["review input and retry".to_string()],
            };
        }
        let mut missing = Vec::new();
        let mut partial = Vec::new();
        let mut next_steps = Vec::new();
        if let Some(v) = validation {
            if !v.valid {
                missing.push("verified solution".to_string());
                next_steps.push("re-solve with alternative method".to_string());
            }
            if v.suggested_review {
                partial.push("solution confidence".to_string());
                next_steps.push("manual verification recommended".to_string());
            }
        }
        if requires_escalation {
            partial.push("parse/validation agreement".to_string());
            next_steps.push("escalate: confidence components disagree".to_string());
        }
        IncompletenessAssessment {
            score: validation.map(|v| v.confidence).unwrap_or(0.5),
            missing_elements: missing,
            partial_elements: partial,
            next_steps,
        }
    }

    fn build_tiles(
        &self,
        intent: &Intent,
        success: bool,
        validation: Option<&ValidationReport>,
    ) -> ColorTileGrid {
        let confidence_color = |value: f64| {
            if value >= 0.8 {
                "green"
            } else if value >= 0.5 {
                "yellow"
            } else {
                "red"
            }
        };
        let validation_confidence = validation.map(|v| v.confidence).unwrap_or(0.0);
        let tiles = vec![
            ColorTile {
                color: confidence_color(intent.confidence).to_string(),
                label: "intent".to_string(),
            },
            ColorTile {
                color: if success { "green" } else { "red" }.to_string(),
                label: "execution".to_string(),
            },
            ColorTile {
                color: confidence_color(validation_confidence).to_string(),
                label: "validation".to_string(),
            },
            ColorTile {
                color: "gray".to_string(),
                label: "parse".to_string(),
            },
            ColorTile {
                color: if validation.map(|v| v.valid).unwrap_or(false) {
                    "green"
                } else {
                    "yellow"
                }
                .to_string(),
                label: "verification".to_string(),
            },
            ColorTile {
                color: "gray".to_string(),
                label: "impact".to_string(),
            },
            ColorTile {
                color: "gray".to_string(),
                label: "cost".to_string(),
            },
            ColorTile {
                color: "gray".to_string(),
                label: "latency".to_string(),
            },
            ColorTile {
                color: if success { "green" } else { "red" }.to_string(),
                label: "overall".to_string(),
            },
        ];
        ColorTileGrid::new(tiles)
    }

    fn build_response(
        &self,
        success: bool,
        outcome: Option<&ExecutionOutcome>,
        validation: Option<&ValidationReport>,
    ) -> String {
        if !success {
            return "The query did not complete successfully; see errors for details.".to_string();
        }
        let answer = outcome
            .and_then(|o| o.final_answer.as_ref())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "(no answer)".to_string());
        match validation {
            Some(v) => format!("Result: {} (confidence {:.2})", answer, v.confidence),
            None => format!("Result: {}", answer),
        }
    }
}

fn episode_incompleteness_placeholder() -> IncompletenessAssessment {
    IncompletenessAssessment {
        score: 0.0,
        missing_elements: vec!["solution".to_string()],
        partial_elements: Vec::new(),
        next_steps: vec!["review input and retry".to_string()],
    }
}
