//! Experiment hook: connects episodes to at most one active experiment.
//!
//! The hook decides treatment assignment, computes the propensity score
//! and stratification key, applies the intervention to the resource
//! limits, and captures shadow executions through a bounded worker pool
//! so the orchestrator never waits on shadow construction.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::registry::ExperimentRegistry;
use super::types::{PolicyIntervention, ShadowExecution};
use crate::orchestrator::{Intent, InterventionNote, ResourceLimits, WorldImpactAssessment};

const SHADOW_QUEUE_DEPTH: usize = 64;
const SHADOW_WORKERS: usize = 4;

/// Covariates used for stratification and propensity computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratificationCovariates {
    pub mode: String,
    pub domain: Option<String>,
    pub problem_type: Option<String>,
    pub compute_tier: String,
    pub world_impact_category: Option<String>,
    pub validation_confidence_prior: Option<f64>,
}

impl StratificationCovariates {
    pub fn from_intent(intent: &Intent, world_impact: Option<&WorldImpactAssessment>) -> Self {
        Self {
            mode: intent.category.to_string(),
            domain: intent.domain.clone(),
            problem_type: intent.problem_type.clone(),
            compute_tier: intent.compute_tier.to_string(),
            world_impact_category: world_impact.and_then(|w| w.category.clone()),
            validation_confidence_prior: None,
        }
    }

    /// Canonical stratification key; missing fields collapse to "unknown".
    pub fn strata_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.mode,
            self.domain.as_deref().unwrap_or("unknown"),
            self.problem_type.as_deref().unwrap_or("unknown"),
            self.compute_tier,
        )
    }
}

/// Context linking one episode to an active experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentContext {
    pub experiment_id: String,
    /// Links episode -> shadow -> experiment
    pub correlation_id: String,
    pub intervention: PolicyIntervention,
    pub is_treatment: bool,
    pub propensity_score: f64,
    pub stratification_key: String,
    pub covariates: StratificationCovariates,
}

/// Outcome metrics of one execution, actual or counterfactual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSample {
    pub success: bool,
    pub confidence: f64,
    pub latency_ms: f64,
    pub cost: f64,
}

struct ShadowRequest {
    ctx: ExperimentContext,
    actual: ExecutionSample,
    shadow: Option<ExecutionSample>,
    actual_regime: String,
    shadow_regime: String,
}

/// Manages policy experiments during execution.
pub struct ExperimentHook {
    registry: Arc<ExperimentRegistry>,
    sender: Option<mpsc::Sender<ShadowRequest>>,
    workers: Vec<JoinHandle<()>>,
}

impl ExperimentHook {
    /// Spawn the hook and its shadow worker pool. Must be called from
    /// within a tokio runtime.
    pub fn new(registry: Arc<ExperimentRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel::<ShadowRequest>(SHADOW_QUEUE_DEPTH);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(SHADOW_WORKERS);
        for _ in 0..SHADOW_WORKERS {
            let receiver = Arc::clone(&receiver);
            let registry = Arc::clone(&registry);
            workers.push(tokio::spawn(async move {
                loop {
                    let request = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let request = match request {
                        Some(request) => request,
                        None => break,
                    };
                    let experiment_id = request.ctx.experiment_id.clone();
                    let shadow = build_shadow(request);
                    if let Err(e) = registry.record_shadow_execution(&experiment_id, shadow) {
                        error!(experiment_id = %experiment_id, error = %e, "failed to record shadow execution");
                    }
                }
            }));
        }

        Self {
            registry,
            sender: Some(sender),
            workers,
        }
    }

    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    /// Decide whether this episode joins an experiment, and on which arm.
    ///
    /// Picks the first active experiment in registration order. Returns
    /// `None` when nothing is running.
    pub fn check_and_assign(
        &self,
        query: &str,
        intent: &Intent,
        world_impact: Option<&WorldImpactAssessment>,
    ) -> Option<ExperimentContext> {
        let active = self.registry.get_active_experiments();
        let experiment = active.first()?;

        let covariates = StratificationCovariates::from_intent(intent, world_impact);
        let propensity = Self::propensity_score(&covariates, experiment.randomized);
        let is_treatment = if experiment.randomized {
            rand::thread_rng().gen_bool(0.5)
        } else {
            rand::thread_rng().gen_bool(propensity)
        };

        let ctx = ExperimentContext {
            experiment_id: experiment.experiment_id.clone(),
            correlation_id: Uuid::new_v4().to_string(),
            intervention: experiment.intervention.clone(),
            is_treatment,
            propensity_score: propensity,
            stratification_key: covariates.strata_key(),
            covariates,
        };

        info!(
            experiment_id = %ctx.experiment_id,
            treatment = ctx.is_treatment,
            propensity = ctx.propensity_score,
            strata = %ctx.stratification_key,
            query_len = query.len(),
            "assigned episode to experiment"
        );

        Some(ctx)
    }

    /// P(treatment | covariates).
    ///
    /// Randomized experiments use an unbiased coin, so 0.5. For
    /// observational experiments this is a placeholder logistic model
    /// with fixed coefficients, standing in until enough assignment data
    /// exists to fit one; the clip to [0.01, 0.99] keeps inverse weights
    /// bounded.
    fn propensity_score(covariates: &StratificationCovariates, randomized: bool) -> f64 {
        if randomized {
            return 0.5;
        }

        const INTERCEPT: f64 = 0.0;
        const DEEP_SEARCH_COEF: f64 = 0.4;
        const HIGH_IMPACT_COEF: f64 = -0.8;

        let mut logit = INTERCEPT;
        if covariates.compute_tier == "deep_search" {
            logit += DEEP_SEARCH_COEF;
        }
        if covariates.world_impact_category.is_some() {
            logit += HIGH_IMPACT_COEF;
        }

        let propensity = 1.0 / (1.0 + (-logit).exp());
        propensity.clamp(0.01, 0.99)
    }

    /// Write the intervention into the limits envelope, leaving a
    /// breadcrumb so the executor and later analysis can see what changed.
    pub fn apply_intervention(
        &self,
        limits: &mut ResourceLimits,
        intervention: &PolicyIntervention,
    ) {
        match intervention.parameter_name.as_str() {
            "model_slot" => {
                if let Some(slot) = intervention.new_value.as_str() {
                    limits.model_slot = Some(slot.to_string());
                }
            }
            "validation_regime" => {
                if let Some(regime) = intervention.new_value.as_str() {
                    limits.validation_regime = regime.to_string();
                }
            }
            _ => {}
        }
        limits.interventions.push(InterventionNote {
            parameter: intervention.parameter_name.clone(),
            old_value: intervention.old_value.clone(),
            new_value: intervention.new_value.clone(),
        });
        debug!(
            parameter = %intervention.parameter_name,
            "applied intervention to resource limits"
        );
    }

    /// Submit shadow construction to the worker pool; fire-and-forget.
    ///
    /// When the counterfactual sample is absent the shadow mirrors the
    /// actual metrics, recording the pairing without claiming a delta.
    pub fn capture_shadow_async(
        &self,
        ctx: &ExperimentContext,
        actual: ExecutionSample,
        shadow: Option<ExecutionSample>,
        actual_regime: &str,
        shadow_regime: &str,
    ) {
        let request = ShadowRequest {
            ctx: ctx.clone(),
            actual,
            shadow,
            actual_regime: actual_regime.to_string(),
            shadow_regime: shadow_regime.to_string(),
        };
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.try_send(request) {
                error!(error = %e, "shadow queue full or closed, dropping shadow");
            }
        }
    }

    /// Drain the worker pool. Queued shadows are recorded before return.
    pub async fn shutdown(&mut self) {
        self.sender.take();
        let workers: Vec<JoinHandle<()>> = self.workers.drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "shadow worker panicked during shutdown");
            }
        }
    }
}

fn build_shadow(request: ShadowRequest) -> ShadowExecution {
    let mut shadow = ShadowExecution::new(request.ctx.correlation_id.clone());

    shadow.actual_success = request.actual.success;
    shadow.actual_confidence = request.actual.confidence;
    shadow.actual_latency_ms = request.actual.latency_ms;
    shadow.actual_cost = request.actual.cost;

    let counterfactual = request.shadow.unwrap_or(request.actual);
    shadow.shadow_success = counterfactual.success;
    shadow.shadow_confidence = counterfactual.confidence;
    shadow.shadow_latency_ms = counterfactual.latency_ms;
    shadow.shadow_cost = counterfactual.cost;

    shadow.validation_regime_identical = request.actual_regime == request.shadow_regime;
    if !shadow.validation_regime_identical {
        shadow.validation_mismatch_reason = format!(
            "actual regime '{}' != shadow regime '{}'",
            request.actual_regime, request.shadow_regime
        );
    }
    shadow.compute_deltas();
    shadow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Mode;
    use crate::experiment::types::{
        InterventionType, PolicyDomain, PolicyExperiment, PolicyIntervention,
    };
    use crate::orchestrator::ComputeTier;
    use serde_json::json;

    fn registry_with_active(dir: &std::path::Path) -> (Arc<ExperimentRegistry>, String) {
        let registry = Arc::new(ExperimentRegistry::open(dir).unwrap());
        let intervention = PolicyIntervention::new(
            PolicyDomain::ValidationRegime,
            InterventionType::RegimeSimplification,
            "validation_regime",
            json!("full"),
            json!("basic"),
        );
        let experiment = PolicyExperiment::new("regime-trim", intervention);
        let id = experiment.experiment_id.clone();
        registry.register_experiment(experiment).unwrap();
        registry.start_experiment(&id).unwrap();
        (registry, id)
    }

    fn math_intent() -> Intent {
        Intent {
            category: Mode::Math,
            confidence: 0.9,
            domain: Some("algebra".to_string()),
            problem_type: Some("solve".to_string()),
            compute_tier: ComputeTier::Standard,
        }
    }

    #[tokio::test]
    async fn test_no_active_experiment_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ExperimentRegistry::open(dir.path()).unwrap());
        let mut hook = ExperimentHook::new(registry);
        assert!(hook.check_and_assign("q", &math_intent(), None).is_none());
        hook.shutdown().await;
    }

    #[tokio::test]
    async fn test_strata_key_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry_with_active(dir.path());
        let mut hook = ExperimentHook::new(registry);

        let ctx = hook
            .check_and_assign("solve x", &math_intent(), None)
            .unwrap();
        assert_eq!(ctx.stratification_key, "math:algebra:solve:standard");
        assert!((ctx.propensity_score - 0.5).abs() < 1e-9);
        hook.shutdown().await;
    }

    #[tokio::test]
    async fn test_treatment_balance() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry_with_active(dir.path());
        let mut hook = ExperimentHook::new(registry);

        let intent = math_intent();
        let treated = (0..100)
            .filter_map(|_| hook.check_and_assign("solve x", &intent, None))
            .filter(|ctx| ctx.is_treatment)
            .count();
        let rate = treated as f64 / 100.0;
        assert!((0.35..=0.65).contains(&rate), "treatment rate {rate}");
        hook.shutdown().await;
    }

    #[tokio::test]
    async fn test_observational_propensity_clipped_and_shifted() {
        let covariates = StratificationCovariates {
            mode: "math".into(),
            domain: None,
            problem_type: None,
            compute_tier: "deep_search".into(),
            world_impact_category: Some("high_stakes".into()),
            validation_confidence_prior: None,
        };
        let p = ExperimentHook::propensity_score(&covariates, false);
        assert!((0.01..=0.99).contains(&p));
        // High impact pushes assignment probability below the coin flip.
        assert!(p < 0.5);
    }

    #[tokio::test]
    async fn test_apply_intervention_leaves_breadcrumb() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = registry_with_active(dir.path());
        let mut hook = ExperimentHook::new(registry);

        let intervention = PolicyIntervention::new(
            PolicyDomain::ValidationRegime,
            InterventionType::RegimeSimplification,
            "validation_regime",
            json!("full"),
            json!("basic"),
        );
        let mut limits = ResourceLimits::for_tier(ComputeTier::Standard);
        hook.apply_intervention(&mut limits, &intervention);

        assert_eq!(limits.validation_regime, "basic");
        assert_eq!(limits.interventions.len(), 1);
        assert_eq!(limits.interventions[0].parameter, "validation_regime");
        hook.shutdown().await;
    }

    #[tokio::test]
    async fn test_shadow_recorded_through_pool() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, experiment_id) = registry_with_active(dir.path());
        let mut hook = ExperimentHook::new(Arc::clone(&registry));

        let ctx = hook
            .check_and_assign("solve x", &math_intent(), None)
            .unwrap();
        let actual = ExecutionSample {
            success: true,
            confidence: 0.9,
            latency_ms: 120.0,
            cost: 0.01,
        };
        hook.capture_shadow_async(&ctx, actual, None, "core+numeric", "core+numeric");
        hook.shutdown().await;

        let shadows = registry.get_shadow_executions(&experiment_id);
        assert_eq!(shadows.len(), 1);
        assert!(shadows[0].comparable);
        assert_eq!(shadows[0].episode_id, ctx.correlation_id);
    }

    #[tokio::test]
    async fn test_mismatched_regime_incomparable() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, experiment_id) = registry_with_active(dir.path());
        let mut hook = ExperimentHook::new(Arc::clone(&registry));

        let ctx = hook
            .check_and_assign("solve x", &math_intent(), None)
            .unwrap();
        let actual = ExecutionSample {
            success: true,
            confidence: 0.9,
            latency_ms: 120.0,
            cost: 0.01,
        };
        hook.capture_shadow_async(&ctx, actual, Some(actual), "core+numeric", "core");
        hook.shutdown().await;

        let shadows = registry.get_shadow_executions(&experiment_id);
        assert_eq!(shadows.len(), 1);
        assert!(!shadows[0].comparable);
        assert!(!shadows[0].validation_mismatch_reason.is_empty());
    }
}
