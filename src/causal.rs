//! Causal dataset generation and stratified effect estimation.
//!
//! Episodes are joined to their shadows (by correlation id, then episode
//! id) and flattened into one record per episode. The estimator computes
//! a stratified average treatment effect; strata with an empty arm are
//! dropped, and every drop is recorded as a validity concern rather than
//! silently absorbed.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::experiment::{
    CausalSummary, ExperimentRegistry, PromotionRecommendation, ShadowExecution, SuccessCriteria,
};
use crate::orchestrator::{Episode, EpisodeLog};

/// Shadow fields flattened onto a causal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowFields {
    pub execution_id: String,
    pub comparable: bool,
    pub validation_regime_identical: bool,
    pub outcome_changed: bool,
    pub shadow_success: bool,
    pub shadow_confidence: f64,
    pub confidence_delta: f64,
    pub latency_delta_pct: f64,
    pub cost_delta_pct: f64,
}

impl From<&ShadowExecution> for ShadowFields {
    fn from(shadow: &ShadowExecution) -> Self {
        Self {
            execution_id: shadow.execution_id.clone(),
            comparable: shadow.comparable,
            validation_regime_identical: shadow.validation_regime_identical,
            outcome_changed: shadow.outcome_changed,
            shadow_success: shadow.shadow_success,
            shadow_confidence: shadow.shadow_confidence,
            confidence_delta: shadow.confidence_delta,
            latency_delta_pct: shadow.latency_delta_pct,
            cost_delta_pct: shadow.cost_delta_pct,
        }
    }
}

/// One flattened episode record, causal-analysis ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRecord {
    pub episode_id: String,
    /// 1 = treated, 0 = control
    pub treatment: u8,
    pub propensity_score: f64,
    pub stratification_key: String,
    pub outcome_success: u8,
    pub outcome_confidence: f64,
    pub outcome_latency_ms: f64,
    pub covariate_mode: String,
    pub covariate_domain: String,
    pub covariate_problem_type: String,
    pub covariate_compute_tier: String,
    pub covariate_world_impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<ShadowFields>,
}

/// A causal-ready dataset for one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalDataset {
    pub episodes: Vec<CausalRecord>,
}

/// The outcome variable an effect is estimated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeVar {
    Success,
    Confidence,
    LatencyMs,
}

impl OutcomeVar {
    fn of(&self, record: &CausalRecord) -> f64 {
        match self {
            Self::Success => record.outcome_success as f64,
            Self::Confidence => record.outcome_confidence,
            Self::LatencyMs => record.outcome_latency_ms,
        }
    }
}

/// Join episodes with shadows into a flat per-episode dataset.
pub fn generate_causal_dataset(
    experiment_id: &str,
    registry: &ExperimentRegistry,
    episode_log: &EpisodeLog,
) -> Result<CausalDataset> {
    let episodes = episode_log.read_for_experiment(experiment_id)?;
    let shadows = registry.get_shadow_executions(experiment_id);

    let records: Vec<CausalRecord> = episodes
        .iter()
        .map(|episode| {
            let shadow = find_matching_shadow(episode, &shadows);
            episode_to_record(episode, shadow)
        })
        .collect();

    info!(
        experiment_id,
        episodes = records.len(),
        shadows = shadows.len(),
        "generated causal dataset"
    );

    Ok(CausalDataset { episodes: records })
}

/// Match an episode to at most one shadow: correlation id first, episode
/// id as fallback.
fn find_matching_shadow<'a>(
    episode: &Episode,
    shadows: &'a [ShadowExecution],
) -> Option<&'a ShadowExecution> {
    if let Some(correlation_id) = &episode.metadata.correlation_id {
        if let Some(shadow) = shadows.iter().find(|s| s.episode_id == *correlation_id) {
            return Some(shadow);
        }
    }
    shadows.iter().find(|s| s.episode_id == episode.episode_id)
}

fn episode_to_record(episode: &Episode, shadow: Option<&ShadowExecution>) -> CausalRecord {
    let metadata = &episode.metadata;
    CausalRecord {
        episode_id: episode.episode_id.clone(),
        treatment: metadata.is_treatment.unwrap_or(false) as u8,
        propensity_score: metadata.propensity_score.unwrap_or(0.5),
        stratification_key: metadata
            .stratification_key
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        outcome_success: episode
            .result
            .as_ref()
            .map(|r| r.success as u8)
            .unwrap_or(0),
        outcome_confidence: episode
            .validation
            .as_ref()
            .map(|v| v.confidence)
            .unwrap_or(0.0),
        outcome_latency_ms: episode.duration_ms,
        covariate_mode: episode.mode.to_string(),
        covariate_domain: metadata
            .domain
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        covariate_problem_type: metadata
            .problem_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        covariate_compute_tier: metadata
            .compute_tier
            .clone()
            .unwrap_or_else(|| "standard".to_string()),
        covariate_world_impact: metadata.world_impact_category.clone(),
        shadow: shadow.map(ShadowFields::from),
    }
}

/// Effect within one stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumEffect {
    pub effect: f64,
    pub n_treated: usize,
    pub n_control: usize,
    pub mean_treated: f64,
    pub mean_control: f64,
}

/// Stratified average treatment effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEffect {
    pub ate: f64,
    pub ate_by_strata: BTreeMap<String, StratumEffect>,
    pub n_treated: usize,
    pub n_control: usize,
    pub n_strata: usize,
    /// Strata excluded because one arm had zero observations
    pub dropped_strata: Vec<String>,
}

/// Compute the stratified ATE over comparable records.
///
/// Stratum effect = treated mean − control mean; the ATE is their
/// weighted average, weighted by stratum size. Records whose shadow is
/// incomparable never enter the sample.
pub fn stratified_treatment_effect(
    dataset: &CausalDataset,
    outcome: OutcomeVar,
) -> TreatmentEffect {
    let mut strata: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();

    for record in &dataset.episodes {
        if let Some(shadow) = &record.shadow {
            if !shadow.comparable {
                continue;
            }
        }
        let (treated, control) = strata
            .entry(record.stratification_key.clone())
            .or_default();
        if record.treatment == 1 {
            treated.push(outcome.of(record));
        } else {
            control.push(outcome.of(record));
        }
    }

    let n_strata = strata.len();
    let mut effects = BTreeMap::new();
    let mut dropped = Vec::new();
    let mut total_effect = 0.0;
    let mut total_weight = 0.0;
    let mut n_treated = 0;
    let mut n_control = 0;

    for (key, (treated, control)) in &strata {
        if treated.is_empty() || control.is_empty() {
            warn!(stratum = %key, "dropping stratum with an empty arm");
            dropped.push(key.clone());
            continue;
        }
        let mean_treated = mean(treated);
        let mean_control = mean(control);
        let effect = mean_treated - mean_control;
        let weight = (treated.len() + control.len()) as f64;

        total_effect += effect * weight;
        total_weight += weight;
        n_treated += treated.len();
        n_control += control.len();

        effects.insert(
            key.clone(),
            StratumEffect {
                effect,
                n_treated: treated.len(),
                n_control: control.len(),
                mean_treated,
                mean_control,
            },
        );
    }

    TreatmentEffect {
        ate: if total_weight > 0.0 {
            total_effect / total_weight
        } else {
            0.0
        },
        ate_by_strata: effects,
        n_treated,
        n_control,
        n_strata,
        dropped_strata: dropped,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Build a causal summary from a dataset and its estimated effect.
///
/// Validity concerns are mandatory transparency: dropped strata, thin
/// arms, and poor overlap all land in the list; nothing downstream may
/// elide them.
pub fn summarize_effect(
    dataset: &CausalDataset,
    effect: &TreatmentEffect,
    outcome: OutcomeVar,
    criteria: &SuccessCriteria,
) -> CausalSummary {
    // Pooled standard error over strata, weighted like the ATE.
    let mut strata_values: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for record in &dataset.episodes {
        if let Some(shadow) = &record.shadow {
            if !shadow.comparable {
                continue;
            }
        }
        let (treated, control) = strata_values
            .entry(record.stratification_key.clone())
            .or_default();
        if record.treatment == 1 {
            treated.push(outcome.of(record));
        } else {
            control.push(outcome.of(record));
        }
    }

    let total_weight: f64 = effect
        .ate_by_strata
        .values()
        .map(|s| (s.n_treated + s.n_control) as f64)
        .sum();
    let mut se_sq = 0.0;
    for (key, stratum) in &effect.ate_by_strata {
        if let Some((treated, control)) = strata_values.get(key) {
            let weight = (stratum.n_treated + stratum.n_control) as f64 / total_weight.max(1.0);
            let stratum_var = variance(treated) / treated.len().max(1) as f64
                + variance(control) / control.len().max(1) as f64;
            se_sq += weight * weight * stratum_var;
        }
    }
    let se = se_sq.sqrt();
    let ci_lower = effect.ate - 1.96 * se;
    let ci_upper = effect.ate + 1.96 * se;

    let mut validity_concerns = Vec::new();
    for key in &effect.dropped_strata {
        validity_concerns.push(format!("stratum_dropped_zero_arm: {key}"));
    }

    let stratum_sizes: Vec<usize> = effect
        .ate_by_strata
        .values()
        .map(|s| s.n_treated + s.n_control)
        .collect();
    let per_stratum_min = stratum_sizes.iter().copied().min().unwrap_or(0);
    let per_stratum_max = stratum_sizes.iter().copied().max().unwrap_or(0);
    if per_stratum_min > 0 && per_stratum_min < criteria.min_episodes_per_stratum {
        validity_concerns.push(format!(
            "thin_stratum: smallest stratum has {} episodes < {} required",
            per_stratum_min, criteria.min_episodes_per_stratum
        ));
    }

    let min_overlap_observed = dataset
        .episodes
        .iter()
        .map(|r| r.propensity_score.min(1.0 - r.propensity_score))
        .fold(f64::INFINITY, f64::min);
    let min_overlap_observed = if min_overlap_observed.is_finite() {
        min_overlap_observed
    } else {
        0.0
    };
    let overlap_check_passed = min_overlap_observed >= criteria.min_overlap_per_stratum;
    if !overlap_check_passed {
        validity_concerns.push(format!(
            "insufficient_overlap: min propensity overlap {:.3} < {:.3}",
            min_overlap_observed, criteria.min_overlap_per_stratum
        ));
    }

    let sample_size = effect.n_treated + effect.n_control;
    let bounds_met = sample_size > 0 && per_stratum_min >= criteria.min_episodes_per_stratum;

    let mut summary = CausalSummary {
        summary_id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        effect_estimate: effect.ate,
        ci_lower,
        ci_upper,
        method: "stratified".to_string(),
        sample_size,
        sample_size_per_stratum_min: per_stratum_min,
        sample_size_per_stratum_max: per_stratum_max,
        overlap_check_passed,
        min_overlap_observed,
        validity_concerns,
        promotion_recommendation: PromotionRecommendation::Inconclusive,
    };

    summary.promotion_recommendation = if summary.has_blocking_concerns() {
        PromotionRecommendation::Investigate
    } else if summary.effect_estimate >= criteria.min_effect_size
        && ci_lower > 0.0
        && bounds_met
    {
        PromotionRecommendation::Promote
    } else if summary.ci_contains_zero() && bounds_met {
        PromotionRecommendation::Hold
    } else {
        PromotionRecommendation::Inconclusive
    };

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        id: &str,
        treatment: u8,
        confidence: f64,
        strata: &str,
    ) -> CausalRecord {
        CausalRecord {
            episode_id: id.to_string(),
            treatment,
            propensity_score: 0.5,
            stratification_key: strata.to_string(),
            outcome_success: 1,
            outcome_confidence: confidence,
            outcome_latency_ms: 100.0,
            covariate_mode: "math".to_string(),
            covariate_domain: "algebra".to_string(),
            covariate_problem_type: "solve".to_string(),
            covariate_compute_tier: "standard".to_string(),
            covariate_world_impact: None,
            shadow: None,
        }
    }

    #[test]
    fn test_two_record_stratified_ate() {
        let dataset = CausalDataset {
            episodes: vec![
                record("e1", 1, 0.85, "math:algebra:solve:standard"),
                record("e2", 0, 0.75, "math:algebra:solve:standard"),
            ],
        };
        let effect = stratified_treatment_effect(&dataset, OutcomeVar::Confidence);
        assert!((effect.ate - 0.10).abs() < 1e-9);
        assert_eq!(effect.n_treated, 1);
        assert_eq!(effect.n_control, 1);
        assert_eq!(effect.n_strata, 1);
        assert!(effect.dropped_strata.is_empty());
    }

    #[test]
    fn test_zero_arm_stratum_dropped_with_concern() {
        let dataset = CausalDataset {
            episodes: vec![
                record("e1", 1, 0.85, "math:algebra:solve:standard"),
                record("e2", 0, 0.75, "math:algebra:solve:standard"),
                record("e3", 1, 0.9, "build:api:scaffold:standard"),
            ],
        };
        let effect = stratified_treatment_effect(&dataset, OutcomeVar::Confidence);
        assert_eq!(effect.dropped_strata, vec!["build:api:scaffold:standard"]);
        assert_eq!(effect.n_strata, 2);
        assert_eq!(effect.ate_by_strata.len(), 1);

        let summary = summarize_effect(
            &dataset,
            &effect,
            OutcomeVar::Confidence,
            &SuccessCriteria::default(),
        );
        assert!(summary
            .validity_concerns
            .iter()
            .any(|c| c.starts_with("stratum_dropped_zero_arm")));
    }

    #[test]
    fn test_incomparable_shadows_excluded_from_sample() {
        let mut bad = record("e3", 1, 0.95, "math:algebra:solve:standard");
        bad.shadow = Some(ShadowFields {
            execution_id: "s1".to_string(),
            comparable: false,
            validation_regime_identical: false,
            outcome_changed: false,
            shadow_success: true,
            shadow_confidence: 0.9,
            confidence_delta: 0.0,
            latency_delta_pct: 0.0,
            cost_delta_pct: 0.0,
        });
        let dataset = CausalDataset {
            episodes: vec![
                record("e1", 1, 0.85, "math:algebra:solve:standard"),
                record("e2", 0, 0.75, "math:algebra:solve:standard"),
                bad,
            ],
        };
        let effect = stratified_treatment_effect(&dataset, OutcomeVar::Confidence);
        assert_eq!(effect.n_treated, 1);
        assert!((effect.ate - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_ci_contains_zero_derivation() {
        // Balanced outcomes: effect ~0, CI spans zero, bounds not met
        // with default criteria -> inconclusive.
        let dataset = CausalDataset {
            episodes: vec![
                record("e1", 1, 0.8, "s"),
                record("e2", 0, 0.8, "s"),
            ],
        };
        let effect = stratified_treatment_effect(&dataset, OutcomeVar::Confidence);
        let summary = summarize_effect(
            &dataset,
            &effect,
            OutcomeVar::Confidence,
            &SuccessCriteria::default(),
        );
        assert_eq!(
            summary.ci_contains_zero(),
            summary.ci_lower <= 0.0 && 0.0 <= summary.ci_upper
        );
        assert_eq!(
            summary.promotion_recommendation,
            PromotionRecommendation::Inconclusive
        );
    }

    #[test]
    fn test_dataset_joins_episodes_to_at_most_one_shadow() {
        use crate::detector::Mode;
        use crate::experiment::{
            InterventionType, PolicyDomain, PolicyExperiment, PolicyIntervention,
        };
        use crate::orchestrator::{Episode, EpisodeOutcome};

        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path().join("experiments")).unwrap();
        let log = EpisodeLog::open(dir.path().join("episodes.jsonl")).unwrap();

        let intervention = PolicyIntervention::new(
            PolicyDomain::Temperature,
            InterventionType::ParameterChange,
            "temperature_cap",
            serde_json::json!(0.8),
            serde_json::json!(0.7),
        );
        let experiment = PolicyExperiment::new("join-test", intervention);
        let experiment_id = experiment.experiment_id.clone();
        registry.register_experiment(experiment).unwrap();
        registry.start_experiment(&experiment_id).unwrap();

        let mut episode = Episode::begin("solve x", Mode::Math);
        episode.metadata.experiment_id = Some(experiment_id.clone());
        episode.metadata.is_treatment = Some(true);
        episode.metadata.correlation_id = Some("corr-1".to_string());
        episode.metadata.stratification_key =
            Some("math:algebra:solve:standard".to_string());
        episode.result = Some(EpisodeOutcome {
            success: true,
            final_answer: None,
            errors: vec![],
            cost: 0.0,
        });
        episode.finalize();
        log.append(&episode).unwrap();

        // An unrelated episode does not enter the dataset.
        let mut other = Episode::begin("build api", Mode::Build);
        other.finalize();
        log.append(&other).unwrap();

        let mut shadow = ShadowExecution::new("corr-1");
        shadow.validation_regime_identical = true;
        shadow.compute_deltas();
        registry
            .record_shadow_execution(&experiment_id, shadow)
            .unwrap();

        let dataset = generate_causal_dataset(&experiment_id, &registry, &log).unwrap();
        assert_eq!(dataset.episodes.len(), 1);
        let record = &dataset.episodes[0];
        assert_eq!(record.treatment, 1);
        let joined = record.shadow.as_ref().expect("shadow joined");
        assert!(joined.comparable);
    }

    #[test]
    fn test_promote_when_criteria_met() {
        // 60 episodes in one stratum, clear effect, tight spread.
        let mut episodes = Vec::new();
        for i in 0..30 {
            let mut r = record(&format!("t{i}"), 1, 0.90 + (i % 3) as f64 * 0.01, "s");
            r.outcome_latency_ms = 100.0;
            episodes.push(r);
        }
        for i in 0..30 {
            episodes.push(record(&format!("c{i}"), 0, 0.70 + (i % 3) as f64 * 0.01, "s"));
        }
        let dataset = CausalDataset { episodes };
        let effect = stratified_treatment_effect(&dataset, OutcomeVar::Confidence);
        let summary = summarize_effect(
            &dataset,
            &effect,
            OutcomeVar::Confidence,
            &SuccessCriteria::default(),
        );
        assert!((summary.effect_estimate - 0.20).abs() < 1e-9);
        assert!(!summary.ci_contains_zero());
        assert_eq!(
            summary.promotion_recommendation,
            PromotionRecommendation::Promote
        );
    }
}
