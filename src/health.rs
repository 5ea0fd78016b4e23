//! Self-healing policy controller.
//!
//! A five-state health FSM that tightens policy under sustained harm and
//! relaxes it when things calm down. Hysteresis (separate tightening and
//! relaxing thresholds plus window counts) keeps it from oscillating;
//! cooldowns rate-limit transitions; a rollback path reverts tightenings
//! that did not actually help; staying BLOCKED too long escalates to the
//! guardian channel.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::receipt::HealthEscalationReceipt;

/// System health states, ordered from loosest to tightest policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Normal,
    Caution,
    Constrained,
    ShadowOnly,
    Blocked,
}

impl HealthState {
    fn tighten(self) -> Option<HealthState> {
        match self {
            Self::Normal => Some(Self::Caution),
            Self::Caution => Some(Self::Constrained),
            Self::Constrained => Some(Self::ShadowOnly),
            Self::ShadowOnly => Some(Self::Blocked),
            Self::Blocked => None,
        }
    }

    fn relax(self) -> Option<HealthState> {
        match self {
            Self::Blocked => Some(Self::ShadowOnly),
            Self::ShadowOnly => Some(Self::Constrained),
            Self::Constrained => Some(Self::Caution),
            Self::Caution => Some(Self::Normal),
            Self::Normal => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Caution => "caution",
            Self::Constrained => "constrained",
            Self::ShadowOnly => "shadow_only",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single health measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    pub timestamp: DateTime<Utc>,
    pub harm_probability: f64,
    pub validation_confidence: f64,
    pub parse_confidence: f64,
    pub error_rate: f64,
    pub latency_ms: f64,
    pub cost_per_query: f64,
}

impl Default for HealthObservation {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            harm_probability: 0.0,
            validation_confidence: 0.5,
            parse_confidence: 0.5,
            error_rate: 0.0,
            latency_ms: 0.0,
            cost_per_query: 0.0,
        }
    }
}

impl HealthObservation {
    pub fn with_harm(harm_probability: f64) -> Self {
        Self {
            harm_probability,
            ..Self::default()
        }
    }
}

/// Time-bounded ring of observations with an EMA over harm probability.
#[derive(Debug, Clone, Default)]
pub struct WindowedMetrics {
    observations: Vec<HealthObservation>,
}

impl WindowedMetrics {
    const EMA_ALPHA: f64 = 0.5;
    const MAX_OBSERVATIONS: usize = 64;

    pub fn add(&mut self, obs: HealthObservation) {
        self.observations.push(obs);
        if self.observations.len() > Self::MAX_OBSERVATIONS {
            let excess = self.observations.len() - Self::MAX_OBSERVATIONS;
            self.observations.drain(..excess);
        }
    }

    pub fn observations(&self) -> &[HealthObservation] {
        &self.observations
    }

    /// Exponential moving average of harm probability.
    pub fn harm_ema(&self) -> f64 {
        let mut iter = self.observations.iter();
        let first = match iter.next() {
            Some(obs) => obs.harm_probability,
            None => return 0.0,
        };
        iter.fold(first, |ema, obs| {
            Self::EMA_ALPHA * obs.harm_probability + (1.0 - Self::EMA_ALPHA) * ema
        })
    }

    /// Latest raw harm probability.
    pub fn harm_raw(&self) -> f64 {
        self.observations
            .last()
            .map(|o| o.harm_probability)
            .unwrap_or(0.0)
    }

    /// True when the last `count` observations all satisfy `predicate`.
    fn last_n_all(&self, count: usize, predicate: impl Fn(&HealthObservation) -> bool) -> bool {
        if self.observations.len() < count {
            return false;
        }
        self.observations[self.observations.len() - count..]
            .iter()
            .all(predicate)
    }
}

/// Record of one state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub transition_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_state: HealthState,
    pub to_state: HealthState,
    pub trigger_reason: String,
    pub harm_probability: f64,
}

/// Record of one rollback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackMetadata {
    pub rollback_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_state: HealthState,
    pub to_state: HealthState,
    pub reason: String,
    pub harm_before: f64,
    pub harm_after: f64,
    pub improvement_pct: f64,
    pub windows_observed: u32,
}

/// Policy projection for the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEnvelope {
    pub state: HealthState,
    pub temperature_cap: f64,
    pub model_slot: String,
    pub validation_regime: String,
    pub requires_guardian_approval: bool,
    #[serde(default)]
    pub force_explain_only: bool,
    #[serde(default)]
    pub block_all_new_queries: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Tighten,
    Relax,
}

/// Five-state health FSM with hysteresis, cooldowns, rollback, and
/// escalation. State is mutated solely through [`observe`].
///
/// [`observe`]: SelfHealingController::observe
pub struct SelfHealingController {
    state: HealthState,
    metrics: WindowedMetrics,

    // Tightening thresholds (easier to cross upward)
    threshold_normal_to_caution: f64,
    threshold_caution_to_constrained: f64,
    threshold_constrained_to_shadow_only: f64,
    threshold_shadow_only_to_blocked: f64,
    critical_spike_shadow_only: f64,
    critical_spike_blocked: f64,

    // Relaxing thresholds (harder to cross downward)
    threshold_caution_to_normal: f64,
    threshold_constrained_to_caution: f64,
    threshold_shadow_only_to_constrained: f64,
    threshold_blocked_to_shadow_only: f64,

    // Window counts
    windows_to_tighten_caution: usize,
    windows_to_tighten_constrained: usize,
    windows_to_tighten_shadow_only: usize,
    windows_to_tighten_blocked: usize,
    windows_to_relax_caution: usize,
    windows_to_relax_constrained: usize,
    windows_to_relax_shadow_only: usize,
    windows_to_relax_blocked: usize,

    // Cooldowns
    cooldown_tighten_minutes: i64,
    cooldown_relax_minutes: i64,
    cooldown_blocked_relax_minutes: i64,

    // Rollback
    improvement_threshold: f64,
    rollback_observation_windows: u32,
    harm_baseline_before_tightening: Option<f64>,
    windows_since_last_tightening: u32,

    // Escalation
    max_blocked_minutes: i64,
    blocked_since: Option<DateTime<Utc>>,
    guardian_override_required: bool,
    pending_escalation: Option<HealthEscalationReceipt>,

    last_transition_time: Option<DateTime<Utc>>,
    last_transition_direction: Option<Direction>,
    transition_history: Vec<StateTransition>,
    rollback_history: Vec<RollbackMetadata>,
}

impl Default for SelfHealingController {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfHealingController {
    pub fn new() -> Self {
        Self {
            state: HealthState::Normal,
            metrics: WindowedMetrics::default(),

            threshold_normal_to_caution: 0.60,
            threshold_caution_to_constrained: 0.75,
            threshold_constrained_to_shadow_only: 0.85,
            threshold_shadow_only_to_blocked: 0.90,
            critical_spike_shadow_only: 0.90,
            critical_spike_blocked: 0.95,

            threshold_caution_to_normal: 0.30,
            threshold_constrained_to_caution: 0.40,
            threshold_shadow_only_to_constrained: 0.70,
            threshold_blocked_to_shadow_only: 0.70,

            windows_to_tighten_caution: 3,
            windows_to_tighten_constrained: 5,
            windows_to_tighten_shadow_only: 3,
            windows_to_tighten_blocked: 3,
            windows_to_relax_caution: 10,
            windows_to_relax_constrained: 8,
            windows_to_relax_shadow_only: 6,
            windows_to_relax_blocked: 6,

            cooldown_tighten_minutes: 5,
            cooldown_relax_minutes: 10,
            cooldown_blocked_relax_minutes: 15,

            improvement_threshold: 0.15,
            rollback_observation_windows: 3,
            harm_baseline_before_tightening: None,
            windows_since_last_tightening: 0,

            max_blocked_minutes: 30,
            blocked_since: None,
            guardian_override_required: false,
            pending_escalation: None,

            last_transition_time: None,
            last_transition_direction: None,
            transition_history: Vec::new(),
            rollback_history: Vec::new(),
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn transition_history(&self) -> &[StateTransition] {
        &self.transition_history
    }

    pub fn rollback_history(&self) -> &[RollbackMetadata] {
        &self.rollback_history
    }

    pub fn guardian_override_required(&self) -> bool {
        self.guardian_override_required
    }

    /// Clear the guardian override, re-enabling automatic relaxation.
    pub fn clear_guardian_override(&mut self) {
        self.guardian_override_required = false;
        self.blocked_since = if self.state == HealthState::Blocked {
            Some(Utc::now())
        } else {
            None
        };
    }

    /// Forget transition timing so the next observation may transition
    /// immediately. Test and operator convenience.
    pub fn reset_cooldowns(&mut self) {
        self.last_transition_time = None;
        self.last_transition_direction = None;
    }

    /// Take the escalation receipt owed to the guardian channel, if any.
    pub fn take_escalation(&mut self) -> Option<HealthEscalationReceipt> {
        self.pending_escalation.take()
    }

    /// Observe one health measurement and apply at most one transition.
    pub fn observe(&mut self, obs: HealthObservation) -> Option<StateTransition> {
        self.metrics.add(obs.clone());
        self.check_escalation();

        // Critical spikes bypass window counts and cooldowns.
        if obs.harm_probability > self.critical_spike_blocked && self.state != HealthState::Blocked
        {
            return Some(self.transition_to(
                HealthState::Blocked,
                Direction::Tighten,
                format!("critical spike: harm={:.2}", obs.harm_probability),
                &obs,
            ));
        }
        if obs.harm_probability > self.critical_spike_shadow_only
            && self.state < HealthState::ShadowOnly
        {
            return Some(self.transition_to(
                HealthState::ShadowOnly,
                Direction::Tighten,
                format!("critical spike: harm={:.2}", obs.harm_probability),
                &obs,
            ));
        }

        // Rollback is its own mechanism and is exempt from cooldowns.
        if let Some(baseline) = self.harm_baseline_before_tightening {
            self.windows_since_last_tightening += 1;
            if self.windows_since_last_tightening >= self.rollback_observation_windows {
                let improvement = (baseline - obs.harm_probability) / baseline.max(0.01);
                if improvement >= self.improvement_threshold {
                    // Tightening worked; stop watching.
                    self.harm_baseline_before_tightening = None;
                    self.windows_since_last_tightening = 0;
                } else if obs.harm_probability <= self.tighten_threshold_for(self.state) {
                    return self.perform_rollback(&obs, baseline, improvement);
                }
                // Otherwise harm is still breaching upward; leave the
                // baseline armed and let the tighten path handle it.
            }
        }

        if !self.in_cooldown(Direction::Tighten) {
            if let Some(transition) = self.try_tighten(&obs) {
                return Some(transition);
            }
        }

        if !self.guardian_override_required && !self.in_cooldown(Direction::Relax) {
            if let Some(transition) = self.try_relax(&obs) {
                return Some(transition);
            }
        }

        None
    }

    fn tighten_threshold_for(&self, state: HealthState) -> f64 {
        match state {
            HealthState::Normal => self.threshold_normal_to_caution,
            HealthState::Caution => self.threshold_caution_to_constrained,
            HealthState::Constrained => self.threshold_constrained_to_shadow_only,
            HealthState::ShadowOnly => self.threshold_shadow_only_to_blocked,
            HealthState::Blocked => 1.0,
        }
    }

    fn try_tighten(&mut self, obs: &HealthObservation) -> Option<StateTransition> {
        let next = self.state.tighten()?;
        let (threshold, windows) = match self.state {
            HealthState::Normal => (self.threshold_normal_to_caution, self.windows_to_tighten_caution),
            HealthState::Caution => (
                self.threshold_caution_to_constrained,
                self.windows_to_tighten_constrained,
            ),
            HealthState::Constrained => (
                self.threshold_constrained_to_shadow_only,
                self.windows_to_tighten_shadow_only,
            ),
            HealthState::ShadowOnly => (
                self.threshold_shadow_only_to_blocked,
                self.windows_to_tighten_blocked,
            ),
            HealthState::Blocked => return None,
        };

        if self
            .metrics
            .last_n_all(windows, |o| o.harm_probability > threshold)
        {
            // Capture the pre-tightening EMA as the rollback baseline.
            self.harm_baseline_before_tightening = Some(self.metrics.harm_ema());
            return Some(self.transition_to(
                next,
                Direction::Tighten,
                format!("{} windows above {:.2}", windows, threshold),
                obs,
            ));
        }
        None
    }

    fn try_relax(&mut self, obs: &HealthObservation) -> Option<StateTransition> {
        let next = self.state.relax()?;
        let (threshold, windows) = match self.state {
            HealthState::Caution => (self.threshold_caution_to_normal, self.windows_to_relax_caution),
            HealthState::Constrained => (
                self.threshold_constrained_to_caution,
                self.windows_to_relax_constrained,
            ),
            HealthState::ShadowOnly => (
                self.threshold_shadow_only_to_constrained,
                self.windows_to_relax_shadow_only,
            ),
            HealthState::Blocked => (
                self.threshold_blocked_to_shadow_only,
                self.windows_to_relax_blocked,
            ),
            HealthState::Normal => return None,
        };

        if self
            .metrics
            .last_n_all(windows, |o| o.harm_probability < threshold)
        {
            return Some(self.transition_to(
                next,
                Direction::Relax,
                format!("{} windows below {:.2}", windows, threshold),
                obs,
            ));
        }
        None
    }

    fn perform_rollback(
        &mut self,
        obs: &HealthObservation,
        baseline: f64,
        improvement: f64,
    ) -> Option<StateTransition> {
        let prior = self.state.relax()?;
        let improvement_pct = improvement * 100.0;

        let rollback = RollbackMetadata {
            rollback_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            from_state: self.state,
            to_state: prior,
            reason: format!(
                "improvement {:.1}% < {:.0}% threshold",
                improvement_pct,
                self.improvement_threshold * 100.0
            ),
            harm_before: baseline,
            harm_after: obs.harm_probability,
            improvement_pct,
            windows_observed: self.windows_since_last_tightening,
        };
        warn!(
            from = %rollback.from_state,
            to = %rollback.to_state,
            improvement_pct,
            "tightening did not improve harm, rolling back"
        );
        let reason = format!("rollback: {}", rollback.reason);
        self.rollback_history.push(rollback);

        let transition = self.transition_to(prior, Direction::Relax, reason, obs);
        self.harm_baseline_before_tightening = None;
        self.windows_since_last_tightening = 0;
        Some(transition)
    }

    fn transition_to(
        &mut self,
        new_state: HealthState,
        direction: Direction,
        reason: String,
        obs: &HealthObservation,
    ) -> StateTransition {
        let transition = StateTransition {
            transition_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            from_state: self.state,
            to_state: new_state,
            trigger_reason: reason,
            harm_probability: obs.harm_probability,
        };
        info!(
            from = %transition.from_state,
            to = %transition.to_state,
            reason = %transition.trigger_reason,
            "health state transition"
        );

        self.state = new_state;
        self.last_transition_time = Some(transition.timestamp);
        self.last_transition_direction = Some(direction);
        self.windows_since_last_tightening = 0;
        if direction == Direction::Relax {
            self.harm_baseline_before_tightening = None;
        }

        self.blocked_since = if new_state == HealthState::Blocked {
            Some(transition.timestamp)
        } else {
            None
        };

        self.transition_history.push(transition.clone());
        transition
    }

    fn in_cooldown(&self, direction: Direction) -> bool {
        let (last_time, last_direction) =
            match (self.last_transition_time, self.last_transition_direction) {
                (Some(t), Some(d)) => (t, d),
                _ => return false,
            };
        if last_direction != direction {
            return false;
        }
        let minutes = match direction {
            Direction::Tighten => self.cooldown_tighten_minutes,
            Direction::Relax => {
                if self.state == HealthState::Blocked {
                    self.cooldown_blocked_relax_minutes
                } else {
                    self.cooldown_relax_minutes
                }
            }
        };
        Utc::now() - last_time < Duration::minutes(minutes)
    }

    fn check_escalation(&mut self) {
        if self.guardian_override_required {
            return;
        }
        if let Some(since) = self.blocked_since {
            let blocked_minutes = (Utc::now() - since).num_seconds() as f64 / 60.0;
            if blocked_minutes > self.max_blocked_minutes as f64 {
                self.guardian_override_required = true;
                self.pending_escalation = Some(HealthEscalationReceipt {
                    state: self.state.to_string(),
                    blocked_minutes,
                    reason: format!(
                        "blocked for {:.1} minutes > {} minute limit",
                        blocked_minutes, self.max_blocked_minutes
                    ),
                    guardian_override_required: true,
                });
            }
        }
    }

    /// Policy projection for the current state, from a fixed table.
    pub fn get_current_policy(&self) -> PolicyEnvelope {
        match self.state {
            HealthState::Normal => PolicyEnvelope {
                state: HealthState::Normal,
                temperature_cap: 1.0,
                model_slot: "default".to_string(),
                validation_regime: "full".to_string(),
                requires_guardian_approval: false,
                force_explain_only: false,
                block_all_new_queries: false,
            },
            HealthState::Caution => PolicyEnvelope {
                state: HealthState::Caution,
                temperature_cap: 0.8,
                model_slot: "safe".to_string(),
                validation_regime: "full".to_string(),
                requires_guardian_approval: false,
                force_explain_only: false,
                block_all_new_queries: false,
            },
            HealthState::Constrained => PolicyEnvelope {
                state: HealthState::Constrained,
                temperature_cap: 0.5,
                model_slot: "conservative".to_string(),
                validation_regime: "strict".to_string(),
                requires_guardian_approval: true,
                force_explain_only: false,
                block_all_new_queries: false,
            },
            HealthState::ShadowOnly => PolicyEnvelope {
                state: HealthState::ShadowOnly,
                temperature_cap: 0.3,
                model_slot: "minimal".to_string(),
                validation_regime: "exhaustive".to_string(),
                requires_guardian_approval: true,
                force_explain_only: true,
                block_all_new_queries: false,
            },
            HealthState::Blocked => PolicyEnvelope {
                state: HealthState::Blocked,
                temperature_cap: 0.1,
                model_slot: "none".to_string(),
                validation_regime: "explain_only".to_string(),
                requires_guardian_approval: true,
                force_explain_only: true,
                block_all_new_queries: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(controller: &mut SelfHealingController, harm: f64, count: usize) -> Vec<StateTransition> {
        (0..count)
            .filter_map(|_| controller.observe(HealthObservation::with_harm(harm)))
            .collect()
    }

    #[test]
    fn test_tighten_requires_window_count() {
        let mut controller = SelfHealingController::new();
        let transitions = feed(&mut controller, 0.65, 2);
        assert!(transitions.is_empty());
        assert_eq!(controller.state(), HealthState::Normal);

        let transitions = feed(&mut controller, 0.65, 1);
        assert_eq!(transitions.len(), 1);
        assert_eq!(controller.state(), HealthState::Caution);
    }

    #[test]
    fn test_tighten_then_rollback() {
        let mut controller = SelfHealingController::new();

        // NORMAL -> CAUTION on 3 windows at 0.65.
        feed(&mut controller, 0.65, 3);
        assert_eq!(controller.state(), HealthState::Caution);

        controller.reset_cooldowns();

        // CAUTION -> CONSTRAINED on 5 windows at 0.78; baseline ~0.78.
        feed(&mut controller, 0.78, 5);
        assert_eq!(controller.state(), HealthState::Constrained);

        // 3 windows at 0.75: improvement ~3.8% < 15% -> rollback.
        feed(&mut controller, 0.75, 3);
        assert_eq!(controller.state(), HealthState::Caution);
        assert_eq!(controller.rollback_history().len(), 1);
        let rollback = &controller.rollback_history()[0];
        assert!(rollback.improvement_pct < 15.0);
        assert_eq!(rollback.from_state, HealthState::Constrained);
        assert_eq!(rollback.to_state, HealthState::Caution);
    }

    #[test]
    fn test_effective_tightening_clears_baseline() {
        let mut controller = SelfHealingController::new();
        feed(&mut controller, 0.65, 3);
        assert_eq!(controller.state(), HealthState::Caution);

        // Harm drops well below baseline: no rollback.
        feed(&mut controller, 0.10, 3);
        assert_eq!(controller.state(), HealthState::Caution);
        assert!(controller.rollback_history().is_empty());
    }

    #[test]
    fn test_critical_spike_skips_states() {
        let mut controller = SelfHealingController::new();
        let transition = controller
            .observe(HealthObservation::with_harm(0.92))
            .expect("spike transition");
        assert_eq!(transition.to_state, HealthState::ShadowOnly);

        let transition = controller
            .observe(HealthObservation::with_harm(0.97))
            .expect("spike transition");
        assert_eq!(transition.to_state, HealthState::Blocked);
    }

    #[test]
    fn test_cooldown_blocks_consecutive_tightens() {
        let mut controller = SelfHealingController::new();
        feed(&mut controller, 0.65, 3);
        assert_eq!(controller.state(), HealthState::Caution);

        // Plenty of high observations, but inside the tighten cooldown.
        feed(&mut controller, 0.80, 8);
        assert_eq!(controller.state(), HealthState::Caution);

        controller.reset_cooldowns();
        feed(&mut controller, 0.80, 5);
        assert_eq!(controller.state(), HealthState::Constrained);
    }

    #[test]
    fn test_relax_needs_more_windows_than_tighten() {
        let mut controller = SelfHealingController::new();
        feed(&mut controller, 0.65, 3);
        assert_eq!(controller.state(), HealthState::Caution);
        controller.reset_cooldowns();

        // Clear the rollback watch with a genuine improvement first.
        feed(&mut controller, 0.05, 3);

        // 9 quiet windows are not enough to relax (10 required).
        feed(&mut controller, 0.05, 6);
        assert_eq!(controller.state(), HealthState::Caution);

        feed(&mut controller, 0.05, 1);
        assert_eq!(controller.state(), HealthState::Normal);
    }

    #[test]
    fn test_transitions_follow_adjacency_or_spike() {
        let mut controller = SelfHealingController::new();
        feed(&mut controller, 0.65, 3);
        controller.reset_cooldowns();
        feed(&mut controller, 0.80, 5);
        controller.reset_cooldowns();
        feed(&mut controller, 0.97, 1);

        for transition in controller.transition_history() {
            let adjacent = transition.from_state.tighten() == Some(transition.to_state)
                || transition.from_state.relax() == Some(transition.to_state);
            let spike = transition.harm_probability > 0.90;
            assert!(adjacent || spike, "non-adjacent transition without spike");
        }
    }

    #[test]
    fn test_policy_projection_table() {
        let mut controller = SelfHealingController::new();
        let policy = controller.get_current_policy();
        assert_eq!(policy.state, HealthState::Normal);
        assert_eq!(policy.temperature_cap, 1.0);
        assert!(!policy.requires_guardian_approval);

        controller.observe(HealthObservation::with_harm(0.97));
        let policy = controller.get_current_policy();
        assert_eq!(policy.state, HealthState::Blocked);
        assert!(policy.block_all_new_queries);
        assert!(policy.force_explain_only);
        assert_eq!(policy.model_slot, "none");
    }
}
