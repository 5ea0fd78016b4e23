//! Multi-phase validation gate with per-phase receipts.

mod phase1;
mod phase2;
mod types;

pub use phase1::{
    check_episode_quality, check_receipt_chain, check_recommendations, check_stress_gates,
    run_phase1_validation, Phase1Report,
};
pub use phase2::{
    check_failure_mode, check_live_path, check_policy_effect, run_phase2_validation, Phase2Report,
    LOOM_DAEMON_URL, QUINTET_SERVICE_URL, QUINTET_VALIDATION_RECEIPTS,
};
pub use types::{ValidationCheckResult, ValidationSummary};
