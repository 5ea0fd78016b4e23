//! Receipt envelope and payload types.
//!
//! A receipt is an immutable record of a notable event: a constitutional
//! check, a policy change, a model call, a validation phase. Receipts are
//! self-describing (the `kind` tag selects the payload) and only become
//! durable by passing through the [`ReceiptStore`](super::ReceiptStore),
//! which wraps them with hash-chain metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constitutional::Severity;
use crate::error::Result;
use crate::experiment::PolicyChangeReceipt;

/// Unique identifier for a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub Uuid);

impl ReceiptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReceiptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Emitted when a critical pre-invariant blocks execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalBlockReceipt {
    pub invariant_id: String,
    pub invariant_name: String,
    pub severity: Severity,
    /// The query or action that was blocked
    pub blocked_action: String,
    pub block_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Emitted when a high-severity invariant fails without blocking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalViolationReceipt {
    pub invariant_id: String,
    pub invariant_name: String,
    pub severity: Severity,
    pub phase: String,
    pub violation_description: String,
    pub escalated_to_guardian: bool,
}

/// Emitted when a pre- or post-check completes without a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalPassReceipt {
    pub phase: String,
    pub invariants_checked: usize,
    pub invariants_passed: usize,
    pub check_time_ms: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Per-call record for the model fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallReceipt {
    pub slot: String,
    pub model: String,
    pub duration_ms: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Emitted when a slot call exceeds its per-slot timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTimeoutReceipt {
    pub slot: String,
    pub timeout_ms: u64,
    pub elapsed_ms: f64,
}

/// Receipt minted by a validation phase run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseValidationReceipt {
    /// "phase1" or "phase2"
    pub phase: String,
    /// Hash over the fixture (phase 1) or endpoint configuration (phase 2)
    pub config_hash: String,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub failures: Vec<String>,
    pub tool_version: String,
}

/// Emitted when the self-healing controller escalates to the guardian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEscalationReceipt {
    pub state: String,
    pub blocked_minutes: f64,
    pub reason: String,
    pub guardian_override_required: bool,
}

/// Emitted whenever an episode fails, whatever the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeFailureReceipt {
    pub episode_id: String,
    pub code: String,
    pub stage: String,
    pub message: String,
    pub recoverable: bool,
}

/// Self-describing receipt payload, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiptBody {
    ConstitutionalBlock(ConstitutionalBlockReceipt),
    ConstitutionalViolation(ConstitutionalViolationReceipt),
    ConstitutionalPass(ConstitutionalPassReceipt),
    PolicyChange(PolicyChangeReceipt),
    ModelCall(ModelCallReceipt),
    ModelTimeout(ModelTimeoutReceipt),
    PhaseValidation(PhaseValidationReceipt),
    HealthEscalation(HealthEscalationReceipt),
    EpisodeFailure(EpisodeFailureReceipt),
}

impl ReceiptBody {
    /// Experiment id for policy-change receipts.
    pub fn experiment_id(&self) -> Option<&str> {
        match self {
            Self::PolicyChange(pc) => Some(&pc.experiment.experiment_id),
            _ => None,
        }
    }
}

/// Immutable receipt: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ReceiptBody,
}

impl Receipt {
    pub fn new(body: ReceiptBody) -> Self {
        Self {
            receipt_id: ReceiptId::new(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn policy_change(receipt: PolicyChangeReceipt) -> Self {
        Self::new(ReceiptBody::PolicyChange(receipt))
    }
}

/// A receipt as persisted: body plus hash-chain metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptWithHash {
    #[serde(flatten)]
    pub receipt: Receipt,
    pub receipt_hash: String,
    pub parent_hash: Option<String>,
    pub sequence_number: u64,
}

/// Compute the SHA-256 hash of a receipt body.
///
/// The receipt is serialized to JSON with sorted object keys (serde_json's
/// default map is ordered), which gives a stable byte representation. Hash
/// fields are excluded by construction: they live on [`ReceiptWithHash`],
/// not on [`Receipt`].
pub fn compute_receipt_hash(receipt: &Receipt) -> Result<String> {
    let value = serde_json::to_value(receipt)?;
    let canonical = serde_json::to_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_receipt() -> Receipt {
        Receipt::new(ReceiptBody::ConstitutionalPass(ConstitutionalPassReceipt {
            phase: "pre".into(),
            invariants_checked: 4,
            invariants_passed: 4,
            check_time_ms: 0.3,
            warnings: vec![],
        }))
    }

    #[test]
    fn test_kind_tag_in_serialized_form() {
        let receipt = pass_receipt();
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("\"kind\":\"constitutional_pass\""));
    }

    #[test]
    fn test_receipt_round_trip() {
        let receipt = pass_receipt();
        let json = serde_json::to_string(&receipt).unwrap();
        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(receipt, back);
    }

    #[test]
    fn test_hash_is_stable_across_round_trip() {
        let receipt = pass_receipt();
        let hash = compute_receipt_hash(&receipt).unwrap();

        let json = serde_json::to_string(&receipt).unwrap();
        let back: Receipt = serde_json::from_str(&json).unwrap();
        assert_eq!(compute_receipt_hash(&back).unwrap(), hash);
    }

    #[test]
    fn test_hash_changes_with_body() {
        let a = pass_receipt();
        let mut b = a.clone();
        if let ReceiptBody::ConstitutionalPass(ref mut p) = b.body {
            p.invariants_passed = 3;
        }
        assert_ne!(
            compute_receipt_hash(&a).unwrap(),
            compute_receipt_hash(&b).unwrap()
        );
    }
}
