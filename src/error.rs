//! Error types for helm-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using helm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during kernel operations.
///
/// These are infrastructure failures. Failures of an episode itself
/// (parse errors, blocked executions, low confidence) are values, not
/// errors — see [`ModeError`].
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error touching a log or store file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML scenario parse error
    #[error("Scenario parse error: {0}")]
    Scenario(#[from] serde_yaml::Error),

    /// Coverage store error
    #[error("Coverage store error: {0}")]
    CoverageStore(String),

    /// Hash chain integrity failure
    #[error("Hash chain broken at position {position}: {message}")]
    HashChain { position: usize, message: String },

    /// Corrupt line in an append-only log
    #[error("Corrupt record at line {line}: {message}")]
    CorruptRecord { line: usize, message: String },

    /// Experiment not found in the registry
    #[error("Unknown experiment: {0}")]
    ExperimentNotFound(String),

    /// Shadow write rejected because the experiment has ended
    #[error("Experiment {0} has ended; shadow writes are rejected")]
    ExperimentEnded(String),

    /// Model fabric call failed
    #[error("Model fabric error: {slot} - {message}")]
    ModelFabric { slot: String, message: String },

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a coverage store error.
    pub fn coverage(message: impl Into<String>) -> Self {
        Self::CoverageStore(message.into())
    }

    /// Create a model fabric error.
    pub fn model_fabric(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelFabric {
            slot: slot.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a hash chain error.
    pub fn hash_chain(position: usize, message: impl Into<String>) -> Self {
        Self::HashChain {
            position,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::CoverageStore(e.to_string())
    }
}

/// Error codes for episode-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IntentUnclear,
    ParseError,
    PlanError,
    BackendUnavailable,
    ExecutionError,
    VerificationFailed,
    IncompleteButSafe,
    LowConfidence,
    WorldImpactBlocked,
    Timeout,
    TokenBudgetExceeded,
    HighRiskDomainRejected,
    PolicyDenied,
}

impl ErrorCode {
    /// Whether the orchestrator may retry after this error within its
    /// iteration budget.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionError | Self::VerificationFailed | Self::LowConfidence
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IntentUnclear => "INTENT_UNCLEAR",
            Self::ParseError => "PARSE_ERROR",
            Self::PlanError => "PLAN_ERROR",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::IncompleteButSafe => "INCOMPLETE_BUT_SAFE",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::WorldImpactBlocked => "WORLD_IMPACT_BLOCKED",
            Self::Timeout => "TIMEOUT",
            Self::TokenBudgetExceeded => "TOKEN_BUDGET_EXCEEDED",
            Self::HighRiskDomainRejected => "HIGH_RISK_DOMAIN_REJECTED",
            Self::PolicyDenied => "POLICY_DENIED",
        };
        write!(f, "{}", s)
    }
}

/// What the organism should do about a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganismAction {
    #[default]
    Warn,
    Block,
    Escalate,
    Continue,
}

/// A typed episode-level failure.
///
/// Carried inside results rather than returned as `Err`; the orchestrator
/// pattern-matches on `code` to decide propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeError {
    pub code: ErrorCode,
    /// Which phase produced the failure ("detect", "parse", "plan", ...)
    pub stage: String,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(default)]
    pub organism_action: OrganismAction,
}

impl ModeError {
    pub fn new(code: ErrorCode, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            stage: stage.into(),
            message: message.into(),
            recoverable: code.retriable(),
            details: None,
            suggested_action: None,
            organism_action: OrganismAction::Warn,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn with_organism_action(mut self, action: OrganismAction) -> Self {
        self.organism_action = action;
        self
    }

    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retriable() {
        assert!(ErrorCode::ExecutionError.retriable());
        assert!(ErrorCode::LowConfidence.retriable());
        assert!(!ErrorCode::WorldImpactBlocked.retriable());
        assert!(!ErrorCode::ParseError.retriable());
    }

    #[test]
    fn test_mode_error_builder() {
        let err = ModeError::new(ErrorCode::WorldImpactBlocked, "decide", "blocked")
            .with_organism_action(OrganismAction::Block)
            .recoverable(false);
        assert_eq!(err.organism_action, OrganismAction::Block);
        assert!(!err.recoverable);
    }

    #[test]
    fn test_mode_error_serde_round_trip() {
        let err = ModeError::new(ErrorCode::Timeout, "act", "subgoal exceeded wall clock");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"TIMEOUT\""));
        let back: ModeError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
