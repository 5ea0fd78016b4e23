//! Parse vs. validation confidence split.
//!
//! Confidence is decomposed into two orthogonal components: how well the
//! problem was understood (parse) and how well the answer was verified
//! (validation). Routing uses the minimum of the two, never the average —
//! a high average can hide a dangerous mismatch.

use serde::{Deserialize, Serialize};

/// Gap between parse and validation confidence above which an episode
/// must be escalated for review.
pub const MISMATCH_THRESHOLD: f64 = 0.30;

/// Confidence that the problem was correctly understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseConfidence {
    /// Valid structure?
    pub syntax: f64,
    /// Intent clear?
    pub semantic: f64,
    /// All information present?
    pub completeness: f64,
}

impl Default for ParseConfidence {
    fn default() -> Self {
        Self {
            syntax: 0.5,
            semantic: 0.5,
            completeness: 0.5,
        }
    }
}

impl ParseConfidence {
    pub fn new(syntax: f64, semantic: f64, completeness: f64) -> Self {
        Self {
            syntax: syntax.clamp(0.0, 1.0),
            semantic: semantic.clamp(0.0, 1.0),
            completeness: completeness.clamp(0.0, 1.0),
        }
    }

    /// Simple average of components.
    pub fn combined(&self) -> f64 {
        (self.syntax + self.semantic + self.completeness) / 3.0
    }

    /// Bottleneck: lowest component score.
    pub fn minimum(&self) -> f64 {
        self.syntax.min(self.semantic).min(self.completeness)
    }
}

/// Confidence that the produced answer is correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfidence {
    /// Symbolic checks passed?
    pub symbolic: f64,
    /// Numeric verification passed?
    pub numeric: f64,
    /// Bounds and sanity checks passed?
    pub structural: f64,
    /// Diversity of verification methods used
    pub diversity: f64,
}

impl Default for ValidationConfidence {
    fn default() -> Self {
        Self {
            symbolic: 0.5,
            numeric: 0.5,
            structural: 0.5,
            diversity: 0.5,
        }
    }
}

impl ValidationConfidence {
    pub fn new(symbolic: f64, numeric: f64, structural: f64, diversity: f64) -> Self {
        Self {
            symbolic: symbolic.clamp(0.0, 1.0),
            numeric: numeric.clamp(0.0, 1.0),
            structural: structural.clamp(0.0, 1.0),
            diversity: diversity.clamp(0.0, 1.0),
        }
    }

    /// Simple average of components.
    pub fn combined(&self) -> f64 {
        (self.symbolic + self.numeric + self.structural + self.diversity) / 4.0
    }

    /// Bottleneck: lowest component score.
    pub fn minimum(&self) -> f64 {
        self.symbolic
            .min(self.numeric)
            .min(self.structural)
            .min(self.diversity)
    }
}

/// Combined parse + validation confidence for routing decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfidence {
    pub parse: ParseConfidence,
    pub validation: ValidationConfidence,
}

impl RoutingConfidence {
    pub fn new(parse: ParseConfidence, validation: ValidationConfidence) -> Self {
        Self { parse, validation }
    }

    /// Route on the minimum of parse and validation, not the average.
    pub fn combined(&self) -> f64 {
        self.parse.combined().min(self.validation.combined())
    }

    /// Absolute difference between parse and validation confidence.
    pub fn gap(&self) -> f64 {
        (self.parse.combined() - self.validation.combined()).abs()
    }

    /// True when parse and validation disagree enough that a human (or a
    /// stricter regime) has to look.
    pub fn requires_escalation(&self) -> bool {
        self.gap() > MISMATCH_THRESHOLD
    }

    /// Danger zone: confidently verifying the wrong thing.
    pub fn low_parse_high_validation(&self) -> bool {
        self.parse.combined() < 0.40
            && self.validation.combined() > 0.70
            && self.gap() > MISMATCH_THRESHOLD
    }

    /// Incomplete: understood but not well verified.
    pub fn low_validation_high_parse(&self) -> bool {
        self.parse.combined() > 0.70
            && self.validation.combined() < 0.40
            && self.gap() > MISMATCH_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_uses_minimum() {
        let routing = RoutingConfidence::new(
            ParseConfidence::new(0.9, 0.9, 0.9),
            ValidationConfidence::new(0.3, 0.3, 0.3, 0.3),
        );
        assert!((routing.combined() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_escalation_at_gap_threshold() {
        // Gap of exactly 0.30 does not escalate; strictly above does.
        let at = RoutingConfidence::new(
            ParseConfidence::new(0.9, 0.9, 0.9),
            ValidationConfidence::new(0.6, 0.6, 0.6, 0.6),
        );
        assert!((at.gap() - 0.30).abs() < 1e-9);
        assert!(!at.requires_escalation());

        let above = RoutingConfidence::new(
            ParseConfidence::new(0.95, 0.95, 0.95),
            ValidationConfidence::new(0.6, 0.6, 0.6, 0.6),
        );
        assert!(above.requires_escalation());
    }

    #[test]
    fn test_danger_zone() {
        let routing = RoutingConfidence::new(
            ParseConfidence::new(0.3, 0.3, 0.3),
            ValidationConfidence::new(0.85, 0.85, 0.85, 0.85),
        );
        assert!(routing.low_parse_high_validation());
        assert!(!routing.low_validation_high_parse());
    }

    #[test]
    fn test_scores_clamped() {
        let parse = ParseConfidence::new(1.5, -0.2, 0.5);
        assert_eq!(parse.syntax, 1.0);
        assert_eq!(parse.semantic, 0.0);
    }
}
