//! Adversarial debate loop for confidence calibration.
//!
//! Three roles argue over a candidate solution: the proposer defends it,
//! the critic attacks it, the judge scores the transcript. The resulting
//! confidence reflects how well the solution held up under scrutiny, not
//! how fluent the first answer sounded. When no fabric is wired, each
//! role falls back deterministically so the loop still terminates with a
//! usable verdict.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::model::{FabricClient, SlotMessage, SlotRequest};
use crate::receipt::ReceiptBody;

/// Roles in the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    Proposer,
    Critic,
    Judge,
}

impl std::fmt::Display for DebateRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposer => "proposer",
            Self::Critic => "critic",
            Self::Judge => "judge",
        };
        write!(f, "{}", s)
    }
}

/// Final verdict from the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Valid,
    Invalid,
    Uncertain,
}

/// A single move in the debate transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateMove {
    pub role: DebateRole,
    pub content: String,
    /// "argument", "attack", "defense", "concession"
    pub move_type: String,
    pub timestamp: DateTime<Utc>,
}

impl DebateMove {
    fn new(role: DebateRole, content: impl Into<String>, move_type: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            move_type: move_type.into(),
            timestamp: Utc::now(),
        }
    }

    fn concedes(&self) -> bool {
        self.content.to_uppercase().contains("CONCEDE")
    }
}

/// Result of a completed debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateResult {
    pub debate_id: String,
    pub problem: String,
    pub solution: String,
    pub verdict: Verdict,
    /// Adversarially calibrated, 0.0 to 1.0
    pub confidence: f64,
    pub transcript: Vec<DebateMove>,
    pub proposer_won: bool,
    pub rounds_completed: usize,
    pub judge_reasoning: String,
    pub duration_ms: f64,
}

/// Configuration for the debate loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    pub max_rounds: usize,
    pub proposer_slot: String,
    pub critic_slot: String,
    pub judge_slot: String,
    pub temperature_argument: f64,
    pub temperature_judgment: f64,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            proposer_slot: "council_agent".to_string(),
            critic_slot: "council_agent".to_string(),
            judge_slot: "council_agent".to_string(),
            temperature_argument: 0.7,
            temperature_judgment: 0.2,
        }
    }
}

/// Orchestrates the proposer/critic/judge protocol.
pub struct DebateLoop {
    fabric: Option<Arc<FabricClient>>,
    config: DebateConfig,
}

impl DebateLoop {
    pub fn new(fabric: Option<Arc<FabricClient>>, config: DebateConfig) -> Self {
        Self { fabric, config }
    }

    /// A loop with no fabric: every role uses its deterministic fallback.
    pub fn offline() -> Self {
        Self::new(None, DebateConfig::default())
    }

    /// Run the full debate. Receipts for any fabric calls made are pushed
    /// into `receipts` for the caller to persist.
    #[instrument(skip_all, fields(max_rounds = self.config.max_rounds))]
    pub async fn run(
        &self,
        problem: &str,
        solution: &str,
        receipts: &mut Vec<ReceiptBody>,
    ) -> DebateResult {
        let start = std::time::Instant::now();
        let debate_id = Uuid::new_v4().to_string();
        let mut transcript: Vec<DebateMove> = Vec::new();

        let opening = self
            .proposer_move(problem, solution, &transcript, "argument", receipts)
            .await;
        transcript.push(opening);

        let mut rounds_completed = 0;
        for round in 0..self.config.max_rounds {
            let attack = self
                .critic_move(problem, solution, &transcript, receipts)
                .await;
            let conceded = attack.concedes();
            transcript.push(attack);
            if conceded {
                rounds_completed = round + 1;
                break;
            }

            let defense = self
                .proposer_move(problem, solution, &transcript, "defense", receipts)
                .await;
            let conceded = defense.concedes();
            transcript.push(defense);
            rounds_completed = round + 1;
            if conceded {
                break;
            }
        }

        let (verdict, confidence, reasoning) =
            self.judge_evaluate(problem, solution, &transcript, receipts).await;

        let proposer_won =
            verdict == Verdict::Valid || (verdict == Verdict::Uncertain && confidence > 0.5);

        debug!(?verdict, confidence, rounds_completed, "debate complete");

        DebateResult {
            debate_id,
            problem: problem.to_string(),
            solution: solution.to_string(),
            verdict,
            confidence,
            transcript,
            proposer_won,
            rounds_completed,
            judge_reasoning: reasoning,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    async fn proposer_move(
        &self,
        problem: &str,
        solution: &str,
        transcript: &[DebateMove],
        move_type: &str,
        receipts: &mut Vec<ReceiptBody>,
    ) -> DebateMove {
        let fabric = match &self.fabric {
            Some(fabric) => fabric,
            None => return self.proposer_fallback(move_type),
        };

        let mut prompt = format!(
            "You are the PROPOSER in a debate.\nYour goal: argue that the solution is CORRECT.\n\n\
             **Problem**: {problem}\n**Solution**: {solution}\n\n"
        );
        if move_type == "argument" {
            prompt.push_str(
                "Present your opening argument:\n\
                 1. Why is this solution correct?\n\
                 2. What properties or principles support it?\n\
                 3. Why should we trust this result?\n\n\
                 Be specific and rigorous.",
            );
        } else {
            let last_attack = transcript
                .iter()
                .rev()
                .find(|m| m.role == DebateRole::Critic)
                .map(|m| m.content.as_str())
                .unwrap_or("No attack yet");
            prompt.push_str(&format!(
                "The CRITIC attacked with:\n\"{last_attack}\"\n\n\
                 Defend the solution: address the specific criticism and explain why it does \
                 not invalidate the result.\n\
                 If you cannot defend, say \"I CONCEDE\" and explain why."
            ));
        }

        let request = SlotRequest::new(&self.config.proposer_slot, vec![SlotMessage::user(prompt)])
            .with_temperature(self.config.temperature_argument);
        let (response, receipt) = fabric.call(request).await;
        receipts.push(receipt);

        match response {
            Ok(response) => DebateMove::new(
                DebateRole::Proposer,
                response.content.trim().to_string(),
                move_type,
            ),
            Err(_) => self.proposer_fallback(move_type),
        }
    }

    fn proposer_fallback(&self, move_type: &str) -> DebateMove {
        let content = if move_type == "argument" {
            "The solution follows from standard principles and has been verified symbolically."
        } else {
            "The criticism does not invalidate the solution's core correctness."
        };
        DebateMove::new(DebateRole::Proposer, content, move_type)
    }

    async fn critic_move(
        &self,
        problem: &str,
        solution: &str,
        transcript: &[DebateMove],
        receipts: &mut Vec<ReceiptBody>,
    ) -> DebateMove {
        let fabric = match &self.fabric {
            Some(fabric) => fabric,
            None => {
                return DebateMove::new(
                    DebateRole::Critic,
                    "I CONCEDE - unable to find flaws in the solution.",
                    "concession",
                )
            }
        };

        let mut prompt = format!(
            "You are the CRITIC in a debate.\nYour goal: find FLAWS in the solution (if any exist).\n\n\
             **Problem**: {problem}\n**Solution**: {solution}\n\n"
        );
        let proposer_moves: Vec<&DebateMove> = transcript
            .iter()
            .filter(|m| m.role == DebateRole::Proposer)
            .collect();
        if !proposer_moves.is_empty() {
            prompt.push_str("**Proposer's arguments**:\n");
            for m in proposer_moves.iter().rev().take(2).rev() {
                let snippet: String = m.content.chars().take(500).collect();
                prompt.push_str(&format!("- \"{snippet}\"\n"));
            }
            prompt.push('\n');
        }
        prompt.push_str(
            "Find flaws: errors, unhandled edge cases, assumptions that may not hold, \
             alternative interpretations missed.\n\
             If you find a flaw, explain it clearly.\n\
             If you cannot find a valid flaw, say \"I CONCEDE\" - the solution appears correct.",
        );

        let request = SlotRequest::new(&self.config.critic_slot, vec![SlotMessage::user(prompt)])
            .with_temperature(self.config.temperature_argument);
        let (response, receipt) = fabric.call(request).await;
        receipts.push(receipt);

        match response {
            Ok(response) => {
                DebateMove::new(DebateRole::Critic, response.content.trim().to_string(), "attack")
            }
            Err(_) => DebateMove::new(
                DebateRole::Critic,
                "I CONCEDE - unable to find flaws in the solution.",
                "concession",
            ),
        }
    }

    async fn judge_evaluate(
        &self,
        problem: &str,
        solution: &str,
        transcript: &[DebateMove],
        receipts: &mut Vec<ReceiptBody>,
    ) -> (Verdict, f64, String) {
        let fabric = match &self.fabric {
            Some(fabric) => fabric,
            None => return Self::fallback_evaluation(transcript),
        };

        let mut prompt = format!(
            "You are the JUDGE evaluating a debate.\n\n\
             **Problem**: {problem}\n**Solution**: {solution}\n\n**Debate Transcript**:\n"
        );
        for m in transcript {
            prompt.push_str(&format!(
                "\n[{}] ({}):\n{}\n",
                m.role.to_string().to_uppercase(),
                m.move_type,
                m.content
            ));
        }
        prompt.push_str(
            "\nEvaluate the debate and respond in this format:\n\
             VERDICT: <valid/invalid/uncertain>\n\
             CONFIDENCE: <0.0-1.0>\n\
             WINNER: <proposer/critic>\n\
             REASONING: <your analysis>\n",
        );

        let request = SlotRequest::new(&self.config.judge_slot, vec![SlotMessage::user(prompt)])
            .with_temperature(self.config.temperature_judgment);
        let (response, receipt) = fabric.call(request).await;
        receipts.push(receipt);

        match response {
            Ok(response) => Self::parse_evaluation(&response.content),
            Err(_) => Self::fallback_evaluation(transcript),
        }
    }

    fn parse_evaluation(content: &str) -> (Verdict, f64, String) {
        let mut verdict = Verdict::Uncertain;
        let mut confidence = 0.5;
        let mut reasoning = String::new();

        for line in content.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("VERDICT:") {
                verdict = match value.trim().to_lowercase().as_str() {
                    "valid" => Verdict::Valid,
                    "invalid" => Verdict::Invalid,
                    _ => Verdict::Uncertain,
                };
            } else if let Some(value) = line.strip_prefix("CONFIDENCE:") {
                if let Ok(parsed) = value.trim().parse::<f64>() {
                    confidence = parsed.clamp(0.0, 1.0);
                }
            } else if let Some(value) = line.strip_prefix("REASONING:") {
                reasoning = value.trim().to_string();
            }
        }

        if reasoning.is_empty() {
            reasoning = content.chars().take(500).collect();
        }

        (verdict, confidence, reasoning)
    }

    /// Deterministic evaluation based on concessions alone.
    fn fallback_evaluation(transcript: &[DebateMove]) -> (Verdict, f64, String) {
        let critic_conceded = transcript
            .iter()
            .any(|m| m.role == DebateRole::Critic && m.concedes());
        let proposer_conceded = transcript
            .iter()
            .any(|m| m.role == DebateRole::Proposer && m.concedes());

        if critic_conceded && !proposer_conceded {
            (
                Verdict::Valid,
                0.7,
                "Critic conceded; solution likely valid.".to_string(),
            )
        } else if proposer_conceded {
            (
                Verdict::Invalid,
                0.6,
                "Proposer conceded; solution may have issues.".to_string(),
            )
        } else {
            (
                Verdict::Uncertain,
                0.5,
                "No clear winner; confidence uncertain.".to_string(),
            )
        }
    }
}

/// Blend symbolic validation confidence with debate confidence.
pub fn blend_confidence(validation_confidence: f64, debate_confidence: f64) -> f64 {
    0.6 * validation_confidence + 0.4 * debate_confidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as HelmResult;
    use crate::model::{ModelFabric, SlotResponse};
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_offline_debate_critic_concedes() {
        let debate = DebateLoop::offline();
        let mut receipts = Vec::new();
        let result = debate.run("solve x^2=4", "x = ±2", &mut receipts).await;

        assert_eq!(result.verdict, Verdict::Valid);
        assert!((result.confidence - 0.7).abs() < 1e-9);
        assert!(result.proposer_won);
        assert_eq!(result.rounds_completed, 1);
        assert!(receipts.is_empty());
        // Opening argument plus the concession.
        assert_eq!(result.transcript.len(), 2);
    }

    #[test]
    fn test_parse_evaluation() {
        let content = "VERDICT: valid\nCONFIDENCE: 0.85\nWINNER: proposer\nREASONING: airtight";
        let (verdict, confidence, reasoning) = DebateLoop::parse_evaluation(content);
        assert_eq!(verdict, Verdict::Valid);
        assert!((confidence - 0.85).abs() < 1e-9);
        assert_eq!(reasoning, "airtight");
    }

    #[test]
    fn test_parse_evaluation_clamps_confidence() {
        let content = "VERDICT: invalid\nCONFIDENCE: 1.7";
        let (verdict, confidence, _) = DebateLoop::parse_evaluation(content);
        assert_eq!(verdict, Verdict::Invalid);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_fallback_proposer_concession_loses() {
        let transcript = vec![
            DebateMove::new(DebateRole::Proposer, "opening", "argument"),
            DebateMove::new(DebateRole::Critic, "the sign is wrong", "attack"),
            DebateMove::new(DebateRole::Proposer, "I CONCEDE, the sign flips", "defense"),
        ];
        let (verdict, confidence, _) = DebateLoop::fallback_evaluation(&transcript);
        assert_eq!(verdict, Verdict::Invalid);
        assert!((confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_blend_confidence() {
        assert!((blend_confidence(1.0, 0.0) - 0.6).abs() < 1e-9);
        assert!((blend_confidence(0.5, 0.5) - 0.5).abs() < 1e-9);
    }

    struct ScriptedFabric;

    #[async_trait]
    impl ModelFabric for ScriptedFabric {
        async fn call(&self, request: SlotRequest) -> HelmResult<SlotResponse> {
            let prompt = &request.messages[0].content;
            let content = if prompt.contains("You are the CRITIC") {
                "The derivation skips the negative branch.".to_string()
            } else if prompt.contains("You are the JUDGE") {
                "VERDICT: uncertain\nCONFIDENCE: 0.55\nWINNER: proposer\nREASONING: close call"
                    .to_string()
            } else {
                "Both branches are handled by the quadratic formula.".to_string()
            };
            Ok(SlotResponse {
                content,
                model: "scripted".to_string(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_full_rounds_with_fabric() {
        let fabric = Arc::new(FabricClient::new(ScriptedFabric));
        let debate = DebateLoop::new(Some(fabric), DebateConfig { max_rounds: 2, ..Default::default() });
        let mut receipts = Vec::new();
        let result = debate.run("solve x^2=4", "x = 2", &mut receipts).await;

        assert_eq!(result.verdict, Verdict::Uncertain);
        assert!(result.proposer_won); // uncertain at 0.55 > 0.5
        assert_eq!(result.rounds_completed, 2);
        // opening + 2 * (attack + defense) + judge = 6 fabric calls
        assert_eq!(receipts.len(), 6);
    }
}
