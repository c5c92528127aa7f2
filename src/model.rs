//! Core data model — positions, votes, responses, tallies, and verdicts.
//!
//! These types are append-only once produced: a `RoundResult` is built in
//! full by the round runner and never mutated after it enters a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A participant's vote on the round's candidate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Yes,
    No,
    Abstain,
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

/// Response status for a participant in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Token accounting for a single adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    /// True when the provider did not return true usage and it was estimated
    /// from the 4-chars-per-token heuristic.
    pub estimated: bool,
}

impl TokenUsage {
    pub fn zero() -> Self {
        Self {
            prompt: 0,
            completion: 0,
            total: 0,
            estimated: false,
        }
    }

    /// Invariant (iii): `total >= prompt + completion`.
    pub fn is_consistent(&self) -> bool {
        self.total >= self.prompt + self.completion
    }
}

/// One agent's response within a single round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub agent_id: String,
    pub round: u32,
    pub position_id: Option<String>,
    pub position_text: String,
    pub reasoning: String,
    pub vote: Vote,
    pub confidence: f64,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub status: ResponseStatus,
    pub error: Option<String>,
}

impl AgentResponse {
    /// Build an error response: `vote=abstain`, `positionId=null`, empty
    /// text/reasoning, `confidence=0` (§3).
    pub fn error(agent_id: impl Into<String>, round: u32, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            round,
            position_id: None,
            position_text: String::new(),
            reasoning: String::new(),
            vote: Vote::Abstain,
            confidence: 0.0,
            token_usage: TokenUsage::zero(),
            latency_ms: 0,
            status: ResponseStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Tally of a round's votes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub total: u32,
    pub eligible: u32,
    pub voting_total: u32,
    pub supermajority_threshold: u32,
    pub supermajority_reached: bool,
}

/// Result of a single agent round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round_number: u32,
    pub candidate_position_id: Option<String>,
    pub candidate_position_text: Option<String>,
    pub responses: Vec<AgentResponse>,
    pub consensus_reached: bool,
    pub consensus_position_id: Option<String>,
    pub consensus_position_text: Option<String>,
    pub vote_tally: VoteTally,
    pub timestamp: DateTime<Utc>,
}

/// A judge's evaluation of the surviving positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeEvaluation {
    pub judge_id: String,
    pub round: u32,
    pub selected_position_id: Option<String>,
    pub scores_by_position_id: BTreeMap<String, u32>,
    pub reasoning: String,
    pub confidence: f64,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub status: ResponseStatus,
    pub error: Option<String>,
}

impl JudgeEvaluation {
    pub fn error(judge_id: impl Into<String>, round: u32, error: impl Into<String>) -> Self {
        Self {
            judge_id: judge_id.into(),
            round,
            selected_position_id: None,
            scores_by_position_id: BTreeMap::new(),
            reasoning: String::new(),
            confidence: 0.0,
            token_usage: TokenUsage::zero(),
            latency_ms: 0,
            status: ResponseStatus::Error,
            error: Some(error.into()),
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.status == ResponseStatus::Ok && self.selected_position_id.is_some()
    }
}

/// Dissenting judge vote recorded against the winning position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeDissent {
    pub judge_id: String,
    pub selected_position_id: Option<String>,
    pub confidence: f64,
}

/// Result of a single judge round, the judge-panel analogue of `RoundResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRoundResult {
    pub round_number: u32,
    pub evaluations: Vec<JudgeEvaluation>,
    pub consensus_reached: bool,
    pub consensus_position_id: Option<String>,
    pub consensus_position_text: Option<String>,
    pub consensus_confidence: f64,
    pub dissents: Vec<JudgeDissent>,
    pub timestamp: DateTime<Utc>,
}

/// Where the final verdict's position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    AgentConsensus,
    JudgeConsensus,
    Deadlock,
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentConsensus => write!(f, "agent_consensus"),
            Self::JudgeConsensus => write!(f, "judge_consensus"),
            Self::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// The session's single, final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalVerdict {
    pub position_id: Option<String>,
    pub position_text: Option<String>,
    pub confidence: f64,
    pub source: VerdictSource,
}
