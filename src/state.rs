//! State Manager (§4.6): owns the `DebateSession`, enforces the phase DAG,
//! and accumulates counters.
//!
//! The phase graph is declarative (`valid_transitions`) rather than spread
//! across ad-hoc `if`s: any transition not listed here is a programmer
//! error, not a recoverable condition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::model::{FinalVerdict, JudgeRoundResult, RoundResult};

/// The session's current stage in the two-phase debate loop (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    Init,
    AgentDebate,
    JudgeEvaluation,
    ConsensusReached,
    Deadlock,
}

impl DebatePhase {
    /// Legal destinations from this phase. Any edge not listed is a fatal
    /// programmer error (§9).
    pub fn valid_transitions(&self) -> &'static [DebatePhase] {
        match self {
            Self::Init => &[Self::AgentDebate],
            Self::AgentDebate => &[
                Self::ConsensusReached,
                Self::JudgeEvaluation,
                Self::Deadlock,
            ],
            Self::JudgeEvaluation => &[Self::ConsensusReached, Self::Deadlock],
            Self::ConsensusReached => &[],
            Self::Deadlock => &[],
        }
    }

    pub fn can_transition_to(&self, next: DebatePhase) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConsensusReached | Self::Deadlock)
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::AgentDebate => "agent_debate",
            Self::JudgeEvaluation => "judge_evaluation",
            Self::ConsensusReached => "consensus_reached",
            Self::Deadlock => "deadlock",
        };
        write!(f, "{s}")
    }
}

/// A recorded phase transition, kept for audit purposes (§4.6). Not part of
/// the §6.1 output document's required shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition {
        from: DebatePhase,
        to: DebatePhase,
    },
    #[error("final verdict set more than once")]
    VerdictAlreadySet,
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

/// Per-session accumulated metadata (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub pricing_known: bool,
    pub checkpoint_path: Option<String>,
    pub total_retries: u64,
    pub total_errors: u64,
}

/// The owned, append-only debate session record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateSession {
    pub id: Uuid,
    pub topic: String,
    pub initial_query: Option<String>,
    pub phase: DebatePhase,
    pub config: Config,
    pub agent_rounds: Vec<RoundResult>,
    pub judge_rounds: Vec<JudgeRoundResult>,
    pub final_verdict: Option<FinalVerdict>,
    pub metadata: SessionMetadata,
    pub transitions: Vec<Transition>,
}

impl DebateSession {
    /// Start a fresh session in `init` phase with a time-ordered ID.
    pub fn new(config: Config, engine_version: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: config.topic.clone(),
            initial_query: config.initial_query.clone(),
            phase: DebatePhase::Init,
            config,
            agent_rounds: Vec::new(),
            judge_rounds: Vec::new(),
            final_verdict: None,
            metadata: SessionMetadata {
                engine_version: engine_version.into(),
                started_at: Utc::now(),
                completed_at: None,
                total_tokens: 0,
                total_cost_usd: 0.0,
                pricing_known: false,
                checkpoint_path: None,
                total_retries: 0,
                total_errors: 0,
            },
            transitions: Vec::new(),
        }
    }

    /// Attempt a phase transition, validating against the declarative DAG
    /// (§4.6). Stamps `completedAt` on entry to a terminal phase.
    pub fn transition(&mut self, to: DebatePhase, reason: impl Into<String>) -> Result<(), StateError> {
        if !self.phase.can_transition_to(to) {
            return Err(StateError::IllegalTransition {
                from: self.phase,
                to,
            });
        }
        let from = self.phase;
        let now = Utc::now();
        self.transitions.push(Transition {
            from,
            to,
            timestamp: now,
            reason: reason.into(),
        });
        self.phase = to;
        if to.is_terminal() {
            self.metadata.completed_at = Some(now);
        }
        Ok(())
    }

    /// Append an agent round, validating round-number monotonicity and
    /// per-round agentId uniqueness (invariants i, ii), and fold its token
    /// usage and error count into the session counters.
    pub fn record_agent_round(&mut self, round: RoundResult) -> Result<(), StateError> {
        if let Some(last) = self.agent_rounds.last() {
            if round.round_number <= last.round_number {
                return Err(StateError::InvariantViolated(format!(
                    "agent round numbers must strictly increase: {} after {}",
                    round.round_number, last.round_number
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for r in &round.responses {
            if !seen.insert(r.agent_id.clone()) {
                return Err(StateError::InvariantViolated(format!(
                    "duplicate agentId {} within round {}",
                    r.agent_id, round.round_number
                )));
            }
        }
        for r in &round.responses {
            self.metadata.total_tokens += r.token_usage.total;
            if r.error.is_some() {
                self.metadata.total_errors += 1;
            }
        }
        self.agent_rounds.push(round);
        Ok(())
    }

    /// Append a judge round, folding its token usage and error count.
    pub fn record_judge_round(&mut self, round: JudgeRoundResult) {
        for e in &round.evaluations {
            self.metadata.total_tokens += e.token_usage.total;
            if e.error.is_some() {
                self.metadata.total_errors += 1;
            }
        }
        self.judge_rounds.push(round);
    }

    /// Fold in Retry Wrapper attempts accumulated over a round (§4.6).
    pub fn record_retry(&mut self, count: u64) {
        self.metadata.total_retries += count;
    }

    /// Set the final verdict exactly once (§4.6).
    pub fn set_final_verdict(&mut self, verdict: FinalVerdict) -> Result<(), StateError> {
        if self.final_verdict.is_some() {
            return Err(StateError::VerdictAlreadySet);
        }
        self.final_verdict = Some(verdict);
        Ok(())
    }

    pub fn current_agent_round(&self) -> u32 {
        self.agent_rounds.last().map(|r| r.round_number).unwrap_or(0)
    }

    pub fn current_judge_round(&self) -> u32 {
        self.judge_rounds.last().map(|r| r.round_number).unwrap_or(0)
    }
}
