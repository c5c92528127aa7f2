//! Consensus Module (§4.4): the agent supermajority rule, candidate
//! selection for the next round, and the judge plurality + confidence rule.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{AgentResponse, JudgeEvaluation, Vote, VoteTally};

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("consensus threshold must be in 0.5..=1.0, got {0}")]
    InvalidThreshold(f64),
}

/// How an agent-round consensus was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMethod {
    Unanimous,
    Supermajority,
}

/// Result of evaluating agent consensus for a round (§4.4.1).
#[derive(Debug, Clone)]
pub struct AgentConsensusOutcome {
    pub tally: VoteTally,
    pub reached: bool,
    pub method: Option<ConsensusMethod>,
    pub position_id: Option<String>,
    pub position_text: Option<String>,
}

/// Evaluate agent consensus for one round.
///
/// `candidate_id` is `None` in round 1 (no candidate exists yet).
pub fn evaluate_agent_consensus(
    responses: &[AgentResponse],
    candidate_id: Option<&str>,
    threshold: f64,
) -> Result<AgentConsensusOutcome, ConsensusError> {
    if !(0.5..=1.0).contains(&threshold) {
        return Err(ConsensusError::InvalidThreshold(threshold));
    }

    let eligible: Vec<&AgentResponse> = responses.iter().filter(|r| r.is_eligible()).collect();

    let yes = match candidate_id {
        Some(cid) => eligible
            .iter()
            .filter(|r| r.vote == Vote::Yes && r.position_id.as_deref() == Some(cid))
            .count() as u32,
        None => 0,
    };
    let no = eligible.iter().filter(|r| r.vote == Vote::No).count() as u32;
    let abstain = eligible.iter().filter(|r| r.vote == Vote::Abstain).count() as u32
        + (responses.len() - eligible.len()) as u32;
    let total = responses.len() as u32;
    let eligible_count = eligible.len() as u32;
    let voting_total = yes + no;

    let tally_base = |supermajority_threshold: u32, supermajority_reached: bool| VoteTally {
        yes,
        no,
        abstain,
        total,
        eligible: eligible_count,
        voting_total,
        supermajority_threshold,
        supermajority_reached,
    };

    if candidate_id.is_none() || voting_total == 0 {
        return Ok(AgentConsensusOutcome {
            tally: tally_base(0, false),
            reached: false,
            method: None,
            position_id: None,
            position_text: None,
        });
    }

    let supermajority_threshold = (voting_total as f64 * threshold).ceil() as u32;
    let reached = yes >= supermajority_threshold;
    let method = if reached {
        Some(if yes == voting_total {
            ConsensusMethod::Unanimous
        } else {
            ConsensusMethod::Supermajority
        })
    } else {
        None
    };

    let position_text = if reached {
        eligible
            .iter()
            .find(|r| r.vote == Vote::Yes && r.position_id.as_deref() == candidate_id)
            .map(|r| r.position_text.clone())
    } else {
        None
    };

    Ok(AgentConsensusOutcome {
        tally: tally_base(supermajority_threshold, reached),
        reached,
        method,
        position_id: if reached {
            candidate_id.map(|s| s.to_string())
        } else {
            None
        },
        position_text,
    })
}

/// A candidate position selected for the next round (§4.4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub position_id: String,
    pub position_text: String,
    pub support_score: f64,
    pub supporter_count: u32,
}

/// Select the next round's candidate from eligible, non-abstain responses.
///
/// Deterministic: ties break on `(SupportScore desc, SupporterCount desc,
/// positionId asc)`, independent of input order (§4.4.2, tested property 7).
pub fn select_candidate(responses: &[AgentResponse]) -> Option<Candidate> {
    let mut by_position: BTreeMap<String, (f64, u32, String)> = BTreeMap::new();
    for r in responses {
        if !r.is_eligible() {
            continue;
        }
        let Some(id) = &r.position_id else { continue };
        let entry = by_position
            .entry(id.clone())
            .or_insert((0.0, 0, r.position_text.clone()));
        entry.0 += r.confidence;
        entry.1 += 1;
    }

    by_position
        .into_iter()
        .max_by(|(id_a, (score_a, count_a, _)), (id_b, (score_b, count_b, _))| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(count_a.cmp(count_b))
                .then(id_b.cmp(id_a)) // reversed: max_by picks the largest, and we want smallest id to win ties
        })
        .map(|(id, (score, count, text))| Candidate {
            position_id: id,
            position_text: text,
            support_score: score,
            supporter_count: count,
        })
}

/// Result of evaluating judge consensus for a round (§4.4.3).
#[derive(Debug, Clone)]
pub struct JudgeConsensusOutcome {
    pub reached: bool,
    pub winner_position_id: Option<String>,
    pub confidence: f64,
    pub dissents: Vec<String>,
}

/// Evaluate judge consensus: plurality vote among eligible judges, gated by
/// a minimum mean confidence among the winner's voters.
pub fn evaluate_judge_consensus(
    evaluations: &[JudgeEvaluation],
    majority_threshold: f64,
    min_confidence: f64,
) -> JudgeConsensusOutcome {
    let eligible: Vec<&JudgeEvaluation> = evaluations.iter().filter(|e| e.is_eligible()).collect();

    if eligible.is_empty() {
        return JudgeConsensusOutcome {
            reached: false,
            winner_position_id: None,
            confidence: 0.0,
            dissents: Vec::new(),
        };
    }

    let required_votes = (eligible.len() as f64 * majority_threshold).ceil() as u32;

    let mut votes: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for e in &eligible {
        let id = e.selected_position_id.clone().expect("eligible implies selectedPositionId");
        votes.entry(id).or_default().push(e.confidence);
    }

    let winner = votes
        .iter()
        .max_by(|(id_a, confs_a), (id_b, confs_b)| {
            let count_a = confs_a.len();
            let count_b = confs_b.len();
            count_a
                .cmp(&count_b)
                .then_with(|| {
                    let mean_a = confs_a.iter().sum::<f64>() / confs_a.len() as f64;
                    let mean_b = confs_b.iter().sum::<f64>() / confs_b.len() as f64;
                    mean_a.partial_cmp(&mean_b).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| id_b.cmp(id_a))
        })
        .map(|(id, confs)| (id.clone(), confs.clone()))
        .expect("votes is non-empty");

    let (winner_id, winner_confs) = winner;
    let winner_votes = winner_confs.len() as u32;
    let mean_confidence = winner_confs.iter().sum::<f64>() / winner_confs.len() as f64;

    let dissents: Vec<String> = eligible
        .iter()
        .filter(|e| e.selected_position_id.as_deref() != Some(winner_id.as_str()))
        .map(|e| e.judge_id.clone())
        .collect();

    if winner_votes < required_votes {
        return JudgeConsensusOutcome {
            reached: false,
            winner_position_id: Some(winner_id),
            confidence: 0.0,
            dissents,
        };
    }

    if mean_confidence < min_confidence {
        return JudgeConsensusOutcome {
            reached: false,
            winner_position_id: Some(winner_id),
            confidence: mean_confidence,
            dissents,
        };
    }

    JudgeConsensusOutcome {
        reached: true,
        winner_position_id: Some(winner_id),
        confidence: mean_confidence,
        dissents,
    }
}
