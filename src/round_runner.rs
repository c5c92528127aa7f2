//! Round Runner (§4.5): executes one round — agent or judge — as a bounded
//! concurrent fan-out, then aggregates into a `RoundResult`/`JudgeRoundResult`.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::adapter::{AdapterError, AdapterRequest, ModelAdapter};
use crate::config::{ConcurrencyConfig, Config, ContextTopology};
use crate::consensus::{evaluate_agent_consensus, ConsensusError};
use crate::id::position_id;
use crate::model::{
    AgentResponse, JudgeEvaluation, JudgeRoundResult, ResponseStatus, RoundResult, Vote, VoteTally,
};
use crate::repair::{parse_with_repair, RepairOutcome};
use crate::retry::{with_retry, OnRetry};
use std::collections::BTreeMap;

#[derive(Debug, Error)]
pub enum RoundRunnerError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Position text bounds after trim (§3 Data Model).
const POSITION_TEXT_MIN_CHARS: usize = 1;
const POSITION_TEXT_MAX_CHARS: usize = 4000;
/// Reasoning bounds after trim (§3 Data Model).
const REASONING_MIN_CHARS: usize = 1;
const REASONING_MAX_CHARS: usize = 8000;

/// The candidate position put up for a vote in round ≥2. Both fields are
/// `None` in round 1 and whenever candidate selection found nothing (§9,
/// resolution of the `None`-candidate open question).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub position_id: String,
    pub position_text: String,
}

/// One participant to run this round.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub system_prompt: Option<String>,
    pub temperature: f64,
}

/// Build the system prompt carrying the participant's role, the topic, and
/// the output-schema contract (§4.5).
fn build_system_prompt(participant: &Participant, topic: &str, initial_query: Option<&str>) -> String {
    let mut prompt = format!(
        "You are participant {} in a structured multi-agent debate.\nTopic: {}\n",
        participant.id, topic
    );
    if let Some(q) = initial_query {
        prompt.push_str(&format!("Initial query: {q}\n"));
    }
    if let Some(role) = &participant.system_prompt {
        prompt.push_str(role);
        prompt.push('\n');
    }
    prompt.push_str(
        "Respond with a JSON object: {\"vote\": \"yes\"|\"no\"|\"abstain\", \
         \"targetPositionId\": string|null, \"newPositionText\": string|null, \
         \"reasoning\": string, \"confidence\": number between 0 and 1}.",
    );
    prompt
}

/// Render the history context for round ≥2 per the configured topology
/// (§4.5), bounded by `max_context_tokens * 4` characters.
fn render_history(
    participant_id: &str,
    history: &[RoundResult],
    topology: ContextTopology,
    max_context_tokens: u64,
) -> String {
    let budget = (max_context_tokens as usize).saturating_mul(4);
    let rendered = match topology {
        ContextTopology::FullHistory => render_full_history(history),
        ContextTopology::LastRound => render_last_round(history, None),
        ContextTopology::LastRoundWithSelf => render_last_round(history, Some(participant_id)),
        ContextTopology::Summary => render_summary(history, participant_id),
    };
    truncate_with_marker(&rendered, budget)
}

fn render_full_history(history: &[RoundResult]) -> String {
    let mut out = String::new();
    for round in history {
        for r in &round.responses {
            out.push_str(&format!(
                "[round {}] {} voted {} on {:?}: {}\n",
                round.round_number, r.agent_id, r.vote, r.position_id, r.position_text
            ));
        }
    }
    out
}

fn render_last_round(history: &[RoundResult], self_id: Option<&str>) -> String {
    let mut out = String::new();
    let Some(last) = history.last() else { return out };
    for r in &last.responses {
        if self_id == Some(r.agent_id.as_str()) {
            continue;
        }
        out.push_str(&format!(
            "[round {}] {} voted {} on {:?}: {}\n",
            last.round_number, r.agent_id, r.vote, r.position_id, r.position_text
        ));
    }
    if let Some(id) = self_id {
        for round in history {
            for r in &round.responses {
                if r.agent_id == id {
                    out.push_str(&format!(
                        "[round {} self] voted {} on {:?}: {}\n",
                        round.round_number, r.vote, r.position_id, r.position_text
                    ));
                }
            }
        }
    }
    out
}

/// `SUMMARY`: the same unioned view as `LAST_ROUND_WITH_SELF`, collapsed to
/// one line per response (§4.5) rather than silently aliased to `LAST_ROUND`.
fn render_summary(history: &[RoundResult], participant_id: &str) -> String {
    let unioned = render_last_round(history, Some(participant_id));
    let mut out = String::new();
    for line in unioned.lines() {
        let excerpt: String = line.chars().take(200).collect();
        out.push_str(&excerpt);
        out.push('\n');
    }
    out
}

fn truncate_with_marker(text: &str, budget: usize) -> String {
    if text.len() <= budget || budget < 32 {
        return text.to_string();
    }
    let half = (budget - 16) / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().rev().take(half).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}[...truncated...]{tail}")
}

fn build_user_prompt(
    participant: &Participant,
    round_number: u32,
    candidate: Option<&Candidate>,
    history: &[RoundResult],
    topology: ContextTopology,
    max_context_tokens: u64,
) -> String {
    if round_number == 1 || candidate.is_none() {
        return "This is round 1 (or no candidate survived). Vote abstain and propose your \
                 initial position via newPositionText, with reasoning and confidence."
            .to_string();
    }
    let candidate = candidate.expect("checked above");
    let history_view = render_history(&participant.id, history, topology, max_context_tokens);
    format!(
        "The current candidate position is:\nid: {}\ntext: {}\n\n\
         Vote yes (targetPositionId must equal the candidate id above) if you agree, \
         no (with a fresh newPositionText) if you disagree, or abstain.\n\n\
         History:\n{}",
        candidate.position_id, candidate.position_text, history_view
    )
}

/// Parse and normalize one participant's raw adapter content into a full
/// `AgentResponse`. On any failure, returns an error response instead of
/// propagating (§4.5 step 5, §3).
fn normalize_response(
    agent_id: &str,
    round_number: u32,
    raw_content: &str,
    candidate: Option<&Candidate>,
    allow_repair: bool,
    token_usage: crate::model::TokenUsage,
    latency_ms: u64,
) -> AgentResponse {
    let value = match parse_with_repair(raw_content, allow_repair) {
        RepairOutcome::Success(v) => v,
        RepairOutcome::Failure { reason, .. } => {
            return AgentResponse::error(agent_id, round_number, reason)
        }
    };

    let vote_str = value.get("vote").and_then(|v| v.as_str()).unwrap_or("abstain");
    let vote = match vote_str {
        "yes" => Vote::Yes,
        "no" => Vote::No,
        _ => Vote::Abstain,
    };
    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let reasoning_len = reasoning.trim().chars().count();
    if !(REASONING_MIN_CHARS..=REASONING_MAX_CHARS).contains(&reasoning_len) {
        return AgentResponse::error(
            agent_id,
            round_number,
            format!(
                "reasoning length {reasoning_len} outside {REASONING_MIN_CHARS}-{REASONING_MAX_CHARS} chars after trim"
            ),
        );
    }
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let (position_id_value, position_text) = match vote {
        Vote::Yes => {
            let Some(candidate) = candidate else {
                return AgentResponse::error(
                    agent_id,
                    round_number,
                    "vote=yes with no candidate to target",
                );
            };
            let target = value.get("targetPositionId").and_then(|v| v.as_str());
            if target != Some(candidate.position_id.as_str()) {
                return AgentResponse::error(
                    agent_id,
                    round_number,
                    "vote=yes targetPositionId does not match round candidate",
                );
            }
            (Some(candidate.position_id.clone()), candidate.position_text.clone())
        }
        Vote::No | Vote::Abstain => {
            let text = value
                .get("newPositionText")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if text.trim().is_empty() {
                (None, String::new())
            } else {
                let text_len = text.trim().chars().count();
                if !(POSITION_TEXT_MIN_CHARS..=POSITION_TEXT_MAX_CHARS).contains(&text_len) {
                    return AgentResponse::error(
                        agent_id,
                        round_number,
                        format!(
                            "position text length {text_len} outside {POSITION_TEXT_MIN_CHARS}-{POSITION_TEXT_MAX_CHARS} chars after trim"
                        ),
                    );
                }
                (Some(position_id(&text)), text)
            }
        }
    };

    AgentResponse {
        agent_id: agent_id.to_string(),
        round: round_number,
        position_id: position_id_value,
        position_text,
        reasoning,
        vote,
        confidence: confidence.clamp(0.0, 1.0),
        token_usage,
        latency_ms,
        status: ResponseStatus::Ok,
        error: None,
    }
}

/// Run one agent round: fan out to every participant bounded by
/// `concurrency.max_concurrent_requests`, aggregate into a `RoundResult`.
pub async fn run_agent_round(
    round_number: u32,
    candidate: Option<Candidate>,
    history: &[RoundResult],
    participants: &[Participant],
    adapters: &[Arc<dyn ModelAdapter>],
    config: &Config,
    concurrency: &ConcurrencyConfig,
    on_retry: Option<Arc<OnRetry<'static>>>,
) -> Result<RoundResult, RoundRunnerError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max_concurrent_requests.max(1)));
    let mut join_set: JoinSet<AgentResponse> = JoinSet::new();

    for (participant, adapter) in participants.iter().zip(adapters.iter()) {
        let participant = participant.clone();
        let adapter = Arc::clone(adapter);
        let semaphore = Arc::clone(&semaphore);
        let candidate = candidate.clone();
        let history = history.to_vec();
        let topic = config.topic.clone();
        let initial_query = config.initial_query.clone();
        let topology = config.context_topology;
        let max_context_tokens = config.limits.max_context_tokens;
        let max_tokens = config.limits.max_tokens_per_response;
        let timeout = Duration::from_millis(config.timeouts.model_ms);
        let deterministic = config.deterministic_mode;
        let retries = config.retries;
        let allow_repair = !deterministic;
        let on_retry = on_retry.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            let system_prompt = build_system_prompt(&participant, &topic, initial_query.as_deref());
            let user_prompt = build_user_prompt(
                &participant,
                round_number,
                candidate.as_ref(),
                &history,
                topology,
                max_context_tokens,
            );
            let request = AdapterRequest {
                system_prompt,
                user_prompt,
                max_tokens,
                temperature: if deterministic { 0.0 } else { participant.temperature },
                timeout,
                schema_hint: Some("AgentResponse".to_string()),
            };

            let started = std::time::Instant::now();
            let cb: Option<&OnRetry<'static>> = on_retry.as_deref();
            let outcome = with_retry(&retries, deterministic, cb, || {
                let adapter = Arc::clone(&adapter);
                let request = request.clone();
                async move { adapter.call(request).await }
            })
            .await;

            match outcome {
                Ok(response) => normalize_response(
                    &participant.id,
                    round_number,
                    &response.content,
                    candidate.as_ref(),
                    allow_repair,
                    response.token_usage,
                    started.elapsed().as_millis() as u64,
                ),
                Err(retry_err) => {
                    let err: AdapterError = retry_err.into_adapter_error();
                    AgentResponse::error(&participant.id, round_number, err.to_string())
                }
            }
        });
    }

    let mut responses = Vec::with_capacity(participants.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(response) => responses.push(response),
            Err(join_err) => {
                // A spawned task panicked; convert to an error response so the
                // round still completes with full cardinality (§4.5).
                responses.push(AgentResponse::error(
                    "unknown",
                    round_number,
                    format!("participant task panicked: {join_err}"),
                ));
            }
        }
    }
    responses.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

    let candidate_id_ref = candidate.as_ref().map(|c| c.position_id.as_str());
    let outcome = evaluate_agent_consensus(&responses, candidate_id_ref, config.consensus_threshold)?;

    let tally = VoteTally {
        yes: outcome.tally.yes,
        no: outcome.tally.no,
        abstain: outcome.tally.abstain,
        total: outcome.tally.total,
        eligible: outcome.tally.eligible,
        voting_total: outcome.tally.voting_total,
        supermajority_threshold: outcome.tally.supermajority_threshold,
        supermajority_reached: outcome.tally.supermajority_reached,
    };

    Ok(RoundResult {
        round_number,
        candidate_position_id: candidate.as_ref().map(|c| c.position_id.clone()),
        candidate_position_text: candidate.as_ref().map(|c| c.position_text.clone()),
        responses,
        consensus_reached: outcome.reached,
        consensus_position_id: outcome.position_id,
        consensus_position_text: outcome.position_text,
        vote_tally: tally,
        timestamp: chrono::Utc::now(),
    })
}

/// One surviving position presented to the judge panel.
#[derive(Debug, Clone)]
pub struct JudgedPosition {
    pub position_id: String,
    pub position_text: String,
}

fn build_judge_system_prompt(judge_id: &str, topic: &str) -> String {
    format!(
        "You are judge {judge_id} evaluating the surviving positions of a multi-agent debate.\n\
         Topic: {topic}\n\
         Respond with a JSON object: {{\"selectedPositionId\": string, \
         \"scoresByPositionId\": {{positionId: 0-100, ...}}, \"reasoning\": string, \
         \"confidence\": number between 0 and 1}}. Score every position listed below."
    )
}

fn build_judge_user_prompt(positions: &[JudgedPosition]) -> String {
    let mut out = String::from("Positions to evaluate:\n");
    for p in positions {
        out.push_str(&format!("- id: {} text: {}\n", p.position_id, p.position_text));
    }
    out
}

fn normalize_judge_evaluation(
    judge_id: &str,
    round_number: u32,
    raw_content: &str,
    positions: &[JudgedPosition],
    allow_repair: bool,
    token_usage: crate::model::TokenUsage,
    latency_ms: u64,
) -> JudgeEvaluation {
    let value = match parse_with_repair(raw_content, allow_repair) {
        RepairOutcome::Success(v) => v,
        RepairOutcome::Failure { reason, .. } => {
            return JudgeEvaluation::error(judge_id, round_number, reason)
        }
    };

    let selected = value
        .get("selectedPositionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let valid_ids: std::collections::HashSet<&str> =
        positions.iter().map(|p| p.position_id.as_str()).collect();
    if let Some(id) = &selected {
        if !valid_ids.contains(id.as_str()) {
            return JudgeEvaluation::error(
                judge_id,
                round_number,
                format!("selectedPositionId {id} is not among the presented positions"),
            );
        }
    }

    let mut scores = BTreeMap::new();
    if let Some(obj) = value.get("scoresByPositionId").and_then(|v| v.as_object()) {
        for (k, v) in obj {
            if let Some(score) = v.as_u64() {
                scores.insert(k.clone(), score.min(100) as u32);
            }
        }
    }
    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);

    JudgeEvaluation {
        judge_id: judge_id.to_string(),
        round: round_number,
        selected_position_id: selected,
        scores_by_position_id: scores,
        reasoning,
        confidence: confidence.clamp(0.0, 1.0),
        token_usage,
        latency_ms,
        status: ResponseStatus::Ok,
        error: None,
    }
}

/// Run one judge round over the fixed `positions` set (§4.7).
pub async fn run_judge_round(
    round_number: u32,
    positions: &[JudgedPosition],
    judges: &[Participant],
    adapters: &[Arc<dyn ModelAdapter>],
    config: &Config,
    concurrency: &ConcurrencyConfig,
    on_retry: Option<Arc<OnRetry<'static>>>,
) -> Result<JudgeRoundResult, RoundRunnerError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max_concurrent_requests.max(1)));
    let mut join_set: JoinSet<JudgeEvaluation> = JoinSet::new();

    for (judge, adapter) in judges.iter().zip(adapters.iter()) {
        let judge = judge.clone();
        let adapter = Arc::clone(adapter);
        let semaphore = Arc::clone(&semaphore);
        let positions = positions.to_vec();
        let topic = config.topic.clone();
        let max_tokens = config.limits.max_tokens_per_response;
        let timeout = Duration::from_millis(config.timeouts.model_ms);
        let deterministic = config.deterministic_mode;
        let retries = config.retries;
        let allow_repair = !deterministic;
        let on_retry = on_retry.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            let system_prompt = build_judge_system_prompt(&judge.id, &topic);
            let user_prompt = build_judge_user_prompt(&positions);
            let request = AdapterRequest {
                system_prompt,
                user_prompt,
                max_tokens,
                temperature: if deterministic { 0.0 } else { judge.temperature },
                timeout,
                schema_hint: Some("JudgeEvaluation".to_string()),
            };

            let started = std::time::Instant::now();
            let cb: Option<&OnRetry<'static>> = on_retry.as_deref();
            let outcome = with_retry(&retries, deterministic, cb, || {
                let adapter = Arc::clone(&adapter);
                let request = request.clone();
                async move { adapter.call(request).await }
            })
            .await;

            match outcome {
                Ok(response) => normalize_judge_evaluation(
                    &judge.id,
                    round_number,
                    &response.content,
                    &positions,
                    allow_repair,
                    response.token_usage,
                    started.elapsed().as_millis() as u64,
                ),
                Err(retry_err) => {
                    let err: AdapterError = retry_err.into_adapter_error();
                    JudgeEvaluation::error(&judge.id, round_number, err.to_string())
                }
            }
        });
    }

    let mut evaluations = Vec::with_capacity(judges.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(evaluation) => evaluations.push(evaluation),
            Err(join_err) => evaluations.push(JudgeEvaluation::error(
                "unknown",
                round_number,
                format!("judge task panicked: {join_err}"),
            )),
        }
    }
    evaluations.sort_by(|a, b| a.judge_id.cmp(&b.judge_id));

    let outcome = crate::consensus::evaluate_judge_consensus(
        &evaluations,
        config.judge_consensus_threshold,
        config.judge_min_confidence,
    );

    let consensus_position_text = outcome.winner_position_id.as_ref().and_then(|id| {
        positions
            .iter()
            .find(|p| &p.position_id == id)
            .map(|p| p.position_text.clone())
    });

    let dissents = outcome
        .dissents
        .iter()
        .filter_map(|judge_id| {
            evaluations.iter().find(|e| &e.judge_id == judge_id).map(|e| {
                crate::model::JudgeDissent {
                    judge_id: e.judge_id.clone(),
                    selected_position_id: e.selected_position_id.clone(),
                    confidence: e.confidence,
                }
            })
        })
        .collect();

    Ok(JudgeRoundResult {
        round_number,
        evaluations,
        consensus_reached: outcome.reached,
        consensus_position_id: outcome.winner_position_id,
        consensus_position_text,
        consensus_confidence: outcome.confidence,
        dissents,
        timestamp: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::config::{ConcurrencyConfig, ModelTransport, ParticipantConfig};

    fn participants(ids: &[&str]) -> Vec<Participant> {
        ids.iter()
            .map(|id| Participant {
                id: id.to_string(),
                system_prompt: None,
                temperature: 0.0,
            })
            .collect()
    }

    fn config() -> Config {
        let mut c = Config::default();
        c.topic = "Should we use Postgres?".to_string();
        c.deterministic_mode = true;
        c
    }

    fn mock_adapter(response: &str) -> Arc<dyn ModelAdapter> {
        Arc::new(MockAdapter::new("mock", "m1", vec![response.into()]))
    }

    #[tokio::test]
    async fn round_one_produces_abstain_positions_from_script() {
        let parts = participants(&["a1", "a2"]);
        let adapters = vec![
            mock_adapter(r#"{"vote":"abstain","newPositionText":"use postgres","reasoning":"r","confidence":0.8}"#),
            mock_adapter(r#"{"vote":"abstain","newPositionText":"use sqlite","reasoning":"r","confidence":0.6}"#),
        ];
        let cfg = config();
        let round = run_agent_round(
            1,
            None,
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses.len(), 2);
        assert!(round.responses.iter().all(|r| r.vote == Vote::Abstain));
        assert!(round.responses.iter().all(|r| r.position_id.is_some()));
    }

    #[tokio::test]
    async fn round_completes_with_full_cardinality_despite_one_failure() {
        let parts = participants(&["a1", "a2"]);
        let failing = Arc::new(MockAdapter::new(
            "mock",
            "m1",
            vec![crate::adapter::mock::ScriptedStep::Fail {
                retryable: true,
                cause: "boom".into(),
            }],
        ));
        let adapters: Vec<Arc<dyn ModelAdapter>> = vec![
            failing,
            mock_adapter(r#"{"vote":"abstain","newPositionText":"p","reasoning":"r","confidence":0.5}"#),
        ];
        let cfg = config();
        let round = run_agent_round(
            1,
            None,
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses.len(), 2);
        assert!(round.responses.iter().any(|r| r.status == ResponseStatus::Error));
    }

    #[tokio::test]
    async fn yes_vote_must_target_the_round_candidate() {
        let parts = participants(&["a1"]);
        let adapters = vec![mock_adapter(
            r#"{"vote":"yes","targetPositionId":"wrong-id","reasoning":"r","confidence":0.9}"#,
        )];
        let cfg = config();
        let candidate = Candidate {
            position_id: "real-id".to_string(),
            position_text: "use postgres".to_string(),
        };
        let round = run_agent_round(
            2,
            Some(candidate),
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses[0].status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn oversized_position_text_is_rejected() {
        let parts = participants(&["a1"]);
        let oversized = "a".repeat(POSITION_TEXT_MAX_CHARS + 1);
        let adapters = vec![mock_adapter(&format!(
            r#"{{"vote":"abstain","newPositionText":"{oversized}","reasoning":"r","confidence":0.5}}"#
        ))];
        let cfg = config();
        let round = run_agent_round(
            1,
            None,
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses[0].status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn oversized_reasoning_is_rejected() {
        let parts = participants(&["a1"]);
        let oversized = "a".repeat(REASONING_MAX_CHARS + 1);
        let adapters = vec![mock_adapter(&format!(
            r#"{{"vote":"abstain","newPositionText":"use postgres","reasoning":"{oversized}","confidence":0.5}}"#
        ))];
        let cfg = config();
        let round = run_agent_round(
            1,
            None,
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses[0].status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn empty_reasoning_is_rejected() {
        let parts = participants(&["a1"]);
        let adapters = vec![mock_adapter(
            r#"{"vote":"abstain","newPositionText":"use postgres","reasoning":"   ","confidence":0.5}"#,
        )];
        let cfg = config();
        let round = run_agent_round(
            1,
            None,
            &[],
            &parts,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.responses[0].status, ResponseStatus::Error);
    }

    #[test]
    fn truncation_preserves_head_and_tail() {
        let text = "a".repeat(1000);
        let truncated = truncate_with_marker(&text, 100);
        assert!(truncated.contains("[...truncated...]"));
        assert!(truncated.starts_with('a'));
        assert!(truncated.ends_with('a'));
    }

    #[test]
    fn summary_topology_collapses_to_one_line_per_response_within_200_chars() {
        let long_text = "x".repeat(500);
        let round = RoundResult {
            round_number: 1,
            candidate_position_id: None,
            candidate_position_text: None,
            responses: vec![AgentResponse {
                agent_id: "other".to_string(),
                round: 1,
                position_id: Some("p1".to_string()),
                position_text: long_text.clone(),
                reasoning: "r".to_string(),
                vote: Vote::Abstain,
                confidence: 0.5,
                token_usage: crate::model::TokenUsage::zero(),
                latency_ms: 0,
                status: ResponseStatus::Ok,
                error: None,
            }],
            consensus_reached: false,
            consensus_position_id: None,
            consensus_position_text: None,
            vote_tally: VoteTally {
                yes: 0,
                no: 0,
                abstain: 1,
                total: 1,
                eligible: 1,
                voting_total: 0,
                supermajority_threshold: 0,
                supermajority_reached: false,
            },
            timestamp: chrono::Utc::now(),
        };
        let summary = render_summary(std::slice::from_ref(&round), "self");
        for line in summary.lines() {
            assert!(line.chars().count() <= 200);
        }
    }

    #[tokio::test]
    async fn judge_round_selects_among_presented_positions() {
        let judges = participants(&["j1", "j2", "j3"]);
        let positions = vec![
            JudgedPosition {
                position_id: "pa".to_string(),
                position_text: "use postgres".to_string(),
            },
            JudgedPosition {
                position_id: "pb".to_string(),
                position_text: "use sqlite".to_string(),
            },
        ];
        let adapters: Vec<Arc<dyn ModelAdapter>> = vec![
            mock_adapter(r#"{"selectedPositionId":"pa","scoresByPositionId":{"pa":90,"pb":40},"reasoning":"r","confidence":0.9}"#),
            mock_adapter(r#"{"selectedPositionId":"pa","scoresByPositionId":{"pa":85,"pb":50},"reasoning":"r","confidence":0.8}"#),
            mock_adapter(r#"{"selectedPositionId":"pb","scoresByPositionId":{"pa":40,"pb":90},"reasoning":"r","confidence":0.7}"#),
        ];
        let cfg = config();
        let round = run_judge_round(
            1,
            &positions,
            &judges,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.evaluations.len(), 3);
        assert!(round.consensus_reached);
        assert_eq!(round.consensus_position_id.as_deref(), Some("pa"));
        assert_eq!(round.dissents.len(), 1);
    }

    #[tokio::test]
    async fn judge_selecting_unpresented_position_is_an_error_response() {
        let judges = participants(&["j1"]);
        let positions = vec![JudgedPosition {
            position_id: "pa".to_string(),
            position_text: "use postgres".to_string(),
        }];
        let adapters: Vec<Arc<dyn ModelAdapter>> = vec![mock_adapter(
            r#"{"selectedPositionId":"does-not-exist","scoresByPositionId":{},"reasoning":"r","confidence":0.9}"#,
        )];
        let cfg = config();
        let round = run_judge_round(
            1,
            &positions,
            &judges,
            &adapters,
            &cfg,
            &ConcurrencyConfig::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(round.evaluations[0].status, ResponseStatus::Error);
    }

    #[test]
    fn participant_config_smoke() {
        let _ = ParticipantConfig {
            id: "a1".to_string(),
            provider: "mock".to_string(),
            model: "m1".to_string(),
            transport: ModelTransport::Mock { script: vec![] },
            system_prompt: None,
            temperature: 0.7,
        };
    }
}
