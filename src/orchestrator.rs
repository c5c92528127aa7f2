//! Orchestrator (§4.7): the top-level two-phase control loop.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapter::{AdapterError, AdapterRegistry, ModelAdapter};
use crate::checkpoint::{self, Checkpoint};
use crate::config::{Config, ModelTransport, ParticipantConfig};
use crate::consensus::select_candidate;
use crate::error::EngineError;
use crate::model::{FinalVerdict, VerdictSource};
use crate::retry::OnRetry;
use crate::round_runner::{self, Candidate, JudgedPosition, Participant};
use crate::state::{DebatePhase, DebateSession};

/// Build a retry-counting callback for one round: every retried call taps
/// the returned counter, which the caller folds into the session's
/// `totalRetries` once the round finishes (§4.6).
fn retry_counter() -> (Arc<AtomicU64>, Arc<OnRetry<'static>>) {
    let count = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&count);
    let cb: Arc<OnRetry<'static>> = Arc::new(move |_attempt, _err, _delay| {
        counted.fetch_add(1, Ordering::Relaxed);
    });
    (count, cb)
}

/// Bumped only on a breaking change to the checkpoint/output wire format.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The session's exit disposition, exposed as data rather than a process
/// side effect (§6.5) — a binary consumer maps this onto `std::process::exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateOutcome {
    ConsensusReached,
    Deadlock,
    Fatal,
}

impl DebateOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConsensusReached => 0,
            Self::Deadlock => 2,
            Self::Fatal => 1,
        }
    }
}

/// `agentDebate` section of the output document (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDebateSection {
    pub rounds: Vec<crate::model::RoundResult>,
    pub final_position_id: Option<String>,
    pub final_position_text: Option<String>,
}

/// Final judge panel summary inside `judgePanel` (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgePanelFinal {
    pub consensus_position_id: Option<String>,
    pub consensus_position_text: Option<String>,
    pub consensus_confidence: f64,
    pub dissents: Vec<crate::model::JudgeDissent>,
}

/// `judgePanel` section of the output document (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgePanelSection {
    pub enabled: bool,
    pub rounds: Vec<crate::model::JudgeRoundResult>,
    pub r#final: Option<JudgePanelFinal>,
}

/// `session` section of the output document (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSection {
    pub id: Uuid,
    pub topic: String,
    pub initial_query: Option<String>,
    pub phase: DebatePhase,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub pricing_known: bool,
    pub engine_version: String,
    pub total_retries: u64,
    pub total_errors: u64,
}

/// The primary output document (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateOutput {
    pub version: String,
    pub session: SessionSection,
    pub agent_debate: AgentDebateSection,
    pub judge_panel: JudgePanelSection,
    pub final_verdict: Option<FinalVerdict>,
}

impl DebateOutput {
    /// The §6.5 exit disposition for this document.
    pub fn outcome(&self) -> DebateOutcome {
        match self.final_verdict.as_ref().map(|v| v.source) {
            Some(VerdictSource::AgentConsensus) | Some(VerdictSource::JudgeConsensus) => {
                DebateOutcome::ConsensusReached
            }
            Some(VerdictSource::Deadlock) => DebateOutcome::Deadlock,
            None => DebateOutcome::Fatal,
        }
    }
}

async fn build_adapter(
    registry: &AdapterRegistry,
    participant: &ParticipantConfig,
) -> Result<Arc<dyn ModelAdapter>, AdapterError> {
    let endpoint_or_path = match &participant.transport {
        ModelTransport::Http { endpoint, .. } => endpoint.clone(),
        ModelTransport::Cli { binary_path } => binary_path.clone(),
        ModelTransport::Mock { .. } => "mock".to_string(),
    };
    let provider = participant.provider.clone();
    let model = participant.model.clone();
    registry
        .get_or_build(&provider, &model, &endpoint_or_path, || {
            let adapter: Arc<dyn ModelAdapter> = match &participant.transport {
                ModelTransport::Http { endpoint, api_key_env } => {
                    let api_key = match api_key_env {
                        Some(env_var) => Some(std::env::var(env_var).map_err(|_| {
                            AdapterError::Construction {
                                provider: provider.clone(),
                                model: model.clone(),
                                reason: format!("environment variable {env_var} is not set"),
                            }
                        })?),
                        None => None,
                    };
                    Arc::new(crate::adapter::http::HttpAdapter::new(
                        provider.clone(),
                        model.clone(),
                        endpoint.clone(),
                        api_key,
                    )) as Arc<dyn ModelAdapter>
                }
                ModelTransport::Cli { binary_path } => Arc::new(crate::adapter::cli::CliAdapter::new(
                    provider.clone(),
                    model.clone(),
                    binary_path.clone(),
                )?) as Arc<dyn ModelAdapter>,
                ModelTransport::Mock { script } => Arc::new(crate::adapter::mock::MockAdapter::new(
                    provider.clone(),
                    model.clone(),
                    script.iter().map(|s| s.as_str().into()).collect(),
                )) as Arc<dyn ModelAdapter>,
            };
            Ok(adapter)
        })
        .await
}

fn to_participant(p: &ParticipantConfig) -> Participant {
    Participant {
        id: p.id.clone(),
        system_prompt: p.system_prompt.clone(),
        temperature: p.temperature,
    }
}

/// Collect the positions set from the agent rounds per `judgePositionsScope`
/// (§6.3), preserving first-seen text per position ID.
fn collect_positions(session: &DebateSession) -> Vec<JudgedPosition> {
    use crate::config::JudgePositionsScope;
    use std::collections::BTreeMap;

    let rounds: Vec<&crate::model::RoundResult> = match session.config.judge_positions_scope {
        JudgePositionsScope::AllRounds => session.agent_rounds.iter().collect(),
        JudgePositionsScope::LastRound => session.agent_rounds.last().into_iter().collect(),
    };

    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for round in rounds {
        for r in &round.responses {
            if let Some(id) = &r.position_id {
                seen.entry(id.clone()).or_insert_with(|| r.position_text.clone());
            }
        }
    }
    seen.into_iter()
        .map(|(position_id, position_text)| JudgedPosition {
            position_id,
            position_text,
        })
        .collect()
}

/// Best-by-SupportScore position from the last round, for deadlock verdicts.
fn best_position_from_last_round(session: &DebateSession) -> Option<Candidate> {
    let last = session.agent_rounds.last()?;
    let candidate = select_candidate(&last.responses)?;
    Some(Candidate {
        position_id: candidate.position_id,
        position_text: candidate.position_text,
    })
}

/// Drive a fresh debate session to completion (§4.7).
pub async fn run(config: Config) -> Result<DebateOutput, EngineError> {
    config.validate()?;
    let session_timeout_ms = config.timeouts.session_ms;
    let mut session = DebateSession::new(config, ENGINE_VERSION);
    tokio::time::timeout(Duration::from_millis(session_timeout_ms), drive(&mut session))
        .await
        .map_err(|_| EngineError::SessionTimeout(session_timeout_ms))??;
    Ok(assemble_output(&session))
}

/// Resume a session from its checkpoint and drive it to completion.
pub async fn resume(checkpoint_dir: &Path, session_id: Uuid) -> Result<DebateOutput, EngineError> {
    let loaded: Checkpoint = checkpoint::load(checkpoint_dir, session_id).await?;
    let session_timeout_ms = loaded.config.timeouts.session_ms;
    let mut session = DebateSession {
        id: loaded.session_id,
        topic: loaded.config.topic.clone(),
        initial_query: loaded.config.initial_query.clone(),
        phase: loaded.phase,
        config: loaded.config.clone(),
        agent_rounds: loaded.agent_rounds,
        judge_rounds: loaded.judge_rounds,
        final_verdict: None,
        metadata: crate::state::SessionMetadata {
            engine_version: loaded.engine_version,
            started_at: loaded.timestamp,
            completed_at: None,
            total_tokens: 0,
            total_cost_usd: 0.0,
            pricing_known: false,
            checkpoint_path: Some(checkpoint::checkpoint_path(checkpoint_dir, session_id).display().to_string()),
            total_retries: 0,
            total_errors: 0,
        },
        transitions: Vec::new(),
    };
    tokio::time::timeout(Duration::from_millis(session_timeout_ms), drive(&mut session))
        .await
        .map_err(|_| EngineError::SessionTimeout(session_timeout_ms))??;
    Ok(assemble_output(&session))
}

async fn drive(session: &mut DebateSession) -> Result<(), EngineError> {
    if session.phase == DebatePhase::Init {
        session.transition(DebatePhase::AgentDebate, "initialized")?;
    }

    let registry = AdapterRegistry::new();
    let agent_participants: Vec<Participant> = session.config.agents.iter().map(to_participant).collect();
    let mut agent_adapters = Vec::with_capacity(session.config.agents.len());
    for p in &session.config.agents {
        agent_adapters.push(build_adapter(&registry, p).await?);
    }

    if session.phase == DebatePhase::AgentDebate {
        run_agent_phase(session, &agent_participants, &agent_adapters).await?;
    }

    if session.phase == DebatePhase::JudgeEvaluation {
        let judge_participants: Vec<Participant> = session.config.judges.iter().map(to_participant).collect();
        let mut judge_adapters = Vec::with_capacity(session.config.judges.len());
        for p in &session.config.judges {
            judge_adapters.push(build_adapter(&registry, p).await?);
        }
        run_judge_phase(session, &judge_participants, &judge_adapters).await?;
    }

    Ok(())
}

async fn run_agent_phase(
    session: &mut DebateSession,
    participants: &[Participant],
    adapters: &[Arc<dyn ModelAdapter>],
) -> Result<(), EngineError> {
    loop {
        let next_round = session.current_agent_round() + 1;
        if next_round > session.config.max_agent_rounds {
            break;
        }

        let candidate = if next_round == 1 {
            None
        } else {
            session
                .agent_rounds
                .last()
                .and_then(|r| select_candidate(&r.responses))
                .map(|c| Candidate {
                    position_id: c.position_id,
                    position_text: c.position_text,
                })
        };

        let round_timeout = Duration::from_millis(session.config.timeouts.round_ms);
        let span = info_span!("agent_round", session_id = %session.id, round = next_round);
        let (retries, on_retry) = retry_counter();
        let round = tokio::time::timeout(
            round_timeout,
            round_runner::run_agent_round(
                next_round,
                candidate,
                &session.agent_rounds,
                participants,
                adapters,
                &session.config,
                &session.config.concurrency,
                Some(on_retry),
            )
            .instrument(span),
        )
        .await
        .map_err(|_| EngineError::RoundTimeout(session.config.timeouts.round_ms))??;
        session.record_retry(retries.load(Ordering::Relaxed));

        info!(round = next_round, consensus = round.consensus_reached, "agent round complete");

        let reached = round.consensus_reached;
        let (winning_id, winning_text, mean_confidence) = if reached {
            let yes_confidences: Vec<f64> = round
                .responses
                .iter()
                .filter(|r| r.vote == crate::model::Vote::Yes && r.position_id == round.consensus_position_id)
                .map(|r| r.confidence)
                .collect();
            let mean = if yes_confidences.is_empty() {
                debug_assert!(false, "consensus reached with zero yes voters");
                0.0
            } else {
                yes_confidences.iter().sum::<f64>() / yes_confidences.len() as f64
            };
            (
                round.consensus_position_id.clone(),
                round.consensus_position_text.clone(),
                mean,
            )
        } else {
            (None, None, 0.0)
        };

        session.record_agent_round(round)?;
        persist_checkpoint(session).await?;

        if reached {
            session.set_final_verdict(FinalVerdict {
                position_id: winning_id,
                position_text: winning_text,
                confidence: mean_confidence,
                source: VerdictSource::AgentConsensus,
            })?;
            session.transition(DebatePhase::ConsensusReached, "agent consensus reached")?;
            return Ok(());
        }
    }

    let positions = collect_positions(session);
    let judges_ok = session.config.judge_panel_enabled
        && positions.len() >= 2
        && session.config.judges.len() >= 3;

    if judges_ok {
        session.transition(DebatePhase::JudgeEvaluation, "agent rounds exhausted without consensus")?;
    } else {
        let deadlock_candidate = best_position_from_last_round(session);
        session.transition(DebatePhase::Deadlock, "agent rounds exhausted, judge panel unavailable")?;
        session.set_final_verdict(FinalVerdict {
            position_id: deadlock_candidate.as_ref().map(|c| c.position_id.clone()),
            position_text: deadlock_candidate.as_ref().map(|c| c.position_text.clone()),
            confidence: 0.0,
            source: VerdictSource::Deadlock,
        })?;
        warn!(session_id = %session.id, "debate reached deadlock after agent phase");
    }

    Ok(())
}

async fn run_judge_phase(
    session: &mut DebateSession,
    judges: &[Participant],
    adapters: &[Arc<dyn ModelAdapter>],
) -> Result<(), EngineError> {
    let positions = collect_positions(session);

    loop {
        let next_round = session.current_judge_round() + 1;
        if next_round > session.config.max_judge_rounds {
            break;
        }

        let round_timeout = Duration::from_millis(session.config.timeouts.round_ms);
        let span = info_span!("judge_round", session_id = %session.id, round = next_round);
        let (retries, on_retry) = retry_counter();
        let round = tokio::time::timeout(
            round_timeout,
            round_runner::run_judge_round(
                next_round,
                &positions,
                judges,
                adapters,
                &session.config,
                &session.config.concurrency,
                Some(on_retry),
            )
            .instrument(span),
        )
        .await
        .map_err(|_| EngineError::RoundTimeout(session.config.timeouts.round_ms))??;
        session.record_retry(retries.load(Ordering::Relaxed));

        debug!(round = next_round, reached = round.consensus_reached, "judge round complete");

        let reached = round.consensus_reached;
        let (winning_id, winning_text, confidence) = (
            round.consensus_position_id.clone(),
            round.consensus_position_text.clone(),
            round.consensus_confidence,
        );

        session.record_judge_round(round);
        persist_checkpoint(session).await?;

        if reached {
            session.set_final_verdict(FinalVerdict {
                position_id: winning_id,
                position_text: winning_text,
                confidence,
                source: VerdictSource::JudgeConsensus,
            })?;
            session.transition(DebatePhase::ConsensusReached, "judge consensus reached")?;
            return Ok(());
        }
    }

    let last = session
        .judge_rounds
        .last()
        .expect("judge phase always runs at least one round");
    let (winning_id, winning_text, confidence) = (
        last.consensus_position_id.clone(),
        last.consensus_position_text.clone(),
        last.consensus_confidence,
    );
    session.transition(DebatePhase::Deadlock, "judge rounds exhausted without consensus")?;
    session.set_final_verdict(FinalVerdict {
        position_id: winning_id,
        position_text: winning_text,
        confidence,
        source: VerdictSource::Deadlock,
    })?;
    warn!(session_id = %session.id, "debate reached deadlock after judge phase");
    Ok(())
}

async fn persist_checkpoint(session: &mut DebateSession) -> Result<(), EngineError> {
    let Some(dir) = session.config.checkpoint_dir.clone() else {
        return Ok(());
    };
    let checkpoint = checkpoint::build_checkpoint(
        session.id,
        session.phase,
        &session.config,
        &session.agent_rounds,
        &session.judge_rounds,
        &session.metadata.engine_version,
    )?;
    let path = checkpoint::save(Path::new(&dir), &checkpoint).await?;
    session.metadata.checkpoint_path = Some(path.display().to_string());
    debug!(path = %path.display(), "checkpoint written");
    Ok(())
}

fn assemble_output(session: &DebateSession) -> DebateOutput {
    let judge_final = session.judge_rounds.last().map(|r| JudgePanelFinal {
        consensus_position_id: r.consensus_position_id.clone(),
        consensus_position_text: r.consensus_position_text.clone(),
        consensus_confidence: r.consensus_confidence,
        dissents: r.dissents.clone(),
    });

    DebateOutput {
        version: crate::SPEC_VERSION.to_string(),
        session: SessionSection {
            id: session.id,
            topic: session.topic.clone(),
            initial_query: session.initial_query.clone(),
            phase: session.phase,
            started_at: session.metadata.started_at,
            completed_at: session.metadata.completed_at,
            total_tokens: session.metadata.total_tokens,
            total_cost_usd: session.metadata.total_cost_usd,
            pricing_known: session.metadata.pricing_known,
            engine_version: session.metadata.engine_version.clone(),
            total_retries: session.metadata.total_retries,
            total_errors: session.metadata.total_errors,
        },
        agent_debate: AgentDebateSection {
            rounds: session.agent_rounds.clone(),
            final_position_id: session.final_verdict.as_ref().and_then(|v| v.position_id.clone()),
            final_position_text: session.final_verdict.as_ref().and_then(|v| v.position_text.clone()),
        },
        judge_panel: JudgePanelSection {
            enabled: session.config.judge_panel_enabled,
            rounds: session.judge_rounds.clone(),
            r#final: judge_final,
        },
        final_verdict: session.final_verdict.clone(),
    }
}
