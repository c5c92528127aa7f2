//! Wire-shape fixtures for the output document and checkpoint formats
//! (§6.1, §6.2): these pin the exact on-disk JSON shape so a serialization
//! regression shows up as a diff here rather than downstream in a consumer.

use debate_engine::config::{Config, ModelTransport, ParticipantConfig};
use debate_engine::id::position_id;
use debate_engine::orchestrator;

fn participant(id: &str, script: Vec<String>) -> ParticipantConfig {
    ParticipantConfig {
        id: id.to_string(),
        provider: "mock".to_string(),
        model: "m1".to_string(),
        transport: ModelTransport::Mock { script },
        system_prompt: None,
        temperature: 0.0,
    }
}

fn proposal(text: &str, confidence: f64) -> String {
    format!(
        r#"{{"vote":"abstain","newPositionText":"{text}","reasoning":"r","confidence":{confidence}}}"#
    )
}

fn yes(target: &str) -> String {
    format!(r#"{{"vote":"yes","targetPositionId":"{target}","reasoning":"r","confidence":0.9}}"#)
}

async fn single_round_consensus() -> debate_engine::DebateOutput {
    let p1 = position_id("ship it");
    let mut config = Config {
        topic: "Ship the release?".to_string(),
        deterministic_mode: true,
        ..Config::default()
    };
    config.agents = vec![
        participant("a1", vec![proposal("ship it", 0.9), yes(&p1)]),
        participant("a2", vec![proposal("hold back", 0.5), yes(&p1)]),
        participant("a3", vec![proposal("ship it", 0.8), yes(&p1)]),
    ];
    config.judges = vec![];
    config.judge_panel_enabled = false;
    config.max_agent_rounds = 2;
    orchestrator::run(config).await.unwrap()
}

#[tokio::test]
async fn output_document_uses_camel_case_wire_shape() {
    let output = single_round_consensus().await;
    let json = serde_json::to_value(&output).unwrap();

    assert!(json.get("version").is_some());
    let session = json.get("session").expect("session section present");
    assert!(session.get("totalTokens").is_some());
    assert!(session.get("totalRetries").is_some());
    assert!(session.get("totalErrors").is_some());
    assert!(session.get("startedAt").is_some());

    let agent_debate = json.get("agentDebate").expect("agentDebate section present");
    assert!(agent_debate.get("finalPositionId").is_some());

    let judge_panel = json.get("judgePanel").expect("judgePanel section present");
    assert_eq!(judge_panel.get("enabled").unwrap(), false);
    assert!(judge_panel.get("rounds").unwrap().as_array().unwrap().is_empty());

    let verdict = json.get("finalVerdict").expect("finalVerdict present");
    assert_eq!(verdict.get("source").unwrap(), "agent_consensus");
}

#[tokio::test]
async fn output_document_round_trips_through_json() {
    let output = single_round_consensus().await;
    let json = serde_json::to_string(&output).unwrap();
    let restored: debate_engine::DebateOutput = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.session.id, output.session.id);
    assert_eq!(restored.final_verdict.unwrap().position_id, output.final_verdict.unwrap().position_id);
    assert_eq!(restored.agent_debate.rounds.len(), output.agent_debate.rounds.len());
}

#[tokio::test]
async fn repeated_runs_of_the_same_script_produce_the_same_verdict() {
    let first = single_round_consensus().await;
    let second = single_round_consensus().await;

    assert_eq!(
        first.final_verdict.as_ref().unwrap().position_id,
        second.final_verdict.as_ref().unwrap().position_id
    );
    assert_eq!(first.agent_debate.rounds.len(), second.agent_debate.rounds.len());
    assert_eq!(first.outcome().exit_code(), second.outcome().exit_code());
}

#[test]
fn checkpoint_shape_carries_integrity_digest_alongside_config() {
    use debate_engine::checkpoint;
    use debate_engine::state::DebatePhase;

    let mut config = Config::default();
    config.topic = "t".to_string();
    let checkpoint = checkpoint::build_checkpoint(
        uuid::Uuid::now_v7(),
        DebatePhase::AgentDebate,
        &config,
        &[],
        &[],
        "0.1.0",
    )
    .unwrap();
    let json = serde_json::to_value(&checkpoint).unwrap();

    assert!(json.get("configHash").is_some());
    let integrity = json.get("integrity").expect("integrity present");
    assert!(integrity.get("sha256").unwrap().as_str().unwrap().len() == 64);
    assert!(integrity.get("hmac").unwrap().is_null());
}
