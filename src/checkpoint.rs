//! Checkpoint file format (§6.2): a single JSON document written after
//! every round, with canonical-JSON SHA-256 (and optional HMAC) integrity.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::{canonical_hmac_sha256_hex, canonical_sha256_hex};
use crate::config::Config;
use crate::model::{JudgeRoundResult, RoundResult};
use crate::state::DebatePhase;
use crate::SPEC_VERSION;

/// Environment variable holding the checkpoint HMAC secret, if configured.
pub const HMAC_KEY_ENV: &str = "DEBATE_CHECKPOINT_HMAC_KEY";

/// The two digests recorded alongside a checkpoint (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    pub sha256: String,
    pub hmac: Option<String>,
}

/// Checkpoint contents, everything needed to resume a session (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: String,
    pub engine_version: String,
    pub session_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub phase: DebatePhase,
    pub config: Config,
    pub config_hash: String,
    pub agent_rounds: Vec<RoundResult>,
    pub judge_rounds: Vec<JudgeRoundResult>,
    pub integrity: Integrity,
}

/// A checkpoint as it exists before integrity fields are computed, used to
/// derive the canonical bytes that get hashed.
#[derive(Serialize)]
struct CheckpointSansIntegrity<'a> {
    version: &'a str,
    engine_version: &'a str,
    session_id: Uuid,
    timestamp: chrono::DateTime<chrono::Utc>,
    phase: DebatePhase,
    config: &'a Config,
    config_hash: &'a str,
    agent_rounds: &'a [RoundResult],
    judge_rounds: &'a [JudgeRoundResult],
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to read/write checkpoint file: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
    #[error("checkpoint integrity check failed: recomputed SHA-256 does not match stored digest")]
    IntegrityMismatch,
    #[error("checkpoint HMAC verification failed")]
    HmacMismatch,
}

/// Build a signed checkpoint for `session_id` at `phase`, computing the
/// config hash and integrity digest (and HMAC, if `DEBATE_CHECKPOINT_HMAC_KEY`
/// is set) over the canonical encoding of everything but the `integrity`
/// field itself.
pub fn build_checkpoint(
    session_id: Uuid,
    phase: DebatePhase,
    config: &Config,
    agent_rounds: &[RoundResult],
    judge_rounds: &[JudgeRoundResult],
    engine_version: &str,
) -> Result<Checkpoint, CheckpointError> {
    let config_hash = canonical_sha256_hex(config)?;
    let sans = CheckpointSansIntegrity {
        version: SPEC_VERSION,
        engine_version,
        session_id,
        timestamp: chrono::Utc::now(),
        phase,
        config,
        config_hash: &config_hash,
        agent_rounds,
        judge_rounds,
    };
    let sha256 = canonical_sha256_hex(&sans)?;
    let hmac = match std::env::var(HMAC_KEY_ENV) {
        Ok(key) if !key.is_empty() => Some(canonical_hmac_sha256_hex(&sha256, key.as_bytes())?),
        _ => None,
    };

    Ok(Checkpoint {
        version: SPEC_VERSION.to_string(),
        engine_version: engine_version.to_string(),
        session_id,
        timestamp: sans.timestamp,
        phase,
        config: config.clone(),
        config_hash,
        agent_rounds: agent_rounds.to_vec(),
        judge_rounds: judge_rounds.to_vec(),
        integrity: Integrity { sha256, hmac },
    })
}

/// Serialize a checkpoint to pretty JSON.
pub fn to_json(checkpoint: &Checkpoint) -> Result<String, CheckpointError> {
    Ok(serde_json::to_string_pretty(checkpoint)?)
}

/// Deserialize and fully verify a checkpoint (§6.2 "Verification on
/// load"): schema, version, SHA-256, and (if available) HMAC.
pub fn from_json(raw: &str) -> Result<Checkpoint, CheckpointError> {
    let checkpoint: Checkpoint = serde_json::from_str(raw)?;
    verify(&checkpoint)?;
    Ok(checkpoint)
}

fn verify(checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    if checkpoint.version != SPEC_VERSION {
        return Err(CheckpointError::VersionMismatch {
            expected: SPEC_VERSION.to_string(),
            actual: checkpoint.version.clone(),
        });
    }

    let sans = CheckpointSansIntegrity {
        version: &checkpoint.version,
        engine_version: &checkpoint.engine_version,
        session_id: checkpoint.session_id,
        timestamp: checkpoint.timestamp,
        phase: checkpoint.phase,
        config: &checkpoint.config,
        config_hash: &checkpoint.config_hash,
        agent_rounds: &checkpoint.agent_rounds,
        judge_rounds: &checkpoint.judge_rounds,
    };
    let recomputed_sha256 = canonical_sha256_hex(&sans)?;
    if recomputed_sha256 != checkpoint.integrity.sha256 {
        return Err(CheckpointError::IntegrityMismatch);
    }

    if let (Ok(key), Some(stored_hmac)) = (std::env::var(HMAC_KEY_ENV), &checkpoint.integrity.hmac) {
        if !key.is_empty() {
            let recomputed_hmac = canonical_hmac_sha256_hex(&checkpoint.integrity.sha256, key.as_bytes())?;
            if &recomputed_hmac != stored_hmac {
                return Err(CheckpointError::HmacMismatch);
            }
        }
    }

    Ok(())
}

/// The checkpoint file path for a session: `<dir>/<sessionId>.checkpoint.json`.
pub fn checkpoint_path(dir: &Path, session_id: Uuid) -> PathBuf {
    dir.join(format!("{session_id}.checkpoint.json"))
}

/// Write `checkpoint` to its canonical path under `dir`, overwriting any
/// prior checkpoint for the same session.
pub async fn save(dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = checkpoint_path(dir, checkpoint.session_id);
    let json = to_json(checkpoint)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Load and verify the checkpoint for `session_id` under `dir`.
pub async fn load(dir: &Path, session_id: Uuid) -> Result<Checkpoint, CheckpointError> {
    let path = checkpoint_path(dir, session_id);
    let raw = tokio::fs::read_to_string(&path).await?;
    from_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test_free::with_env_lock;

    mod serial_test_free {
        use std::sync::Mutex;
        static LOCK: Mutex<()> = Mutex::new(());

        pub fn with_env_lock<F: FnOnce()>(f: F) {
            let _guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
            f();
        }
    }

    fn config() -> Config {
        let mut c = Config::default();
        c.topic = "topic".to_string();
        c
    }

    #[test]
    fn round_trip_without_hmac_verifies() {
        with_env_lock(|| {
            std::env::remove_var(HMAC_KEY_ENV);
            let checkpoint = build_checkpoint(
                Uuid::now_v7(),
                DebatePhase::AgentDebate,
                &config(),
                &[],
                &[],
                "0.1.0",
            )
            .unwrap();
            assert!(checkpoint.integrity.hmac.is_none());
            let json = to_json(&checkpoint).unwrap();
            let loaded = from_json(&json).unwrap();
            assert_eq!(loaded.session_id, checkpoint.session_id);
        });
    }

    #[test]
    fn round_trip_with_hmac_verifies() {
        with_env_lock(|| {
            std::env::set_var(HMAC_KEY_ENV, "test-secret");
            let checkpoint = build_checkpoint(
                Uuid::now_v7(),
                DebatePhase::AgentDebate,
                &config(),
                &[],
                &[],
                "0.1.0",
            )
            .unwrap();
            assert!(checkpoint.integrity.hmac.is_some());
            let json = to_json(&checkpoint).unwrap();
            let loaded = from_json(&json).unwrap();
            assert_eq!(loaded.integrity, checkpoint.integrity);
            std::env::remove_var(HMAC_KEY_ENV);
        });
    }

    #[test]
    fn tampered_checkpoint_fails_integrity_check() {
        with_env_lock(|| {
            std::env::remove_var(HMAC_KEY_ENV);
            let checkpoint = build_checkpoint(
                Uuid::now_v7(),
                DebatePhase::AgentDebate,
                &config(),
                &[],
                &[],
                "0.1.0",
            )
            .unwrap();
            let mut json = to_json(&checkpoint).unwrap();
            json = json.replace(&checkpoint.session_id.to_string(), &Uuid::now_v7().to_string());
            let err = from_json(&json).unwrap_err();
            assert!(matches!(err, CheckpointError::IntegrityMismatch));
        });
    }

    #[test]
    fn version_mismatch_is_fatal() {
        with_env_lock(|| {
            std::env::remove_var(HMAC_KEY_ENV);
            let mut checkpoint = build_checkpoint(
                Uuid::now_v7(),
                DebatePhase::AgentDebate,
                &config(),
                &[],
                &[],
                "0.1.0",
            )
            .unwrap();
            checkpoint.version = "9.9.9".to_string();
            let json = to_json(&checkpoint).unwrap();
            let err = from_json(&json).unwrap_err();
            assert!(matches!(err, CheckpointError::VersionMismatch { .. }));
        });
    }

    #[test]
    fn wrong_hmac_key_fails_verification() {
        with_env_lock(|| {
            std::env::set_var(HMAC_KEY_ENV, "key-a");
            let checkpoint = build_checkpoint(
                Uuid::now_v7(),
                DebatePhase::AgentDebate,
                &config(),
                &[],
                &[],
                "0.1.0",
            )
            .unwrap();
            let json = to_json(&checkpoint).unwrap();
            std::env::set_var(HMAC_KEY_ENV, "key-b");
            let err = from_json(&json).unwrap_err();
            assert!(matches!(err, CheckpointError::HmacMismatch));
            std::env::remove_var(HMAC_KEY_ENV);
        });
    }

    #[tokio::test]
    async fn save_and_load_round_trip_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::remove_var(HMAC_KEY_ENV);
        let checkpoint = build_checkpoint(
            Uuid::now_v7(),
            DebatePhase::AgentDebate,
            &config(),
            &[],
            &[],
            "0.1.0",
        )
        .unwrap();
        save(tmp.path(), &checkpoint).await.unwrap();
        let loaded = load(tmp.path(), checkpoint.session_id).await.unwrap();
        assert_eq!(loaded.session_id, checkpoint.session_id);
    }

    #[test]
    fn checkpoint_path_uses_session_id_filename() {
        let id = Uuid::now_v7();
        let path = checkpoint_path(Path::new("/tmp/checkpoints"), id);
        assert_eq!(
            path,
            PathBuf::from(format!("/tmp/checkpoints/{id}.checkpoint.json"))
        );
    }
}
