//! Configuration surface (§6.3): a typed, schema-validated record describing
//! one debate run.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context rendering strategy for round ≥2 prompts (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextTopology {
    FullHistory,
    LastRound,
    LastRoundWithSelf,
    Summary,
}

impl Default for ContextTopology {
    fn default() -> Self {
        Self::LastRoundWithSelf
    }
}

/// Source set of positions the judge panel votes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JudgePositionsScope {
    AllRounds,
    LastRound,
}

impl Default for JudgePositionsScope {
    fn default() -> Self {
        Self::AllRounds
    }
}

/// Which adapter family a model config resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelTransport {
    Http {
        endpoint: String,
        api_key_env: Option<String>,
    },
    Cli {
        binary_path: String,
    },
    Mock {
        /// Canned responses consumed in order, one per call.
        script: Vec<String>,
    },
}

/// One debate participant's model configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub transport: ModelTransport,
    pub system_prompt: Option<String>,
    #[serde(default = "default_agent_temperature")]
    pub temperature: f64,
}

fn default_agent_temperature() -> f64 {
    0.7
}

fn default_judge_temperature() -> f64 {
    0.3
}

/// Timeout budget for adapter calls, rounds, and the whole session (§5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    pub model_ms: u64,
    pub round_ms: u64,
    pub session_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model_ms: 30_000,
            round_ms: 120_000,
            session_ms: 1_800_000,
        }
    }
}

/// Retry Wrapper policy (§4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 15_000,
        }
    }
}

/// Round Runner concurrency bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyConfig {
    pub max_concurrent_requests: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
        }
    }
}

/// Resource ceilings enforced across the session (§5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_tokens_per_response: u64,
    pub max_total_tokens: u64,
    pub max_total_cost_usd: f64,
    pub max_context_tokens: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tokens_per_response: 4_096,
            max_total_tokens: 2_000_000,
            max_total_cost_usd: 50.0,
            max_context_tokens: 8_000,
        }
    }
}

/// Top-level, schema-validated configuration for one debate run (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub topic: String,
    pub initial_query: Option<String>,
    pub agents: Vec<ParticipantConfig>,
    #[serde(default)]
    pub judges: Vec<ParticipantConfig>,
    #[serde(default = "default_true")]
    pub judge_panel_enabled: bool,
    #[serde(default = "default_max_agent_rounds")]
    pub max_agent_rounds: u32,
    #[serde(default = "default_max_judge_rounds")]
    pub max_judge_rounds: u32,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_judge_consensus_threshold")]
    pub judge_consensus_threshold: f64,
    #[serde(default = "default_judge_min_confidence")]
    pub judge_min_confidence: f64,
    #[serde(default)]
    pub judge_positions_scope: JudgePositionsScope,
    #[serde(default)]
    pub context_topology: ContextTopology,
    pub checkpoint_dir: Option<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub retries: RetryPolicy,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub deterministic_mode: bool,
    #[serde(default)]
    pub allow_external_paths: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_agent_rounds() -> u32 {
    5
}

fn default_max_judge_rounds() -> u32 {
    3
}

fn default_consensus_threshold() -> f64 {
    0.67
}

fn default_judge_consensus_threshold() -> f64 {
    0.6
}

fn default_judge_min_confidence() -> f64 {
    0.7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: String::new(),
            initial_query: None,
            agents: Vec::new(),
            judges: Vec::new(),
            judge_panel_enabled: default_true(),
            max_agent_rounds: default_max_agent_rounds(),
            max_judge_rounds: default_max_judge_rounds(),
            consensus_threshold: default_consensus_threshold(),
            judge_consensus_threshold: default_judge_consensus_threshold(),
            judge_min_confidence: default_judge_min_confidence(),
            judge_positions_scope: JudgePositionsScope::default(),
            context_topology: ContextTopology::default(),
            checkpoint_dir: None,
            timeouts: Timeouts::default(),
            retries: RetryPolicy::default(),
            concurrency: ConcurrencyConfig::default(),
            limits: Limits::default(),
            deterministic_mode: false,
            allow_external_paths: false,
        }
    }
}

/// Every way a `Config` can fail schema validation (§6.3). `validate()`
/// collects all of these rather than stopping at the first.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} schema violation(s): {1}")]
    Invalid(usize, String),
}

impl Config {
    /// Run every schema rule in §6.3, returning every violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.topic.trim().is_empty() {
            problems.push("topic must not be empty".to_string());
        }
        if !(2..=10).contains(&self.agents.len()) {
            problems.push(format!(
                "agents length must be in 2..=10, got {}",
                self.agents.len()
            ));
        }
        if self.judge_panel_enabled && self.judges.len() < 3 {
            problems.push(format!(
                "judgePanelEnabled requires at least 3 judges, got {}",
                self.judges.len()
            ));
        }
        if self.judges.len() > 15 {
            problems.push(format!(
                "judges length must be <= 15, got {}",
                self.judges.len()
            ));
        }
        if !(1..=10).contains(&self.max_agent_rounds) {
            problems.push(format!(
                "maxAgentRounds must be in 1..=10, got {}",
                self.max_agent_rounds
            ));
        }
        if !(1..=5).contains(&self.max_judge_rounds) {
            problems.push(format!(
                "maxJudgeRounds must be in 1..=5, got {}",
                self.max_judge_rounds
            ));
        }
        if !(0.5..=1.0).contains(&self.consensus_threshold) {
            problems.push(format!(
                "consensusThreshold must be in 0.5..=1.0, got {}",
                self.consensus_threshold
            ));
        }
        if !(0.5..=1.0).contains(&self.judge_consensus_threshold) {
            problems.push(format!(
                "judgeConsensusThreshold must be in 0.5..=1.0, got {}",
                self.judge_consensus_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.judge_min_confidence) {
            problems.push(format!(
                "judgeMinConfidence must be in 0..=1, got {}",
                self.judge_min_confidence
            ));
        }
        for agent in &self.agents {
            if !(0.0..=2.0).contains(&agent.temperature) {
                problems.push(format!(
                    "agent {} temperature must be in 0..=2, got {}",
                    agent.id, agent.temperature
                ));
            }
        }
        for judge in &self.judges {
            if !(0.0..=2.0).contains(&judge.temperature) {
                problems.push(format!(
                    "judge {} temperature must be in 0..=2, got {}",
                    judge.id, judge.temperature
                ));
            }
        }
        {
            let mut ids: Vec<&str> = self.agents.iter().map(|a| a.id.as_str()).collect();
            ids.sort_unstable();
            if ids.windows(2).any(|w| w[0] == w[1]) {
                problems.push("agent ids must be unique".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.len(), problems.join("; ")))
        }
    }

    /// Build a judge `ParticipantConfig` default temperature when a caller
    /// constructs judges programmatically rather than via deserialization.
    pub fn default_judge_temperature() -> f64 {
        default_judge_temperature()
    }
}
