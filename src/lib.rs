//! Multi-agent LLM debate orchestration.
//!
//! A debate session runs a fixed panel of model-backed agents through bounded
//! rounds of argument and voting until a supermajority of agents converge on
//! one position (§4.4.1), or — failing that — hands the surviving positions
//! to an independent judge panel for arbitration (§4.4.3). Every round is
//! checkpointed so a killed or crashed session can resume without re-running
//! already-settled rounds.
//!
//! # Layout
//!
//! - [`config`] — the `Config` document and its validation rules.
//! - [`adapter`] — the `ModelAdapter` trait and its HTTP/CLI/mock transports.
//! - [`retry`] — the stateless exponential-backoff Retry Wrapper.
//! - [`repair`] — best-effort JSON repair for near-miss model output.
//! - [`consensus`] — agent and judge consensus/candidate-selection math.
//! - [`round_runner`] — bounded concurrent fan-out/fan-in for one round.
//! - [`state`] — the `DebateSession` state machine and its phase transitions.
//! - [`checkpoint`] — signed, resumable on-disk session snapshots.
//! - [`orchestrator`] — the top-level `run`/`resume` entry points.
//!
//! # Example
//!
//! ```no_run
//! use debate_engine::{orchestrator, Config};
//!
//! # async fn go() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let output = orchestrator::run(config).await?;
//! println!("exit code: {}", output.outcome().exit_code());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod adapter;
pub mod canonical;
pub mod checkpoint;
pub mod config;
pub mod consensus;
pub mod error;
pub mod id;
pub mod model;
pub mod orchestrator;
pub mod repair;
pub mod retry;
pub mod round_runner;
pub mod shell_safety;
pub mod state;

/// The document-format version written into `DebateOutput.version` and every
/// checkpoint (§6.1, §6.2). Bumped whenever either on-disk shape changes in
/// a way that isn't backward compatible; checkpoints from another version
/// are rejected rather than guessed at (§6.2 "Verification on load").
pub const SPEC_VERSION: &str = "1.0.0";

pub use adapter::{AdapterError, AdapterRegistry, AdapterRequest, AdapterResponse, ModelAdapter};
pub use config::{Config, ConfigError, ParticipantConfig};
pub use error::EngineError;
pub use orchestrator::{DebateOutcome, DebateOutput};
pub use state::{DebatePhase, DebateSession};
