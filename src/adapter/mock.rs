//! Deterministic mock adapter — no I/O.
//!
//! Used by the end-to-end scenario tests (§8) and as the production code
//! path under `deterministicMode`, not merely a test double: a hand-written
//! scripted type is simpler than mocking an async trait through a mocking
//! framework for a single-method contract.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{AdapterError, AdapterRequest, AdapterResponse, ModelAdapter};
use crate::model::TokenUsage;

/// One scripted step: either a canned response body or an injected error.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Respond(String),
    Fail { retryable: bool, cause: String },
}

impl From<&str> for ScriptedStep {
    fn from(content: &str) -> Self {
        Self::Respond(content.to_string())
    }
}

impl From<String> for ScriptedStep {
    fn from(content: String) -> Self {
        Self::Respond(content)
    }
}

/// Replays a fixed sequence of responses, one per call, then repeats the
/// last entry for any calls beyond the script's length.
pub struct MockAdapter {
    provider: String,
    model: String,
    script: Vec<ScriptedStep>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<AdapterRequest>>,
}

impl MockAdapter {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        script: Vec<ScriptedStep>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            script,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock adapter mutex poisoned").len()
    }
}

#[async_trait]
impl ModelAdapter for MockAdapter {
    async fn call(&self, req: AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        self.calls
            .lock()
            .expect("mock adapter mutex poisoned")
            .push(req.clone());

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(ScriptedStep::Respond(String::new()));

        match step {
            ScriptedStep::Respond(content) => {
                let approx_tokens = (content.len() as u64 / 4).max(1);
                Ok(AdapterResponse {
                    content,
                    token_usage: TokenUsage {
                        prompt: 0,
                        completion: approx_tokens,
                        total: approx_tokens,
                        estimated: true,
                    },
                    latency_ms: 0,
                    raw_response: None,
                })
            }
            ScriptedStep::Fail { retryable, cause } => Err(AdapterError::Model {
                provider: self.provider.clone(),
                model: self.model.clone(),
                retryable,
                cause,
            }),
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}
