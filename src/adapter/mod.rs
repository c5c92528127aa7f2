//! The model-adapter contract (§6.4) and the process-wide Adapter Registry
//! (§4.1).
//!
//! A [`ModelAdapter`] is the single seam between the engine and an external
//! model provider, dispatched through `async_trait` so the round runner can
//! hold a homogeneous `Arc<dyn ModelAdapter>` per participant regardless of
//! transport.

pub mod cli;
pub mod http;
pub mod mock;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::TokenUsage;

/// A single call to a model: the two prompts plus the knobs that shape the
/// response and its budget.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub timeout: Duration,
    /// Hint describing the expected output shape, passed through verbatim —
    /// adapters never interpret prompt content (§6.4).
    pub schema_hint: Option<String>,
}

/// What an adapter returns on success.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub content: String,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub raw_response: Option<String>,
}

/// Classified adapter failure (§4.1, §6.4). The Retry Wrapper inspects only
/// `retryable()`/the rate-limit hint — never the message text.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("model error ({provider}/{model}): {cause}")]
    Model {
        provider: String,
        model: String,
        retryable: bool,
        cause: String,
    },
    #[error("model call to {provider}/{model} timed out after {elapsed_ms}ms")]
    Timeout {
        provider: String,
        model: String,
        elapsed_ms: u64,
    },
    #[error("model {provider}/{model} rate-limited{}", retry_after_suffix(.retry_after))]
    RateLimit {
        provider: String,
        model: String,
        retry_after: Option<Duration>,
    },
    #[error("could not parse response from {provider}/{model}: {reason}")]
    Parse {
        provider: String,
        model: String,
        reason: String,
    },
    #[error("response from {provider}/{model} failed schema validation: {reason}")]
    Schema {
        provider: String,
        model: String,
        reason: String,
    },
    #[error("transport error contacting {provider}/{model}: {reason}")]
    Transport {
        provider: String,
        model: String,
        reason: String,
    },
    #[error("adapter construction failed for {provider}/{model}: {reason}")]
    Construction {
        provider: String,
        model: String,
        reason: String,
    },
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

impl AdapterError {
    /// Whether the Retry Wrapper may re-attempt this call.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Model { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::RateLimit { .. } => true,
            Self::Parse { .. } => true,
            Self::Schema { .. } => true,
            Self::Transport { .. } => true,
            Self::Construction { .. } => false,
        }
    }

    /// The rate-limit hint, if any (§4.2: raises the retry delay to at
    /// least this value).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Model { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Parse { provider, .. }
            | Self::Schema { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Construction { provider, .. } => provider,
        }
    }
}

/// A single provider/model endpoint, polymorphic over transport (§6.4).
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn call(&self, req: AdapterRequest) -> Result<AdapterResponse, AdapterError>;
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

/// Process-wide cache of constructed adapters, keyed by
/// `(provider, model, endpoint-or-cli-path)` (§4.1).
///
/// Construction is the only path that needs exclusion; once an adapter is
/// inserted, reads never race a writer, so lookups after the first `insert`
/// are effectively lock-free reads of an already-populated map.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn ModelAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(provider: &str, model: &str, endpoint_or_path: &str) -> String {
        format!("{provider}\u{0}{model}\u{0}{endpoint_or_path}")
    }

    /// Fetch a cached adapter, or construct and cache it via `build` on a
    /// miss. Construction failures are non-retryable `AdapterError`s and are
    /// not cached, so a later call can retry with corrected credentials.
    pub async fn get_or_build<F>(
        &self,
        provider: &str,
        model: &str,
        endpoint_or_path: &str,
        build: F,
    ) -> Result<Arc<dyn ModelAdapter>, AdapterError>
    where
        F: FnOnce() -> Result<Arc<dyn ModelAdapter>, AdapterError>,
    {
        let key = Self::cache_key(provider, model, endpoint_or_path);
        if let Some(existing) = self.adapters.read().await.get(&key) {
            return Ok(existing.clone());
        }
        let mut guard = self.adapters.write().await;
        if let Some(existing) = guard.get(&key) {
            return Ok(existing.clone());
        }
        let adapter = build()?;
        guard.insert(key, adapter.clone());
        Ok(adapter)
    }

    pub async fn len(&self) -> usize {
        self.adapters.read().await.len()
    }
}
