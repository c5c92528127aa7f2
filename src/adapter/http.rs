//! HTTP JSON adapter for hosted chat-completion style providers.
//!
//! Builds a provider-shaped JSON body, posts it, and maps transport and
//! response failures onto the classified [`AdapterError`] set.

use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};

use super::{AdapterError, AdapterRequest, AdapterResponse, ModelAdapter};
use crate::model::TokenUsage;

/// Approximate characters per token, used when a provider omits usage
/// accounting from its response body.
const CHARS_PER_TOKEN_ESTIMATE: usize = 4;

pub struct HttpAdapter {
    provider: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the adapter from an environment variable holding the API
    /// key; a missing variable is a non-retryable construction failure
    /// (§4.1), not deferred to call time.
    pub fn from_env(
        provider: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        api_key_env: &str,
    ) -> Result<Self, AdapterError> {
        let provider = provider.into();
        let model = model.into();
        let key = std::env::var(api_key_env).map_err(|_| AdapterError::Construction {
            provider: provider.clone(),
            model: model.clone(),
            reason: format!("environment variable {api_key_env} is not set"),
        })?;
        Ok(Self::new(provider, model, endpoint, Some(key)))
    }

    fn estimate_tokens(text: &str) -> u64 {
        ((text.len() / CHARS_PER_TOKEN_ESTIMATE).max(1)) as u64
    }
}

#[async_trait]
impl ModelAdapter for HttpAdapter {
    async fn call(&self, req: AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        let started = Instant::now();
        let body = json!({
            "model": self.model,
            "system": req.system_prompt,
            "user": req.user_prompt,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        });

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .timeout(req.timeout)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AdapterError::RateLimit {
                provider: self.provider.clone(),
                model: self.model.clone(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(AdapterError::Model {
                provider: self.provider.clone(),
                model: self.model.clone(),
                retryable: status.is_server_error(),
                cause: format!("HTTP {status}"),
            });
        }

        let raw: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| AdapterError::Parse {
                    provider: self.provider.clone(),
                    model: self.model.clone(),
                    reason: e.to_string(),
                })?;

        let content = raw
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Parse {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: "response missing string field `content`".to_string(),
            })?
            .to_string();

        let (prompt, completion, estimated) = match raw.get("usage") {
            Some(usage) => {
                let prompt = usage.get("prompt_tokens").and_then(|v| v.as_u64());
                let completion = usage.get("completion_tokens").and_then(|v| v.as_u64());
                match (prompt, completion) {
                    (Some(p), Some(c)) => (p, c, false),
                    _ => (
                        Self::estimate_tokens(&req.system_prompt) + Self::estimate_tokens(&req.user_prompt),
                        Self::estimate_tokens(&content),
                        true,
                    ),
                }
            }
            None => (
                Self::estimate_tokens(&req.system_prompt) + Self::estimate_tokens(&req.user_prompt),
                Self::estimate_tokens(&content),
                true,
            ),
        };

        Ok(AdapterResponse {
            content,
            token_usage: TokenUsage {
                prompt,
                completion,
                total: prompt + completion,
                estimated,
            },
            latency_ms: started.elapsed().as_millis() as u64,
            raw_response: Some(raw.to_string()),
        })
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl HttpAdapter {
    fn classify_transport_error(&self, e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::Timeout {
                provider: self.provider.clone(),
                model: self.model.clone(),
                elapsed_ms: 0,
            }
        } else {
            AdapterError::Transport {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_fails_fast_on_missing_credential() {
        std::env::remove_var("DEBATE_ENGINE_TEST_MISSING_KEY");
        let err =
            HttpAdapter::from_env("openai", "gpt", "https://example.invalid", "DEBATE_ENGINE_TEST_MISSING_KEY")
                .unwrap_err();
        assert!(!err.retryable());
    }

    #[test]
    fn estimate_tokens_floors_at_one() {
        assert_eq!(HttpAdapter::estimate_tokens(""), 1);
        assert_eq!(HttpAdapter::estimate_tokens("abcd"), 1);
        assert_eq!(HttpAdapter::estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn provider_and_model_accessors() {
        let adapter = HttpAdapter::new("openai", "gpt-4", "https://example.invalid", None);
        assert_eq!(adapter.provider(), "openai");
        assert_eq!(adapter.model(), "gpt-4");
    }
}
