//! CLI subprocess adapter — invokes a local model binary directly, never
//! through a shell, with validated arguments and bounded stdin/stdout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{AdapterError, AdapterRequest, AdapterResponse, ModelAdapter};
use crate::model::TokenUsage;
use crate::shell_safety::validate_arg;

/// Hard caps enforced streaming (§5): an overflowing child is killed
/// immediately rather than allowed to keep producing output.
const MAX_STDIN_BYTES: usize = 2 * 1024 * 1024;
const MAX_STDOUT_BYTES: usize = 10 * 1024 * 1024;

pub struct CliAdapter {
    provider: String,
    model: String,
    binary_path: PathBuf,
}

impl CliAdapter {
    /// Validate the binary path exists and is a file before constructing
    /// the adapter — a missing binary is a non-retryable construction
    /// failure (§4.1), not something discovered at call time.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        binary_path: impl Into<PathBuf>,
    ) -> Result<Self, AdapterError> {
        let provider = provider.into();
        let model = model.into();
        let binary_path = binary_path.into();
        if !binary_path.is_file() {
            return Err(AdapterError::Construction {
                provider,
                model,
                reason: format!("CLI binary not found at {}", binary_path.display()),
            });
        }
        Ok(Self {
            provider,
            model,
            binary_path,
        })
    }

    fn path_str(&self) -> String {
        self.binary_path.display().to_string()
    }
}

/// Read at most `limit` bytes from `reader`, killing `child` and returning
/// `None` the instant the bound is crossed.
async fn read_bounded(
    mut reader: impl AsyncReadExt + Unpin,
    limit: usize,
    child: &mut tokio::process::Child,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > limit {
            let _ = child.kill().await;
            return Ok(None);
        }
    }
    Ok(Some(buf))
}

#[async_trait]
impl ModelAdapter for CliAdapter {
    async fn call(&self, req: AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        validate_arg(&req.system_prompt).map_err(|e| AdapterError::Transport {
            provider: self.provider.clone(),
            model: self.model.clone(),
            reason: format!("unsafe system prompt: {e}"),
        })?;

        let started = Instant::now();
        let stdin_payload = serde_json::json!({
            "system": req.system_prompt,
            "user": req.user_prompt,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        })
        .to_string();

        if stdin_payload.len() > MAX_STDIN_BYTES {
            return Err(AdapterError::Transport {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: format!(
                    "request payload ({} bytes) exceeds {} byte stdin cap",
                    stdin_payload.len(),
                    MAX_STDIN_BYTES
                ),
            });
        }

        let mut child = Command::new(&self.binary_path)
            .arg("--json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::Transport {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: format!("failed to spawn {}: {e}", self.path_str()),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_payload.as_bytes())
                .await
                .map_err(|e| AdapterError::Transport {
                    provider: self.provider.clone(),
                    model: self.model.clone(),
                    reason: format!("failed writing to child stdin: {e}"),
                })?;
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let timeout_result = tokio::time::timeout(
            req.timeout,
            read_bounded(stdout, MAX_STDOUT_BYTES, &mut child),
        )
        .await;

        let read_result = match timeout_result {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                return Err(AdapterError::Timeout {
                    provider: self.provider.clone(),
                    model: self.model.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let bytes = read_result
            .map_err(|e| AdapterError::Transport {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: format!("failed reading child stdout: {e}"),
            })?
            .ok_or_else(|| AdapterError::Transport {
                provider: self.provider.clone(),
                model: self.model.clone(),
                reason: format!(
                    "child stdout exceeded {} byte cap; process killed",
                    MAX_STDOUT_BYTES
                ),
            })?;

        let _ = child.wait().await;

        let content = String::from_utf8(bytes).map_err(|e| AdapterError::Parse {
            provider: self.provider.clone(),
            model: self.model.clone(),
            reason: format!("child stdout was not valid UTF-8: {e}"),
        })?;

        let approx = (content.len() as u64 / 4).max(1);
        Ok(AdapterResponse {
            content,
            token_usage: TokenUsage {
                prompt: (stdin_payload.len() as u64 / 4).max(1),
                completion: approx,
                total: (stdin_payload.len() as u64 / 4).max(1) + approx,
                estimated: true,
            },
            latency_ms: started.elapsed().as_millis() as u64,
            raw_response: None,
        })
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Deny known-unsafe paths up front, matching the metacharacter-denylist
/// spirit of the shell-safety module even though `Command::new` never
/// invokes a shell.
pub fn validate_binary_path(path: &Path) -> Result<(), String> {
    let s = path.to_string_lossy();
    validate_arg(&s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_fails_for_missing_binary() {
        let err = CliAdapter::new("local", "llama", "/no/such/binary-xyz").unwrap_err();
        assert!(!err.retryable());
    }

    #[test]
    fn validate_binary_path_rejects_injection_characters() {
        assert!(validate_binary_path(Path::new("/usr/bin/model; rm -rf /")).is_err());
    }

    #[test]
    fn validate_binary_path_accepts_plain_path() {
        assert!(validate_binary_path(Path::new("/usr/bin/model")).is_ok());
    }

    #[tokio::test]
    async fn construction_succeeds_for_existing_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let adapter = CliAdapter::new("local", "m1", tmp.path()).unwrap();
        assert_eq!(adapter.provider(), "local");
    }
}
