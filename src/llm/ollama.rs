use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{QueryChakraError, Result};
use crate::llm::context::{GenerationParams, InvokeRequest};
use crate::llm::registry::{model_is_installed, resolve_installed};

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Local provider backed by an Ollama instance.
///
/// Chat goes through the streaming endpoint (`POST /api/chat` with
/// `stream: true`); installed models are listed with `GET /api/tags`.
///
/// Configuration priority (highest -> lowest):
///   1. `OLLAMA_HOST` environment variable
///   2. `[llm]` section of `config.toml`
///   3. Built-in default
pub struct OllamaEngine {
    client: Client,
    base_url: String,
    models: Vec<String>,
    params: GenerationParams,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Serialize)]
struct ChatOptions<'a> {
    temperature: f32,
    top_p: f32,
    stop: &'a [String],
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// One NDJSON line of a streamed chat response.
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl OllamaEngine {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = std::env::var("OLLAMA_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                if config.ollama_host.is_empty() {
                    None
                } else {
                    Some(config.ollama_host.clone())
                }
            })
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());

        Self::with_base_url(config, &base_url)
    }

    /// Build an engine against an explicit server URL, ignoring `OLLAMA_HOST`.
    pub fn with_base_url(config: &LlmConfig, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| QueryChakraError::Config(format!("failed to create HTTP client: {e}")))?;

        info!(
            base_url = %base_url,
            models = ?config.ollama_models,
            temperature = config.temperature,
            top_p = config.top_p,
            "Ollama engine initialized"
        );

        Ok(Self {
            client,
            base_url,
            models: config.ollama_models.clone(),
            params: GenerationParams::from(config),
        })
    }

    /// Names of the models installed on the Ollama server.
    pub async fn installed_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QueryChakraError::ProviderUnreachable(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(QueryChakraError::ProviderTransport(format!(
                "Ollama tags endpoint returned {status}"
            )));
        }

        let tags: TagsResponse = resp.json().await.map_err(|e| {
            QueryChakraError::ProviderTransport(format!("failed to parse Ollama model list: {e}"))
        })?;

        Ok(tags
            .models
            .into_iter()
            .filter_map(|m| m.name.or(m.model))
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Configured models for which a model of the same family is installed.
    /// Any failure to enumerate yields an empty list.
    pub async fn available_models(&self) -> Vec<String> {
        let installed = match self.installed_models().await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(base_url = %self.base_url, "Ollama not available: {e}");
                return Vec::new();
            }
        };

        debug!(installed = ?installed, "Ollama installed models");

        self.models
            .iter()
            .filter(|configured| model_is_installed(configured, &installed))
            .cloned()
            .collect()
    }

    /// Installed name to use in place of `configured`, when the exact tag
    /// is missing but a model of the same family is installed.
    async fn installed_substitute(&self, configured: &str) -> Option<String> {
        let installed = self.installed_models().await.ok()?;
        resolve_installed(configured, &installed)
            .filter(|name| *name != configured)
            .map(str::to_string)
    }

    async fn send_chat(&self, req: &InvokeRequest<'_>, model: &str) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(context) = req.system_context() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: context.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: req.prompt.to_string(),
        });

        let body = ChatRequest {
            model,
            messages,
            stream: true,
            options: ChatOptions {
                temperature: self.params.temperature,
                top_p: self.params.top_p,
                stop: &self.params.stop,
            },
        };

        debug!(
            model = %model,
            prompt_len = req.prompt.len(),
            has_context = req.system_context().is_some(),
            "invoking Ollama chat stream"
        );

        self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                QueryChakraError::ProviderUnreachable(format!(
                    "cannot connect to Ollama at {}: {e}",
                    self.base_url
                ))
            } else {
                QueryChakraError::ProviderTransport(format!("Ollama request failed: {e}"))
            }
        })
    }

    pub async fn invoke(&self, req: &InvokeRequest<'_>) -> Result<String> {
        let mut resp = self.send_chat(req, req.model).await?;

        // Listed models are family matches, so the exact tag may be missing.
        if resp.status() == StatusCode::NOT_FOUND {
            if let Some(substitute) = self.installed_substitute(req.model).await {
                info!(
                    configured = %req.model,
                    installed = %substitute,
                    "model tag not installed, using installed variant"
                );
                resp = self.send_chat(req, &substitute).await?;
            }
        }

        let status = resp.status();

        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Ollama API error");
            return Err(if status == StatusCode::NOT_FOUND {
                QueryChakraError::ProviderUnreachable(format!(
                    "model \"{}\" is not available: {error_text}",
                    req.model
                ))
            } else {
                QueryChakraError::ProviderTransport(format!(
                    "Ollama API returned {status}: {error_text}"
                ))
            });
        }

        let mut stream = resp.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut response = String::new();
        let mut done = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                QueryChakraError::ProviderTransport(format!("Ollama stream interrupted: {e}"))
            })?;
            pending.extend_from_slice(&chunk);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                done |= fold_stream_line(&line, &mut response)?;
            }
        }
        if !pending.is_empty() {
            done |= fold_stream_line(&pending, &mut response)?;
        }

        if !done {
            debug!(model = %req.model, "Ollama stream ended without a done marker");
        }

        info!(
            response_len = response.len(),
            model = %req.model,
            "Ollama response received"
        );

        if response.trim().is_empty() {
            return Err(QueryChakraError::ProviderTransport(
                "Ollama returned empty response".into(),
            ));
        }

        Ok(response)
    }
}

/// Append the content of one streamed NDJSON line to `out`.
///
/// Returns `true` when the line carries the final `done` marker.  Blank
/// lines are ignored; an `error` object aborts the stream.
fn fold_stream_line(line: &[u8], out: &mut String) -> Result<bool> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }

    let chunk: ChatChunk = serde_json::from_str(text).map_err(|e| {
        QueryChakraError::ProviderTransport(format!("malformed Ollama stream chunk: {e}"))
    })?;

    if let Some(error) = chunk.error {
        return Err(QueryChakraError::ProviderTransport(format!(
            "Ollama reported: {error}"
        )));
    }

    if let Some(message) = chunk.message {
        out.push_str(&message.content);
    }

    if chunk.done {
        if let (Some(eval_count), Some(eval_duration)) = (chunk.eval_count, chunk.eval_duration) {
            let tok_per_sec = if eval_duration > 0 {
                (eval_count as f64 / eval_duration as f64) * 1_000_000_000.0
            } else {
                0.0
            };
            debug!(
                eval_tokens = eval_count,
                tok_per_sec = format!("{tok_per_sec:.1}"),
                "Ollama usage"
            );
        }
    }

    Ok(chunk.done)
}
