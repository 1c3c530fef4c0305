use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{QueryChakraError, Result};
use crate::llm::context::{GenerationParams, InvokeRequest};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Message returned, without a network call, when no API key is configured.
pub const NOT_CONFIGURED: &str = "Groq API key not configured.";

/// Hosted provider backed by the Groq API.
///
/// Groq exposes an OpenAI-compatible chat completions endpoint.  A single
/// non-streaming request is issued per invocation.
///
/// Configuration priority (highest → lowest):
///   1. Environment variables (`GROQ_API_KEY`, `GROQ_BASE_URL`)
///   2. `[llm]` section of `config.toml`
///   3. Built-in defaults
pub struct GroqEngine {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    models: Vec<String>,
    params: GenerationParams,
}

// -- OpenAI-compatible request/response types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    stop: &'a [String],
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl GroqEngine {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                if config.groq_api_key.is_empty() {
                    None
                } else {
                    Some(config.groq_api_key.clone())
                }
            });

        let base_url = std::env::var("GROQ_BASE_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .or_else(|| {
                if config.groq_base_url.is_empty() {
                    None
                } else {
                    Some(config.groq_base_url.clone())
                }
            })
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self::with_credentials(config, &base_url, api_key)
    }

    /// Build an engine with explicit endpoint and credential, ignoring the
    /// environment.
    pub fn with_credentials(
        config: &LlmConfig,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QueryChakraError::Config(format!("failed to create HTTP client: {e}")))?;

        if api_key.is_some() {
            info!(
                base_url = %base_url,
                models = ?config.groq_models,
                max_tokens = config.max_tokens,
                temperature = config.temperature,
                "Groq engine initialized"
            );
        } else {
            info!("GROQ_API_KEY not set, hosted provider disabled");
        }

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            models: config.groq_models.clone(),
            params: GenerationParams::from(config),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// The static catalog when a key is configured, otherwise nothing.
    pub fn available_models(&self) -> Vec<String> {
        if self.is_configured() {
            self.models.clone()
        } else {
            Vec::new()
        }
    }

    pub async fn invoke(&self, req: &InvokeRequest<'_>) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(QueryChakraError::ProviderUnauthorized(NOT_CONFIGURED.into()));
        };

        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(context) = req.system_context() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(context.to_string()),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(req.prompt.to_string()),
        });

        let body = ChatRequest {
            model: req.model,
            messages,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            max_tokens: self.params.max_tokens,
            stop: &self.params.stop,
        };

        debug!(
            model = %req.model,
            prompt_len = req.prompt.len(),
            max_tokens = self.params.max_tokens,
            "invoking Groq API"
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryChakraError::ProviderTransport(format!("Groq request failed: {e}")))?;

        let status = resp.status();

        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            let error_msg = if let Ok(err_resp) = serde_json::from_str::<ErrorResponse>(&error_text)
            {
                err_resp
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| error_text.clone())
            } else {
                error_text
            };

            warn!(status = %status, error = %error_msg, "Groq API error");

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    QueryChakraError::ProviderUnauthorized(format!(
                        "Groq API rejected the credential ({status}): {error_msg}"
                    ))
                }
                _ => QueryChakraError::ProviderTransport(format!(
                    "Groq API returned {status}: {error_msg}"
                )),
            });
        }

        let chat_resp: ChatResponse = resp.json().await.map_err(|e| {
            QueryChakraError::ProviderTransport(format!("failed to parse Groq response: {e}"))
        })?;

        if let Some(ref usage) = chat_resp.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Groq usage"
            );
        }

        let response = chat_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        info!(
            response_len = response.len(),
            model = %req.model,
            "Groq response received"
        );

        if response.trim().is_empty() {
            return Err(QueryChakraError::ProviderTransport(
                "Groq returned empty response".into(),
            ));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request() -> InvokeRequest<'static> {
        InvokeRequest {
            prompt: "[INST] count customers [/INST]",
            context: None,
            model: "llama-3.1-8b-instant",
        }
    }

    #[test]
    fn no_key_means_no_models() {
        let engine =
            GroqEngine::with_credentials(&LlmConfig::default(), DEFAULT_BASE_URL, None).unwrap();
        assert!(!engine.is_configured());
        assert!(engine.available_models().is_empty());
    }

    #[test]
    fn key_exposes_static_catalog() {
        let engine = GroqEngine::with_credentials(
            &LlmConfig::default(),
            DEFAULT_BASE_URL,
            Some("gsk_test".into()),
        )
        .unwrap();
        assert_eq!(engine.available_models().len(), 3);
    }

    #[tokio::test]
    async fn invoke_without_key_short_circuits() {
        // Unroutable base URL: any network attempt would fail differently.
        let engine =
            GroqEngine::with_credentials(&LlmConfig::default(), "http://127.0.0.1:1", None)
                .unwrap();
        let err = engine.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, QueryChakraError::ProviderUnauthorized(_)));
        assert_eq!(err.to_string(), NOT_CONFIGURED);
    }

    #[tokio::test]
    async fn invoke_posts_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer gsk_test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "llama-3.1-8b-instant",
                "max_tokens": 1024,
                "stop": ["[INST]", "[/INST]"],
                "messages": [
                    { "role": "system", "content": "User: a\nSQL: SELECT 1" },
                    { "role": "user", "content": "[INST] count customers [/INST]" }
                ]
            })))
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"```sql\nSELECT COUNT(*) FROM Customers\n```"}}],
                    "usage":{"prompt_tokens":10,"completion_tokens":8,"total_tokens":18}}"#,
            )
            .create_async()
            .await;

        let engine = GroqEngine::with_credentials(
            &LlmConfig::default(),
            &server.url(),
            Some("gsk_test".into()),
        )
        .unwrap();
        let req = InvokeRequest {
            context: Some("User: a\nSQL: SELECT 1"),
            ..request()
        };
        let text = engine.invoke(&req).await.unwrap();
        assert_eq!(text, "```sql\nSELECT COUNT(*) FROM Customers\n```");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_key_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Invalid API Key"}}"#)
            .create_async()
            .await;

        let engine = GroqEngine::with_credentials(
            &LlmConfig::default(),
            &server.url(),
            Some("bad".into()),
        )
        .unwrap();
        let err = engine.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, QueryChakraError::ProviderUnauthorized(_)));
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[tokio::test]
    async fn server_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("upstream overloaded")
            .create_async()
            .await;

        let engine = GroqEngine::with_credentials(
            &LlmConfig::default(),
            &server.url(),
            Some("gsk_test".into()),
        )
        .unwrap();
        let err = engine.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, QueryChakraError::ProviderTransport(_)));
        assert!(err.to_string().contains("upstream overloaded"));
    }
}
