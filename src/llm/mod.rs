pub mod context;
pub mod groq;
pub mod ollama;
pub mod prompts;
pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::config::LlmConfig;
use crate::error::Result;

pub use context::{GenerationParams, InvokeRequest};
pub use groq::GroqEngine;
pub use ollama::OllamaEngine;
pub use registry::{AvailableModels, ProviderRegistry};

/// The two kinds of model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Locally hosted runtime (Ollama).
    Local,
    /// Remote API (Groq).
    Hosted,
}

impl Provider {
    /// Key used on the wire and in `provider:model` labels.
    pub fn key(self) -> &'static str {
        match self {
            Provider::Local => "ollama",
            Provider::Hosted => "groq",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(Provider::Local),
            "groq" | "hosted" => Ok(Provider::Hosted),
            other => Err(format!("unknown provider \"{other}\"")),
        }
    }
}

// -- Backend trait ----------------------------------------------------------

/// Trait that every model provider implements.
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Human-readable name, used as the prefix of error results
    /// (e.g. "Ollama", "Groq").
    fn name(&self) -> &str;

    fn provider(&self) -> Provider;

    /// Model ids that can be invoked right now.  Must not fail: an
    /// unreachable or unconfigured provider reports an empty list.
    async fn available_models(&self) -> Vec<String>;

    /// Send the prompt (and optional prior-turn context) and return the raw,
    /// unprocessed model output.
    async fn invoke(&self, req: &InvokeRequest<'_>) -> Result<String>;
}

#[async_trait::async_trait]
impl LlmBackend for OllamaEngine {
    fn name(&self) -> &str {
        "Ollama"
    }
    fn provider(&self) -> Provider {
        Provider::Local
    }
    async fn available_models(&self) -> Vec<String> {
        OllamaEngine::available_models(self).await
    }
    async fn invoke(&self, req: &InvokeRequest<'_>) -> Result<String> {
        OllamaEngine::invoke(self, req).await
    }
}

#[async_trait::async_trait]
impl LlmBackend for GroqEngine {
    fn name(&self) -> &str {
        "Groq"
    }
    fn provider(&self) -> Provider {
        Provider::Hosted
    }
    async fn available_models(&self) -> Vec<String> {
        GroqEngine::available_models(self)
    }
    async fn invoke(&self, req: &InvokeRequest<'_>) -> Result<String> {
        GroqEngine::invoke(self, req).await
    }
}

/// Build the registry with both built-in providers.
///
/// The hosted provider is always registered; without a key it reports no
/// models and answers every invocation with the not-configured message.
pub fn build_registry(config: &LlmConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(OllamaEngine::new(config)?));
    registry.register(Arc::new(GroqEngine::new(config)?));
    Ok(registry)
}
