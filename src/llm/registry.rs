use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::{LlmBackend, Provider};

/// Whether a configured model id counts as installed.
///
/// `gemma3:1b` matches any installed name containing its family token
/// (`gemma3`, the part before the first `:`), so `gemma3:4b` or
/// `gemma3:latest` qualify.  An installed name containing the whole
/// configured id also matches.
pub fn model_is_installed(configured: &str, installed: &[String]) -> bool {
    let family = configured.split(':').next().unwrap_or_default();

    installed.iter().any(|name| {
        (!family.is_empty() && name.contains(family)) || name.contains(configured)
    })
}

/// The installed name to invoke for a configured id: the exact name when
/// installed, else the first name containing the id, else the first name of
/// the same family.
pub fn resolve_installed<'a>(configured: &str, installed: &'a [String]) -> Option<&'a str> {
    let family = configured.split(':').next().unwrap_or_default();

    installed
        .iter()
        .find(|name| name.as_str() == configured)
        .or_else(|| installed.iter().find(|name| name.contains(configured)))
        .or_else(|| {
            installed
                .iter()
                .find(|name| !family.is_empty() && name.contains(family))
        })
        .map(String::as_str)
}

/// Usable model ids per provider, as shown in the model picker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvailableModels {
    #[serde(rename = "ollama")]
    pub local: Vec<String>,
    #[serde(rename = "groq")]
    pub hosted: Vec<String>,
}

/// Registry of the provider backends, keyed by provider.
pub struct ProviderRegistry {
    backends: HashMap<Provider, Arc<dyn LlmBackend>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend under the provider it reports.
    pub fn register(&mut self, backend: Arc<dyn LlmBackend>) {
        let provider = backend.provider();
        info!(provider = %provider, name = backend.name(), "LLM provider registered");
        self.backends.insert(provider, backend);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn LlmBackend>> {
        self.backends.get(&provider).cloned()
    }

    /// Query every backend for its usable models.
    ///
    /// Never fails: a backend that cannot be reached contributes an empty
    /// list.
    pub async fn available_models(&self) -> AvailableModels {
        let mut available = AvailableModels::default();

        if let Some(local) = self.get(Provider::Local) {
            available.local = local.available_models().await;
        }
        if let Some(hosted) = self.get(Provider::Hosted) {
            available.hosted = hosted.available_models().await;
        }

        debug!(local = ?available.local, hosted = ?available.hosted, "available models");
        available
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::InvokeRequest;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn family_token_matches_variant_tags() {
        assert!(model_is_installed("gemma3:1b", &names(&["gemma3:4b"])));
        assert!(model_is_installed("gemma3:1b", &names(&["gemma3:latest"])));
        assert!(model_is_installed("gemma3:1b", &names(&["library/gemma3:1b"])));
    }

    #[test]
    fn unrelated_family_does_not_match() {
        assert!(!model_is_installed("gemma3:1b", &names(&["llama3.1:8b", "qwen3:1.7b"])));
        assert!(!model_is_installed("sqlcoder:7b", &[]));
    }

    #[test]
    fn untagged_configured_id_matches_on_name() {
        assert!(model_is_installed("mistral", &names(&["mistral:7b-instruct"])));
    }

    #[test]
    fn empty_family_needs_full_match() {
        assert!(!model_is_installed(":latest", &names(&["gemma3:1b"])));
        assert!(model_is_installed(":latest", &names(&["gemma3:latest"])));
    }

    #[test]
    fn resolve_prefers_exact_then_full_then_family() {
        let installed = names(&["gemma3:4b", "library/gemma3:1b", "gemma3:1b"]);
        assert_eq!(resolve_installed("gemma3:1b", &installed), Some("gemma3:1b"));
        assert_eq!(
            resolve_installed("gemma3:1b", &installed[..2]),
            Some("library/gemma3:1b")
        );
        assert_eq!(resolve_installed("gemma3:1b", &installed[..1]), Some("gemma3:4b"));
        assert_eq!(resolve_installed("sqlcoder:7b", &installed), None);
    }

    #[test]
    fn resolve_agrees_with_is_installed() {
        let installed = names(&["gemma3:latest", "llama3.1:8b"]);
        for configured in ["gemma3:1b", "llama3.1:8b", "mistral", ":latest", "qwen3:1.7b"] {
            assert_eq!(
                resolve_installed(configured, &installed).is_some(),
                model_is_installed(configured, &installed),
                "{configured}"
            );
        }
    }

    struct FixedBackend {
        provider: Provider,
        models: Vec<String>,
    }

    #[async_trait::async_trait]
    impl LlmBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }
        fn provider(&self) -> Provider {
            self.provider
        }
        async fn available_models(&self) -> Vec<String> {
            self.models.clone()
        }
        async fn invoke(&self, _req: &InvokeRequest<'_>) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(Provider::Local).is_none());
        assert!(registry.get(Provider::Hosted).is_none());
    }

    #[tokio::test]
    async fn available_models_collects_per_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedBackend {
            provider: Provider::Local,
            models: names(&["gemma3:1b"]),
        }));
        registry.register(Arc::new(FixedBackend {
            provider: Provider::Hosted,
            models: Vec::new(),
        }));

        let available = registry.available_models().await;
        assert_eq!(available.local, vec!["gemma3:1b"]);
        assert!(available.hosted.is_empty());
    }

    #[test]
    fn serializes_with_provider_keys() {
        let available = AvailableModels {
            local: names(&["gemma3:1b"]),
            hosted: Vec::new(),
        };
        let json = serde_json::to_value(&available).unwrap();
        assert_eq!(json, serde_json::json!({ "ollama": ["gemma3:1b"], "groq": [] }));
    }
}
