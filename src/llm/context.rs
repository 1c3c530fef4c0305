use crate::config::LlmConfig;

/// Per-call invocation context passed to every `LlmBackend::invoke`.
///
/// Bundles all per-request inputs so the trait signature stays stable as new
/// fields are added.  All fields borrow from the call site.
pub struct InvokeRequest<'a> {
    /// Fully rendered prompt (instruction template with schema and query).
    pub prompt: &'a str,
    /// Prior-turn context, formatted by the session layer.
    pub context: Option<&'a str>,
    /// Provider-specific model identifier, e.g. `gemma3:1b`.
    pub model: &'a str,
}

impl InvokeRequest<'_> {
    /// Context to send as a system turn; `None` when absent or blank.
    pub fn system_context(&self) -> Option<&str> {
        self.context.filter(|c| !c.trim().is_empty())
    }
}

/// Sampling parameters shared by every provider.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub stop: Vec<String>,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            stop: config.stop.clone(),
        }
    }
}
