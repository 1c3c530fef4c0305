pub mod intent;
pub mod reducer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::QueryChakraError;
use crate::llm::prompts::PromptTemplate;
use crate::llm::{InvokeRequest, Provider, ProviderRegistry};

pub use intent::{IntentVerdict, classify};
pub use reducer::{Reduction, reduce};

/// Result text for a provider string that names no known provider.
pub const INVALID_PROVIDER: &str = "Invalid model provider specified.";

/// Why a provider call produced no model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFailure {
    Unreachable,
    Unauthorized,
    Transport,
    Timeout,
    InvalidProvider,
}

impl From<&QueryChakraError> for ProviderFailure {
    fn from(err: &QueryChakraError) -> Self {
        match err {
            QueryChakraError::ProviderUnreachable(_) => ProviderFailure::Unreachable,
            QueryChakraError::ProviderUnauthorized(_) => ProviderFailure::Unauthorized,
            _ => ProviderFailure::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SqlGenerated,
    Refused,
    ClarificationNeeded,
    ProviderError(ProviderFailure),
}

impl Outcome {
    /// Stable identifier for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::SqlGenerated => "sql_generated",
            Outcome::Refused => "refused",
            Outcome::ClarificationNeeded => "clarification_needed",
            Outcome::ProviderError(_) => "provider_error",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Refused | Outcome::ProviderError(_))
    }
}

/// One generation, created per request and handed straight to the caller.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl GenerationResult {
    fn new(text: impl Into<String>, started: Instant, outcome: Outcome) -> Self {
        Self {
            text: text.into(),
            elapsed: started.elapsed(),
            outcome,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed.as_secs_f64() / 60.0
    }

    /// Minutes rounded to 4 decimals, the precision shown to users.
    pub fn reported_minutes(&self) -> f64 {
        (self.elapsed_minutes() * 10_000.0).round() / 10_000.0
    }

    /// Compatibility with callers that classify results by prefix: true when
    /// the text starts with `Error` or `I can only help`.
    pub fn is_error_text(&self) -> bool {
        self.text.starts_with("Error") || self.text.starts_with("I can only help")
    }
}

/// Inputs of one `generate_query` call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Flattened schema description.
    pub schema: &'a str,
    /// The user's natural-language request.
    pub query: &'a str,
    /// Prior turns, already formatted by the session layer.
    pub history: Option<&'a str>,
    /// Provider key (`ollama`/`local` or `groq`/`hosted`).
    pub provider: &'a str,
    pub model: &'a str,
    /// Per-request deadline; the generator default applies when `None`.
    pub timeout: Option<Duration>,
}

/// Stateless pipeline: classify, build the prompt, invoke the provider,
/// reduce the answer.  Safe to share across concurrent requests.
pub struct QueryGenerator {
    registry: Arc<ProviderRegistry>,
    template: PromptTemplate,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(registry: Arc<ProviderRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            template: PromptTemplate::sql_server(),
            timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run the pipeline once.  Never fails: every problem is reported through
    /// the result's outcome and text.
    pub async fn generate_query(&self, req: &GenerationRequest<'_>) -> GenerationResult {
        let started = Instant::now();

        let verdict = classify(req.query);
        if let Some(refusal) = verdict.refusal {
            info!(query_len = req.query.len(), "request rejected by intent classifier");
            return GenerationResult::new(refusal, started, Outcome::Refused);
        }

        let backend = match req.provider.parse::<Provider>() {
            Ok(provider) => self.registry.get(provider),
            Err(e) => {
                warn!(provider = %req.provider, "{e}");
                None
            }
        };
        let Some(backend) = backend else {
            return GenerationResult::new(
                INVALID_PROVIDER,
                started,
                Outcome::ProviderError(ProviderFailure::InvalidProvider),
            );
        };

        let prompt = self.template.build(req.schema, req.query);
        let invoke = InvokeRequest {
            prompt: &prompt,
            context: req.history,
            model: req.model,
        };
        let deadline = req.timeout.unwrap_or(self.timeout);

        debug!(
            provider = %backend.provider(),
            model = %req.model,
            deadline_secs = deadline.as_secs(),
            "generating query"
        );

        let raw = match tokio::time::timeout(deadline, backend.invoke(&invoke)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(provider = backend.name(), model = %req.model, "generation failed: {e}");
                return GenerationResult::new(
                    failure_text(backend.name(), &e),
                    started,
                    Outcome::ProviderError(ProviderFailure::from(&e)),
                );
            }
            Err(_) => {
                warn!(provider = backend.name(), model = %req.model, "generation timed out");
                return GenerationResult::new(
                    format!(
                        "{} error: request timed out after {}s",
                        backend.name(),
                        deadline.as_secs()
                    ),
                    started,
                    Outcome::ProviderError(ProviderFailure::Timeout),
                );
            }
        };

        let (text, outcome) = match Reduction::from_raw(&raw) {
            Reduction::Sql(sql) => (sql, Outcome::SqlGenerated),
            refusal @ Reduction::Refusal => (refusal.into_text(), Outcome::Refused),
            Reduction::Clarification(text) => (text, Outcome::ClarificationNeeded),
        };

        let result = GenerationResult::new(text, started, outcome);
        info!(
            provider = %backend.provider(),
            model = %req.model,
            outcome = result.outcome.kind(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "query generated"
        );
        result
    }
}

/// Result text for an adapter error.  The not-configured message is shown
/// as-is; everything else is tagged with the provider name.
fn failure_text(provider_name: &str, err: &QueryChakraError) -> String {
    match err {
        QueryChakraError::ProviderUnauthorized(msg) if msg == crate::llm::groq::NOT_CONFIGURED => {
            msg.clone()
        }
        _ => format!("{provider_name} error: {err}"),
    }
}
