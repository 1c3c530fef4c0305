use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{QueryChakraError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the web UI listens on.  The `PORT` env var replaces the port.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum history entries kept per session.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// How many of the most recent history entries are sent to the model
    /// as conversational context.
    #[serde(default = "default_llm_context_entries")]
    pub llm_context_entries: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

// -- LLM -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    // -- Ollama settings (provider = "ollama") --

    /// Ollama server URL.  Overridden by the `OLLAMA_HOST` env var.
    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    /// Ollama models offered in the model picker.  Each entry is shown only
    /// when a model of the same family is installed locally.
    #[serde(default = "default_ollama_models")]
    pub ollama_models: Vec<String>,

    // -- Groq settings (provider = "groq") --

    /// Base URL of the OpenAI-compatible Groq endpoint.
    /// Overridden by the `GROQ_BASE_URL` env var.
    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,

    /// Groq API key.  The `GROQ_API_KEY` env var takes precedence; when
    /// neither is set the hosted provider is disabled.
    #[serde(default)]
    pub groq_api_key: String,

    #[serde(default = "default_groq_models")]
    pub groq_models: Vec<String>,

    // -- Generation parameters (shared by all providers) --

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Completion token ceiling for the hosted provider.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Stop sequences.  These must match the instruction delimiters of the
    /// prompt template.
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,

    /// Deadline for a single provider invocation in seconds (0 = 600).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// -- Database --------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the database opened at startup.  Overridden by the `DB` env var.
    #[serde(default = "default_database_name")]
    pub default: String,

    /// Named databases the UI can switch between (name -> SQLite file).
    /// When empty, a single database is kept in the data directory.
    #[serde(default)]
    pub databases: BTreeMap<String, String>,

    /// Connection details shown in the UI.
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default)]
    pub port: String,

    #[serde(default)]
    pub user: String,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_history_limit() -> usize {
    50
}
fn default_llm_context_entries() -> usize {
    10
}
fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_models() -> Vec<String> {
    vec!["gemma3:1b".to_string()]
}
fn default_groq_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_groq_models() -> Vec<String> {
    vec![
        "llama-3.1-8b-instant".to_string(),
        "openai/gpt-oss-20b".to_string(),
        "llama-3.3-70b-versatile".to_string(),
    ]
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> usize {
    1024
}
fn default_stop() -> Vec<String> {
    vec!["[INST]".to_string(), "[/INST]".to_string()]
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_database_name() -> String {
    "main".to_string()
}
fn default_db_host() -> String {
    "localhost".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_host: default_ollama_host(),
            ollama_models: default_ollama_models(),
            groq_base_url: default_groq_base_url(),
            groq_api_key: String::new(),
            groq_models: default_groq_models(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            stop: default_stop(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default: default_database_name(),
            databases: BTreeMap::new(),
            host: default_db_host(),
            port: String::new(),
            user: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            history_limit: default_history_limit(),
            llm_context_entries: default_llm_context_entries(),
            llm: LlmConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Effective provider deadline.
    pub fn timeout(&self) -> std::time::Duration {
        if self.timeout_secs > 0 {
            std::time::Duration::from_secs(self.timeout_secs)
        } else {
            std::time::Duration::from_secs(600)
        }
    }
}

impl DatabaseConfig {
    /// Named databases with the data-directory fallback applied.
    pub fn resolved(&self) -> BTreeMap<String, PathBuf> {
        if self.databases.is_empty() {
            let mut map = BTreeMap::new();
            map.insert(
                self.default.clone(),
                Config::data_dir().join("querychakra.db"),
            );
            return map;
        }
        self.databases
            .iter()
            .map(|(name, path)| (name.clone(), PathBuf::from(path)))
            .collect()
    }

    /// Name of the database to open first, honouring the `DB` env var.
    pub fn initial(&self) -> String {
        std::env::var("DB")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.default.clone())
    }
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path).map_err(QueryChakraError::Io)?;
            toml::from_str(&contents)
                .map_err(|e| QueryChakraError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        Ok(config)
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/querychakra/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("querychakra")
            .join("config.toml")
    }

    /// Returns the data directory: `$XDG_DATA_HOME/querychakra/`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("querychakra")
    }

    /// Listen address with the `PORT` env var applied.
    pub fn bind_addr(&self) -> String {
        match std::env::var("PORT").ok().filter(|p| !p.is_empty()) {
            Some(port) => {
                let host = self
                    .bind
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or(&self.bind);
                format!("{host}:{port}")
            }
            None => self.bind.clone(),
        }
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}
