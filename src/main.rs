mod config;
mod database;
mod error;
mod generator;
mod llm;
mod session;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::generator::QueryGenerator;
use crate::session::SessionStore;

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything reads env vars
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return;
        }
    };

    let bind = config.bind_addr();
    info!(
        bind = %bind,
        history_limit = config.history_limit,
        timeout_secs = config.llm.timeout().as_secs(),
        "querychakra starting"
    );

    // Provider backends
    let registry = match llm::build_registry(&config.llm) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!("failed to initialize LLM providers: {e}");
            return;
        }
    };

    // Open database
    let db = match Database::open(&config.database) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            error!("failed to open database: {e}");
            return;
        }
    };

    // Handle --check
    if args.iter().any(|a| a == "--check") {
        run_checks(&config, &registry, &db).await;
        return;
    }

    let state = web::AppState {
        generator: Arc::new(QueryGenerator::new(registry, config.llm.timeout())),
        sessions: Arc::new(SessionStore::new(
            config.history_limit,
            config.llm_context_entries,
        )),
        db,
    };

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let web_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let bind = bind.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(state, &bind, shutdown_rx).await {
                error!("web server error: {e}");
                std::process::exit(1);
            }
        })
    };

    info!("querychakra is running on http://{bind}, press Ctrl+C to stop");

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl+c: {e}");
    }

    info!("shutdown signal received, stopping...");
    let _ = shutdown_tx.send(());

    let _ = web_handle.await;
    info!("querychakra stopped");
}

async fn run_checks(config: &Config, registry: &llm::ProviderRegistry, db: &Database) {
    info!("running pre-flight checks...");

    info!("config: OK");
    info!("  bind: {}", config.bind_addr());
    info!("  history_limit: {}", config.history_limit);
    info!("  llm_context_entries: {}", config.llm_context_entries);
    info!("  timeout: {}s", config.llm.timeout().as_secs());

    let schema = db.schema().await;
    info!(
        "database: OK ({}, {} tables; configured: {})",
        db.current().await,
        schema.len(),
        db.databases().join(", ")
    );

    let models = registry.available_models().await;
    if models.local.is_empty() {
        warn!(
            "ollama: no configured model installed (wanted: {})",
            config.llm.ollama_models.join(", ")
        );
    } else {
        info!("ollama: OK ({})", models.local.join(", "));
    }

    if models.hosted.is_empty() {
        warn!("groq: API key not configured");
    } else {
        info!("groq: OK ({})", models.hosted.join(", "));
    }
}

fn print_usage() {
    println!(
        "querychakra - natural-language to SQL query generator

USAGE:
    querychakra [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ~/.config/querychakra/config.toml)
    --default-config    Print default config to stdout and exit
    --check             Validate config, database and providers, then exit
    -h, --help          Print this help message

LLM PROVIDERS:
    OLLAMA_HOST           Ollama server URL (default: http://localhost:11434)
    GROQ_API_KEY          Groq API key; the hosted provider is disabled without it
    GROQ_BASE_URL         Override the Groq API base URL

DATABASE:
    DB                    Name of the database to open at startup
    HOST, DB_PORT, USER   Connection details shown in the UI

ENVIRONMENT:
    PORT                  Override the listen port
    RUST_LOG              Optional. Tracing filter (default: info).
"
    );
}
