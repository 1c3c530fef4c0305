pub mod handlers;
pub mod routes;
pub mod session;

use tokio::sync::broadcast;
use tracing::info;

use crate::error::{QueryChakraError, Result};

pub use routes::AppState;

pub async fn serve(
    state: AppState,
    bind: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = routes::build(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| QueryChakraError::Config(format!("failed to bind {bind}: {e}")))?;

    info!(bind = %bind, "web UI listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| QueryChakraError::Config(format!("web server error: {e}")))?;

    Ok(())
}
