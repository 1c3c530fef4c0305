use std::sync::Arc;

use axum::Router;
use axum::http::header;
use axum::middleware;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::database::Database;
use crate::generator::QueryGenerator;
use crate::session::SessionStore;

use super::handlers;
use super::session;

/// State shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<QueryGenerator>,
    pub sessions: Arc<SessionStore>,
    pub db: Arc<Database>,
}

pub fn build(state: AppState) -> Router {
    Router::new()
        // UI
        .route("/", get(serve_index))
        .route("/style.css", get(serve_css))
        .route("/app.js", get(serve_js))
        // API: Generation
        .route("/api/overview", get(handlers::overview))
        .route("/api/generate", post(handlers::generate))
        .route("/api/validate", post(handlers::validate))
        .route("/api/models", get(handlers::models))
        // API: Database & execution
        .route("/api/database", post(handlers::change_database))
        .route("/api/query/clean", post(handlers::clean_query))
        .route("/api/query/execute", get(handlers::execute_query))
        // API: History
        .route(
            "/api/history",
            get(handlers::history_get).post(handlers::history_post),
        )
        .route("/api/history/reset", post(handlers::reset_history))
        .route("/api/history/export", get(handlers::export_history))
        // Session cookie, applied to all routes above
        .layer(middleware::from_fn(session::ensure_session))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("ui/index.html"))
}

async fn serve_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], include_str!("ui/style.css"))
}

async fn serve_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        include_str!("ui/app.js"),
    )
}
