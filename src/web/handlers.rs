use axum::Extension;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::routes::AppState;
use super::session::SessionId;
use crate::database::schema_text;
use crate::generator::{GenerationRequest, Outcome, classify};
use crate::session::{EntryStatus, HistoryEntry, NewEntry};

#[derive(Deserialize)]
pub struct GenerateBody {
    pub schema: Option<String>,
    pub query: Option<String>,
    pub model_provider: Option<String>,
    pub model_name: Option<String>,
}

#[derive(Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub query: String,
}

#[derive(Deserialize)]
pub struct DatabaseBody {
    pub database: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub action: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryBody {
    pub action: Option<String>,
    pub entry_id: Option<u64>,
    pub data: Option<serde_json::Value>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

fn export_filename() -> String {
    format!(
        "querychakra_history_{}.json",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

// -- Overview ------------------------------------------------------------

/// GET /api/overview: everything the page needs on load.
pub async fn overview(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<serde_json::Value> {
    let schema = state.db.schema().await;
    let connection = state.db.connection_info().await;
    let models = state.generator.registry().available_models().await;
    let history: Vec<HistoryEntry> = state
        .sessions
        .with_session(&session.0, |s| s.history.entries().to_vec())
        .await;

    Json(json!({
        "schema_text": schema_text(&schema),
        "schema": schema,
        "connection": connection,
        "databases": state.db.databases(),
        "models": models,
        "history": history,
    }))
}

// -- Generation ----------------------------------------------------------

/// POST /api/generate: turn a natural-language request into SQL.
pub async fn generate(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(body): Json<GenerateBody>,
) -> Response {
    let fields = [
        ("schema", &body.schema),
        ("query", &body.query),
        ("model_provider", &body.model_provider),
        ("model_name", &body.model_name),
    ];
    let mut values = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        match value.as_deref().filter(|v| !v.trim().is_empty()) {
            Some(v) => values.push(v),
            None => return bad_request(format!("Missing required field: {name}")),
        }
    }
    let &[schema, query, provider, model] = values.as_slice() else {
        return bad_request("Invalid request");
    };

    let history = state.sessions.context_for_llm(&session.0).await;
    let result = state
        .generator
        .generate_query(&GenerationRequest {
            schema,
            query,
            history: history.as_deref(),
            provider,
            model,
            timeout: None,
        })
        .await;

    let minutes = result.reported_minutes();
    let model_used = format!("{provider}:{model}");
    let database = state.db.current().await;
    let status = if result.outcome.is_failure() {
        EntryStatus::Error
    } else {
        EntryStatus::Generated
    };

    let entry = state
        .sessions
        .record_generation(
            &session.0,
            NewEntry {
                user_query: query,
                sql_query: &result.text,
                model_used: &model_used,
                time_taken: minutes,
                status,
                database: &database,
            },
        )
        .await;

    let failure = match result.outcome {
        Outcome::ProviderError(failure) => Some(failure),
        _ => None,
    };

    Json(json!({
        "success": true,
        "query": result.text,
        "time": minutes,
        "model_used": model_used,
        "outcome": result.outcome.kind(),
        "failure": failure,
        "history_entry": entry,
    }))
    .into_response()
}

/// POST /api/validate: run only the intent classifier.
pub async fn validate(Json(body): Json<QueryBody>) -> Json<serde_json::Value> {
    let verdict = classify(&body.query);
    Json(json!({
        "valid": verdict.is_database,
        "message": verdict.refusal.unwrap_or("Query is valid"),
    }))
}

/// GET /api/models
pub async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models = state.generator.registry().available_models().await;
    Json(json!({ "success": true, "models": models }))
}

// -- Database ------------------------------------------------------------

/// POST /api/database: switch the active database.
///
/// Answers with the legacy status codes in the body: 300 (already
/// active), 200 (switched) or 600 (failed).
pub async fn change_database(
    State(state): State<AppState>,
    Json(body): Json<DatabaseBody>,
) -> Json<serde_json::Value> {
    match state.db.switch(&body.database).await {
        Ok(false) => Json(json!({ "status": 300, "msg": "no need to change" })),
        Ok(true) => {
            state.sessions.clear_all_histories().await;
            let schema = state.db.schema().await;
            Json(json!({
                "status": 200,
                "msg": "changed successfully",
                "schema": schema,
                "schema_text": schema_text(&schema),
                "connection": state.db.connection_info().await,
            }))
        }
        Err(e) => {
            warn!(database = %body.database, "database switch failed: {e}");
            Json(json!({ "status": 600, "msg": e.to_string() }))
        }
    }
}

/// POST /api/query/clean: stage user-edited SQL for execution.
pub async fn clean_query(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(body): Json<QueryBody>,
) -> Json<serde_json::Value> {
    state.sessions.stage_query(&session.0, &body.query).await;
    Json(json!({ "success": true, "message": "Query cleaned successfully" }))
}

/// GET /api/query/execute: run the staged query against the database.
pub async fn execute_query(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    let (sql, failed, minutes) = state
        .sessions
        .with_session(&session.0, |s| {
            (s.current_query.clone(), s.current_failed, s.time_difference)
        })
        .await;

    if sql.trim().is_empty() {
        return bad_request("No query to execute");
    }
    if failed || sql.starts_with("I can only help") || sql.starts_with("Error") {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "success": false, "error": sql })),
        )
            .into_response();
    }

    match state.db.execute(&sql).await {
        Ok(table) => {
            state
                .sessions
                .with_session(&session.0, |s| s.history.mark_last(EntryStatus::Executed, None))
                .await;
            info!(rows = table.rows.len(), "query executed");
            Json(json!({
                "success": true,
                "query": sql,
                "time_taken": minutes,
                "columns": table.columns,
                "rows": table.rows,
                "truncated": table.truncated,
            }))
            .into_response()
        }
        Err(e) => {
            error!("query execution: {e}");
            let message = e.to_string();
            state
                .sessions
                .with_session(&session.0, |s| {
                    s.history.mark_last(EntryStatus::Error, Some(message.clone()))
                })
                .await;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": format!("Query execution failed: {message}"),
                })),
            )
                .into_response()
        }
    }
}

// -- History -------------------------------------------------------------

/// GET /api/history?action=get|export
pub async fn history_get(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Query(params): Query<HistoryQuery>,
) -> Response {
    match params.action.as_deref().unwrap_or("get") {
        "get" => {
            let entries = state
                .sessions
                .with_session(&session.0, |s| s.history.entries().to_vec())
                .await;
            Json(json!({ "success": true, "count": entries.len(), "history": entries }))
                .into_response()
        }
        "export" => {
            let database = state.db.current().await;
            let export = state
                .sessions
                .with_session(&session.0, |s| s.history.export(&database))
                .await;
            Json(json!({ "success": true, "data": export, "filename": export_filename() }))
                .into_response()
        }
        _ => bad_request("Invalid request"),
    }
}

/// POST /api/history: delete, clear_all or import.
pub async fn history_post(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(body): Json<HistoryBody>,
) -> Response {
    match body.action.as_deref() {
        Some("delete") => {
            let Some(id) = body.entry_id else {
                return bad_request("Missing required field: entry_id");
            };
            let removed = state
                .sessions
                .with_session(&session.0, |s| s.history.delete(id))
                .await;
            if !removed {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "success": false, "error": "Entry not found" })),
                )
                    .into_response();
            }
            Json(json!({ "success": true, "message": "Entry deleted" })).into_response()
        }
        Some("clear_all") => {
            state.sessions.clear_history(&session.0).await;
            Json(json!({ "success": true, "message": "All history cleared" })).into_response()
        }
        Some("import") => {
            let Some(entries) = body.data.and_then(parse_import) else {
                return bad_request("Invalid import data format");
            };
            let count = entries.len();
            state
                .sessions
                .with_session(&session.0, |s| s.history.replace(entries))
                .await;
            info!(count, "history imported");
            Json(json!({ "success": true, "message": format!("Imported {count} conversations") }))
                .into_response()
        }
        _ => bad_request("Invalid request"),
    }
}

/// Accept either a bare entry list or a full export document.
fn parse_import(data: serde_json::Value) -> Option<Vec<HistoryEntry>> {
    let list = match data {
        serde_json::Value::Object(mut doc) => doc.remove("conversations")?,
        list @ serde_json::Value::Array(_) => list,
        _ => return None,
    };
    serde_json::from_value(list).ok()
}

/// POST /api/history/reset: clear history and the staged query.
pub async fn reset_history(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Json<serde_json::Value> {
    state
        .sessions
        .with_session(&session.0, |s| {
            s.history.clear();
            s.current_query.clear();
            s.current_failed = false;
        })
        .await;
    Json(json!({ "success": true }))
}

/// GET /api/history/export: history as a downloadable JSON file.
pub async fn export_history(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Response {
    let database = state.db.current().await;
    let export = state
        .sessions
        .with_session(&session.0, |s| s.history.export(&database))
        .await;

    let disposition = format!("attachment; filename=\"{}\"", export_filename());
    (
        [(header::CONTENT_DISPOSITION, disposition)],
        Json(export),
    )
        .into_response()
}

// -- Health --------------------------------------------------------------

/// GET /healthz: liveness plus a database round trip.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db.execute("SELECT 1").await.is_ok();

    let body = json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "database": state.db.current().await,
        "sessions": state.sessions.len().await,
    });

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
