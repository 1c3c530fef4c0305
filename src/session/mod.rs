pub mod history;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

pub use history::{EntryStatus, History, HistoryEntry, HistoryExport, NewEntry};

/// Sessions idle for longer than this are dropped.
const SESSION_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-browser state: conversation history and the query staged for
/// execution.
#[derive(Debug)]
pub struct SessionState {
    pub history: History,
    /// SQL waiting to be executed (the last generated or edited query).
    pub current_query: String,
    /// Generation time of `current_query`, in minutes.
    pub time_difference: f64,
    /// Set when `current_query` is a refusal or provider error text rather
    /// than SQL.
    pub current_failed: bool,
    last_seen: Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            history: History::default(),
            current_query: String::new(),
            time_difference: 0.0,
            current_failed: false,
            last_seen: Instant::now(),
        }
    }
}

/// In-memory session store keyed by the session cookie value.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    history_limit: usize,
    context_entries: usize,
}

impl SessionStore {
    pub fn new(history_limit: usize, context_entries: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history_limit,
            context_entries,
        }
    }

    /// Fresh session id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Run `f` against the session, creating it when unknown.
    pub async fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.sessions.lock().await;

        if !sessions.contains_key(id) {
            let before = sessions.len();
            sessions.retain(|_, s| s.last_seen.elapsed() < SESSION_IDLE_TTL);
            if sessions.len() != before {
                debug!(expired = before - sessions.len(), "expired idle sessions");
            }
        }

        let state = sessions.entry(id.to_string()).or_default();
        state.last_seen = Instant::now();
        f(state)
    }

    /// Conversation context for the model, per the configured window.
    pub async fn context_for_llm(&self, id: &str) -> Option<String> {
        let window = self.context_entries;
        self.with_session(id, |s| s.history.format_for_llm(window)).await
    }

    /// Record a generation and stage it for execution.
    pub async fn record_generation(&self, id: &str, entry: NewEntry<'_>) -> HistoryEntry {
        let limit = self.history_limit;
        self.with_session(id, |s| {
            s.current_query = entry.sql_query.to_string();
            s.time_difference = entry.time_taken;
            s.current_failed = entry.status == EntryStatus::Error;
            s.history.push(entry, limit)
        })
        .await
    }

    /// Replace the staged query with user-edited SQL.
    pub async fn stage_query(&self, id: &str, sql: &str) {
        self.with_session(id, |s| {
            s.current_query = sql.to_string();
            s.current_failed = false;
        })
        .await
    }

    pub async fn clear_history(&self, id: &str) {
        self.with_session(id, |s| s.history.clear()).await
    }

    /// Drop the history of every session (used when the database changes).
    pub async fn clear_all_histories(&self) {
        let mut sessions = self.sessions.lock().await;
        for state in sessions.values_mut() {
            state.history.clear();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query: &str) -> NewEntry<'_> {
        NewEntry {
            user_query: query,
            sql_query: "SELECT 1",
            model_used: "groq:llama-3.1-8b-instant",
            time_taken: 0.5,
            status: EntryStatus::Generated,
            database: "main",
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new(50, 10);
        store.record_generation("a", entry("first")).await;

        assert!(store.context_for_llm("a").await.unwrap().contains("first"));
        assert!(store.context_for_llm("b").await.is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn record_generation_stages_query() {
        let store = SessionStore::new(50, 10);
        let e = store.record_generation("s", entry("q")).await;
        assert_eq!(e.id, 1);

        let (current, minutes) = store
            .with_session("s", |s| (s.current_query.clone(), s.time_difference))
            .await;
        assert_eq!(current, "SELECT 1");
        assert!((minutes - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failed_generation_is_flagged_until_restaged() {
        let store = SessionStore::new(50, 10);
        let mut failed = entry("weather");
        failed.status = EntryStatus::Error;
        store.record_generation("s", failed).await;
        assert!(store.with_session("s", |s| s.current_failed).await);

        store.stage_query("s", "SELECT 2").await;
        let (current, flagged) = store
            .with_session("s", |s| (s.current_query.clone(), s.current_failed))
            .await;
        assert_eq!(current, "SELECT 2");
        assert!(!flagged);
    }

    #[tokio::test]
    async fn history_limit_applies() {
        let store = SessionStore::new(2, 10);
        for q in ["a", "b", "c"] {
            store.record_generation("s", entry(q)).await;
        }
        let len = store.with_session("s", |s| s.history.len()).await;
        assert_eq!(len, 2);
    }

    #[tokio::test]
    async fn clear_all_histories_keeps_sessions() {
        let store = SessionStore::new(50, 10);
        store.record_generation("a", entry("x")).await;
        store.record_generation("b", entry("y")).await;
        store.clear_all_histories().await;

        assert!(store.context_for_llm("a").await.is_none());
        assert_eq!(store.len().await, 2);
        let current = store.with_session("a", |s| s.current_query.clone()).await;
        assert_eq!(current, "SELECT 1");
    }

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(SessionStore::new_id(), SessionStore::new_id());
    }
}
