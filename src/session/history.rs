use std::collections::HashSet;

use chrono::Local;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Generated,
    Executed,
    Error,
}

/// One request/response pair shown in the history panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_query: String,
    #[serde(default)]
    pub sql_query: String,
    /// `provider:model`
    #[serde(default)]
    pub model_used: String,
    /// Generation time in minutes.
    #[serde(default)]
    pub time_taken: f64,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Fields supplied by the caller when recording a generation.
pub struct NewEntry<'a> {
    pub user_query: &'a str,
    pub sql_query: &'a str,
    pub model_used: &'a str,
    pub time_taken: f64,
    pub status: EntryStatus,
    pub database: &'a str,
}

#[derive(Debug, Serialize)]
pub struct HistoryExport {
    pub export_timestamp: String,
    pub database: String,
    pub conversation_count: usize,
    pub conversations: Vec<HistoryEntry>,
}

/// Ordered conversation history of one session, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and keep only the newest `limit` entries.
    ///
    /// Ids keep increasing after old entries are dropped, so they stay unique
    /// within the session.
    pub fn push(&mut self, new: NewEntry<'_>, limit: usize) -> HistoryEntry {
        let id = self.next_id();

        let entry = HistoryEntry {
            id,
            timestamp: Local::now().to_rfc3339(),
            user_query: new.user_query.to_string(),
            sql_query: new.sql_query.to_string(),
            model_used: new.model_used.to_string(),
            time_taken: new.time_taken,
            status: new.status,
            database: new.database.to_string(),
            error_message: None,
        };
        self.entries.push(entry.clone());

        if self.entries.len() > limit {
            let excess = self.entries.len() - limit;
            self.entries.drain(..excess);
        }

        entry
    }

    /// Render the newest `window` entries as model context: one `User:` and
    /// one `SQL:` line per entry, skipping failed ones.  `None` when nothing
    /// qualifies.
    pub fn format_for_llm(&self, window: usize) -> Option<String> {
        let start = self.entries.len().saturating_sub(window);
        let lines: Vec<String> = self.entries[start..]
            .iter()
            .filter(|e| e.status != EntryStatus::Error)
            .flat_map(|e| [format!("User: {}", e.user_query), format!("SQL: {}", e.sql_query)])
            .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Remove the entry with `id`; returns whether one was removed.
    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace the whole history with imported entries.
    ///
    /// Imported ids are kept unless two entries share one, in which case the
    /// history is renumbered from 1.
    pub fn replace(&mut self, entries: Vec<HistoryEntry>) {
        self.entries = entries;
        let mut seen = HashSet::with_capacity(self.entries.len());
        if !self.entries.iter().all(|e| seen.insert(e.id)) {
            self.renumber();
        }
    }

    fn next_id(&mut self) -> u64 {
        let max = self.entries.iter().map(|e| e.id).max().unwrap_or(0);
        match max.checked_add(1) {
            Some(id) => id,
            None => {
                self.renumber();
                self.entries.len() as u64 + 1
            }
        }
    }

    fn renumber(&mut self) {
        for (id, entry) in (1..).zip(self.entries.iter_mut()) {
            entry.id = id;
        }
    }

    /// Update the status of the newest entry, if any.
    pub fn mark_last(&mut self, status: EntryStatus, error_message: Option<String>) {
        if let Some(last) = self.entries.last_mut() {
            last.status = status;
            if error_message.is_some() {
                last.error_message = error_message;
            }
        }
    }

    pub fn export(&self, database: &str) -> HistoryExport {
        HistoryExport {
            export_timestamp: Local::now().to_rfc3339(),
            database: database.to_string(),
            conversation_count: self.entries.len(),
            conversations: self.entries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry<'a>(query: &'a str, sql: &'a str, status: EntryStatus) -> NewEntry<'a> {
        NewEntry {
            user_query: query,
            sql_query: sql,
            model_used: "ollama:gemma3:1b",
            time_taken: 0.0123,
            status,
            database: "main",
        }
    }

    #[test]
    fn push_assigns_sequential_ids() {
        let mut h = History::default();
        let a = h.push(entry("a", "SELECT 1", EntryStatus::Generated), 50);
        let b = h.push(entry("b", "SELECT 2", EntryStatus::Generated), 50);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.model_used, "ollama:gemma3:1b");
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn push_caps_to_limit_and_keeps_ids_unique() {
        let mut h = History::default();
        for i in 0..5 {
            h.push(entry(&format!("q{i}"), "SELECT 1", EntryStatus::Generated), 3);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.entries()[0].user_query, "q2");
        let next = h.push(entry("q5", "SELECT 1", EntryStatus::Generated), 3);
        assert_eq!(next.id, 6);
    }

    #[test]
    fn format_for_llm_skips_errors_and_windows() {
        let mut h = History::default();
        h.push(entry("old", "SELECT 0", EntryStatus::Generated), 50);
        h.push(entry("count orders", "SELECT COUNT(*) FROM Orders", EntryStatus::Executed), 50);
        h.push(entry("weather", "I can only help", EntryStatus::Error), 50);
        h.push(entry("names", "SELECT name FROM T", EntryStatus::Generated), 50);

        let text = h.format_for_llm(3).unwrap();
        assert_eq!(
            text,
            "User: count orders\nSQL: SELECT COUNT(*) FROM Orders\nUser: names\nSQL: SELECT name FROM T"
        );
    }

    #[test]
    fn format_for_llm_empty() {
        let mut h = History::default();
        assert!(h.format_for_llm(10).is_none());
        h.push(entry("x", "Error", EntryStatus::Error), 50);
        assert!(h.format_for_llm(10).is_none());
    }

    #[test]
    fn delete_and_clear() {
        let mut h = History::default();
        h.push(entry("a", "SELECT 1", EntryStatus::Generated), 50);
        h.push(entry("b", "SELECT 2", EntryStatus::Generated), 50);
        assert!(h.delete(1));
        assert!(!h.delete(1));
        assert_eq!(h.entries()[0].user_query, "b");
        h.clear();
        assert!(h.is_empty());
    }

    #[test]
    fn mark_last_updates_newest_only() {
        let mut h = History::default();
        h.push(entry("a", "SELECT 1", EntryStatus::Generated), 50);
        h.push(entry("b", "SELECT x", EntryStatus::Generated), 50);
        h.mark_last(EntryStatus::Error, Some("no such column: x".into()));
        assert_eq!(h.entries()[0].status, EntryStatus::Generated);
        assert_eq!(h.entries()[1].status, EntryStatus::Error);
        assert_eq!(h.entries()[1].error_message.as_deref(), Some("no such column: x"));
    }

    #[test]
    fn import_accepts_sparse_entries() {
        let entries: Vec<HistoryEntry> =
            serde_json::from_str(r#"[{"id": 7, "user_query": "q", "status": "executed"}]"#).unwrap();
        let mut h = History::default();
        h.replace(entries);
        assert_eq!(h.entries()[0].status, EntryStatus::Executed);
        assert!(h.entries()[0].sql_query.is_empty());
    }

    #[test]
    fn push_after_import_of_max_id_renumbers() {
        let entries: Vec<HistoryEntry> = serde_json::from_str(
            r#"[{"id": 3, "user_query": "a"}, {"id": 18446744073709551615, "user_query": "b"}]"#,
        )
        .unwrap();
        let mut h = History::default();
        h.replace(entries);
        assert_eq!(h.entries()[1].id, u64::MAX);

        let next = h.push(entry("c", "SELECT 1", EntryStatus::Generated), 50);
        assert_eq!(next.id, 3);
        let ids: Vec<u64> = h.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn import_with_duplicate_ids_is_renumbered() {
        let entries: Vec<HistoryEntry> = serde_json::from_str(
            r#"[{"id": 4, "user_query": "a"}, {"id": 4, "user_query": "b"}, {"id": 9, "user_query": "c"}]"#,
        )
        .unwrap();
        let mut h = History::default();
        h.replace(entries);
        let ids: Vec<u64> = h.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(h.delete(2));
        assert_eq!(h.entries()[1].user_query, "c");
    }

    #[test]
    fn export_counts_entries() {
        let mut h = History::default();
        h.push(entry("a", "SELECT 1", EntryStatus::Generated), 50);
        let export = h.export("sales");
        assert_eq!(export.database, "sales");
        assert_eq!(export.conversation_count, 1);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["conversations"][0]["status"], "generated");
        assert!(json["conversations"][0].get("error_message").is_none());
    }
}
