use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{QueryChakraError, Result};

/// Rows beyond this are dropped from a result table.
const MAX_RESULT_ROWS: usize = 10_000;

/// Table name -> column names, in declaration order.
pub type Schema = BTreeMap<String, Vec<String>>;

/// Flatten a schema into the text handed to the prompt, one
/// `Table(col, col)` line per table.
pub fn schema_text(schema: &Schema) -> String {
    schema
        .iter()
        .map(|(table, columns)| format!("{table}({})", columns.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// True when rows past the result cap were dropped.
    pub truncated: bool,
}

/// Connection details shown in the UI.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub database: String,
    pub user: String,
    pub host: String,
    pub db_port: String,
}

struct Active {
    name: String,
    conn: Connection,
    schema: Schema,
}

/// The database queries run against, switchable between configured names.
pub struct Database {
    paths: BTreeMap<String, PathBuf>,
    active: Mutex<Active>,
    host: String,
    port: String,
    user: String,
}

impl Database {
    /// Open the initial database named by the config (or `DB` env var).
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let paths = config.resolved();
        let name = config.initial();
        let path = paths
            .get(&name)
            .ok_or_else(|| QueryChakraError::UnknownDatabase(name.clone()))?;

        let conn = open_file(path)?;
        let schema = introspect(&conn)?;
        info!(database = %name, tables = schema.len(), "database schema loaded");

        Ok(Self {
            paths,
            active: Mutex::new(Active { name, conn, schema }),
            host: env_or("HOST", &config.host),
            port: env_or("DB_PORT", &config.port),
            user: env_or("USER", &config.user),
        })
    }

    /// Wrap an already-open connection.  Exposed for tests that use
    /// in-memory databases.
    #[cfg(test)]
    pub(crate) fn from_connection(name: &str, conn: Connection) -> Result<Self> {
        let schema = introspect(&conn)?;
        let mut paths = BTreeMap::new();
        paths.insert(name.to_string(), PathBuf::from(":memory:"));
        Ok(Self {
            paths,
            active: Mutex::new(Active {
                name: name.to_string(),
                conn,
                schema,
            }),
            host: "localhost".to_string(),
            port: String::new(),
            user: String::new(),
        })
    }

    /// Names of all configured databases.
    pub fn databases(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }

    pub async fn current(&self) -> String {
        self.active.lock().await.name.clone()
    }

    pub async fn schema(&self) -> Schema {
        self.active.lock().await.schema.clone()
    }

    pub async fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            database: self.current().await,
            user: self.user.clone(),
            host: self.host.clone(),
            db_port: self.port.clone(),
        }
    }

    /// Switch to another configured database and reload its schema.
    /// Returns `false` when `name` is already active.
    pub async fn switch(&self, name: &str) -> Result<bool> {
        let mut active = self.active.lock().await;
        if active.name == name {
            return Ok(false);
        }

        let path = self
            .paths
            .get(name)
            .ok_or_else(|| QueryChakraError::UnknownDatabase(name.to_string()))?;

        let conn = open_file(path)?;
        let schema = introspect(&conn)?;
        info!(from = %active.name, to = %name, tables = schema.len(), "database switched");

        *active = Active {
            name: name.to_string(),
            conn,
            schema,
        };
        Ok(true)
    }

    /// Run one statement.  Row-returning statements yield their rows; other
    /// statements yield a single `rows_affected` cell.
    pub async fn execute(&self, sql: &str) -> Result<QueryTable> {
        let active = self.active.lock().await;
        run_statement(&active.conn, sql)
            .map_err(|e| QueryChakraError::QueryExecution(e.to_string()))
    }
}

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    info!("opening database at {}", path.display());
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

fn introspect(conn: &Connection) -> Result<Schema> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut columns_stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let mut schema = Schema::new();
    for table in tables {
        let columns = columns_stmt
            .query_map([&table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        schema.insert(table, columns);
    }
    Ok(schema)
}

fn run_statement(conn: &Connection, sql: &str) -> rusqlite::Result<QueryTable> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        let changed = stmt.execute([])?;
        return Ok(QueryTable {
            columns: vec!["rows_affected".to_string()],
            rows: vec![vec![serde_json::json!(changed)]],
            truncated: false,
        });
    }

    let mut out = Vec::new();
    let mut truncated = false;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if out.len() == MAX_RESULT_ROWS {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(to_json(row.get_ref(i)?));
        }
        out.push(values);
    }

    Ok(QueryTable {
        columns,
        rows: out,
        truncated,
    })
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<{} bytes>", bytes.len())),
    }
}

/// In-memory database with a small sales schema.
#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "
        CREATE TABLE Customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT);
        CREATE TABLE Orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL, note BLOB);
        INSERT INTO Customers (id, name, city) VALUES (1, 'Asha', 'Pune'), (2, 'Ravi', NULL);
        INSERT INTO Orders (id, customer_id, total, note) VALUES (10, 1, 99.5, x'0102'), (11, 2, 12.0, NULL);
        ",
    )
    .unwrap();
    Database::from_connection("main", conn).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn introspects_tables_and_columns() {
        let db = test_db();
        let schema = db.schema().await;
        assert_eq!(schema["Customers"], vec!["id", "name", "city"]);
        assert_eq!(schema["Orders"], vec!["id", "customer_id", "total", "note"]);
    }

    #[tokio::test]
    async fn schema_text_is_one_line_per_table() {
        let db = test_db();
        let text = schema_text(&db.schema().await);
        assert_eq!(
            text,
            "Customers(id, name, city)\nOrders(id, customer_id, total, note)"
        );
    }

    #[tokio::test]
    async fn execute_returns_typed_cells() {
        let db = test_db();
        let table = db
            .execute("SELECT c.name, c.city, o.total, o.note FROM Customers c JOIN Orders o ON o.customer_id = c.id ORDER BY o.id")
            .await
            .unwrap();
        assert_eq!(table.columns, vec!["name", "city", "total", "note"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], "Asha");
        assert_eq!(table.rows[0][2], serde_json::json!(99.5));
        assert_eq!(table.rows[0][3], "<2 bytes>");
        assert!(table.rows[1][1].is_null());
        assert!(!table.truncated);
    }

    #[tokio::test]
    async fn execute_non_query_reports_rows_affected() {
        let db = test_db();
        let table = db
            .execute("UPDATE Customers SET city = 'Mumbai' WHERE city IS NULL")
            .await
            .unwrap();
        assert_eq!(table.columns, vec!["rows_affected"]);
        assert_eq!(table.rows[0][0], serde_json::json!(1));
    }

    #[tokio::test]
    async fn execute_error_is_query_execution() {
        let db = test_db();
        let err = db.execute("SELECT nope FROM Customers").await.unwrap_err();
        assert!(matches!(err, QueryChakraError::QueryExecution(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn switch_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let sales = dir.path().join("sales.db");
        let hr = dir.path().join("hr.db");
        Connection::open(&hr)
            .unwrap()
            .execute_batch("CREATE TABLE Employees (id INTEGER, name TEXT);")
            .unwrap();

        let mut databases = BTreeMap::new();
        databases.insert("sales".to_string(), sales.to_string_lossy().into_owned());
        databases.insert("hr".to_string(), hr.to_string_lossy().into_owned());
        let config = DatabaseConfig {
            default: "sales".to_string(),
            databases,
            ..DatabaseConfig::default()
        };

        let db = Database::open(&config).unwrap();
        assert_eq!(db.databases(), vec!["hr", "sales"]);
        assert!(db.schema().await.is_empty());

        assert!(!db.switch("sales").await.unwrap());
        assert!(db.switch("hr").await.unwrap());
        assert_eq!(db.current().await, "hr");
        assert_eq!(db.schema().await["Employees"], vec!["id", "name"]);

        let err = db.switch("finance").await.unwrap_err();
        assert!(matches!(err, QueryChakraError::UnknownDatabase(_)));
        assert_eq!(db.current().await, "hr");
    }
}
