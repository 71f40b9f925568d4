//! SQLite-backed query backend.
//!
//! All statement work happens on the blocking pool; the async side holds
//! an interrupt handle and pulls the plug when the deadline passes.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use tracing::{debug, warn};

use sibyl_core::errors::BackendError;
use sibyl_core::traits::{IQueryBackend, QueryRows};

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    interrupt: InterruptHandle,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let conn = Connection::open(path).map_err(|e| BackendError::Execution {
            message: e.to_string(),
        })?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory().map_err(|e| BackendError::Execution {
            message: e.to_string(),
        })?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        }
    }

    /// Run a DDL/seed batch directly, outside the deadline machinery.
    pub fn seed(&self, sql: &str) -> Result<(), BackendError> {
        let conn = self.conn.lock().expect("sqlite connection poisoned");
        conn.execute_batch(sql).map_err(|e| BackendError::Execution {
            message: e.to_string(),
        })
    }

    fn run_blocking(conn: &Connection, query: &str) -> Result<QueryRows, BackendError> {
        let mut stmt = conn.prepare(query).map_err(map_error)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let column_count = column_names.len();

        let mut rows = Vec::new();
        let mut raw = stmt.query([]).map_err(map_error)?;
        while let Some(row) = raw.next().map_err(map_error)? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value = row.get_ref(idx).map_err(map_error)?;
                values.push(to_json(value));
            }
            rows.push(values);
        }
        Ok(QueryRows { column_names, rows })
    }
}

#[async_trait]
impl IQueryBackend for SqliteBackend {
    async fn explain(&self, query: &str) -> Result<(), BackendError> {
        let conn = Arc::clone(&self.conn);
        let sql = format!("EXPLAIN {query}");
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection poisoned");
            conn.prepare(&sql)
                .map(|_| ())
                .map_err(|e| BackendError::Rejected {
                    message: e.to_string(),
                })
        })
        .await
        .map_err(|_| BackendError::Closed)?
    }

    async fn execute(&self, query: &str, deadline: Duration) -> Result<QueryRows, BackendError> {
        let conn = Arc::clone(&self.conn);
        let sql = query.to_string();
        let mut handle = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection poisoned");
            Self::run_blocking(&conn, &sql)
        });

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(joined) => joined.map_err(|_| BackendError::Closed)?,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "interrupting query");
                self.interrupt.interrupt();
                // Wait for the interrupted statement to unwind so the
                // connection is usable for the next attempt.
                let _ = handle.await;
                Err(BackendError::Timeout {
                    elapsed_ms: deadline.as_millis() as u64,
                })
            }
        }
    }
}

fn map_error(e: rusqlite::Error) -> BackendError {
    let message = e.to_string();
    if message.contains("interrupted") {
        debug!("statement interrupted");
        BackendError::Timeout { elapsed_ms: 0 }
    } else {
        BackendError::Execution { message }
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            serde_json::Value::from(hex)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .seed(
                "CREATE TABLE projects (id INTEGER PRIMARY KEY, name TEXT, budget REAL);
                 INSERT INTO projects VALUES (1, 'Atlas', 120000.0);
                 INSERT INTO projects VALUES (2, 'Borealis', NULL);",
            )
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn select_returns_typed_rows() {
        let backend = seeded();
        let rows = backend
            .execute(
                "SELECT id, name, budget FROM projects ORDER BY id",
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(rows.column_names, vec!["id", "name", "budget"]);
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0][0], serde_json::json!(1));
        assert_eq!(rows.rows[0][1], serde_json::json!("Atlas"));
        assert_eq!(rows.rows[0][2], serde_json::json!(120000.0));
        assert_eq!(rows.rows[1][2], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn bad_column_surfaces_the_sqlite_message() {
        let backend = seeded();
        let err = backend
            .execute("SELECT nam FROM projects", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such column"));
    }

    #[tokio::test]
    async fn explain_rejects_unknown_tables() {
        let backend = seeded();
        assert!(backend.explain("SELECT * FROM projects").await.is_ok());
        let err = backend
            .explain("SELECT * FROM orders")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such table"));
    }

    #[tokio::test]
    async fn runaway_query_is_interrupted_at_the_deadline() {
        let backend = seeded();
        let err = backend
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                 SELECT count(*) FROM c",
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));

        // The connection survives and serves the next statement.
        let rows = backend
            .execute("SELECT count(*) FROM projects", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows.rows[0][0], serde_json::json!(2));
    }

    #[tokio::test]
    async fn blobs_come_back_hex_encoded() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .seed("CREATE TABLE b (v BLOB); INSERT INTO b VALUES (x'deadbeef');")
            .unwrap();
        let rows = backend
            .execute("SELECT v FROM b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rows.rows[0][0], serde_json::json!("deadbeef"));
    }
}
