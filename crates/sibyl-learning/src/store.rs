//! SQLite-backed example and failure store.
//!
//! Two tables: verified (request, query) pairs served as few-shot
//! precedent, and terminal failures awaiting review. A resolved failure
//! carrying a confirmed correction is promoted into the example table by
//! [`ExampleStore::reconcile`], exactly once.

use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use sibyl_core::config::StoreConfig;
use sibyl_core::errors::{ErrorCategory, StoreError};
use sibyl_core::traits::{cosine_similarity, IExampleStore};
use sibyl_core::types::{FailureRecord, FailureStatus, FewShotExample};
use sibyl_core::SibylResult;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS few_shot_examples (
    id            TEXT PRIMARY KEY,
    request_text  TEXT NOT NULL,
    query_text    TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    tags          TEXT NOT NULL DEFAULT '[]',
    verified      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    UNIQUE (request_text, query_text)
);

CREATE TABLE IF NOT EXISTS failure_records (
    id             TEXT PRIMARY KEY,
    request_text   TEXT NOT NULL,
    last_candidate TEXT NOT NULL,
    error_category TEXT NOT NULL,
    attempts       INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    correction     TEXT,
    promoted       INTEGER NOT NULL DEFAULT 0,
    embedding      BLOB NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (request_text, last_candidate)
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub examples: u64,
    pub verified_examples: u64,
    pub failures: u64,
    pub pending_failures: u64,
}

pub struct ExampleStore {
    conn: Mutex<Connection>,
}

impl ExampleStore {
    pub fn open(config: &StoreConfig) -> SibylResult<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path).map_err(|e| StoreError::Open {
                reason: format!("{}: {e}", path.display()),
            })?,
            None => Connection::open_in_memory().map_err(|e| StoreError::Open {
                reason: e.to_string(),
            })?,
        };
        conn.execute_batch(SCHEMA).map_err(|e| StoreError::Open {
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> SibylResult<Self> {
        Self::open(&StoreConfig::default())
    }

    /// Store a verified pair. Idempotent on (request, query): re-recording
    /// an existing pair is a no-op and returns `false`.
    pub fn add_verified_example(
        &self,
        request_text: &str,
        query_text: &str,
        embedding: &[f32],
        tags: &[String],
    ) -> SibylResult<bool> {
        let conn = self.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO few_shot_examples
                 (id, request_text, query_text, embedding, tags, verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    request_text,
                    query_text,
                    encode_embedding(embedding),
                    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(query_err)?;
        if inserted > 0 {
            debug!(request = request_text, "verified example stored");
        }
        Ok(inserted > 0)
    }

    /// Log a terminal failure. Idempotent on (request, last candidate).
    pub fn record_failure(&self, record: &FailureRecord, embedding: &[f32]) -> SibylResult<bool> {
        let conn = self.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO failure_records
                 (id, request_text, last_candidate, error_category, attempts,
                  status, correction, promoted, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
                params![
                    record.id,
                    record.request_text,
                    record.last_candidate,
                    record.error_category.as_str(),
                    record.attempts,
                    record.status.as_str(),
                    record.correction,
                    encode_embedding(embedding),
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(query_err)?;
        Ok(inserted > 0)
    }

    /// Mark a failure reviewed without resolving it.
    pub fn mark_reviewed(&self, id: &str) -> SibylResult<bool> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE failure_records SET status = 'reviewed' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .map_err(query_err)?;
        Ok(updated > 0)
    }

    /// Attach a confirmed correction and mark the failure resolved. The
    /// correction becomes a verified example on the next reconcile pass.
    pub fn resolve_failure(&self, id: &str, correction: &str) -> SibylResult<bool> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE failure_records SET status = 'resolved', correction = ?2 WHERE id = ?1",
                params![id, correction],
            )
            .map_err(query_err)?;
        Ok(updated > 0)
    }

    pub fn pending_failures(&self) -> SibylResult<Vec<FailureRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, request_text, last_candidate, error_category, attempts,
                        status, correction, created_at
                 FROM failure_records WHERE status = 'pending' ORDER BY created_at",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], row_to_failure)
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        Ok(rows)
    }

    /// Promote resolved failures with corrections into the verified
    /// example table. Each failure is promoted at most once; the stored
    /// request embedding is reused for the new example.
    pub fn reconcile(&self) -> SibylResult<usize> {
        let candidates: Vec<(String, String, String, Vec<u8>)> = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, request_text, correction, embedding FROM failure_records
                     WHERE status = 'resolved' AND correction IS NOT NULL AND promoted = 0",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(query_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?;
            rows
        };

        let mut promoted = 0usize;
        for (id, request_text, correction, embedding) in candidates {
            self.add_verified_example(
                &request_text,
                &correction,
                &decode_embedding(&embedding),
                &["promoted".to_string()],
            )?;
            let conn = self.lock();
            conn.execute(
                "UPDATE failure_records SET promoted = 1 WHERE id = ?1",
                params![id],
            )
            .map_err(query_err)?;
            promoted += 1;
        }
        if promoted > 0 {
            info!(promoted, "reconciled resolved failures into examples");
        }
        Ok(promoted)
    }

    pub fn stats(&self) -> SibylResult<StoreStats> {
        let conn = self.lock();
        let count = |sql: &str| -> SibylResult<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .optional()
                .map_err(query_err)?
                .map(|n| n as u64)
                .ok_or_else(|| {
                    StoreError::Query {
                        reason: "count query returned no row".to_string(),
                    }
                    .into()
                })
        };
        Ok(StoreStats {
            examples: count("SELECT count(*) FROM few_shot_examples")?,
            verified_examples: count("SELECT count(*) FROM few_shot_examples WHERE verified = 1")?,
            failures: count("SELECT count(*) FROM failure_records")?,
            pending_failures: count("SELECT count(*) FROM failure_records WHERE status = 'pending'")?,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection poisoned")
    }
}

impl IExampleStore for ExampleStore {
    fn nearest_verified(&self, embedding: &[f32], k: usize) -> SibylResult<Vec<FewShotExample>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, request_text, query_text, embedding, tags, verified, created_at
                 FROM few_shot_examples WHERE verified = 1",
            )
            .map_err(query_err)?;
        let examples = stmt
            .query_map([], row_to_example)
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let mut scored: Vec<(f32, FewShotExample)> = examples
            .into_iter()
            .map(|e| (cosine_similarity(embedding, &e.embedding), e))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, e)| e).collect())
    }

    fn similar_failures(&self, embedding: &[f32], k: usize) -> SibylResult<Vec<FailureRecord>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, request_text, last_candidate, error_category, attempts,
                        status, correction, created_at, embedding
                 FROM failure_records",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                let record = row_to_failure(row)?;
                let blob: Vec<u8> = row.get(8)?;
                Ok((record, blob))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let mut scored: Vec<(f32, FailureRecord)> = rows
            .into_iter()
            .map(|(record, blob)| {
                (
                    cosine_similarity(embedding, &decode_embedding(&blob)),
                    record,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, r)| r).collect())
    }
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query {
        reason: e.to_string(),
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_example(row: &rusqlite::Row<'_>) -> rusqlite::Result<FewShotExample> {
    let blob: Vec<u8> = row.get(3)?;
    let tags_raw: String = row.get(4)?;
    let created_raw: String = row.get(6)?;
    Ok(FewShotExample {
        id: row.get(0)?,
        request_text: row.get(1)?,
        query_text: row.get(2)?,
        embedding: decode_embedding(&blob),
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        verified: row.get::<_, i64>(5)? != 0,
        created_at: parse_timestamp(&created_raw),
    })
}

fn row_to_failure(row: &rusqlite::Row<'_>) -> rusqlite::Result<FailureRecord> {
    let category_raw: String = row.get(3)?;
    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(7)?;
    Ok(FailureRecord {
        id: row.get(0)?,
        request_text: row.get(1)?,
        last_candidate: row.get(2)?,
        error_category: ErrorCategory::from_str(&category_raw).unwrap_or(ErrorCategory::Unknown),
        attempts: row.get::<_, i64>(4)? as u32,
        status: match status_raw.as_str() {
            "reviewed" => FailureStatus::Reviewed,
            "resolved" => FailureStatus::Resolved,
            _ => FailureStatus::Pending,
        },
        correction: row.get(6)?,
        created_at: parse_timestamp(&created_raw),
    })
}
