mod dead_letters;
mod jobs;
mod matches;
pub mod types;
mod writer;

use anyhow::Result;
use rusqlite::{Connection, ErrorCode, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub use matches::MatchRecord;
pub use types::{DeadLetterEntry, DeadLetterStatus, QueueStats, ReplayOutcome};
pub use writer::ResultWriter;

use crate::core::errors::WriteError;

/// Natural-key constraints the pipeline relies on. Missing any of them is fatal.
pub(crate) const REQUIRED_CONSTRAINTS: &[(&str, &[&str])] = &[
    ("match_previews", &["match_id"]),
    ("match_predictions", &["match_id", "model_id"]),
    ("generation_jobs", &["natural_key"]),
];

/// SQLite-backed store for fixtures, generated content, the job queue and dead letters.
#[derive(Clone)]
pub struct ContentStore {
    db: Arc<Mutex<Connection>>,
}

impl ContentStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!("Opened content store at {}", db_path.display());

        let store = Self::from_connection(conn);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        let store = Self::from_connection(Connection::open_in_memory()?);
        store.initialize().await?;
        Ok(store)
    }

    /// Wrap a connection as-is. No schema is created.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute(
            "CREATE TABLE IF NOT EXISTS matches (
                match_id TEXT PRIMARY KEY,
                home_team TEXT,
                away_team TEXT,
                competition TEXT,
                kickoff_at TEXT,
                venue TEXT,
                status TEXT NOT NULL DEFAULT 'scheduled',
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS match_previews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                headline TEXT NOT NULL,
                body TEXT NOT NULL,
                key_points_json TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS match_predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                home_score INTEGER NOT NULL,
                away_score INTEGER NOT NULL,
                confidence REAL,
                reasoning TEXT,
                generated_at TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS generation_jobs (
                job_id TEXT PRIMARY KEY,
                natural_key TEXT NOT NULL,
                match_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                state TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                available_at INTEGER NOT NULL,
                claimed_at TEXT,
                last_error TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                entry_id TEXT PRIMARY KEY,
                natural_key TEXT NOT NULL,
                job_json TEXT NOT NULL,
                last_error TEXT NOT NULL,
                error_class TEXT NOT NULL,
                attempts_made INTEGER NOT NULL,
                failed_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                replayed_at TEXT,
                replay_job_id TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_match_previews_match ON match_previews(match_id)",
            [],
        )?;
        db.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_match_predictions_match_model ON match_predictions(match_id, model_id)",
            [],
        )?;
        db.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_generation_jobs_key ON generation_jobs(natural_key)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_generation_jobs_ready ON generation_jobs(state, available_at)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_dead_letters_status_failed ON dead_letters(status, failed_at)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(status, kickoff_at)",
            [],
        )?;

        Ok(())
    }

    /// Check that every natural-key table declares its uniqueness constraint.
    pub async fn verify_constraints(&self) -> Result<(), WriteError> {
        let db = self.db.lock().await;
        for (table, columns) in REQUIRED_CONSTRAINTS {
            let present = has_unique_key(&db, table, columns)
                .map_err(|e| classify_write_error(e, table, key_label(table)))?;
            if !present {
                return Err(WriteError::MissingConstraint {
                    table,
                    key: key_label(table),
                });
            }
        }
        Ok(())
    }
}

fn key_label(table: &str) -> &'static str {
    match table {
        "match_previews" => "match_id",
        "match_predictions" => "match_id, model_id",
        "generation_jobs" => "natural_key",
        _ => "?",
    }
}

/// True when `table` has a full (non-partial) unique index or primary key over exactly `columns`.
fn has_unique_key(conn: &Connection, table: &str, columns: &[&str]) -> rusqlite::Result<bool> {
    let mut list = conn.prepare("SELECT name, \"unique\", partial FROM pragma_index_list(?1)")?;
    let indexes = list
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut wanted: Vec<&str> = columns.to_vec();
    wanted.sort_unstable();

    for (name, unique, partial) in indexes {
        if unique != 1 || partial != 0 {
            continue;
        }
        let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
        let mut cols = info
            .query_map(params![name], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        cols.sort_unstable();
        if cols.iter().map(String::as_str).eq(wanted.iter().copied()) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn classify_write_error(
    err: rusqlite::Error,
    table: &'static str,
    key: &'static str,
) -> WriteError {
    let message = err.to_string();
    if message.contains("ON CONFLICT clause does not match") {
        return WriteError::MissingConstraint { table, key };
    }
    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull,
        ) => WriteError::Transient(message),
        _ => WriteError::Storage(message),
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> ContentStore {
    ContentStore::in_memory()
        .await
        .expect("in-memory store should initialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_has_all_constraints() {
        let store = test_store().await;
        store.verify_constraints().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = test_store().await;
        store.initialize().await.unwrap();
        store.verify_constraints().await.unwrap();
    }

    #[tokio::test]
    async fn missing_prediction_constraint_is_detected() {
        let store = test_store().await;
        {
            let db = store.get_db();
            let db = db.lock().await;
            db.execute("DROP INDEX ux_match_predictions_match_model", [])
                .unwrap();
        }
        assert_eq!(
            store.verify_constraints().await.unwrap_err(),
            WriteError::MissingConstraint {
                table: "match_predictions",
                key: "match_id, model_id"
            }
        );
    }

    #[tokio::test]
    async fn non_unique_index_does_not_count() {
        let store = test_store().await;
        {
            let db = store.get_db();
            let db = db.lock().await;
            db.execute("DROP INDEX ux_match_previews_match", []).unwrap();
            db.execute(
                "CREATE INDEX idx_match_previews_match ON match_previews(match_id)",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.verify_constraints().await,
            Err(WriteError::MissingConstraint {
                table: "match_previews",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("matchday.db");
        let store = ContentStore::open(&path).await.unwrap();
        store.verify_constraints().await.unwrap();
        assert!(path.exists());
    }
}
