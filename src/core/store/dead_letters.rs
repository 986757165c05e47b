use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::ContentStore;
use super::jobs::{bad_text, insert_job, live_job_id};
use super::types::{DeadLetterEntry, DeadLetterStatus, ReplayOutcome, column_ts, ts};
use crate::core::errors::FailureClass;
use crate::core::generation::GenerationJob;

const ENTRY_COLUMNS: &str = "entry_id, natural_key, job_json, last_error, error_class, \
     attempts_made, failed_at, status, replayed_at, replay_job_id";

fn map_entry(row: &Row) -> rusqlite::Result<DeadLetterEntry> {
    let job_json: String = row.get(2)?;
    let class: String = row.get(4)?;
    let failed_at: String = row.get(6)?;
    let status: String = row.get(7)?;
    let replayed_at: Option<String> = row.get(8)?;
    let job: GenerationJob = serde_json::from_str(&job_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into()))?;
    Ok(DeadLetterEntry {
        entry_id: row.get(0)?,
        natural_key: row.get(1)?,
        job,
        last_error: row.get(3)?,
        error_class: FailureClass::parse(&class).ok_or_else(|| bad_text(4, "error_class", &class))?,
        attempts_made: row.get(5)?,
        failed_at: column_ts(6, &failed_at)?,
        status: DeadLetterStatus::parse(&status).ok_or_else(|| bad_text(7, "status", &status))?,
        replayed_at: replayed_at.as_deref().map(|v| column_ts(8, v)).transpose()?,
        replay_job_id: row.get(9)?,
    })
}

impl ContentStore {
    /// Newest first.
    pub async fn list_dead_letters(
        &self,
        status: Option<DeadLetterStatus>,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM dead_letters
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY failed_at DESC
             LIMIT ?2",
            ENTRY_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let entries = stmt
            .query_map(
                params![status.map(DeadLetterStatus::as_str), limit as i64],
                map_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub async fn get_dead_letter(&self, entry_id: &str) -> Result<Option<DeadLetterEntry>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM dead_letters WHERE entry_id = ?1", ENTRY_COLUMNS);
        let entry = db
            .query_row(&sql, params![entry_id], map_entry)
            .optional()?;
        Ok(entry)
    }

    /// Re-enqueue a dead-lettered job at attempt 1 and mark the entry replayed.
    ///
    /// If the key already has a live job the replay coalesces into it instead.
    pub async fn replay_dead_letter(&self, entry_id: &str) -> Result<ReplayOutcome> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let sql = format!("SELECT {} FROM dead_letters WHERE entry_id = ?1", ENTRY_COLUMNS);
        let Some(entry) = tx
            .query_row(&sql, params![entry_id], map_entry)
            .optional()?
        else {
            return Ok(ReplayOutcome::NotFound);
        };
        if entry.status == DeadLetterStatus::Replayed {
            return Ok(ReplayOutcome::AlreadyReplayed);
        }

        let fresh = GenerationJob::new(&entry.job.match_id, &entry.job.model_id, entry.job.kind);
        let now = Utc::now();
        let outcome = if insert_job(&tx, &fresh, now)? {
            ReplayOutcome::Enqueued {
                job_id: fresh.job_id.clone(),
            }
        } else {
            let existing = live_job_id(&tx, &fresh.natural_key())?.unwrap_or_default();
            ReplayOutcome::Coalesced { job_id: existing }
        };
        let job_id = match &outcome {
            ReplayOutcome::Enqueued { job_id } | ReplayOutcome::Coalesced { job_id } => {
                job_id.clone()
            }
            _ => String::new(),
        };

        tx.execute(
            "UPDATE dead_letters SET status = 'replayed', replayed_at = ?2, replay_job_id = ?3
             WHERE entry_id = ?1",
            params![entry_id, ts(now), job_id],
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Delete an entry for good. Returns whether it existed.
    pub async fn purge_dead_letter(&self, entry_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let removed = db.execute(
            "DELETE FROM dead_letters WHERE entry_id = ?1",
            params![entry_id],
        )?;
        Ok(removed == 1)
    }
}
