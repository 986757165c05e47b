use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::ContentStore;
use super::types::{
    DeadLetterEntry, DeadLetterStatus, JobState, QueueStats, QueuedJob, column_ts, epoch_ms,
    from_epoch_ms, ts,
};
use crate::core::errors::FailureClass;
use crate::core::generation::{GenerationJob, JobKind, NaturalKey};

const JOB_COLUMNS: &str =
    "job_id, match_id, model_id, kind, attempt, enqueued_at, state, available_at, last_error";

fn map_job(row: &Row) -> rusqlite::Result<QueuedJob> {
    let kind: String = row.get(3)?;
    let enqueued_at: String = row.get(5)?;
    let state: String = row.get(6)?;
    Ok(QueuedJob {
        job: GenerationJob {
            job_id: row.get(0)?,
            match_id: row.get(1)?,
            model_id: row.get(2)?,
            kind: JobKind::from_name(&kind).ok_or_else(|| bad_text(3, "kind", &kind))?,
            attempt: row.get(4)?,
            enqueued_at: column_ts(5, &enqueued_at)?,
        },
        state: JobState::parse(&state).ok_or_else(|| bad_text(6, "state", &state))?,
        available_at: from_epoch_ms(row.get(7)?),
        last_error: row.get(8)?,
    })
}

pub(crate) fn bad_text(idx: usize, column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {} '{}'", column, value).into(),
    )
}

/// Insert unless a live job already holds the key. Returns whether a row was created.
pub(crate) fn insert_job(
    conn: &Connection,
    job: &GenerationJob,
    available_at: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO generation_jobs
            (job_id, natural_key, match_id, model_id, kind, attempt, state, enqueued_at, available_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)
         ON CONFLICT(natural_key) DO NOTHING",
        params![
            job.job_id,
            job.natural_key().as_str(),
            job.match_id,
            job.model_id,
            job.kind.as_str(),
            job.attempt,
            ts(job.enqueued_at),
            epoch_ms(available_at),
        ],
    )?;
    Ok(inserted == 1)
}

pub(crate) fn live_job_id(conn: &Connection, key: &NaturalKey) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT job_id FROM generation_jobs WHERE natural_key = ?1",
        params![key.as_str()],
        |row| row.get(0),
    )
    .optional()
}

impl ContentStore {
    /// Enqueue a batch in one transaction, skipping keys that already have a live job.
    /// Returns the number of jobs created.
    pub async fn enqueue_jobs(&self, jobs: &[GenerationJob]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let now = Utc::now();
        let mut created = 0;
        for job in jobs {
            if insert_job(&tx, job, now)? {
                created += 1;
            }
        }
        tx.commit()?;
        Ok(created)
    }

    /// Atomically move the oldest ready job to `in_flight` and hand it out.
    pub async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<GenerationJob>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let sql = format!(
            "SELECT {} FROM generation_jobs
             WHERE state IN ('pending', 'retry_scheduled') AND available_at <= ?1
             ORDER BY available_at, enqueued_at
             LIMIT 1",
            JOB_COLUMNS
        );
        let next = tx
            .query_row(&sql, params![epoch_ms(now)], map_job)
            .optional()?;
        let Some(queued) = next else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE generation_jobs SET state = 'in_flight', claimed_at = ?2 WHERE job_id = ?1",
            params![queued.job.job_id, ts(now)],
        )?;
        tx.commit()?;
        Ok(Some(queued.job))
    }

    /// Remove a finished job, freeing its natural key.
    pub async fn complete_job(&self, job_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM generation_jobs WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    pub async fn schedule_retry(
        &self,
        job_id: &str,
        next_attempt: u32,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE generation_jobs
             SET state = 'retry_scheduled', attempt = ?2, available_at = ?3,
                 last_error = ?4, claimed_at = NULL
             WHERE job_id = ?1",
            params![job_id, next_attempt, epoch_ms(available_at), error],
        )?;
        Ok(())
    }

    /// Hand an in-flight job back to the queue without consuming an attempt.
    pub async fn release_job(&self, job_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE generation_jobs SET state = 'pending', claimed_at = NULL WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    /// Record a terminal failure and drop the live job in one transaction.
    pub async fn dead_letter_job(
        &self,
        job: &GenerationJob,
        error: &str,
        class: FailureClass,
    ) -> Result<DeadLetterEntry> {
        let entry = DeadLetterEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            job: job.clone(),
            natural_key: job.natural_key().to_string(),
            last_error: error.to_string(),
            error_class: class,
            attempts_made: job.attempt,
            failed_at: Utc::now(),
            status: DeadLetterStatus::Open,
            replayed_at: None,
            replay_job_id: None,
        };

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO dead_letters
                (entry_id, natural_key, job_json, last_error, error_class, attempts_made, failed_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open')",
            params![
                entry.entry_id,
                entry.natural_key,
                serde_json::to_string(&entry.job)?,
                entry.last_error,
                class.as_str(),
                entry.attempts_made,
                ts(entry.failed_at),
            ],
        )?;
        tx.execute(
            "DELETE FROM generation_jobs WHERE job_id = ?1",
            params![job.job_id],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    /// Return rows a crashed process left `in_flight` to `pending`.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let count = db.execute(
            "UPDATE generation_jobs SET state = 'pending', claimed_at = NULL WHERE state = 'in_flight'",
            [],
        )?;
        Ok(count)
    }

    pub async fn live_job(&self, key: &NaturalKey) -> Result<Option<QueuedJob>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM generation_jobs WHERE natural_key = ?1",
            JOB_COLUMNS
        );
        let job = db
            .query_row(&sql, params![key.as_str()], map_job)
            .optional()?;
        Ok(job)
    }

    pub async fn list_jobs(&self) -> Result<Vec<QueuedJob>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM generation_jobs ORDER BY available_at, enqueued_at",
            JOB_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let jobs = stmt
            .query_map([], map_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let db = self.db.lock().await;
        let mut stats = QueueStats::default();
        let mut stmt =
            db.prepare("SELECT state, COUNT(*) FROM generation_jobs GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (state, count) in rows {
            let count = count.max(0) as u64;
            match JobState::parse(&state) {
                Some(JobState::Pending) => stats.pending = count,
                Some(JobState::InFlight) => stats.in_flight = count,
                Some(JobState::RetryScheduled) => stats.retry_scheduled = count,
                None => {}
            }
        }
        let open: i64 = db.query_row(
            "SELECT COUNT(*) FROM dead_letters WHERE status = 'open'",
            [],
            |row| row.get(0),
        )?;
        stats.dead_letters_open = open.max(0) as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;
    use chrono::Duration;

    #[tokio::test]
    async fn enqueue_dedupes_by_natural_key() {
        let store = test_store().await;
        let first = GenerationJob::new("M100", "A", JobKind::Prediction);
        let again = GenerationJob::new("M100", "A", JobKind::Prediction);
        let other = GenerationJob::new("M100", "B", JobKind::Prediction);

        assert_eq!(store.enqueue_jobs(&[first.clone(), other]).await.unwrap(), 2);
        assert_eq!(store.enqueue_jobs(&[again]).await.unwrap(), 0);

        let live = store.live_job(&first.natural_key()).await.unwrap().unwrap();
        assert_eq!(live.job.job_id, first.job_id);
        assert_eq!(live.state, JobState::Pending);
    }

    #[tokio::test]
    async fn in_flight_key_still_blocks_enqueue() {
        let store = test_store().await;
        let job = GenerationJob::new("M100", "A", JobKind::Prediction);
        store.enqueue_jobs(&[job.clone()]).await.unwrap();
        let claimed = store.claim_next_job(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.job_id, job.job_id);

        let dup = GenerationJob::new("M100", "A", JobKind::Prediction);
        assert_eq!(store.enqueue_jobs(&[dup]).await.unwrap(), 0);
        assert!(store.claim_next_job(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_is_not_claimable_before_its_time() {
        let store = test_store().await;
        let job = GenerationJob::new("M100", "A", JobKind::Prediction);
        store.enqueue_jobs(&[job.clone()]).await.unwrap();
        let now = Utc::now();
        store.claim_next_job(now).await.unwrap().unwrap();

        let later = now + Duration::seconds(30);
        store
            .schedule_retry(&job.job_id, 2, later, "timeout")
            .await
            .unwrap();
        assert!(store.claim_next_job(now).await.unwrap().is_none());

        let retried = store.claim_next_job(later).await.unwrap().unwrap();
        assert_eq!(retried.attempt, 2);
    }

    #[tokio::test]
    async fn complete_frees_the_key() {
        let store = test_store().await;
        let job = GenerationJob::new("M100", "A", JobKind::Prediction);
        store.enqueue_jobs(&[job.clone()]).await.unwrap();
        store.claim_next_job(Utc::now()).await.unwrap();
        store.complete_job(&job.job_id).await.unwrap();

        let next = GenerationJob::new("M100", "A", JobKind::Prediction);
        assert_eq!(store.enqueue_jobs(&[next]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_letter_moves_job_atomically() {
        let store = test_store().await;
        let mut job = GenerationJob::new("M100", "A", JobKind::Prediction);
        job.attempt = 3;
        store.enqueue_jobs(&[job.clone()]).await.unwrap();

        let entry = store
            .dead_letter_job(&job, "malformed response: no scores", FailureClass::Permanent)
            .await
            .unwrap();
        assert_eq!(entry.attempts_made, 3);
        assert!(store.live_job(&job.natural_key()).await.unwrap().is_none());

        let stats = store.queue_stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dead_letters_open, 1);
    }

    #[tokio::test]
    async fn recovery_returns_in_flight_rows_to_pending() {
        let store = test_store().await;
        let job = GenerationJob::new("M100", "A", JobKind::Prediction);
        store.enqueue_jobs(&[job]).await.unwrap();
        store.claim_next_job(Utc::now()).await.unwrap().unwrap();
        assert_eq!(store.queue_stats().await.unwrap().in_flight, 1);

        assert_eq!(store.recover_in_flight().await.unwrap(), 1);
        let stats = store.queue_stats().await.unwrap();
        assert_eq!((stats.pending, stats.in_flight), (1, 0));
    }

    #[tokio::test]
    async fn release_keeps_attempt() {
        let store = test_store().await;
        let mut job = GenerationJob::new("M100", "A", JobKind::Prediction);
        job.attempt = 2;
        store.enqueue_jobs(&[job.clone()]).await.unwrap();
        store.claim_next_job(Utc::now()).await.unwrap();
        store.release_job(&job.job_id).await.unwrap();

        let live = store.live_job(&job.natural_key()).await.unwrap().unwrap();
        assert_eq!(live.state, JobState::Pending);
        assert_eq!(live.job.attempt, 2);
    }
}
