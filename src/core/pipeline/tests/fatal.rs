use std::time::Duration;

use super::*;
use crate::core::errors::{JobError, WriteError};
use crate::core::generation::{GenerationJob, JobKind};
use crate::core::pipeline::worker::{WorkerPool, WorkerSettings};
use crate::core::store::types::JobState;

async fn drop_prediction_constraint(store: &ContentStore) {
    let db = store.get_db();
    let db = db.lock().await;
    db.execute("DROP INDEX ux_match_predictions_match_model", [])
        .unwrap();
}

#[tokio::test]
async fn missing_constraint_halts_and_keeps_the_job() {
    let provider = ScriptedProvider::new(vec![prediction_json("M100", 1, 1)]);
    let h = harness(provider, instant_retry(5)).await;
    drop_prediction_constraint(&h.store).await;
    let job = GenerationJob::new("M100", "gpt-4o", JobKind::Prediction);
    h.store.enqueue_jobs(&[job.clone()]).await.unwrap();

    let claimed = h.store.claim_next_job(Utc::now()).await.unwrap().unwrap();
    let outcome = h.pipeline.process(&claimed).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Halted(JobError::Write(WriteError::MissingConstraint {
            table: "match_predictions",
            key: "match_id, model_id",
        }))
    );

    let live = h.store.live_job(&job.natural_key()).await.unwrap().unwrap();
    assert_eq!(live.state, JobState::Pending);
    assert_eq!(live.job.attempt, 1);
    assert!(h.store.list_dead_letters(None, 10).await.unwrap().is_empty());
    assert!(h.store.predictions_for("M100").await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_pool_stops_with_an_error_on_missing_constraint() {
    let provider = ScriptedProvider::new(vec![prediction_json("M100", 1, 1)]);
    let h = harness(provider, instant_retry(5)).await;
    drop_prediction_constraint(&h.store).await;
    h.store
        .enqueue_jobs(&[GenerationJob::new("M100", "gpt-4o", JobKind::Prediction)])
        .await
        .unwrap();

    let pool = WorkerPool::new(
        h.pipeline.clone(),
        WorkerSettings {
            max_concurrency: 2,
            poll_interval: Duration::from_millis(5),
            jitter: Duration::ZERO,
            shutdown_grace: Duration::from_secs(1),
        },
    );
    let result = tokio::time::timeout(Duration::from_secs(5), pool.run())
        .await
        .expect("pool should halt on its own");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("no unique constraint"));
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 1);
}
