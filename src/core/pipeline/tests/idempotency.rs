use std::time::Duration;
use tokio::task::JoinSet;

use super::*;
use crate::core::errors::WriteError;
use crate::core::generation::{GenerationJob, GenerationPayload, GenerationResult, JobKind, PredictionPayload};
use crate::core::pipeline::trigger::Scope;
use crate::core::store::ResultWriter;

#[tokio::test]
async fn retriggering_a_pending_scope_creates_nothing() {
    let h = harness(ScriptedProvider::new(vec![]), instant_retry(5)).await;
    let kinds = [JobKind::Preview, JobKind::Prediction];

    let first = h.trigger.enqueue(&Scope::All, &kinds).await.unwrap();
    // Two fixtures: one preview plus two prediction models each.
    assert_eq!(first.matches, 2);
    assert_eq!(first.jobs_created, 6);

    let again = h.trigger.enqueue(&Scope::All, &kinds).await.unwrap();
    assert_eq!(again.jobs_planned, 6);
    assert_eq!(again.jobs_created, 0);
    assert_eq!(h.store.queue_stats().await.unwrap().pending, 6);
}

#[tokio::test]
async fn retriggering_while_in_flight_creates_nothing() {
    let h = harness(ScriptedProvider::new(vec![]), instant_retry(5)).await;
    let scope = Scope::Match("M100".into());
    h.trigger.enqueue(&scope, &[JobKind::Preview]).await.unwrap();
    h.store.claim_next_job(Utc::now()).await.unwrap().unwrap();

    let report = h.trigger.enqueue(&scope, &[JobKind::Preview]).await.unwrap();
    assert_eq!(report.jobs_created, 0);
    let stats = h.store.queue_stats().await.unwrap();
    assert_eq!((stats.pending, stats.in_flight), (0, 1));
}

#[tokio::test]
async fn concurrent_submissions_for_one_key_create_one_job() {
    let h = harness(ScriptedProvider::new(vec![]), instant_retry(5)).await;
    let mut submissions = JoinSet::new();
    for _ in 0..16 {
        let store = h.store.clone();
        submissions.spawn(async move {
            store
                .enqueue_jobs(&[GenerationJob::new("M100", "deepseek-r1", JobKind::Prediction)])
                .await
                .unwrap()
        });
    }
    let mut created = 0;
    while let Some(n) = submissions.join_next().await {
        created += n.unwrap();
    }
    assert_eq!(created, 1);
    assert_eq!(h.store.list_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn second_upsert_for_a_key_wins() {
    let h = harness(ScriptedProvider::new(vec![]), instant_retry(5)).await;
    for (home, away) in [(1, 0), (2, 2)] {
        h.store
            .upsert(&GenerationResult {
                match_id: "M100".into(),
                model_id: "A".into(),
                payload: GenerationPayload::Prediction(PredictionPayload {
                    home_score: home,
                    away_score: away,
                    confidence: None,
                    reasoning: None,
                }),
                generated_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    let rows = h.store.predictions_for("M100").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].payload.home_score, rows[0].payload.away_score), (2, 2));
}

#[tokio::test]
async fn rerun_after_completion_overwrites_with_latest_attempt() {
    let provider = ScriptedProvider::new(vec![
        preview_json("M100", "First look"),
        preview_json("M100", "Team news changes everything"),
    ]);
    let h = harness(provider, instant_retry(5)).await;
    let scope = Scope::Match("M100".into());

    h.trigger.enqueue(&scope, &[JobKind::Preview]).await.unwrap();
    drain(&h.pipeline).await;
    h.trigger.enqueue(&scope, &[JobKind::Preview]).await.unwrap();
    drain(&h.pipeline).await;

    let preview = h.store.get_preview("M100").await.unwrap().unwrap();
    assert_eq!(preview.payload.headline, "Team news changes everything");
}

/// Records overlapping writes per natural key.
struct OverlapWriter {
    inner: ContentStore,
    active: std::sync::Mutex<std::collections::HashSet<String>>,
    overlaps: AtomicUsize,
}

#[async_trait]
impl ResultWriter for OverlapWriter {
    async fn upsert(&self, result: &GenerationResult) -> Result<(), WriteError> {
        let key = result.natural_key().to_string();
        if !self.active.lock().unwrap().insert(key.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = self.inner.upsert(result).await;
        self.active.lock().unwrap().remove(&key);
        outcome
    }
}

#[tokio::test]
async fn worker_pool_never_runs_one_key_twice_at_once() {
    use crate::core::pipeline::worker::{WorkerPool, WorkerSettings};

    let echo = Arc::new(EchoProvider {
        delay: Duration::from_millis(20),
        calls: AtomicUsize::new(0),
    });
    let store = ContentStore::in_memory().await.unwrap();
    for id in ["M100", "M200", "M300"] {
        store.upsert_match(&fixture(id)).await.unwrap();
    }
    let mut router = ProviderRouter::new();
    for model in MODELS {
        router.register(model, echo.clone());
    }
    let writer = Arc::new(OverlapWriter {
        inner: store.clone(),
        active: Default::default(),
        overlaps: AtomicUsize::new(0),
    });
    let pipeline = Arc::new(
        Pipeline::new(
            store.clone(),
            ModelInvoker::new(router),
            ModelRegistry::default(),
            instant_retry(3),
        )
        .with_writer(writer.clone()),
    );
    let trigger = TriggerAdapter::new(store.clone(), &models_config());

    let pool = WorkerPool::new(
        pipeline,
        WorkerSettings {
            max_concurrency: 4,
            poll_interval: Duration::from_millis(5),
            jitter: Duration::ZERO,
            shutdown_grace: Duration::from_secs(5),
        },
    );
    let shutdown = pool.shutdown_token();
    let running = tokio::spawn(pool.run());

    let kinds = [JobKind::Preview, JobKind::Prediction];
    let mut created = 0;
    for _ in 0..5 {
        created += trigger.enqueue(&Scope::All, &kinds).await.unwrap().jobs_created;
        tokio::time::sleep(Duration::from_millis(7)).await;
    }
    assert!(created >= 9);

    for _ in 0..400 {
        let stats = store.queue_stats().await.unwrap();
        if stats.pending + stats.in_flight + stats.retry_scheduled == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(writer.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(echo.calls.load(Ordering::SeqCst), created);
    for id in ["M100", "M200", "M300"] {
        assert_eq!(store.predictions_for(id).await.unwrap().len(), 2);
        assert!(store.get_preview(id).await.unwrap().is_some());
    }
}
