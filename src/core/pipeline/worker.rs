use anyhow::{Result, anyhow};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use super::{JobOutcome, Pipeline};
use crate::core::config::QueueConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub jitter: Duration,
    pub shutdown_grace: Duration,
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(q: &QueueConfig) -> Self {
        Self {
            max_concurrency: q.max_concurrency.max(1),
            poll_interval: Duration::from_millis(q.poll_interval_ms),
            jitter: Duration::from_millis(q.poll_jitter_ms),
            shutdown_grace: Duration::from_secs(q.shutdown_grace_secs),
        }
    }
}

/// Bounded pool pulling jobs from the queue until shut down or halted.
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    settings: WorkerSettings,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, settings: WorkerSettings) -> Self {
        Self {
            pipeline,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel this token to stop claiming and start draining.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.settings.jitter.is_zero() {
            return self.settings.poll_interval;
        }
        let jitter_millis = u64::try_from(self.settings.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.settings.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Returns `Err` only when a fatal job error halted the pool.
    pub async fn run(self) -> Result<()> {
        let store = self.pipeline.store().clone();
        let recovered = store.recover_in_flight().await?;
        if recovered > 0 {
            info!("Recovered {} interrupted job(s) back to pending", recovered);
        }
        info!(
            "Worker pool started (max_concurrency={})",
            self.settings.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks: JoinSet<Result<JobOutcome>> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();
        let mut fatal = None;

        loop {
            while let Some(joined) = tasks.try_join_next_with_id() {
                self.settle(joined, &mut running, &mut fatal).await;
            }
            if fatal.is_some() {
                self.shutdown.cancel();
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit?,
            };

            match store.claim_next_job(Utc::now()).await {
                Ok(Some(job)) => {
                    let span = info_span!(
                        "job",
                        job.id = %job.job_id,
                        match_id = %job.match_id,
                        model_id = %job.model_id,
                        kind = job.kind.as_str(),
                        attempt = job.attempt
                    );
                    let job_id = job.job_id.clone();
                    let pipeline = self.pipeline.clone();
                    let handle = tasks.spawn(
                        async move {
                            let _permit = permit;
                            debug!("Running job");
                            pipeline.process(&job).await
                        }
                        .instrument(span),
                    );
                    running.insert(handle.id(), job_id);
                }
                Ok(None) => {
                    drop(permit);
                    let wait = self.sleep_duration_with_jitter();
                    trace!("No ready jobs. Polling again in {:?}", wait);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                        Some(joined) = tasks.join_next_with_id() => {
                            self.settle(joined, &mut running, &mut fatal).await;
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to claim next job: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.sleep_duration_with_jitter()) => {}
                    }
                }
            }
        }

        self.drain(&mut tasks, &mut running, &mut fatal).await;

        match fatal {
            Some(reason) => Err(anyhow!("Pipeline halted: {}", reason)),
            None => {
                info!("Worker pool stopped");
                Ok(())
            }
        }
    }

    /// Give in-flight attempts the grace period, then abort and release the rest.
    async fn drain(
        &self,
        tasks: &mut JoinSet<Result<JobOutcome>>,
        running: &mut HashMap<Id, String>,
        fatal: &mut Option<String>,
    ) {
        if !tasks.is_empty() {
            info!(
                "Waiting up to {:?} for {} in-flight job(s)",
                self.settings.shutdown_grace,
                tasks.len()
            );
        }
        let grace = tokio::time::sleep(self.settings.shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => break,
                joined = tasks.join_next_with_id() => match joined {
                    Some(joined) => self.settle(joined, running, fatal).await,
                    None => break,
                },
            }
        }

        if tasks.is_empty() {
            return;
        }
        warn!("Aborting {} job(s) still running after grace period", tasks.len());
        tasks.abort_all();
        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, running, fatal).await;
        }
    }

    async fn settle(
        &self,
        joined: std::result::Result<(Id, Result<JobOutcome>), JoinError>,
        running: &mut HashMap<Id, String>,
        fatal: &mut Option<String>,
    ) {
        match joined {
            Ok((id, outcome)) => {
                let job_id = running.remove(&id);
                match outcome {
                    Ok(JobOutcome::Halted(err)) => {
                        if fatal.is_none() {
                            *fatal = Some(err.to_string());
                        }
                    }
                    Ok(outcome) => debug!("Job settled: {:?}", outcome),
                    Err(e) => {
                        // The attempt ran but its queue bookkeeping failed.
                        error!("Failed to settle job: {}", e);
                        if let Some(job_id) = job_id {
                            self.release(&job_id).await;
                        }
                    }
                }
            }
            Err(join_err) => {
                let Some(job_id) = running.remove(&join_err.id()) else {
                    return;
                };
                if join_err.is_panic() {
                    error!("Job {} panicked", job_id);
                } else {
                    debug!("Job {} aborted", job_id);
                }
                self.release(&job_id).await;
            }
        }
    }

    async fn release(&self, job_id: &str) {
        if let Err(e) = self.pipeline.store().release_job(job_id).await {
            error!(
                "Failed to release job {}: {}. It will be recovered on next start",
                job_id, e
            );
        }
    }
}
