//! The generation pipeline: one job attempt end to end, plus the worker
//! pool and trigger adapter that feed it.

pub mod retry;
pub mod trigger;
pub mod worker;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::errors::{JobError, ValidationError};
use crate::core::generation::invoker::ModelInvoker;
use crate::core::generation::{GenerationJob, GenerationResult, request};
use crate::core::llm::registry::ModelRegistry;
use crate::core::store::{ContentStore, ResultWriter};
use retry::{RetryDecision, RetryPolicy};

/// Minimum wait before a job whose dead-letter write failed is claimed again.
const REQUEUE_FLOOR: Duration = Duration::from_secs(5);

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
}

/// How a single attempt was settled in the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    RetryScheduled { next_attempt: u32, delay: Duration },
    DeadLettered { entry_id: String },
    /// Dead-letter routing failed; the job stays live and waits out `delay`
    /// before it can be claimed again.
    Requeued { delay: Duration },
    /// A deployment invariant is broken. The job was released and the pool must stop.
    Halted(JobError),
}

pub struct Pipeline {
    store: ContentStore,
    writer: Arc<dyn ResultWriter>,
    invoker: ModelInvoker,
    registry: ModelRegistry,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        store: ContentStore,
        invoker: ModelInvoker,
        registry: ModelRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            writer: Arc::new(store.clone()),
            store,
            invoker,
            registry,
            retry,
        }
    }

    /// Route writes through a different sink. The queue stays on `store`.
    pub fn with_writer(mut self, writer: Arc<dyn ResultWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Build, invoke and persist. Never touches queue state.
    pub async fn attempt(&self, job: &GenerationJob) -> Result<GenerationResult, JobError> {
        let ctx = self
            .store
            .get_match(&job.match_id)
            .await
            .map_err(|e| JobError::FixtureRead {
                match_id: job.match_id.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| ValidationError::UnknownMatch(job.match_id.clone()))?;

        let req = request::build(&ctx, &job.model_id, job.kind)?;
        let deadline = self.registry.deadline_for(&job.model_id);
        let result = self.invoker.invoke(&req, deadline).await?;
        self.writer.upsert(&result).await?;
        Ok(result)
    }

    /// Run one claimed job and settle it: complete, reschedule, dead-letter or halt.
    pub async fn process(&self, job: &GenerationJob) -> Result<JobOutcome> {
        let err = match self.attempt(job).await {
            Ok(_) => {
                self.store.complete_job(&job.job_id).await?;
                info!("Job {} completed", job.natural_key());
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e,
        };

        match self.retry.decide(job.attempt, err.class()) {
            RetryDecision::Retry {
                next_attempt,
                delay,
            } => {
                warn!(
                    "Attempt {} of {} failed: {}. Retrying in {:?}",
                    job.attempt, self.retry.max_attempts, err, delay
                );
                self.store
                    .schedule_retry(&job.job_id, next_attempt, after(delay), &err.to_string())
                    .await?;
                Ok(JobOutcome::RetryScheduled {
                    next_attempt,
                    delay,
                })
            }
            RetryDecision::DeadLetter => {
                match self
                    .store
                    .dead_letter_job(job, &err.to_string(), err.class())
                    .await
                {
                    Ok(entry) => {
                        warn!(
                            "Job {} dead-lettered after {} attempt(s) as {}: {}",
                            job.natural_key(),
                            entry.attempts_made,
                            entry.error_class.as_str(),
                            err
                        );
                        Ok(JobOutcome::DeadLettered {
                            entry_id: entry.entry_id,
                        })
                    }
                    Err(dl_err) => {
                        let delay = self.retry.delay_after(job.attempt).max(REQUEUE_FLOOR);
                        error!(
                            "Failed to dead-letter job {}: {}. Requeued for {:?}",
                            job.natural_key(),
                            dl_err,
                            delay
                        );
                        let message = format!("{} (dead-letter failed: {})", err, dl_err);
                        self.store
                            .schedule_retry(&job.job_id, job.attempt, after(delay), &message)
                            .await?;
                        Ok(JobOutcome::Requeued { delay })
                    }
                }
            }
            RetryDecision::Halt => {
                error!("Fatal error on job {}: {}", job.natural_key(), err);
                self.store.release_job(&job.job_id).await?;
                Ok(JobOutcome::Halted(err))
            }
        }
    }
}
