use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::FailureClass;
use crate::core::generation::{GenerationJob, PredictionPayload, PreviewPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    InFlight,
    RetryScheduled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::InFlight => "in_flight",
            JobState::RetryScheduled => "retry_scheduled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobState::Pending),
            "in_flight" => Some(JobState::InFlight),
            "retry_scheduled" => Some(JobState::RetryScheduled),
            _ => None,
        }
    }
}

/// A queued job plus the bookkeeping the queue keeps alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedJob {
    #[serde(flatten)]
    pub job: GenerationJob,
    pub state: JobState,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub retry_scheduled: u64,
    pub dead_letters_open: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Open,
    Replayed,
}

impl DeadLetterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadLetterStatus::Open => "open",
            DeadLetterStatus::Replayed => "replayed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(DeadLetterStatus::Open),
            "replayed" => Some(DeadLetterStatus::Replayed),
            _ => None,
        }
    }
}

/// Terminal record of a job that will not be retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterEntry {
    pub entry_id: String,
    pub job: GenerationJob,
    pub natural_key: String,
    pub last_error: String,
    pub error_class: FailureClass,
    pub attempts_made: u32,
    pub failed_at: DateTime<Utc>,
    pub status: DeadLetterStatus,
    pub replayed_at: Option<DateTime<Utc>>,
    pub replay_job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// A fresh job was enqueued at attempt 1.
    Enqueued { job_id: String },
    /// A live job for the same key already existed; the entry points at it.
    Coalesced { job_id: String },
    AlreadyReplayed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPreview {
    pub match_id: String,
    pub model_id: String,
    #[serde(flatten)]
    pub payload: PreviewPayload,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrediction {
    pub match_id: String,
    pub model_id: String,
    #[serde(flatten)]
    pub payload: PredictionPayload,
    pub generated_at: DateTime<Utc>,
}

/// Fixed-width UTC timestamps so text columns sort chronologically.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a text column read inside a row mapper, surfacing bad data as a conversion error.
pub(crate) fn column_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp '{}'", value).into(),
        )
    })
}

pub(crate) fn epoch_ms(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub(crate) fn from_epoch_ms(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_default()
}
