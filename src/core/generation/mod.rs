//! Generation domain types shared by the request builder, the model invoker,
//! the idempotent writer and the job queue.

pub mod invoker;
pub mod request;
pub mod response;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Preview,
    Prediction,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Preview => "preview",
            JobKind::Prediction => "prediction",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "preview" | "previews" => Some(JobKind::Preview),
            "prediction" | "predictions" => Some(JobKind::Prediction),
            _ => None,
        }
    }
}

/// Identity of a stored content row: `preview:<match>` or `prediction:<match>:<model>`.
///
/// The queue allows at most one live job per key, which keeps the writer's
/// last-writer-wins upsert from racing itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(kind: JobKind, match_id: &str, model_id: &str) -> Self {
        match kind {
            JobKind::Preview => Self(format!("preview:{}", match_id)),
            JobKind::Prediction => Self(format!("prediction:{}:{}", match_id, model_id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub match_id: String,
    pub model_id: String,
    pub kind: JobKind,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(match_id: &str, model_id: &str, kind: JobKind) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            match_id: match_id.to_string(),
            model_id: model_id.to_string(),
            kind,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.kind, &self.match_id, &self.model_id)
    }
}

/// Fixture data the prompt is built from. Optional fields are validated by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchContext {
    pub match_id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub competition: Option<String>,
    pub kickoff_at: Option<DateTime<Utc>>,
    pub venue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewPayload {
    pub headline: String,
    pub body: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPayload {
    pub home_score: u8,
    pub away_score: u8,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationPayload {
    Preview(PreviewPayload),
    Prediction(PredictionPayload),
}

/// Validated output of one model invocation. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub match_id: String,
    pub model_id: String,
    pub payload: GenerationPayload,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn kind(&self) -> JobKind {
        match self.payload {
            GenerationPayload::Preview(_) => JobKind::Preview,
            GenerationPayload::Prediction(_) => JobKind::Prediction,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.kind(), &self.match_id, &self.model_id)
    }
}
