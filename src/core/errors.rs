use std::time::Duration;

use thiserror::Error;

/// How the worker loop reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Schedule another attempt after backoff, until the retry budget runs out.
    Retryable,
    /// Dead-letter immediately; retrying cannot fix the input.
    Permanent,
    /// Deployment invariant broken. The pipeline stops instead of dropping writes.
    Fatal,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Retryable => "retryable",
            FailureClass::Permanent => "permanent",
            FailureClass::Fatal => "fatal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retryable" => Some(FailureClass::Retryable),
            "permanent" => Some(FailureClass::Permanent),
            "fatal" => Some(FailureClass::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("match {match_id} is missing required field '{field}'")]
    MissingField {
        match_id: String,
        field: &'static str,
    },
    #[error("match {0} not found")]
    UnknownMatch(String),
    #[error("model id must not be empty")]
    EmptyModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("model call exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("provider unavailable (HTTP {status})")]
    Unavailable { status: u16 },
    #[error("provider rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("no provider serves model '{0}'")]
    UnknownModel(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl InvokeError {
    pub fn class(&self) -> FailureClass {
        match self {
            InvokeError::Timeout(_)
            | InvokeError::ConnectionFailure(_)
            | InvokeError::Unavailable { .. } => FailureClass::Retryable,
            InvokeError::Rejected { .. }
            | InvokeError::UnknownModel(_)
            | InvokeError::MalformedResponse(_) => FailureClass::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("table '{table}' has no unique constraint on ({key})")]
    MissingConstraint { table: &'static str, key: &'static str },
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl WriteError {
    pub fn class(&self) -> FailureClass {
        match self {
            WriteError::MissingConstraint { .. } => FailureClass::Fatal,
            WriteError::Transient(_) => FailureClass::Retryable,
            WriteError::Storage(_) => FailureClass::Permanent,
        }
    }
}

/// Everything that can end a single job attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// The fixture row could not be read. Nothing was generated yet.
    #[error("reading fixture {match_id}: {reason}")]
    FixtureRead { match_id: String, reason: String },
}

impl JobError {
    pub fn class(&self) -> FailureClass {
        match self {
            JobError::Validation(_) => FailureClass::Permanent,
            JobError::Invoke(e) => e.class(),
            JobError::Write(e) => e.class(),
            JobError::FixtureRead { .. } => FailureClass::Retryable,
        }
    }
}
