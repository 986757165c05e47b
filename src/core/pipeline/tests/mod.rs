mod fatal;
mod idempotency;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::retry::RetryPolicy;
use super::trigger::TriggerAdapter;
use super::{JobOutcome, Pipeline};
use crate::core::config::ModelsConfig;
use crate::core::errors::InvokeError;
use crate::core::generation::MatchContext;
use crate::core::generation::invoker::ModelInvoker;
use crate::core::llm::registry::ModelRegistry;
use crate::core::llm::{ChatMessage, LlmProvider, ProviderRouter};
use crate::core::store::{ContentStore, MatchRecord};

pub(super) const MODELS: &[&str] = &["gpt-4o", "deepseek-r1", "gpt-x-json"];

/// Replays a fixed script of replies. The last entry repeats once the script runs out.
pub(super) struct ScriptedProvider {
    script: std::sync::Mutex<VecDeque<Result<String, InvokeError>>>,
    delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, InvokeError>>) -> Arc<Self> {
        Self::slow(script, Duration::ZERO)
    }

    pub fn slow(script: Vec<Result<String, InvokeError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: std::sync::Mutex::new(script.into()),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Result<String, InvokeError> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(InvokeError::ConnectionFailure("empty script".into())))
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _model_id: &str,
        _messages: &[ChatMessage],
    ) -> Result<String, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_reply()
    }
}

/// Answers every request with valid JSON for the match named in the prompt.
pub(super) struct EchoProvider {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let prompt = &messages[1].content;
        let match_id = prompt
            .split("match_id \"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default();
        if messages[0].content.contains("\"previews\"") {
            preview_json(match_id, &format!("Preview by {}", model_id))
        } else {
            prediction_json(match_id, 2, 1)
        }
    }
}

pub(super) fn prediction_json(match_id: &str, home: u8, away: u8) -> Result<String, InvokeError> {
    Ok(format!(
        r#"{{"predictions":[{{"match_id":"{}","home_score":{},"away_score":{},"confidence":0.55}}]}}"#,
        match_id, home, away
    ))
}

pub(super) fn preview_json(match_id: &str, headline: &str) -> Result<String, InvokeError> {
    Ok(format!(
        r#"{{"previews":[{{"match_id":"{}","headline":"{}","body":"A tight contest is expected.","key_points":["Form"]}}]}}"#,
        match_id, headline
    ))
}

pub(super) fn fixture(match_id: &str) -> MatchRecord {
    MatchRecord {
        context: MatchContext {
            match_id: match_id.to_string(),
            home_team: Some("Arsenal".into()),
            away_team: Some("Chelsea".into()),
            competition: Some("Premier League".into()),
            kickoff_at: Some(Utc.with_ymd_and_hms(2099, 5, 1, 15, 0, 0).unwrap()),
            venue: Some("Emirates Stadium".into()),
        },
        status: "scheduled".into(),
    }
}

/// Retries become claimable immediately so tests can drive the queue by hand.
pub(super) fn instant_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

pub(super) fn models_config() -> ModelsConfig {
    ModelsConfig {
        preview_model: "gpt-4o".into(),
        prediction_models: vec!["deepseek-r1".into(), "gpt-x-json".into()],
        ..ModelsConfig::default()
    }
}

pub(super) struct Harness {
    pub store: ContentStore,
    pub pipeline: Arc<Pipeline>,
    pub trigger: TriggerAdapter,
}

pub(super) async fn harness(provider: Arc<ScriptedProvider>, retry: RetryPolicy) -> Harness {
    let store = ContentStore::in_memory().await.unwrap();
    for id in ["M100", "M200"] {
        store.upsert_match(&fixture(id)).await.unwrap();
    }
    let mut router = ProviderRouter::new();
    for model in MODELS {
        router.register(model, provider.clone());
    }
    let pipeline = Pipeline::new(
        store.clone(),
        ModelInvoker::new(router),
        ModelRegistry::default(),
        retry,
    );
    Harness {
        trigger: TriggerAdapter::new(store.clone(), &models_config()),
        store,
        pipeline: Arc::new(pipeline),
    }
}

/// Claim and process jobs one at a time until nothing is ready.
pub(super) async fn drain(pipeline: &Pipeline) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    while let Some(job) = pipeline.store().claim_next_job(Utc::now()).await.unwrap() {
        outcomes.push(pipeline.process(&job).await.unwrap());
    }
    outcomes
}
