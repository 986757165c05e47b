use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::generation::JobKind;
use crate::core::llm::catalog::ProviderDef;
use crate::core::llm::registry::{ModelRegistry, ModelTier, TierTimeouts};
use crate::core::pipeline::retry::RetryPolicy;
use crate::core::pipeline::trigger::Scope;

pub const CONFIG_FILE: &str = "matchday.toml";
pub const SECRET_ENV: &str = "MATCHDAY_TRIGGER_SECRET";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub api: ApiConfig,
    pub trigger: TriggerConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub models: ModelsConfig,
    pub providers: Vec<ProviderDef>,
    pub schedules: Vec<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Shared secret for the trigger and dead-letter API.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub poll_jitter_ms: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub reasoning_secs: u64,
    pub standard_secs: u64,
    pub json_strict_secs: u64,
}

impl TimeoutConfig {
    /// The deadline of the slowest tier.
    pub fn longest_secs(&self) -> u64 {
        self.reasoning_secs
            .max(self.standard_secs)
            .max(self.json_strict_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub preview_model: String,
    pub prediction_models: Vec<String>,
    /// Extra ids merged into the built-in tier table.
    pub reasoning: Vec<String>,
    pub standard: Vec<String>,
    pub json_strict: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Six-field cron expression (seconds first).
    pub cron: String,
    pub scope: String,
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: None,
            log_level: "info".to_string(),
            log_file: None,
            api: ApiConfig::default(),
            trigger: TriggerConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            models: ModelsConfig::default(),
            providers: Vec::new(),
            schedules: Vec::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval_ms: 1000,
            poll_jitter_ms: 250,
            shutdown_grace_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 600,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reasoning_secs: 90,
            standard_secs: 60,
            json_strict_secs: 45,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            preview_model: "gpt-4o".to_string(),
            prediction_models: vec!["deepseek-r1".to_string(), "gpt-4o".to_string()],
            reasoning: Vec::new(),
            standard: Vec::new(),
            json_strict: Vec::new(),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".matchday")
}

impl PipelineConfig {
    /// Load from `path`, or from `matchday.toml` in the default data directory.
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    bail!("Config file {} does not exist", p.display());
                }
                p.to_path_buf()
            }
            None => default_data_dir().join(CONFIG_FILE),
        };

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("reading {}", config_path.display()))?;
            let parsed = Self::from_toml(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            info!("Loaded config from {}", config_path.display());
            parsed
        } else {
            info!("No {} found, using defaults.", CONFIG_FILE);
            Self::default()
        };

        config.apply_env_with(|var| std::env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(SECRET_ENV).filter(|s| !s.trim().is_empty()) {
            self.trigger.secret = Some(secret);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrency < 1 {
            bail!("queue.max_concurrency must be at least 1");
        }
        if self.retry.max_attempts < 1 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_secs > self.retry.max_delay_secs {
            bail!(
                "retry.base_delay_secs ({}) exceeds retry.max_delay_secs ({})",
                self.retry.base_delay_secs,
                self.retry.max_delay_secs
            );
        }
        // In-flight calls must be able to reach their own deadline before a drain aborts them.
        if self.queue.shutdown_grace_secs < self.timeouts.longest_secs() {
            bail!(
                "queue.shutdown_grace_secs ({}) is shorter than the longest model deadline ({}s)",
                self.queue.shutdown_grace_secs,
                self.timeouts.longest_secs()
            );
        }
        if self.models.preview_model.trim().is_empty() {
            bail!("models.preview_model must not be empty");
        }
        if self
            .models
            .prediction_models
            .iter()
            .any(|m| m.trim().is_empty())
        {
            bail!("models.prediction_models contains an empty id");
        }
        for schedule in &self.schedules {
            Scope::parse(&schedule.scope)
                .with_context(|| format!("schedule '{}'", schedule.cron))?;
            schedule
                .job_kinds()
                .with_context(|| format!("schedule '{}'", schedule.cron))?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir().join("matchday.db"))
    }

    pub fn tier_timeouts(&self) -> TierTimeouts {
        TierTimeouts {
            reasoning: Duration::from_secs(self.timeouts.reasoning_secs),
            standard: Duration::from_secs(self.timeouts.standard_secs),
            json_strict: Duration::from_secs(self.timeouts.json_strict_secs),
        }
    }

    pub fn model_registry(&self) -> ModelRegistry {
        let m = &self.models;
        let overrides = m
            .standard
            .iter()
            .map(|id| (id.as_str(), ModelTier::Standard))
            .chain(m.reasoning.iter().map(|id| (id.as_str(), ModelTier::Reasoning)))
            .chain(
                m.json_strict
                    .iter()
                    .map(|id| (id.as_str(), ModelTier::JsonStrict)),
            );
        ModelRegistry::new(self.tier_timeouts()).with_overrides(overrides)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_secs(self.retry.base_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn trigger_secret(&self) -> Option<&str> {
        self.trigger
            .secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

impl ScheduleConfig {
    pub fn job_kinds(&self) -> Result<Vec<JobKind>> {
        parse_kinds(&self.kinds)
    }
}

/// Parse kind names; an empty list means both kinds.
pub fn parse_kinds<S: AsRef<str>>(names: &[S]) -> Result<Vec<JobKind>> {
    if names.is_empty() {
        return Ok(vec![JobKind::Preview, JobKind::Prediction]);
    }
    let mut kinds = Vec::new();
    for name in names {
        let name = name.as_ref();
        let kind = JobKind::from_name(name)
            .with_context(|| format!("unknown job kind '{}'", name))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_documented_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_secs(30));
        assert_eq!(config.retry_policy().max_delay, Duration::from_secs(600));
        assert_eq!(config.tier_timeouts(), TierTimeouts::default());
        assert_eq!(config.queue.max_concurrency, 4);
        assert_eq!(config.queue.shutdown_grace_secs, 120);
        assert!(config.queue.shutdown_grace_secs > config.timeouts.longest_secs());
        assert_eq!(config.log_level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn parses_full_config() {
        let config = PipelineConfig::from_toml(
            r#"
            log_level = "debug"
            database = "/tmp/matchday-test.db"

            [api]
            port = 9000

            [trigger]
            secret = "s3cret"

            [queue]
            max_concurrency = 8

            [retry]
            max_attempts = 3
            base_delay_secs = 10
            max_delay_secs = 60

            [models]
            preview_model = "gemini-2.0-flash"
            prediction_models = ["deepseek-r1", "house-model"]
            reasoning = ["house-model"]

            [[providers]]
            id = "house"
            api_format = "openai"
            base_url = "http://localhost:8000/v1"
            api_key_env = "HOUSE_KEY"
            models = ["house-model"]

            [[schedules]]
            cron = "0 0 6 * * *"
            scope = "next:48h"
            kinds = ["preview"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.trigger_secret(), Some("s3cret"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/matchday-test.db"));
        assert_eq!(config.providers[0].models, vec!["house-model".to_string()]);
        assert_eq!(
            config.schedules[0].job_kinds().unwrap(),
            vec![JobKind::Preview]
        );
        assert_eq!(
            config.model_registry().classify("house-model"),
            ModelTier::Reasoning
        );
    }

    #[test]
    fn env_secret_overrides_file() {
        let mut config = PipelineConfig::from_toml("[trigger]\nsecret = \"file\"").unwrap();
        config.apply_env_with(|var| (var == SECRET_ENV).then(|| "env".to_string()));
        assert_eq!(config.trigger_secret(), Some("env"));
    }

    #[test]
    fn rejects_zero_concurrency_and_inverted_delays() {
        let config = PipelineConfig::from_toml("[queue]\nmax_concurrency = 0").unwrap();
        assert!(config.validate().is_err());

        let config =
            PipelineConfig::from_toml("[retry]\nbase_delay_secs = 900\nmax_delay_secs = 60")
                .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_grace_shorter_than_slowest_deadline() {
        let config = PipelineConfig::from_toml("[queue]\nshutdown_grace_secs = 30").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("longest model deadline (90s)"));

        let config = PipelineConfig::from_toml(
            "[queue]\nshutdown_grace_secs = 30\n[timeouts]\nreasoning_secs = 20\nstandard_secs = 20\njson_strict_secs = 20",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_schedule_scope() {
        let config = PipelineConfig::from_toml(
            "[[schedules]]\ncron = \"0 0 * * * *\"\nscope = \"next:soon\"",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_kinds_mean_both() {
        let none: [&str; 0] = [];
        assert_eq!(
            parse_kinds(&none).unwrap(),
            vec![JobKind::Preview, JobKind::Prediction]
        );
        assert!(parse_kinds(&["stats"]).is_err());
    }

    #[tokio::test]
    async fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[retry]\nmax_attempts = 2\n").unwrap();
        let config = PipelineConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[tokio::test]
    async fn load_fails_for_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            PipelineConfig::load(Some(&dir.path().join("absent.toml")))
                .await
                .is_err()
        );
    }
}
