use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Timeout tier of a model. Decides how long an invocation may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Models with a long internal deliberation phase before output.
    Reasoning,
    Standard,
    /// Low-latency models tuned for structured replies.
    JsonStrict,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Reasoning => "reasoning",
            ModelTier::Standard => "standard",
            ModelTier::JsonStrict => "json-strict",
        }
    }
}

const BUILTIN_TIERS: &[(&str, ModelTier)] = &[
    ("deepseek-r1", ModelTier::Reasoning),
    ("deepseek-reasoner", ModelTier::Reasoning),
    ("o1", ModelTier::Reasoning),
    ("o1-mini", ModelTier::Reasoning),
    ("o3", ModelTier::Reasoning),
    ("o3-mini", ModelTier::Reasoning),
    ("o4-mini", ModelTier::Reasoning),
    ("qwq-32b", ModelTier::Reasoning),
    ("gemini-2.5-pro", ModelTier::Reasoning),
    ("gpt-x-json", ModelTier::JsonStrict),
    ("gpt-4o-mini", ModelTier::JsonStrict),
    ("gpt-4.1-nano", ModelTier::JsonStrict),
    ("gemini-2.0-flash-lite", ModelTier::JsonStrict),
];

/// Per-tier invocation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    pub reasoning: Duration,
    pub standard: Duration,
    pub json_strict: Duration,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            reasoning: Duration::from_secs(90),
            standard: Duration::from_secs(60),
            json_strict: Duration::from_secs(45),
        }
    }
}

impl TierTimeouts {
    pub fn timeout_for(&self, tier: ModelTier) -> Duration {
        match tier {
            ModelTier::Reasoning => self.reasoning,
            ModelTier::Standard => self.standard,
            ModelTier::JsonStrict => self.json_strict,
        }
    }
}

/// Static model id -> tier table, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    tiers: HashMap<String, ModelTier>,
    timeouts: TierTimeouts,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(TierTimeouts::default())
    }
}

impl ModelRegistry {
    pub fn new(timeouts: TierTimeouts) -> Self {
        let tiers = BUILTIN_TIERS
            .iter()
            .map(|(id, tier)| (id.to_string(), *tier))
            .collect();
        Self { tiers, timeouts }
    }

    /// Add or override classifications. Later entries win.
    pub fn with_overrides<'a, I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, ModelTier)>,
    {
        for (id, tier) in entries {
            self.tiers.insert(normalize(id), tier);
        }
        self
    }

    /// Unknown ids fall back to `Standard`.
    pub fn classify(&self, model_id: &str) -> ModelTier {
        self.tiers
            .get(&normalize(model_id))
            .copied()
            .unwrap_or(ModelTier::Standard)
    }

    pub fn timeout_for(&self, tier: ModelTier) -> Duration {
        self.timeouts.timeout_for(tier)
    }

    pub fn deadline_for(&self, model_id: &str) -> Duration {
        self.timeout_for(self.classify(model_id))
    }
}

fn normalize(model_id: &str) -> String {
    model_id.trim().to_lowercase()
}
