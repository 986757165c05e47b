use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::core::config::ModelsConfig;
use crate::core::errors::ValidationError;
use crate::core::generation::{GenerationJob, JobKind, MatchContext};
use crate::core::store::ContentStore;

/// Which fixtures a trigger covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every scheduled fixture kicking off from now on.
    All,
    Window {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    NextHours(u32),
    Match(String),
}

impl Scope {
    /// `all`, `window:<rfc3339>/<rfc3339>`, `next:<N>h`, `match:<id>` or a bare match id.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            bail!("scope must not be empty");
        }
        if token.eq_ignore_ascii_case("all") {
            return Ok(Scope::All);
        }
        if let Some(rest) = token.strip_prefix("window:") {
            let (from, to) = rest
                .split_once('/')
                .ok_or_else(|| anyhow!("window scope needs '<from>/<to>'"))?;
            let from = parse_instant(from)?;
            let to = parse_instant(to)?;
            if from >= to {
                bail!("window start must be before its end");
            }
            return Ok(Scope::Window { from, to });
        }
        if let Some(rest) = token.strip_prefix("next:") {
            let hours = rest
                .strip_suffix('h')
                .ok_or_else(|| anyhow!("next scope needs an 'h' suffix, e.g. next:48h"))?
                .parse::<u32>()
                .with_context(|| format!("invalid hour count in '{}'", token))?;
            if hours == 0 {
                bail!("next scope must cover at least one hour");
            }
            return Ok(Scope::NextHours(hours));
        }
        let id = token.strip_prefix("match:").unwrap_or(token).trim();
        if id.is_empty() || id.contains(char::is_whitespace) {
            bail!("invalid match id '{}'", id);
        }
        Ok(Scope::Match(id.to_string()))
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC 3339 timestamp '{}'", value))
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all"),
            Scope::Window { from, to } => {
                write!(f, "window:{}/{}", from.to_rfc3339(), to.to_rfc3339())
            }
            Scope::NextHours(h) => write!(f, "next:{}h", h),
            Scope::Match(id) => write!(f, "match:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub matches: usize,
    pub jobs_planned: usize,
    pub jobs_created: usize,
}

/// Thin producer: resolves a scope to fixtures and enqueues one job per key.
#[derive(Clone)]
pub struct TriggerAdapter {
    store: ContentStore,
    preview_model: String,
    prediction_models: Vec<String>,
}

impl TriggerAdapter {
    pub fn new(store: ContentStore, models: &ModelsConfig) -> Self {
        Self {
            store,
            preview_model: models.preview_model.trim().to_string(),
            prediction_models: models
                .prediction_models
                .iter()
                .map(|m| m.trim().to_string())
                .collect(),
        }
    }

    pub async fn resolve(&self, scope: &Scope, now: DateTime<Utc>) -> Result<Vec<MatchContext>> {
        match scope {
            Scope::All => self.store.scheduled_matches(Some(now), None).await,
            Scope::Window { from, to } => self.store.scheduled_matches(Some(*from), Some(*to)).await,
            Scope::NextHours(h) => {
                self.store
                    .scheduled_matches(Some(now), Some(now + Duration::hours(i64::from(*h))))
                    .await
            }
            Scope::Match(id) => match self.store.get_match(id).await? {
                Some(ctx) => Ok(vec![ctx]),
                None => Err(ValidationError::UnknownMatch(id.clone()).into()),
            },
        }
    }

    /// One preview job per fixture, one prediction job per fixture per prediction model.
    pub fn plan(&self, fixtures: &[MatchContext], kinds: &[JobKind]) -> Vec<GenerationJob> {
        let mut jobs = Vec::new();
        for ctx in fixtures {
            for kind in kinds {
                match kind {
                    JobKind::Preview => jobs.push(GenerationJob::new(
                        &ctx.match_id,
                        &self.preview_model,
                        JobKind::Preview,
                    )),
                    JobKind::Prediction => {
                        for model in &self.prediction_models {
                            jobs.push(GenerationJob::new(
                                &ctx.match_id,
                                model,
                                JobKind::Prediction,
                            ));
                        }
                    }
                }
            }
        }
        jobs
    }

    /// Keys that already have a live job are skipped, so re-triggering is idempotent.
    pub async fn enqueue(&self, scope: &Scope, kinds: &[JobKind]) -> Result<TriggerReport> {
        let fixtures = self.resolve(scope, Utc::now()).await?;
        let jobs = self.plan(&fixtures, kinds);
        let created = self.store.enqueue_jobs(&jobs).await?;
        info!(
            "Trigger '{}' matched {} fixture(s): {} job(s) created, {} already queued",
            scope,
            fixtures.len(),
            created,
            jobs.len() - created
        );
        Ok(TriggerReport {
            matches: fixtures.len(),
            jobs_planned: jobs.len(),
            jobs_created: created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_scope_tokens() {
        assert_eq!(Scope::parse("all").unwrap(), Scope::All);
        assert_eq!(Scope::parse("next:48h").unwrap(), Scope::NextHours(48));
        assert_eq!(
            Scope::parse("match:M100").unwrap(),
            Scope::Match("M100".into())
        );
        assert_eq!(Scope::parse("M100").unwrap(), Scope::Match("M100".into()));
        assert_eq!(
            Scope::parse("window:2026-10-17T00:00:00Z/2026-10-19T00:00:00Z").unwrap(),
            Scope::Window {
                from: Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
            }
        );
    }

    #[test]
    fn rejects_malformed_scopes() {
        for bad in [
            "",
            "next:48",
            "next:0h",
            "next:soonh",
            "window:2026-10-19T00:00:00Z/2026-10-17T00:00:00Z",
            "window:yesterday/today",
            "match: ",
            "two words",
        ] {
            assert!(Scope::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn display_round_trips() {
        for token in ["all", "next:6h", "match:M100"] {
            assert_eq!(Scope::parse(token).unwrap().to_string(), token);
        }
    }
}
