use serde::Serialize;

use super::{JobKind, MatchContext};
use crate::core::errors::ValidationError;
use crate::core::llm::ChatMessage;

const PREDICTION_SYSTEM_PROMPT: &str = "You are a football analyst producing score predictions. \
Reply with JSON only, no prose, in exactly this shape: \
{\"predictions\":[{\"match_id\":string,\"home_score\":integer,\"away_score\":integer,\
\"confidence\":number between 0 and 1,\"reasoning\":string}]}";

const PREVIEW_SYSTEM_PROMPT: &str = "You are a football writer producing match previews. \
Reply with JSON only, no prose, in exactly this shape: \
{\"previews\":[{\"match_id\":string,\"headline\":string,\"body\":string,\
\"key_points\":[string]}]}";

/// Payload for one model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub match_id: String,
    pub model_id: String,
    pub kind: JobKind,
    pub messages: Vec<ChatMessage>,
}

/// Assemble the request for `model_id`. Pure: equal inputs give equal requests.
pub fn build(
    ctx: &MatchContext,
    model_id: &str,
    kind: JobKind,
) -> Result<GenerationRequest, ValidationError> {
    if model_id.trim().is_empty() {
        return Err(ValidationError::EmptyModel);
    }
    let home = required(ctx, "home_team", ctx.home_team.as_deref())?;
    let away = required(ctx, "away_team", ctx.away_team.as_deref())?;
    let competition = required(ctx, "competition", ctx.competition.as_deref())?;
    let kickoff = ctx.kickoff_at.ok_or_else(|| ValidationError::MissingField {
        match_id: ctx.match_id.clone(),
        field: "kickoff_at",
    })?;

    let mut parts = Vec::new();
    parts.push(format!("# Match {}", ctx.match_id));
    parts.push(format!("Fixture: {} vs {}", home, away));
    parts.push(format!("Competition: {}", competition));
    parts.push(format!(
        "Kickoff (UTC): {}",
        kickoff.format("%Y-%m-%d %H:%M")
    ));
    if let Some(venue) = ctx.venue.as_deref().filter(|v| !v.trim().is_empty()) {
        parts.push(format!("Venue: {}", venue.trim()));
    }
    parts.push(String::new());
    parts.push(match kind {
        JobKind::Prediction => format!(
            "Predict the full-time score. Use match_id \"{}\" and return exactly one prediction.",
            ctx.match_id
        ),
        JobKind::Preview => format!(
            "Write a preview of this match. Use match_id \"{}\" and return exactly one preview.",
            ctx.match_id
        ),
    });

    let system = match kind {
        JobKind::Prediction => PREDICTION_SYSTEM_PROMPT,
        JobKind::Preview => PREVIEW_SYSTEM_PROMPT,
    };

    Ok(GenerationRequest {
        match_id: ctx.match_id.clone(),
        model_id: model_id.trim().to_string(),
        kind,
        messages: vec![ChatMessage::system(system), ChatMessage::user(parts.join("\n"))],
    })
}

fn required<'a>(
    ctx: &MatchContext,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, ValidationError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationError::MissingField {
            match_id: ctx.match_id.clone(),
            field,
        })
}
