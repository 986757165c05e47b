//! Structural validation of model output.
//!
//! Models wrap JSON in prose, fenced blocks or a `<think>` preamble. We peel
//! those layers, then require exactly one entry for the requested match.

use serde::Deserialize;

use super::{GenerationPayload, JobKind, PredictionPayload, PreviewPayload};
use crate::core::errors::InvokeError;

const MAX_SCORE: u8 = 30;

#[derive(Deserialize)]
struct PredictionEnvelope {
    predictions: Vec<PredictionEntry>,
}

#[derive(Deserialize)]
struct PredictionEntry {
    match_id: String,
    home_score: u8,
    away_score: u8,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct PreviewEnvelope {
    previews: Vec<PreviewEntry>,
}

#[derive(Deserialize)]
struct PreviewEntry {
    match_id: String,
    headline: String,
    body: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// Remove a leading `<think>...</think>` block emitted by reasoning models.
pub(crate) fn strip_reasoning(text: &str) -> &str {
    let trimmed = text.trim_start();
    if trimmed.starts_with("<think>")
        && let Some(end) = trimmed.find("</think>")
    {
        return &trimmed[end + "</think>".len()..];
    }
    trimmed
}

/// Extract a JSON block from LLM output. Tries fenced ```json ... ``` first,
/// then the outermost `{ ... }` span.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = strip_reasoning(text).trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + "```json".len();
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    (close > open).then(|| &trimmed[open..=close])
}

pub fn parse(kind: JobKind, match_id: &str, text: &str) -> Result<GenerationPayload, InvokeError> {
    let json = extract_json_block(text)
        .ok_or_else(|| InvokeError::MalformedResponse("no JSON object in response".into()))?;
    match kind {
        JobKind::Prediction => parse_prediction(match_id, json).map(GenerationPayload::Prediction),
        JobKind::Preview => parse_preview(match_id, json).map(GenerationPayload::Preview),
    }
}

fn parse_prediction(match_id: &str, json: &str) -> Result<PredictionPayload, InvokeError> {
    let envelope: PredictionEnvelope = serde_json::from_str(json)
        .map_err(|e| InvokeError::MalformedResponse(format!("prediction shape: {}", e)))?;
    let entry = single_entry(envelope.predictions, match_id, |e| &e.match_id)?;

    if entry.home_score > MAX_SCORE || entry.away_score > MAX_SCORE {
        return Err(InvokeError::MalformedResponse(format!(
            "implausible score {}-{}",
            entry.home_score, entry.away_score
        )));
    }
    if let Some(c) = entry.confidence
        && !(0.0..=1.0).contains(&c)
    {
        return Err(InvokeError::MalformedResponse(format!(
            "confidence {} outside [0, 1]",
            c
        )));
    }

    Ok(PredictionPayload {
        home_score: entry.home_score,
        away_score: entry.away_score,
        confidence: entry.confidence,
        reasoning: entry.reasoning.filter(|r| !r.trim().is_empty()),
    })
}

fn parse_preview(match_id: &str, json: &str) -> Result<PreviewPayload, InvokeError> {
    let envelope: PreviewEnvelope = serde_json::from_str(json)
        .map_err(|e| InvokeError::MalformedResponse(format!("preview shape: {}", e)))?;
    let entry = single_entry(envelope.previews, match_id, |e| &e.match_id)?;

    if entry.headline.trim().is_empty() || entry.body.trim().is_empty() {
        return Err(InvokeError::MalformedResponse(
            "preview headline and body must be non-empty".into(),
        ));
    }

    Ok(PreviewPayload {
        headline: entry.headline.trim().to_string(),
        body: entry.body.trim().to_string(),
        key_points: entry
            .key_points
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
    })
}

fn single_entry<T>(
    entries: Vec<T>,
    match_id: &str,
    id_of: impl Fn(&T) -> &String,
) -> Result<T, InvokeError> {
    let mut matching = entries.into_iter().filter(|e| id_of(e) == match_id);
    let first = matching.next().ok_or_else(|| {
        InvokeError::MalformedResponse(format!("no entry for match {}", match_id))
    })?;
    if matching.next().is_some() {
        return Err(InvokeError::MalformedResponse(format!(
            "multiple entries for match {}",
            match_id
        )));
    }
    Ok(first)
}
