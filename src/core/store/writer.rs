use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use super::types::{StoredPrediction, StoredPreview, column_ts, ts};
use super::{ContentStore, classify_write_error};
use crate::core::errors::WriteError;
use crate::core::generation::{
    GenerationPayload, GenerationResult, PredictionPayload, PreviewPayload,
};

/// Persistence seam for validated results.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// Insert-or-update keyed by the result's natural key. Last writer wins.
    async fn upsert(&self, result: &GenerationResult) -> Result<(), WriteError>;
}

const UPSERT_PREVIEW: &str = "INSERT INTO match_previews
        (match_id, model_id, headline, body, key_points_json, generated_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
     ON CONFLICT(match_id) DO UPDATE SET
        model_id = excluded.model_id,
        headline = excluded.headline,
        body = excluded.body,
        key_points_json = excluded.key_points_json,
        generated_at = excluded.generated_at,
        updated_at = CURRENT_TIMESTAMP";

const UPSERT_PREDICTION: &str = "INSERT INTO match_predictions
        (match_id, model_id, home_score, away_score, confidence, reasoning, generated_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
     ON CONFLICT(match_id, model_id) DO UPDATE SET
        home_score = excluded.home_score,
        away_score = excluded.away_score,
        confidence = excluded.confidence,
        reasoning = excluded.reasoning,
        generated_at = excluded.generated_at,
        updated_at = CURRENT_TIMESTAMP";

#[async_trait]
impl ResultWriter for ContentStore {
    async fn upsert(&self, result: &GenerationResult) -> Result<(), WriteError> {
        let db = self.db.lock().await;
        let generated_at = ts(result.generated_at);
        match &result.payload {
            GenerationPayload::Preview(p) => {
                let key_points = serde_json::to_string(&p.key_points)
                    .map_err(|e| WriteError::Storage(e.to_string()))?;
                db.execute(
                    UPSERT_PREVIEW,
                    params![
                        result.match_id,
                        result.model_id,
                        p.headline,
                        p.body,
                        key_points,
                        generated_at
                    ],
                )
                .map_err(|e| classify_write_error(e, "match_previews", "match_id"))?;
            }
            GenerationPayload::Prediction(p) => {
                db.execute(
                    UPSERT_PREDICTION,
                    params![
                        result.match_id,
                        result.model_id,
                        p.home_score,
                        p.away_score,
                        p.confidence,
                        p.reasoning,
                        generated_at
                    ],
                )
                .map_err(|e| {
                    classify_write_error(e, "match_predictions", "match_id, model_id")
                })?;
            }
        }
        Ok(())
    }
}

impl ContentStore {
    pub async fn get_preview(&self, match_id: &str) -> Result<Option<StoredPreview>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT match_id, model_id, headline, body, key_points_json, generated_at
                 FROM match_previews WHERE match_id = ?1",
                params![match_id],
                |row| {
                    let key_points: String = row.get(4)?;
                    let generated_at: String = row.get(5)?;
                    Ok(StoredPreview {
                        match_id: row.get(0)?,
                        model_id: row.get(1)?,
                        payload: PreviewPayload {
                            headline: row.get(2)?,
                            body: row.get(3)?,
                            key_points: serde_json::from_str(&key_points).unwrap_or_default(),
                        },
                        generated_at: column_ts(5, &generated_at)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn predictions_for(&self, match_id: &str) -> Result<Vec<StoredPrediction>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT match_id, model_id, home_score, away_score, confidence, reasoning, generated_at
             FROM match_predictions WHERE match_id = ?1 ORDER BY model_id",
        )?;
        let rows = stmt
            .query_map(params![match_id], |row| {
                let generated_at: String = row.get(6)?;
                Ok(StoredPrediction {
                    match_id: row.get(0)?,
                    model_id: row.get(1)?,
                    payload: PredictionPayload {
                        home_score: row.get(2)?,
                        away_score: row.get(3)?,
                        confidence: row.get(4)?,
                        reasoning: row.get(5)?,
                    },
                    generated_at: column_ts(6, &generated_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
