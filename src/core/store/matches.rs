use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use super::ContentStore;
use super::types::{parse_ts, ts};
use crate::core::generation::MatchContext;

/// A fixture as imported by operators. Status defaults to `scheduled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    #[serde(flatten)]
    pub context: MatchContext,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "scheduled".to_string()
}

const MATCH_COLUMNS: &str = "match_id, home_team, away_team, competition, kickoff_at, venue";

fn map_match(row: &Row) -> rusqlite::Result<MatchContext> {
    let kickoff: Option<String> = row.get(4)?;
    Ok(MatchContext {
        match_id: row.get(0)?,
        home_team: row.get(1)?,
        away_team: row.get(2)?,
        competition: row.get(3)?,
        kickoff_at: kickoff.as_deref().and_then(parse_ts),
        venue: row.get(5)?,
    })
}

impl ContentStore {
    pub async fn upsert_match(&self, record: &MatchRecord) -> Result<()> {
        let db = self.db.lock().await;
        let ctx = &record.context;
        db.execute(
            "INSERT INTO matches (match_id, home_team, away_team, competition, kickoff_at, venue, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, CURRENT_TIMESTAMP)
             ON CONFLICT(match_id) DO UPDATE SET
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                competition = excluded.competition,
                kickoff_at = excluded.kickoff_at,
                venue = excluded.venue,
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP",
            params![
                ctx.match_id,
                ctx.home_team,
                ctx.away_team,
                ctx.competition,
                ctx.kickoff_at.map(ts),
                ctx.venue,
                record.status,
            ],
        )?;
        Ok(())
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Option<MatchContext>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM matches WHERE match_id = ?1", MATCH_COLUMNS);
        let found = db
            .query_row(&sql, params![match_id], map_match)
            .optional()?;
        Ok(found)
    }

    /// Scheduled fixtures with kickoff in `[from, to)`. An open bound is unbounded;
    /// fixtures without a kickoff time only match when both bounds are open.
    pub async fn scheduled_matches(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<MatchContext>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM matches
             WHERE status = 'scheduled'
               AND (?1 IS NULL OR kickoff_at >= ?1)
               AND (?2 IS NULL OR kickoff_at < ?2)
             ORDER BY kickoff_at, match_id",
            MATCH_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![from.map(ts), to.map(ts)], map_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
