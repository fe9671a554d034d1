//! Taxonomy gap queue: Tier-2 impacts naming unknown trends or signal
//! types land here for operator triage instead of being scored.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaxonomyGap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    UnknownTrendId,
    UnknownSignalType,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::UnknownTrendId => "unknown_trend_id",
            GapReason::UnknownSignalType => "unknown_signal_type",
        }
    }
}

pub async fn record(
    pool: &PgPool,
    reason: GapReason,
    trend_id: &str,
    signal_type: Option<&str>,
    event_id: Option<Uuid>,
    payload: &serde_json::Value,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO taxonomy_gaps (reason, trend_id, signal_type, event_id, payload)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(reason.as_str())
    .bind(trend_id)
    .bind(signal_type)
    .bind(event_id)
    .bind(payload)
    .fetch_one(pool)
    .await?;
    metrics::increment_counter!("taxonomy_gaps_total", "reason" => reason.as_str());
    Ok(id)
}

pub async fn list(pool: &PgPool, status: Option<&str>, limit: i64) -> Result<Vec<TaxonomyGap>> {
    let rows = sqlx::query_as::<_, TaxonomyGap>(
        "SELECT id, reason, trend_id, signal_type, event_id, payload, status, created_at, resolved_at
         FROM taxonomy_gaps
         WHERE $1::text IS NULL OR status = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Triage: move a gap to resolved or rejected.
pub async fn set_status(pool: &PgPool, id: Uuid, status: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE taxonomy_gaps SET status = $2, resolved_at = now()
         WHERE id = $1 AND status = 'open' AND $2 IN ('resolved', 'rejected')",
    )
    .bind(id)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
