//! Append-only evidence ledger.
//!
//! Rows are inserted with `ON CONFLICT DO NOTHING` on the
//! `(trend_id, event_id, signal_type)` key, so re-applying the same
//! Tier-2 payload is a no-op, and never deleted — invalidation flips a
//! flag and reverses the delta through the same increment path.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::engine::delta::DeltaFactors;
use crate::models::TrendEvidence;

const EVIDENCE_COLUMNS: &str = "id, trend_id, event_id, signal_type, base_weight, credibility, \
     corroboration_factor, novelty, evidence_age_days, temporal_decay_factor, severity, \
     confidence, direction_multiplier, delta_log_odds, reasoning, trend_definition_hash, \
     is_invalidated, invalidated_at, invalidation_feedback_id, created_at";

/// Insert a ledger row. Returns false when the unique key already exists
/// (idempotent re-apply: the caller must then skip the increment).
#[allow(clippy::too_many_arguments)]
pub async fn insert<'e, E>(
    executor: E,
    trend_id: &str,
    event_id: Uuid,
    signal_type: &str,
    factors: &DeltaFactors,
    delta_log_odds: f64,
    reasoning: Option<&str>,
    trend_definition_hash: &str,
) -> Result<bool>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO trend_evidence
           (trend_id, event_id, signal_type, base_weight, credibility, corroboration_factor,
            novelty, evidence_age_days, temporal_decay_factor, severity, confidence,
            direction_multiplier, delta_log_odds, reasoning, trend_definition_hash)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         ON CONFLICT (trend_id, event_id, signal_type) DO NOTHING",
    )
    .bind(trend_id)
    .bind(event_id)
    .bind(signal_type)
    .bind(factors.base_weight)
    .bind(factors.credibility)
    .bind(factors.corroboration_factor)
    .bind(factors.novelty)
    .bind(factors.evidence_age_days)
    .bind(factors.temporal_decay_factor)
    .bind(factors.severity)
    .bind(factors.confidence)
    .bind(factors.direction_multiplier)
    .bind(delta_log_odds)
    .bind(reasoning)
    .bind(trend_definition_hash)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Active ledger rows for a trend. Analytics default; auditors opt into
/// invalidated lineage with `include_invalidated`.
pub async fn for_trend(
    pool: &PgPool,
    trend_id: &str,
    include_invalidated: bool,
    limit: i64,
) -> Result<Vec<TrendEvidence>> {
    let rows = sqlx::query_as::<_, TrendEvidence>(&format!(
        "SELECT {EVIDENCE_COLUMNS} FROM trend_evidence
         WHERE trend_id = $1 AND ($2 OR NOT is_invalidated)
         ORDER BY created_at DESC
         LIMIT $3"
    ))
    .bind(trend_id)
    .bind(include_invalidated)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn for_event(
    pool: &PgPool,
    event_id: Uuid,
    include_invalidated: bool,
) -> Result<Vec<TrendEvidence>> {
    let rows = sqlx::query_as::<_, TrendEvidence>(&format!(
        "SELECT {EVIDENCE_COLUMNS} FROM trend_evidence
         WHERE event_id = $1 AND ($2 OR NOT is_invalidated)
         ORDER BY created_at"
    ))
    .bind(event_id)
    .bind(include_invalidated)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Ages (in days) of prior active rows for `(trend, signal_type)`,
/// feeding the novelty computation.
pub async fn prior_ages_days(
    pool: &PgPool,
    trend_id: &str,
    signal_type: &str,
) -> Result<Vec<f64>> {
    let rows: Vec<(f64,)> = sqlx::query_as(
        "SELECT EXTRACT(EPOCH FROM (now() - created_at)) / 86400.0
         FROM trend_evidence
         WHERE trend_id = $1 AND signal_type = $2 AND NOT is_invalidated",
    )
    .bind(trend_id)
    .bind(signal_type)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(age,)| age).collect())
}

/// Active-evidence stats for the confidence rating: count and mean
/// corroboration over the lookback window.
pub async fn active_stats(
    pool: &PgPool,
    trend_id: &str,
    window_days: i64,
) -> Result<(usize, f64)> {
    let since = Utc::now() - Duration::days(window_days);
    let row: (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), AVG(corroboration_factor)
         FROM trend_evidence
         WHERE trend_id = $1 AND NOT is_invalidated AND created_at >= $2",
    )
    .bind(trend_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok((row.0 as usize, row.1.unwrap_or(0.0)))
}
