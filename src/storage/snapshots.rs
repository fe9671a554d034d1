//! Hourly trend snapshots (TimescaleDB hypertable when available).

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::models::TrendSnapshot;

pub async fn record(pool: &PgPool, trend_id: &str, log_odds: f64, event_count_24h: i32) -> Result<()> {
    sqlx::query(
        "INSERT INTO trend_snapshots (trend_id, ts, log_odds, event_count_24h)
         VALUES ($1, now(), $2, $3)
         ON CONFLICT (trend_id, ts) DO NOTHING",
    )
    .bind(trend_id)
    .bind(log_odds)
    .bind(event_count_24h)
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest snapshot at or before `at` — the calibration service resolves
/// outcomes against this, never against a later state.
pub async fn at_or_before(
    pool: &PgPool,
    trend_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<TrendSnapshot>> {
    let row = sqlx::query_as::<_, TrendSnapshot>(
        "SELECT trend_id, ts, log_odds, event_count_24h
         FROM trend_snapshots
         WHERE trend_id = $1 AND ts <= $2
         ORDER BY ts DESC
         LIMIT 1",
    )
    .bind(trend_id)
    .bind(at)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn history(
    pool: &PgPool,
    trend_id: &str,
    days: i64,
    limit: i64,
) -> Result<Vec<TrendSnapshot>> {
    let since = Utc::now() - Duration::days(days.clamp(1, 365));
    let rows = sqlx::query_as::<_, TrendSnapshot>(
        "SELECT trend_id, ts, log_odds, event_count_24h
         FROM trend_snapshots
         WHERE trend_id = $1 AND ts >= $2
         ORDER BY ts
         LIMIT $3",
    )
    .bind(trend_id)
    .bind(since)
    .bind(limit.clamp(1, 10_000))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn purge_older_than(pool: &PgPool, days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(days);
    let result = sqlx::query("DELETE FROM trend_snapshots WHERE ts < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
