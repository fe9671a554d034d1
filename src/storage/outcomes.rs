//! Prediction-vs-reality rows for the calibration service.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TrendOutcome;

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    trend_id: &str,
    predicted_probability: f64,
    risk_level: &str,
    probability_band: &str,
    prediction_date: DateTime<Utc>,
    outcome: &str,
    outcome_date: DateTime<Utc>,
    brier_score: Option<f64>,
    notes: Option<&str>,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO trend_outcomes
           (trend_id, predicted_probability, risk_level, probability_band,
            prediction_date, outcome, outcome_date, brier_score, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING id",
    )
    .bind(trend_id)
    .bind(predicted_probability)
    .bind(risk_level)
    .bind(probability_band)
    .bind(prediction_date)
    .bind(outcome)
    .bind(outcome_date)
    .bind(brier_score)
    .bind(notes)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn for_trend(pool: &PgPool, trend_id: &str) -> Result<Vec<TrendOutcome>> {
    let rows = sqlx::query_as::<_, TrendOutcome>(
        "SELECT id, trend_id, predicted_probability, risk_level, probability_band,
                prediction_date, outcome, outcome_date, brier_score, notes
         FROM trend_outcomes WHERE trend_id = $1 ORDER BY outcome_date DESC",
    )
    .bind(trend_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All resolved outcomes (those with a Brier score) for bucket analysis.
pub async fn all_resolved(pool: &PgPool) -> Result<Vec<TrendOutcome>> {
    let rows = sqlx::query_as::<_, TrendOutcome>(
        "SELECT id, trend_id, predicted_probability, risk_level, probability_band,
                prediction_date, outcome, outcome_date, brier_score, notes
         FROM trend_outcomes WHERE brier_score IS NOT NULL ORDER BY outcome_date",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_resolved_for_trend(pool: &PgPool, trend_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM trend_outcomes WHERE trend_id = $1 AND brier_score IS NOT NULL",
    )
    .bind(trend_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
