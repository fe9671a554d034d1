//! Calibration service: outcome recording, Brier scoring, and bucket
//! analysis over the historical snapshot series.

pub mod drift;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::engine::{logodds_to_prob, probability_band, risk_level};
use crate::models::{OutcomeKind, TrendOutcome};
use crate::storage::{outcomes, snapshots, trends};

/// `(p - actual)^2`.
pub fn brier(predicted: f64, actual: f64) -> f64 {
    (predicted - actual).powi(2)
}

/// Record an outcome against the snapshot closest to (and at or before)
/// the resolution time; the trend's live state is the fallback when no
/// snapshot predates it.
pub async fn record_outcome(
    pool: &PgPool,
    trend_id: &str,
    outcome: OutcomeKind,
    outcome_date: DateTime<Utc>,
    notes: Option<&str>,
) -> Result<Uuid> {
    let (predicted, prediction_date) =
        match snapshots::at_or_before(pool, trend_id, outcome_date).await? {
            Some(snap) => (logodds_to_prob(snap.log_odds), snap.ts),
            None => {
                let trend = trends::by_id(pool, trend_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("unknown trend {trend_id}"))?;
                (logodds_to_prob(trend.current_log_odds), trend.updated_at)
            }
        };

    let brier_score = outcome.actual().map(|actual| brier(predicted, actual));
    let id = outcomes::insert(
        pool,
        trend_id,
        predicted,
        risk_level(predicted).as_str(),
        &probability_band(predicted),
        prediction_date,
        outcome.as_str(),
        outcome_date,
        brier_score,
        notes,
    )
    .await?;

    info!(
        trend = trend_id,
        outcome = outcome.as_str(),
        predicted,
        brier = brier_score.unwrap_or(f64::NAN),
        "outcome recorded"
    );
    Ok(id)
}

/// One ten-percent probability band.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStat {
    /// Band label, e.g. "20-30%".
    pub band: String,
    /// Band midpoint as a probability.
    pub midpoint: f64,
    pub count: usize,
    pub occurred: usize,
    /// Observed occurrence rate (0 when empty).
    pub actual_rate: f64,
    /// |actual_rate - midpoint| (0 when empty).
    pub calibration_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub sample_count: usize,
    pub brier_mean: Option<f64>,
    pub max_bucket_error: Option<f64>,
    pub buckets: Vec<BucketStat>,
}

/// Bucket `(predicted, actual)` pairs into `[0,10), [10,20), …, [90,100]`
/// and compare each bucket's occurrence rate against its midpoint.
pub fn bucket_analysis(pairs: &[(f64, f64)]) -> CalibrationReport {
    let mut counts = [0usize; 10];
    let mut occurred = [0usize; 10];
    let mut brier_sum = 0.0;

    for &(predicted, actual) in pairs {
        let idx = ((predicted.clamp(0.0, 1.0) * 10.0).floor() as usize).min(9);
        counts[idx] += 1;
        if actual >= 0.5 {
            occurred[idx] += 1;
        }
        brier_sum += brier(predicted, actual);
    }

    let buckets: Vec<BucketStat> = (0..10)
        .map(|i| {
            let midpoint = (i as f64 * 10.0 + 5.0) / 100.0;
            let count = counts[i];
            let actual_rate = if count > 0 {
                occurred[i] as f64 / count as f64
            } else {
                0.0
            };
            BucketStat {
                band: format!("{}-{}%", i * 10, (i + 1) * 10),
                midpoint,
                count,
                occurred: occurred[i],
                actual_rate,
                calibration_error: if count > 0 {
                    (actual_rate - midpoint).abs()
                } else {
                    0.0
                },
            }
        })
        .collect();

    let max_bucket_error = buckets
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| b.calibration_error)
        .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |a| a.max(e))));

    CalibrationReport {
        sample_count: pairs.len(),
        brier_mean: (!pairs.is_empty()).then(|| brier_sum / pairs.len() as f64),
        max_bucket_error,
        buckets,
    }
}

/// Build the calibration report from every resolved outcome.
pub async fn report(pool: &PgPool) -> Result<CalibrationReport> {
    let resolved = outcomes::all_resolved(pool).await?;
    Ok(bucket_analysis(&resolved_pairs(&resolved)))
}

fn resolved_pairs(resolved: &[TrendOutcome]) -> Vec<(f64, f64)> {
    resolved
        .iter()
        .filter_map(|o| {
            OutcomeKind::parse(&o.outcome)
                .and_then(|k| k.actual())
                .map(|actual| (o.predicted_probability, actual))
        })
        .collect()
}

/// Advisory per-source reliability: how often a source's items ended up
/// in contradicted or suppressed events. Gated by sample size; the rates
/// never feed scoring.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SourceReliability {
    pub slug: String,
    pub source_tier: String,
    pub items_linked: i64,
    pub contradicted_events: i64,
    pub suppressed_events: i64,
}

pub async fn source_reliability(pool: &PgPool, min_samples: i64) -> Result<Vec<SourceReliability>> {
    let rows = sqlx::query_as::<_, SourceReliability>(
        "SELECT s.slug, s.source_tier,
                COUNT(*) AS items_linked,
                COUNT(*) FILTER (WHERE e.contradicted) AS contradicted_events,
                COUNT(*) FILTER (WHERE e.suppressed) AS suppressed_events
         FROM event_items ei
         JOIN sources s ON s.id = ei.source_id
         JOIN events e ON e.id = ei.event_id
         GROUP BY s.slug, s.source_tier
         HAVING COUNT(*) >= $1
         ORDER BY s.slug",
    )
    .bind(min_samples)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brier_extremes() {
        assert_eq!(brier(1.0, 1.0), 0.0);
        assert_eq!(brier(0.0, 1.0), 1.0);
        assert!((brier(0.25, 0.0) - 0.0625).abs() < 1e-12);
    }

    #[test]
    fn perfectly_calibrated_bucket_has_zero_error() {
        // 100 outcomes predicted in [20, 30): 25 occurred, 75 did not.
        let mut pairs = Vec::new();
        for i in 0..100 {
            pairs.push((0.25, if i < 25 { 1.0 } else { 0.0 }));
        }
        let report = bucket_analysis(&pairs);
        let bucket = &report.buckets[2];
        assert_eq!(bucket.band, "20-30%");
        assert_eq!(bucket.count, 100);
        assert_eq!(bucket.occurred, 25);
        assert!(bucket.calibration_error < 1e-12);
        assert_eq!(report.max_bucket_error, Some(bucket.calibration_error));
    }

    #[test]
    fn miscalibrated_bucket_is_flagged() {
        // Predicted 85% but nothing occurred.
        let pairs: Vec<(f64, f64)> = (0..30).map(|_| (0.85, 0.0)).collect();
        let report = bucket_analysis(&pairs);
        assert!((report.max_bucket_error.unwrap() - 0.85).abs() < 1e-12);
        assert!(report.brier_mean.unwrap() > 0.7);
    }

    #[test]
    fn empty_buckets_do_not_contribute_error() {
        let report = bucket_analysis(&[]);
        assert_eq!(report.sample_count, 0);
        assert!(report.brier_mean.is_none());
        assert!(report.max_bucket_error.is_none());
        assert!(report.buckets.iter().all(|b| b.calibration_error == 0.0));
    }

    #[test]
    fn top_band_is_closed() {
        let report = bucket_analysis(&[(1.0, 1.0)]);
        assert_eq!(report.buckets[9].count, 1);
    }
}
