//! Champion/challenger replay harness.
//!
//! Replays the evidence ledger for a historical window under two engine
//! configurations and emits paired quality/cost/latency metrics plus a
//! promotion assessment. Entirely read-only: trajectories are rebuilt
//! in memory from the recorded factor inputs, deltas recombined under
//! each candidate's tunables, and scored against resolved outcomes.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::calibration::brier;
use crate::config::Settings;
use crate::engine::{decay_toward_baseline, evidence_delta, logodds_to_prob, DeltaFactors};
use crate::models::OutcomeKind;

/// Engine tunables a replay variant may vary.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayVariant {
    pub name: String,
    pub max_delta_per_event: f64,
    pub decay_half_life_override_days: Option<f64>,
    /// Estimated provider cost per scored evidence row (USD).
    pub cost_per_evidence_usd: f64,
    /// Estimated provider latency per scored evidence row (ms).
    pub latency_per_evidence_ms: f64,
}

impl ReplayVariant {
    pub fn champion(settings: &Settings) -> Self {
        Self {
            name: "champion".into(),
            max_delta_per_event: settings.max_delta_per_event,
            decay_half_life_override_days: None,
            cost_per_evidence_usd: 0.01,
            latency_per_evidence_ms: 1_800.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantMetrics {
    pub name: String,
    pub evidence_replayed: usize,
    pub outcomes_scored: usize,
    pub brier_mean: Option<f64>,
    pub mean_abs_delta: f64,
    pub est_cost_usd: f64,
    pub est_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionAssessment {
    pub promote: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub window_days: i64,
    pub champion: VariantMetrics,
    pub challenger: VariantMetrics,
    pub assessment: PromotionAssessment,
}

/// Promotion thresholds: the challenger must improve Brier by at least 2%
/// relative, must not regress cost by more than 10%, and must not regress
/// latency by more than 20%.
const BRIER_IMPROVEMENT_MIN: f64 = 0.02;
const COST_REGRESSION_MAX: f64 = 0.10;
const LATENCY_REGRESSION_MAX: f64 = 0.20;

#[derive(Debug, sqlx::FromRow)]
struct ReplayEvidenceRow {
    trend_id: String,
    base_weight: f64,
    credibility: f64,
    corroboration_factor: f64,
    novelty: f64,
    evidence_age_days: f64,
    temporal_decay_factor: f64,
    severity: f64,
    confidence: f64,
    direction_multiplier: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReplayTrendRow {
    id: String,
    baseline_log_odds: f64,
    decay_half_life_days: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReplayOutcomeRow {
    trend_id: String,
    outcome: String,
    prediction_date: DateTime<Utc>,
}

pub async fn run(
    pool: &PgPool,
    settings: &Settings,
    challenger: ReplayVariant,
    window_days: i64,
) -> Result<ReplayReport> {
    let champion = ReplayVariant::champion(settings);
    let since = Utc::now() - Duration::days(window_days);

    let trends_rows: Vec<ReplayTrendRow> =
        sqlx::query_as("SELECT id, baseline_log_odds, decay_half_life_days FROM trends")
            .fetch_all(pool)
            .await?;

    let evidence_rows: Vec<ReplayEvidenceRow> = sqlx::query_as(
        "SELECT trend_id, base_weight, credibility, corroboration_factor, novelty,
                evidence_age_days, temporal_decay_factor, severity, confidence,
                direction_multiplier, created_at
         FROM trend_evidence
         WHERE NOT is_invalidated AND created_at >= $1
         ORDER BY trend_id, created_at",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    let outcome_rows: Vec<ReplayOutcomeRow> = sqlx::query_as(
        "SELECT trend_id, outcome, prediction_date
         FROM trend_outcomes
         WHERE brier_score IS NOT NULL AND outcome_date >= $1",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    // Preflight: the outcome set must only reference known trends, else
    // the comparison would silently score against nothing.
    let known: std::collections::HashSet<&str> =
        trends_rows.iter().map(|t| t.id.as_str()).collect();
    if let Some(unknown) = outcome_rows
        .iter()
        .find(|o| !known.contains(o.trend_id.as_str()))
    {
        anyhow::bail!("outcome references unknown trend id {}", unknown.trend_id);
    }

    let champion_metrics = replay_variant(&champion, &trends_rows, &evidence_rows, &outcome_rows);
    let challenger_metrics =
        replay_variant(&challenger, &trends_rows, &evidence_rows, &outcome_rows);
    let assessment = assess(&champion_metrics, &challenger_metrics);

    info!(
        challenger = %challenger.name,
        promote = assessment.promote,
        "replay complete"
    );

    Ok(ReplayReport {
        window_days,
        champion: champion_metrics,
        challenger: challenger_metrics,
        assessment,
    })
}

/// Rebuild each trend's trajectory from baseline under one variant's
/// tunables, then score it against the window's resolved outcomes.
fn replay_variant(
    variant: &ReplayVariant,
    trends: &[ReplayTrendRow],
    evidence: &[ReplayEvidenceRow],
    outcomes: &[ReplayOutcomeRow],
) -> VariantMetrics {
    // Per-trend piecewise trajectory: (timestamp, log_odds after applying
    // the evidence at that instant), starting from baseline.
    let mut trajectories: HashMap<&str, Vec<(DateTime<Utc>, f64)>> = HashMap::new();
    let mut abs_delta_sum = 0.0;

    for trend in trends {
        let half_life = variant
            .decay_half_life_override_days
            .unwrap_or(trend.decay_half_life_days);
        let mut lo = trend.baseline_log_odds;
        let mut last_ts: Option<DateTime<Utc>> = None;
        let mut points = Vec::new();

        for row in evidence.iter().filter(|r| r.trend_id == trend.id) {
            if let Some(prev) = last_ts {
                let elapsed_days = (row.created_at - prev).num_seconds() as f64 / 86_400.0;
                lo = decay_toward_baseline(lo, trend.baseline_log_odds, elapsed_days, half_life);
            }
            let factors = DeltaFactors {
                base_weight: row.base_weight,
                credibility: row.credibility,
                corroboration_factor: row.corroboration_factor,
                novelty: row.novelty,
                evidence_age_days: row.evidence_age_days,
                temporal_decay_factor: row.temporal_decay_factor,
                severity: row.severity,
                confidence: row.confidence,
                direction_multiplier: row.direction_multiplier,
            };
            let delta = evidence_delta(&factors, variant.max_delta_per_event);
            abs_delta_sum += delta.abs();
            lo += delta;
            points.push((row.created_at, lo));
            last_ts = Some(row.created_at);
        }
        trajectories.insert(trend.id.as_str(), points);
    }

    // Quality: Brier of the replayed probability at each prediction date.
    let mut brier_sum = 0.0;
    let mut scored = 0usize;
    for outcome in outcomes {
        let Some(actual) = OutcomeKind::parse(&outcome.outcome).and_then(|k| k.actual()) else {
            continue;
        };
        let Some(points) = trajectories.get(outcome.trend_id.as_str()) else {
            continue;
        };
        let replayed_lo = points
            .iter()
            .take_while(|(ts, _)| *ts <= outcome.prediction_date)
            .last()
            .map(|(_, lo)| *lo);
        let Some(lo) = replayed_lo else {
            continue;
        };
        brier_sum += brier(logodds_to_prob(lo), actual);
        scored += 1;
    }

    VariantMetrics {
        name: variant.name.clone(),
        evidence_replayed: evidence.len(),
        outcomes_scored: scored,
        brier_mean: (scored > 0).then(|| brier_sum / scored as f64),
        mean_abs_delta: if evidence.is_empty() {
            0.0
        } else {
            abs_delta_sum / evidence.len() as f64
        },
        est_cost_usd: evidence.len() as f64 * variant.cost_per_evidence_usd,
        est_latency_ms: variant.latency_per_evidence_ms,
    }
}

fn assess(champion: &VariantMetrics, challenger: &VariantMetrics) -> PromotionAssessment {
    let mut reasons = Vec::new();
    let mut promote = true;

    match (champion.brier_mean, challenger.brier_mean) {
        (Some(champ), Some(chall)) => {
            let improvement = if champ > 0.0 { (champ - chall) / champ } else { 0.0 };
            if improvement >= BRIER_IMPROVEMENT_MIN {
                reasons.push(format!(
                    "brier improved {:.1}% ({champ:.4} -> {chall:.4})",
                    improvement * 100.0
                ));
            } else {
                promote = false;
                reasons.push(format!(
                    "brier improvement {:.1}% below the {:.0}% bar",
                    improvement * 100.0,
                    BRIER_IMPROVEMENT_MIN * 100.0
                ));
            }
        }
        _ => {
            promote = false;
            reasons.push("insufficient resolved outcomes to compare quality".into());
        }
    }

    if champion.est_cost_usd > 0.0 {
        let cost_regression = (challenger.est_cost_usd - champion.est_cost_usd) / champion.est_cost_usd;
        if cost_regression > COST_REGRESSION_MAX {
            promote = false;
            reasons.push(format!("cost regressed {:.1}%", cost_regression * 100.0));
        }
    }

    if champion.est_latency_ms > 0.0 {
        let latency_regression =
            (challenger.est_latency_ms - champion.est_latency_ms) / champion.est_latency_ms;
        if latency_regression > LATENCY_REGRESSION_MAX {
            promote = false;
            reasons.push(format!("latency regressed {:.1}%", latency_regression * 100.0));
        }
    }

    PromotionAssessment { promote, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(name: &str, brier: Option<f64>, cost: f64, latency: f64) -> VariantMetrics {
        VariantMetrics {
            name: name.into(),
            evidence_replayed: 100,
            outcomes_scored: 30,
            brier_mean: brier,
            mean_abs_delta: 0.01,
            est_cost_usd: cost,
            est_latency_ms: latency,
        }
    }

    #[test]
    fn better_cheaper_challenger_promotes() {
        let assessment = assess(
            &metrics("champion", Some(0.20), 1.0, 2000.0),
            &metrics("challenger", Some(0.18), 1.0, 2000.0),
        );
        assert!(assessment.promote);
    }

    #[test]
    fn marginal_quality_gain_does_not_promote() {
        let assessment = assess(
            &metrics("champion", Some(0.200), 1.0, 2000.0),
            &metrics("challenger", Some(0.199), 1.0, 2000.0),
        );
        assert!(!assessment.promote);
    }

    #[test]
    fn cost_regression_blocks_promotion() {
        let assessment = assess(
            &metrics("champion", Some(0.20), 1.0, 2000.0),
            &metrics("challenger", Some(0.15), 1.5, 2000.0),
        );
        assert!(!assessment.promote);
        assert!(assessment.reasons.iter().any(|r| r.contains("cost")));
    }

    #[test]
    fn latency_regression_blocks_promotion() {
        let assessment = assess(
            &metrics("champion", Some(0.20), 1.0, 2000.0),
            &metrics("challenger", Some(0.15), 1.0, 3000.0),
        );
        assert!(!assessment.promote);
    }

    #[test]
    fn missing_outcomes_block_promotion() {
        let assessment = assess(
            &metrics("champion", None, 1.0, 2000.0),
            &metrics("challenger", None, 1.0, 2000.0),
        );
        assert!(!assessment.promote);
    }
}
