//! Applying evidence to trend state.
//!
//! Both operations here are safe under concurrent workers: the ledger
//! insert is idempotent via its unique key, the log-odds mutation is a
//! single SQL increment, and the two happen in one transaction so a
//! duplicate payload can never double-count.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::delta::DeltaFactors;
use crate::storage::evidence;

#[derive(Debug, Clone, Copy)]
pub struct ImpactOutcome {
    /// False when the (trend, event, signal_type) row already existed and
    /// nothing was changed.
    pub applied: bool,
    pub delta_log_odds: f64,
}

/// Insert the ledger row and, only if this call created it, increment the
/// trend's log-odds by the precomputed delta.
#[allow(clippy::too_many_arguments)]
pub async fn apply_impact(
    pool: &PgPool,
    trend_id: &str,
    event_id: Uuid,
    signal_type: &str,
    factors: &DeltaFactors,
    delta_log_odds: f64,
    reasoning: Option<&str>,
    trend_definition_hash: &str,
) -> Result<ImpactOutcome> {
    let mut tx = pool.begin().await?;

    let inserted = evidence::insert(
        &mut *tx,
        trend_id,
        event_id,
        signal_type,
        factors,
        delta_log_odds,
        reasoning,
        trend_definition_hash,
    )
    .await?;

    if !inserted {
        tx.rollback().await?;
        debug!(trend = trend_id, %event_id, signal_type, "evidence already applied, skipping");
        return Ok(ImpactOutcome {
            applied: false,
            delta_log_odds: 0.0,
        });
    }

    sqlx::query(
        "UPDATE trends SET current_log_odds = current_log_odds + $2,
            last_evidence_at = now(), updated_at = now()
         WHERE id = $1",
    )
    .bind(trend_id)
    .bind(delta_log_odds)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(trend = trend_id, %event_id, signal_type, delta = delta_log_odds, "evidence applied");
    Ok(ImpactOutcome {
        applied: true,
        delta_log_odds,
    })
}

/// Invalidate every active ledger row for an event and reverse the
/// accumulated deltas per trend, atomically. Rows survive for audit;
/// analytics queries exclude them by default.
pub async fn invalidate_event_evidence(
    pool: &PgPool,
    event_id: Uuid,
    feedback_id: Uuid,
) -> Result<f64> {
    let mut tx = pool.begin().await?;

    let reversed: Vec<(String, f64)> = sqlx::query_as(
        "UPDATE trend_evidence
         SET is_invalidated = TRUE, invalidated_at = now(), invalidation_feedback_id = $2
         WHERE event_id = $1 AND NOT is_invalidated
         RETURNING trend_id, delta_log_odds",
    )
    .bind(event_id)
    .bind(feedback_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut per_trend: std::collections::BTreeMap<String, f64> = std::collections::BTreeMap::new();
    for (trend_id, delta) in &reversed {
        *per_trend.entry(trend_id.clone()).or_insert(0.0) += delta;
    }

    let mut total_reversed = 0.0;
    for (trend_id, sum) in &per_trend {
        sqlx::query(
            "UPDATE trends SET current_log_odds = current_log_odds - $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(trend_id)
        .bind(sum)
        .execute(&mut *tx)
        .await?;
        total_reversed += sum;
    }

    tx.commit().await?;
    info!(
        %event_id,
        rows = reversed.len(),
        total_reversed,
        "evidence invalidated and deltas reversed"
    );
    Ok(total_reversed)
}
