//! Applying human feedback to pipeline state.
//!
//! Every action records a `human_feedback` row first, then mutates state
//! through the same atomic paths the pipeline uses, so a manual
//! invalidation is indistinguishable from an automated one in the ledger.

use anyhow::{anyhow, bail, Result};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::engine::invalidate_event_evidence;
use crate::models::FeedbackAction;
use crate::storage::{events, feedback as feedback_store};

#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub action: FeedbackAction,
    pub event_id: Option<Uuid>,
    pub trend_id: Option<String>,
    pub signal_type: Option<String>,
    /// For `override_delta`: the corrected delta value.
    pub corrected_delta: Option<f64>,
    pub categories: Option<Vec<String>>,
    pub actor: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedbackOutcome {
    pub feedback_id: Uuid,
    /// Total log-odds reversed or adjusted, when the action moved a trend.
    pub delta_adjustment: f64,
}

pub async fn apply(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    match request.action {
        FeedbackAction::Pin => pin(pool, request).await,
        FeedbackAction::MarkNoise => mark_noise(pool, request).await,
        FeedbackAction::Invalidate => invalidate(pool, request).await,
        FeedbackAction::OverrideDelta => override_delta(pool, request).await,
        FeedbackAction::CorrectCategory => correct_category(pool, request).await,
    }
}

fn require_event(request: &FeedbackRequest) -> Result<Uuid> {
    request
        .event_id
        .ok_or_else(|| anyhow!("{} requires event_id", request.action.as_str()))
}

async fn record(
    pool: &PgPool,
    request: &FeedbackRequest,
    original: Option<serde_json::Value>,
    corrected: Option<serde_json::Value>,
) -> Result<Uuid> {
    feedback_store::insert(
        pool,
        request.action,
        request.event_id,
        request.trend_id.as_deref(),
        original.as_ref(),
        corrected.as_ref(),
        &request.actor,
        request.note.as_deref(),
    )
    .await
}

async fn pin(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    let event_id = require_event(request)?;
    let feedback_id = record(pool, request, None, None).await?;
    events::set_pinned(pool, event_id, true).await?;
    feedback_store::mark_applied(pool, feedback_id).await?;
    Ok(FeedbackOutcome {
        feedback_id,
        delta_adjustment: 0.0,
    })
}

/// Suppress the event and flag its items as noise. Suppressed events skip
/// every lifecycle transition and are never merged into again.
async fn mark_noise(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    let event_id = require_event(request)?;
    let feedback_id = record(pool, request, None, None).await?;

    events::set_suppressed(pool, event_id, true).await?;
    sqlx::query(
        "UPDATE raw_items SET processing_status = 'noise'
         WHERE id IN (SELECT item_id FROM event_items WHERE event_id = $1)",
    )
    .bind(event_id)
    .execute(pool)
    .await?;

    feedback_store::mark_applied(pool, feedback_id).await?;
    info!(%event_id, "event suppressed by feedback");
    Ok(FeedbackOutcome {
        feedback_id,
        delta_adjustment: 0.0,
    })
}

/// Suppress the event AND reverse everything it contributed, through the
/// engine's atomic invalidation path. Ledger rows survive for audit.
async fn invalidate(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    let event_id = require_event(request)?;
    let feedback_id = record(pool, request, None, None).await?;

    events::set_suppressed(pool, event_id, true).await?;
    let reversed = invalidate_event_evidence(pool, event_id, feedback_id).await?;

    feedback_store::mark_applied(pool, feedback_id).await?;
    Ok(FeedbackOutcome {
        feedback_id,
        delta_adjustment: -reversed,
    })
}

/// Replace one active ledger row's delta with a corrected value and move
/// the trend by the difference, atomically.
async fn override_delta(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    let event_id = require_event(request)?;
    let trend_id = request
        .trend_id
        .as_deref()
        .ok_or_else(|| anyhow!("override_delta requires trend_id"))?;
    let signal_type = request
        .signal_type
        .as_deref()
        .ok_or_else(|| anyhow!("override_delta requires signal_type"))?;
    let corrected = request
        .corrected_delta
        .ok_or_else(|| anyhow!("override_delta requires corrected_delta"))?;
    if !corrected.is_finite() {
        bail!("corrected_delta must be finite");
    }

    let mut tx = pool.begin().await?;
    let old: Option<(f64,)> = sqlx::query_as(
        "SELECT delta_log_odds FROM trend_evidence
         WHERE trend_id = $1 AND event_id = $2 AND signal_type = $3 AND NOT is_invalidated
         FOR UPDATE",
    )
    .bind(trend_id)
    .bind(event_id)
    .bind(signal_type)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((old_delta,)) = old else {
        tx.rollback().await?;
        bail!("no active evidence row for ({trend_id}, {event_id}, {signal_type})");
    };

    sqlx::query(
        "UPDATE trend_evidence SET delta_log_odds = $4
         WHERE trend_id = $1 AND event_id = $2 AND signal_type = $3 AND NOT is_invalidated",
    )
    .bind(trend_id)
    .bind(event_id)
    .bind(signal_type)
    .bind(corrected)
    .execute(&mut *tx)
    .await?;

    let adjustment = corrected - old_delta;
    sqlx::query(
        "UPDATE trends SET current_log_odds = current_log_odds + $2, updated_at = now()
         WHERE id = $1",
    )
    .bind(trend_id)
    .bind(adjustment)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let feedback_id = record(
        pool,
        request,
        Some(serde_json::json!({ "delta_log_odds": old_delta })),
        Some(serde_json::json!({ "delta_log_odds": corrected })),
    )
    .await?;
    feedback_store::mark_applied(pool, feedback_id).await?;

    info!(trend = trend_id, %event_id, old_delta, corrected, "delta overridden");
    Ok(FeedbackOutcome {
        feedback_id,
        delta_adjustment: adjustment,
    })
}

async fn correct_category(pool: &PgPool, request: &FeedbackRequest) -> Result<FeedbackOutcome> {
    let event_id = require_event(request)?;
    let categories = request
        .categories
        .as_ref()
        .ok_or_else(|| anyhow!("correct_category requires categories"))?;

    let original = events::by_id(pool, event_id)
        .await?
        .map(|e| serde_json::json!({ "categories": e.categories }));
    let feedback_id = record(
        pool,
        request,
        original,
        Some(serde_json::json!({ "categories": categories })),
    )
    .await?;

    events::set_categories(pool, event_id, categories).await?;
    feedback_store::mark_applied(pool, feedback_id).await?;
    Ok(FeedbackOutcome {
        feedback_id,
        delta_adjustment: 0.0,
    })
}
