//! Human feedback rows.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{FeedbackAction, HumanFeedback};

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    action: FeedbackAction,
    event_id: Option<Uuid>,
    trend_id: Option<&str>,
    original_value: Option<&serde_json::Value>,
    corrected_value: Option<&serde_json::Value>,
    actor: &str,
    note: Option<&str>,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO human_feedback
           (action, event_id, trend_id, original_value, corrected_value, actor, note)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(action.as_str())
    .bind(event_id)
    .bind(trend_id)
    .bind(original_value)
    .bind(corrected_value)
    .bind(actor)
    .bind(note)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn mark_applied(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE human_feedback SET applied_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<HumanFeedback>> {
    let rows = sqlx::query_as::<_, HumanFeedback>(
        "SELECT id, action, event_id, trend_id, original_value, corrected_value,
                actor, note, applied_at, created_at
         FROM human_feedback ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
