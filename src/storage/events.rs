//! Event persistence, item linking, and cluster metadata recomputation.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Event, LifecycleStatus};

const EVENT_COLUMNS: &str = "id, canonical_summary, embedding, embedding_model, entities, claims, \
     categories, source_count, unique_source_count, lifecycle_status, first_seen_at, \
     last_mention_at, confirmed_at, primary_item_id, contradicted, contradiction_notes, \
     suppressed, pinned";

pub async fn by_id(pool: &PgPool, id: Uuid) -> Result<Option<Event>> {
    let row = sqlx::query_as::<_, Event>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Candidate events for clustering: same embedding model lineage, seen
/// within the window, ranked by cosine similarity.
pub async fn cluster_candidates(
    pool: &PgPool,
    embedding: &Vector,
    model: &str,
    window: Duration,
    limit: i64,
) -> Result<Vec<(Event, f64)>> {
    let since = Utc::now() - window;
    let rows: Vec<(Uuid, f64)> = sqlx::query_as(
        "SELECT id, 1 - (embedding <=> $1) AS similarity
         FROM events
         WHERE embedding IS NOT NULL
           AND embedding_model = $2
           AND first_seen_at >= $3
         ORDER BY embedding <=> $1, first_seen_at ASC
         LIMIT $4",
    )
    .bind(embedding)
    .bind(model)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, similarity) in rows {
        if let Some(event) = by_id(pool, id).await? {
            out.push((event, similarity));
        }
    }
    Ok(out)
}

/// Recent events carrying an embedding from the given model, for the
/// exact-scan nearest-neighbor fallback.
pub async fn recent_with_embeddings(
    pool: &PgPool,
    model: &str,
    since: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, Event>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE embedding IS NOT NULL AND embedding_model = $1 AND first_seen_at >= $2
         ORDER BY first_seen_at"
    ))
    .bind(model)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &PgPool,
    summary: &str,
    embedding: &Vector,
    model: &str,
    primary_item_id: Uuid,
    first_seen_at: DateTime<Utc>,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO events
           (canonical_summary, embedding, embedding_model, primary_item_id,
            first_seen_at, last_mention_at, source_count, unique_source_count)
         VALUES ($1, $2, $3, $4, $5, $5, 0, 0)
         RETURNING id",
    )
    .bind(summary)
    .bind(embedding)
    .bind(model)
    .bind(primary_item_id)
    .bind(first_seen_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Outcome of attempting to link an item into an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// This call inserted the link.
    Linked,
    /// A concurrent worker already linked the item; resolve to that event.
    AlreadyLinked(Uuid),
}

/// Insert the `event_items` junction row. The UNIQUE constraint on
/// `item_id` is the arbiter under concurrent linkers: the loser reads the
/// winner's event id back and must not reapply metadata.
pub async fn link_item(
    pool: &PgPool,
    event_id: Uuid,
    item_id: Uuid,
    source_id: Uuid,
) -> Result<LinkOutcome> {
    let inserted = sqlx::query(
        "INSERT INTO event_items (event_id, item_id, source_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (item_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(item_id)
    .bind(source_id)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 1 {
        return Ok(LinkOutcome::Linked);
    }
    let (winner,): (Uuid,) = sqlx::query_as("SELECT event_id FROM event_items WHERE item_id = $1")
        .bind(item_id)
        .fetch_one(pool)
        .await?;
    Ok(LinkOutcome::AlreadyLinked(winner))
}

/// Recompute source_count / unique_source_count from the junction. Called
/// after a successful link, before lifecycle evaluation.
pub async fn recompute_counts(pool: &PgPool, event_id: Uuid) -> Result<(i32, i32)> {
    let (total, unique): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(DISTINCT source_id) FROM event_items WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_one(pool)
    .await?;
    sqlx::query(
        "UPDATE events SET source_count = $2, unique_source_count = $3,
            last_mention_at = now(), updated_at = now()
         WHERE id = $1",
    )
    .bind(event_id)
    .bind(total as i32)
    .bind(unique as i32)
    .execute(pool)
    .await?;
    Ok((total as i32, unique as i32))
}

/// Highest-credibility linked item, for primary re-selection.
pub async fn best_primary_candidate(pool: &PgPool, event_id: Uuid) -> Result<Option<(Uuid, f64)>> {
    let row: Option<(Uuid, f64)> = sqlx::query_as(
        "SELECT ei.item_id, s.credibility_score
         FROM event_items ei
         JOIN sources s ON s.id = ei.source_id
         WHERE ei.event_id = $1
         ORDER BY s.credibility_score DESC, ei.linked_at ASC
         LIMIT 1",
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Re-point the primary item and refresh the canonical summary from it.
/// The summary always tracks the primary, never the newest mention.
pub async fn set_primary(pool: &PgPool, event_id: Uuid, item_id: Uuid, summary: &str) -> Result<()> {
    sqlx::query(
        "UPDATE events SET primary_item_id = $2, canonical_summary = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(event_id)
    .bind(item_id)
    .bind(summary)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_lifecycle(
    pool: &PgPool,
    event_id: Uuid,
    status: LifecycleStatus,
) -> Result<()> {
    let set_confirmed = matches!(status, LifecycleStatus::Confirmed);
    sqlx::query(
        "UPDATE events SET lifecycle_status = $2,
            confirmed_at = CASE WHEN $3 AND confirmed_at IS NULL THEN now() ELSE confirmed_at END,
            updated_at = now()
         WHERE id = $1",
    )
    .bind(event_id)
    .bind(status.as_str())
    .bind(set_confirmed)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn merge_extraction(
    pool: &PgPool,
    event_id: Uuid,
    entities: &serde_json::Value,
    claims: &serde_json::Value,
    categories: &[String],
    contradicted: bool,
    contradiction_notes: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE events SET entities = $2, claims = $3, categories = $4,
            contradicted = $5, contradiction_notes = COALESCE($6, contradiction_notes),
            updated_at = now()
         WHERE id = $1",
    )
    .bind(event_id)
    .bind(entities)
    .bind(claims)
    .bind(categories)
    .bind(contradicted)
    .bind(contradiction_notes)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_suppressed(pool: &PgPool, event_id: Uuid, suppressed: bool) -> Result<()> {
    sqlx::query("UPDATE events SET suppressed = $2, updated_at = now() WHERE id = $1")
        .bind(event_id)
        .bind(suppressed)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_pinned(pool: &PgPool, event_id: Uuid, pinned: bool) -> Result<()> {
    sqlx::query("UPDATE events SET pinned = $2, updated_at = now() WHERE id = $1")
        .bind(event_id)
        .bind(pinned)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_categories(pool: &PgPool, event_id: Uuid, categories: &[String]) -> Result<()> {
    sqlx::query("UPDATE events SET categories = $2, updated_at = now() WHERE id = $1")
        .bind(event_id)
        .bind(categories)
        .execute(pool)
        .await?;
    Ok(())
}

/// Events due a lifecycle transition: confirmed→fading after the quiet
/// window, fading→archived after the archive horizon. Suppressed events
/// never transition.
pub async fn stale_for_lifecycle(
    pool: &PgPool,
    fading_after: Duration,
    archive_after: Duration,
) -> Result<Vec<(Uuid, String, DateTime<Utc>)>> {
    let now = Utc::now();
    let rows: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, lifecycle_status, last_mention_at
         FROM events
         WHERE NOT suppressed
           AND ((lifecycle_status = 'confirmed' AND last_mention_at < $1)
             OR (lifecycle_status IN ('emerging', 'fading') AND last_mention_at < $2))",
    )
    .bind(now - fading_after)
    .bind(now - archive_after)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Filterable listing for the API layer.
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    pub category: Option<String>,
    pub trend_id: Option<String>,
    pub lifecycle: Option<String>,
    pub contradicted: Option<bool>,
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list(pool: &PgPool, filter: &EventFilter) -> Result<Vec<Event>> {
    let since = Utc::now() - Duration::days(filter.days.unwrap_or(7).clamp(1, 365));
    let limit = filter.limit.unwrap_or(50).clamp(1, 500);

    let rows = sqlx::query_as::<_, Event>(&format!(
        "SELECT DISTINCT {cols}
         FROM events e
         LEFT JOIN trend_evidence te ON te.event_id = e.id
         WHERE e.last_mention_at >= $1
           AND ($2::text IS NULL OR $2 = ANY(e.categories))
           AND ($3::text IS NULL OR te.trend_id = $3)
           AND ($4::text IS NULL OR e.lifecycle_status = $4)
           AND ($5::boolean IS NULL OR e.contradicted = $5)
         ORDER BY last_mention_at DESC
         LIMIT $6",
        cols = EVENT_COLUMNS
            .split(", ")
            .map(|c| format!("e.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))
    .bind(since)
    .bind(&filter.category)
    .bind(&filter.trend_id)
    .bind(&filter.lifecycle)
    .bind(filter.contradicted)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Review queue: pinned, contradicted, or suppressed events needing eyes.
pub async fn review_queue(pool: &PgPool, limit: i64) -> Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, Event>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE pinned OR contradicted OR suppressed
         ORDER BY updated_at DESC
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Per-linked-item source facts for corroboration clustering:
/// `(normalized_url, credibility_score, source_tier, reporting_type, source_slug)`.
pub async fn source_observations(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Vec<(String, f64, String, String, String)>> {
    let rows: Vec<(String, f64, String, String, String)> = sqlx::query_as(
        "SELECT ri.normalized_url, s.credibility_score, s.source_tier, s.reporting_type, s.slug
         FROM event_items ei
         JOIN raw_items ri ON ri.id = ei.item_id
         JOIN sources s ON s.id = ei.source_id
         WHERE ei.event_id = $1",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_recent_for_trend(pool: &PgPool, trend_id: &str, window: Duration) -> Result<i64> {
    let since = Utc::now() - window;
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT te.event_id)
         FROM trend_evidence te
         JOIN events e ON e.id = te.event_id
         WHERE te.trend_id = $1 AND e.last_mention_at >= $2",
    )
    .bind(trend_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
