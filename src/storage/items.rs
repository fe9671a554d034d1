//! RawItem persistence and the processing-status FSM.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewRawItem, ProcessingStatus, RawItem};

const ITEM_COLUMNS: &str = "id, source_id, external_id, url, normalized_url, title, author, \
     published_at, fetched_at, content, content_sha256, language, embedding, embedding_model, \
     processing_status, processing_started_at";

pub async fn insert(
    pool: &PgPool,
    item: &NewRawItem,
    normalized_url: &str,
    content_sha256: &str,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO raw_items
           (source_id, external_id, url, normalized_url, title, author, published_at,
            fetched_at, content, content_sha256, language)
         VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8, $9, $10)
         RETURNING id",
    )
    .bind(item.source_id)
    .bind(&item.external_id)
    .bind(&item.url)
    .bind(normalized_url)
    .bind(&item.title)
    .bind(&item.author)
    .bind(item.published_at)
    .bind(&item.content)
    .bind(content_sha256)
    .bind(&item.language)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn by_id(pool: &PgPool, id: Uuid) -> Result<Option<RawItem>> {
    let row = sqlx::query_as::<_, RawItem>(&format!(
        "SELECT {ITEM_COLUMNS} FROM raw_items WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Claim up to `limit` pending items for processing. The UPDATE doubles as
/// the claim: concurrent workers skip rows another worker already moved to
/// `processing` via SKIP LOCKED.
pub async fn claim_pending(pool: &PgPool, limit: i64) -> Result<Vec<RawItem>> {
    let rows = sqlx::query_as::<_, RawItem>(&format!(
        "UPDATE raw_items SET processing_status = 'processing', processing_started_at = now()
         WHERE id IN (
             SELECT id FROM raw_items
             WHERE processing_status = 'pending'
             ORDER BY created_at
             LIMIT $1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING {ITEM_COLUMNS}"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn set_status(pool: &PgPool, id: Uuid, status: ProcessingStatus) -> Result<()> {
    sqlx::query("UPDATE raw_items SET processing_status = $2, processing_error = NULL WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_error(pool: &PgPool, id: Uuid, message: &str) -> Result<()> {
    sqlx::query("UPDATE raw_items SET processing_status = 'error', processing_error = $2 WHERE id = $1")
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Leave a claimed item for a later pass (budget denial, transient outage).
pub async fn release_to_pending(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE raw_items SET processing_status = 'pending', processing_started_at = NULL WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn store_embedding(
    pool: &PgPool,
    id: Uuid,
    embedding: &Vector,
    model: &str,
    input_tokens: i32,
    retained_tokens: i32,
    truncated: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE raw_items SET
           embedding = $2, embedding_model = $3, embedding_generated_at = now(),
           embedding_input_tokens = $4, embedding_retained_tokens = $5, embedding_truncated = $6
         WHERE id = $1",
    )
    .bind(id)
    .bind(embedding)
    .bind(model)
    .bind(input_tokens)
    .bind(retained_tokens)
    .bind(truncated)
    .execute(pool)
    .await?;
    Ok(())
}

// --- dedup lookups -------------------------------------------------------

pub async fn find_by_normalized_url(
    pool: &PgPool,
    normalized_url: &str,
    since: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM raw_items WHERE normalized_url = $1 AND fetched_at >= $2
         ORDER BY fetched_at DESC LIMIT 1",
    )
    .bind(normalized_url)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

pub async fn find_by_external_id(
    pool: &PgPool,
    source_id: Uuid,
    external_id: &str,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM raw_items WHERE source_id = $1 AND external_id = $2")
            .bind(source_id)
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id,)| id))
}

pub async fn find_by_content_hash(
    pool: &PgPool,
    content_sha256: &str,
    since: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM raw_items WHERE content_sha256 = $1 AND fetched_at >= $2
         ORDER BY fetched_at DESC LIMIT 1",
    )
    .bind(content_sha256)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Most similar recent embedding from the same model. Cross-model rows are
/// excluded in SQL, so the caller only sees comparable candidates.
pub async fn nearest_embedding(
    pool: &PgPool,
    embedding: &Vector,
    model: &str,
    since: DateTime<Utc>,
) -> Result<Option<(Uuid, f64)>> {
    let row: Option<(Uuid, f64)> = sqlx::query_as(
        "SELECT id, 1 - (embedding <=> $1) AS similarity
         FROM raw_items
         WHERE embedding IS NOT NULL AND embedding_model = $2 AND fetched_at >= $3
         ORDER BY embedding <=> $1
         LIMIT 1",
    )
    .bind(embedding)
    .bind(model)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// For the pending-path dedup stage: an older item (excluding `item_id`
/// itself) sharing the normalized URL or content hash inside the window.
pub async fn find_duplicate_of_item(
    pool: &PgPool,
    item_id: Uuid,
    normalized_url: &str,
    content_sha256: &str,
    since: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM raw_items
         WHERE id <> $1
           AND (normalized_url = $2 OR content_sha256 = $3)
           AND fetched_at >= $4
           AND created_at < (SELECT created_at FROM raw_items WHERE id = $1)
         ORDER BY created_at
         LIMIT 1",
    )
    .bind(item_id)
    .bind(normalized_url)
    .bind(content_sha256)
    .bind(since)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

// --- reaper & retention --------------------------------------------------

/// Reset `processing` rows whose claim is older than the timeout. Returns
/// how many rows were reaped.
pub async fn reap_stale_processing(pool: &PgPool, timeout: Duration) -> Result<u64> {
    let cutoff = Utc::now() - timeout;
    let result = sqlx::query(
        "UPDATE raw_items SET processing_status = 'pending', processing_started_at = NULL
         WHERE processing_status = 'processing' AND processing_started_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Drop terminal noise/error rows past the retention horizon, unless an
/// event still links them.
pub async fn purge_old_noise(pool: &PgPool, older_than_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(older_than_days);
    let result = sqlx::query(
        "DELETE FROM raw_items
         WHERE processing_status IN ('noise', 'error')
           AND created_at < $1
           AND NOT EXISTS (SELECT 1 FROM event_items ei WHERE ei.item_id = raw_items.id)",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT processing_status, COUNT(*) FROM raw_items GROUP BY processing_status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
