//! Source queries and YAML config sync.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::SourceDefinition;
use crate::models::Source;

const SOURCE_COLUMNS: &str = "id, slug, name, kind, feed_url, credibility_score, source_tier, \
     reporting_type, is_active, last_fetched_at, ingest_watermark";

pub async fn by_id(pool: &PgPool, id: Uuid) -> Result<Option<Source>> {
    let row = sqlx::query_as::<_, Source>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Source>> {
    let rows = sqlx::query_as::<_, Source>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_active(pool: &PgPool) -> Result<Vec<Source>> {
    let rows = sqlx::query_as::<_, Source>(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE is_active ORDER BY slug"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Upsert operator-declared sources. Sources never get destroyed here;
/// entries absent from the YAML are deactivated instead.
pub async fn sync_from_definitions(pool: &PgPool, defs: &[SourceDefinition]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for def in defs {
        sqlx::query(
            "INSERT INTO sources (slug, name, kind, feed_url, credibility_score, source_tier, reporting_type, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (slug) DO UPDATE SET
               name = EXCLUDED.name,
               kind = EXCLUDED.kind,
               feed_url = EXCLUDED.feed_url,
               credibility_score = EXCLUDED.credibility_score,
               source_tier = EXCLUDED.source_tier,
               reporting_type = EXCLUDED.reporting_type,
               is_active = EXCLUDED.is_active,
               updated_at = now()",
        )
        .bind(&def.slug)
        .bind(&def.name)
        .bind(def.kind.as_str())
        .bind(&def.feed_url)
        .bind(def.credibility)
        .bind(def.tier.as_str())
        .bind(def.reporting_type.as_str())
        .bind(def.active)
        .execute(&mut *tx)
        .await?;
    }

    let slugs: Vec<String> = defs.iter().map(|d| d.slug.clone()).collect();
    sqlx::query("UPDATE sources SET is_active = FALSE, updated_at = now() WHERE slug <> ALL($1) AND is_active")
        .bind(&slugs)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(defs.len())
}
