//! Trend persistence: YAML sync with hash-gated definition versioning,
//! and the atomic log-odds mutation primitives.

use anyhow::Result;
use sqlx::PgPool;

use crate::config::TrendDefinition;
use crate::engine::prob_to_logodds;
use crate::models::{Trend, TrendDefinitionVersion};

const TREND_COLUMNS: &str = "id, name, description, definition, definition_hash, \
     baseline_log_odds, current_log_odds, decay_half_life_days, is_active, \
     last_evidence_at, last_decayed_at, updated_at";

pub async fn by_id(pool: &PgPool, id: &str) -> Result<Option<Trend>> {
    let row = sqlx::query_as::<_, Trend>(&format!(
        "SELECT {TREND_COLUMNS} FROM trends WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn all(pool: &PgPool, active_only: bool) -> Result<Vec<Trend>> {
    let rows = sqlx::query_as::<_, Trend>(&format!(
        "SELECT {TREND_COLUMNS} FROM trends WHERE (NOT $1) OR is_active ORDER BY id"
    ))
    .bind(active_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sync YAML definitions into the trends table. A definition whose
/// canonical hash changed gets its row updated, the baseline re-anchored,
/// and an immutable version row appended; unchanged definitions are
/// untouched. Trends absent from the YAML are deactivated, never deleted.
pub async fn sync_from_definitions(
    pool: &PgPool,
    defs: &[TrendDefinition],
    actor: &str,
) -> Result<usize> {
    let mut changed = 0usize;
    let mut tx = pool.begin().await?;

    for def in defs {
        if upsert_definition(&mut tx, def, actor, "yaml sync").await? {
            changed += 1;
        }
    }

    let ids: Vec<String> = defs.iter().map(|d| d.id.clone()).collect();
    sqlx::query("UPDATE trends SET is_active = FALSE, updated_at = now() WHERE id <> ALL($1) AND is_active")
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(changed)
}

/// Hash-gated upsert of one definition (the API path). Returns whether
/// anything changed; no deactivation sweep happens here.
pub async fn sync_single(pool: &PgPool, def: &TrendDefinition, actor: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let changed = upsert_definition(&mut tx, def, actor, "api update").await?;
    tx.commit().await?;
    Ok(changed)
}

async fn upsert_definition(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    def: &TrendDefinition,
    actor: &str,
    context: &str,
) -> Result<bool> {
    let (canonical, hash) = def.canonical_hash()?;
    let baseline = prob_to_logodds(def.baseline_probability);

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT definition_hash FROM trends WHERE id = $1")
            .bind(&def.id)
            .fetch_optional(&mut **tx)
            .await?;

    match existing {
        Some((old_hash,)) if old_hash == hash => return Ok(false),
        Some(_) => {
            sqlx::query(
                "UPDATE trends SET name = $2, description = $3, definition = $4,
                    definition_hash = $5, baseline_log_odds = $6,
                    decay_half_life_days = $7, is_active = TRUE, updated_at = now()
                 WHERE id = $1",
            )
            .bind(&def.id)
            .bind(&def.name)
            .bind(&def.description)
            .bind(&canonical)
            .bind(&hash)
            .bind(baseline)
            .bind(def.decay_half_life_days)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO trends
                   (id, name, description, definition, definition_hash,
                    baseline_log_odds, current_log_odds, decay_half_life_days)
                 VALUES ($1, $2, $3, $4, $5, $6, $6, $7)",
            )
            .bind(&def.id)
            .bind(&def.name)
            .bind(&def.description)
            .bind(&canonical)
            .bind(&hash)
            .bind(baseline)
            .bind(def.decay_half_life_days)
            .execute(&mut **tx)
            .await?;
        }
    }

    sqlx::query(
        "INSERT INTO trend_definition_versions (trend_id, definition, definition_hash, actor, context)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&def.id)
    .bind(&canonical)
    .bind(&hash)
    .bind(actor)
    .bind(context)
    .execute(&mut **tx)
    .await?;
    Ok(true)
}

/// Single-expression log-odds increment; never read-modify-write. Safe
/// under any number of concurrent workers because addition commutes.
pub async fn increment_log_odds(pool: &PgPool, trend_id: &str, delta: f64) -> Result<()> {
    sqlx::query(
        "UPDATE trends SET current_log_odds = current_log_odds + $2,
            last_evidence_at = now(), updated_at = now()
         WHERE id = $1",
    )
    .bind(trend_id)
    .bind(delta)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn definition_history(pool: &PgPool, trend_id: &str) -> Result<Vec<TrendDefinitionVersion>> {
    let rows = sqlx::query_as::<_, TrendDefinitionVersion>(
        "SELECT id, trend_id, definition, definition_hash, actor, context, created_at
         FROM trend_definition_versions
         WHERE trend_id = $1
         ORDER BY created_at DESC",
    )
    .bind(trend_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
