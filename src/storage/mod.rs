//! Postgres access layer.
//!
//! One pool, linear migrations, and per-entity query modules. All cross-
//! worker coordination happens here: unique constraints, single-expression
//! increments and row locks are the synchronization points — there are no
//! in-process locks around trend state.

pub mod events;
pub mod evidence;
pub mod feedback;
pub mod gaps;
pub mod items;
pub mod outcomes;
pub mod snapshots;
pub mod sources;
pub mod trends;
pub mod usage;

use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Tables the models in this crate read and write. Startup parity checking
/// refuses to boot when one is missing (strict mode), so a model/migration
/// mismatch fails fast instead of at first write.
const EXPECTED_TABLES: &[&str] = &[
    "sources",
    "raw_items",
    "events",
    "event_items",
    "trends",
    "trend_definition_versions",
    "trend_evidence",
    "trend_snapshots",
    "trend_outcomes",
    "human_feedback",
    "api_usage",
    "taxonomy_gaps",
    "decay_runs",
];

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations and verify schema parity.
    pub async fn migrate(&self, strict: bool) -> Result<()> {
        MIGRATOR.run(&self.pool).await.context("running migrations")?;

        let missing = self.missing_tables().await?;
        if !missing.is_empty() {
            let msg = format!("schema parity check failed, missing tables: {missing:?}");
            if strict {
                bail!(msg);
            }
            tracing::warn!("{msg}");
        } else {
            info!("schema parity verified ({} tables)", EXPECTED_TABLES.len());
        }
        Ok(())
    }

    async fn missing_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .fetch_all(&self.pool)
        .await?;
        let present: std::collections::HashSet<&str> =
            rows.iter().map(|(name,)| name.as_str()).collect();
        Ok(EXPECTED_TABLES
            .iter()
            .filter(|t| !present.contains(**t))
            .map(|t| t.to_string())
            .collect())
    }
}
