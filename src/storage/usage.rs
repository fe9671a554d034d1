//! Daily API usage accounting and the atomic budget guard.
//!
//! The guard is one conditional UPDATE: the row-level write lock makes the
//! compare-and-reserve atomic, so when the cap is N the (N+1)-th caller is
//! denied even under fully parallel submission. No read-then-write window
//! exists anywhere in this path.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{BudgetKind, PipelineError};
use crate::models::{ApiUsage, Tier};

/// Caps for one tier. Zero disables a dimension.
#[derive(Debug, Clone, Copy)]
pub struct BudgetCaps {
    pub max_calls: i64,
    pub max_tokens: i64,
    pub max_cost_usd: f64,
}

impl BudgetCaps {
    fn call_cap(&self) -> i64 {
        if self.max_calls <= 0 {
            i64::MAX
        } else {
            self.max_calls
        }
    }

    fn token_cap(&self) -> i64 {
        if self.max_tokens <= 0 {
            i64::MAX
        } else {
            self.max_tokens
        }
    }

    fn cost_cap(&self) -> f64 {
        if self.max_cost_usd <= 0.0 {
            f64::INFINITY
        } else {
            self.max_cost_usd
        }
    }
}

/// Atomically reserve one call plus its estimated tokens/cost against
/// today's row. On refusal, classifies which cap bound first.
pub async fn reserve(
    pool: &PgPool,
    tier: Tier,
    estimated_tokens: i64,
    estimated_cost_usd: f64,
    caps: &BudgetCaps,
) -> Result<(), PipelineError> {
    let today = Utc::now().date_naive();

    sqlx::query(
        "INSERT INTO api_usage (usage_date, tier) VALUES ($1, $2)
         ON CONFLICT (usage_date, tier) DO NOTHING",
    )
    .bind(today)
    .bind(tier.as_str())
    .execute(pool)
    .await?;

    let reserved = sqlx::query(
        "UPDATE api_usage
         SET calls = calls + 1,
             input_tokens = input_tokens + $3,
             estimated_cost_usd = estimated_cost_usd + $4
         WHERE usage_date = $1 AND tier = $2
           AND calls + 1 <= $5
           AND input_tokens + $3 <= $6
           AND estimated_cost_usd + $4 <= $7",
    )
    .bind(today)
    .bind(tier.as_str())
    .bind(estimated_tokens)
    .bind(estimated_cost_usd)
    .bind(caps.call_cap())
    .bind(caps.token_cap())
    .bind(caps.cost_cap())
    .execute(pool)
    .await?;

    if reserved.rows_affected() == 1 {
        return Ok(());
    }

    // Reservation refused: read the row once to name the binding cap.
    let row: Option<(i64, i64, f64)> = sqlx::query_as(
        "SELECT calls, input_tokens, estimated_cost_usd FROM api_usage
         WHERE usage_date = $1 AND tier = $2",
    )
    .bind(today)
    .bind(tier.as_str())
    .fetch_optional(pool)
    .await?;

    let kind = match row {
        Some((calls, _, _)) if calls + 1 > caps.call_cap() => BudgetKind::Calls,
        Some((_, tokens, _)) if tokens + estimated_tokens > caps.token_cap() => BudgetKind::Tokens,
        _ => BudgetKind::Cost,
    };

    metrics::increment_counter!("llm_budget_denials_total", "tier" => tier.as_str());
    Err(PipelineError::BudgetExceeded {
        tier: tier.as_str().to_string(),
        kind,
    })
}

/// Record actuals after the provider responded. The reservation already
/// charged the estimate; this settles the difference and adds output-side
/// tokens and cost.
pub async fn settle(
    pool: &PgPool,
    tier: Tier,
    estimated_tokens: i64,
    estimated_cost_usd: f64,
    actual_input_tokens: i64,
    actual_output_tokens: i64,
    actual_cost_usd: f64,
) -> Result<()> {
    let today = Utc::now().date_naive();
    sqlx::query(
        "UPDATE api_usage
         SET input_tokens = input_tokens - $3 + $5,
             output_tokens = output_tokens + $6,
             estimated_cost_usd = estimated_cost_usd - $4 + $7
         WHERE usage_date = $1 AND tier = $2",
    )
    .bind(today)
    .bind(tier.as_str())
    .bind(estimated_tokens)
    .bind(estimated_cost_usd)
    .bind(actual_input_tokens)
    .bind(actual_output_tokens)
    .bind(actual_cost_usd)
    .execute(pool)
    .await?;
    Ok(())
}

/// Release a reservation whose call never completed (failover exhausted,
/// non-retryable provider error before any usage was incurred).
pub async fn release(
    pool: &PgPool,
    tier: Tier,
    estimated_tokens: i64,
    estimated_cost_usd: f64,
) -> Result<()> {
    let today = Utc::now().date_naive();
    sqlx::query(
        "UPDATE api_usage
         SET calls = GREATEST(calls - 1, 0),
             input_tokens = GREATEST(input_tokens - $3, 0),
             estimated_cost_usd = GREATEST(estimated_cost_usd - $4, 0)
         WHERE usage_date = $1 AND tier = $2",
    )
    .bind(today)
    .bind(tier.as_str())
    .bind(estimated_tokens)
    .bind(estimated_cost_usd)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn today(pool: &PgPool) -> Result<Vec<ApiUsage>> {
    let rows = sqlx::query_as::<_, ApiUsage>(
        "SELECT usage_date, tier, calls, input_tokens, output_tokens, estimated_cost_usd
         FROM api_usage WHERE usage_date = $1 ORDER BY tier",
    )
    .bind(Utc::now().date_naive())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
