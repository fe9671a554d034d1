//! Budget guard handle shared by every provider-calling path.
//!
//! Wraps the atomic reserve/settle/release cycle in `storage::usage` with
//! the configured caps and pricing, so callers cannot invoke a provider
//! without first passing the check-and-reserve.

use sqlx::PgPool;

use crate::config::{PricingMap, Settings};
use crate::error::{PipelineError, PipelineResult};
use crate::models::Tier;
use crate::storage::usage::{self, BudgetCaps};

#[derive(Clone)]
pub struct BudgetGuard {
    pool: PgPool,
    pricing: PricingMap,
    tier1_caps: BudgetCaps,
    tier2_caps: BudgetCaps,
    embedding_caps: BudgetCaps,
}

/// A successful reservation; must be settled or released by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub tier: Tier,
    pub estimated_tokens: i64,
    pub estimated_cost_usd: f64,
}

impl BudgetGuard {
    pub fn new(pool: PgPool, settings: &Settings) -> Self {
        let shared = |max_calls| BudgetCaps {
            max_calls,
            max_tokens: settings.max_daily_tokens,
            max_cost_usd: settings.max_daily_cost_usd,
        };
        Self {
            pool,
            pricing: settings.pricing.clone(),
            tier1_caps: shared(settings.tier1_max_daily_calls),
            tier2_caps: shared(settings.tier2_max_daily_calls),
            embedding_caps: shared(settings.embedding_max_daily_calls),
        }
    }

    fn caps(&self, tier: Tier) -> &BudgetCaps {
        match tier {
            Tier::Tier1 => &self.tier1_caps,
            Tier::Tier2 => &self.tier2_caps,
            Tier::Embedding => &self.embedding_caps,
        }
    }

    /// Pricing coverage precheck: fail closed when the operator map does
    /// not cover the model.
    pub fn require_pricing(&self, model: &str) -> PipelineResult<()> {
        if self.pricing.get(model).is_none() {
            return Err(PipelineError::PricingNotConfigured {
                model: model.to_string(),
            });
        }
        Ok(())
    }

    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing
            .cost(model, input_tokens, output_tokens)
            .unwrap_or(0.0)
    }

    /// Atomically reserve one call. Raises `BudgetExceeded` (and bumps the
    /// denial counter) when any cap would be crossed.
    pub async fn reserve(
        &self,
        tier: Tier,
        model: &str,
        estimated_input_tokens: u64,
    ) -> PipelineResult<Reservation> {
        self.require_pricing(model)?;
        let estimated_cost = self.estimate_cost(model, estimated_input_tokens, 0);
        usage::reserve(
            &self.pool,
            tier,
            estimated_input_tokens as i64,
            estimated_cost,
            self.caps(tier),
        )
        .await?;
        Ok(Reservation {
            tier,
            estimated_tokens: estimated_input_tokens as i64,
            estimated_cost_usd: estimated_cost,
        })
    }

    /// Settle a reservation with the provider-reported actuals.
    pub async fn settle(
        &self,
        reservation: Reservation,
        model: &str,
        actual_input_tokens: u64,
        actual_output_tokens: u64,
    ) -> anyhow::Result<()> {
        let actual_cost = self.estimate_cost(model, actual_input_tokens, actual_output_tokens);
        usage::settle(
            &self.pool,
            reservation.tier,
            reservation.estimated_tokens,
            reservation.estimated_cost_usd,
            actual_input_tokens as i64,
            actual_output_tokens as i64,
            actual_cost,
        )
        .await
    }

    /// Hand back a reservation whose call never happened.
    pub async fn release(&self, reservation: Reservation) -> anyhow::Result<()> {
        usage::release(
            &self.pool,
            reservation.tier,
            reservation.estimated_tokens,
            reservation.estimated_cost_usd,
        )
        .await
    }
}
