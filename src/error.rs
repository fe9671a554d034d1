//! Pipeline error taxonomy.
//!
//! Transient provider failures are retried inside the LLM policy layer;
//! `BudgetExceeded` is expected and non-fatal (the item stays pending);
//! everything else surfaces with structured context. Only invariant
//! violations are allowed to panic, and only at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// 429 / 5xx / timeout from the LLM or embedding provider.
    #[error("transient provider error ({provider}): {message}")]
    TransientProvider { provider: String, message: String },

    /// The atomic budget guard refused to reserve the call.
    #[error("daily budget exceeded for {tier} ({kind})")]
    BudgetExceeded { tier: String, kind: BudgetKind },

    /// Operator pricing map does not cover the requested model.
    #[error("no pricing configured for model {model}")]
    PricingNotConfigured { model: String },

    /// LLM response failed the tier's schema contract.
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    /// Tier-2 emitted the same (trend, signal_type) pair twice.
    #[error("duplicate impact for ({trend_id}, {signal_type})")]
    DuplicateImpact { trend_id: String, signal_type: String },

    /// Non-retryable provider failure (auth, 4xx, malformed body).
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),

    /// DB CHECK violation, missing migration, broken parity. A programming
    /// bug; fail fast.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Calls,
    Tokens,
    Cost,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetKind::Calls => write!(f, "calls"),
            BudgetKind::Tokens => write!(f, "tokens"),
            BudgetKind::Cost => write!(f, "cost"),
        }
    }
}

impl PipelineError {
    /// Whether the policy layer may retry (and then fail over) this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientProvider { .. })
    }

    /// Whether the owning raw item should stay `pending` for a later pass
    /// instead of being marked `error`.
    pub fn leaves_item_pending(&self) -> bool {
        matches!(
            self,
            PipelineError::BudgetExceeded { .. } | PipelineError::TransientProvider { .. }
        )
    }

    /// A same-kind copy for fanning one failure out to every item of a
    /// batch. `sqlx::Error` is not clonable, so database failures flatten
    /// to their message.
    pub fn replicate(&self) -> PipelineError {
        match self {
            PipelineError::TransientProvider { provider, message } => {
                PipelineError::TransientProvider {
                    provider: provider.clone(),
                    message: message.clone(),
                }
            }
            PipelineError::BudgetExceeded { tier, kind } => PipelineError::BudgetExceeded {
                tier: tier.clone(),
                kind: *kind,
            },
            PipelineError::PricingNotConfigured { model } => {
                PipelineError::PricingNotConfigured {
                    model: model.clone(),
                }
            }
            PipelineError::SchemaValidation(msg) => PipelineError::SchemaValidation(msg.clone()),
            PipelineError::DuplicateImpact {
                trend_id,
                signal_type,
            } => PipelineError::DuplicateImpact {
                trend_id: trend_id.clone(),
                signal_type: signal_type.clone(),
            },
            PipelineError::Provider { provider, message } => PipelineError::Provider {
                provider: provider.clone(),
                message: message.clone(),
            },
            PipelineError::Database(e) => PipelineError::Invariant(format!("database: {e}")),
            PipelineError::Config(msg) => PipelineError::Config(msg.clone()),
            PipelineError::Invariant(msg) => PipelineError::Invariant(msg.clone()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Classify an HTTP status for the retry/failover ladder.
pub fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_leaves_item_pending() {
        let err = PipelineError::BudgetExceeded {
            tier: "tier2".into(),
            kind: BudgetKind::Calls,
        };
        assert!(err.leaves_item_pending());
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_statuses() {
        assert!(retryable_status(429));
        assert!(retryable_status(503));
        assert!(retryable_status(529));
        assert!(!retryable_status(400));
        assert!(!retryable_status(401));
    }
}
