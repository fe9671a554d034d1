//! Shared invocation contract for Tier-1 and Tier-2.
//!
//! Every provider call goes through `invoke`, in order: atomic budget
//! reservation (which includes the pricing coverage precheck), the
//! primary model with bounded exponential-backoff retries on transient
//! errors, failover to the secondary model, and usage settlement with the
//! provider-reported actuals. Callers do safety shaping before and schema
//! validation after.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::Tier;
use crate::tokens::estimate_tokens;

use super::budget::BudgetGuard;
use super::provider::{ChatClient, LlmCallOutput};

pub struct LlmPolicy {
    chat: ChatClient,
    budget: Arc<BudgetGuard>,
    timeout: Duration,
    max_retries: u32,
}

impl LlmPolicy {
    pub fn new(chat: ChatClient, budget: Arc<BudgetGuard>, timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            chat,
            budget,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }

    pub fn budget(&self) -> &Arc<BudgetGuard> {
        &self.budget
    }

    /// Run one logical call: reserve, invoke with retry + failover, settle.
    pub async fn invoke(
        &self,
        tier: Tier,
        primary_model: &str,
        fallback_model: &str,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> PipelineResult<LlmCallOutput> {
        // Fail closed on pricing before reserving anything.
        self.budget.require_pricing(primary_model)?;
        self.budget.require_pricing(fallback_model)?;

        let estimated_input = (estimate_tokens(system) + estimate_tokens(user)) as u64;
        let reservation = self.budget.reserve(tier, primary_model, estimated_input).await?;

        let result = self
            .call_with_failover(primary_model, fallback_model, system, user, max_output_tokens)
            .await;

        match result {
            Ok(output) => {
                let input = output.usage.prompt_tokens.unwrap_or(estimated_input);
                let output_tokens = output.usage.completion_tokens.unwrap_or(0);
                if let Err(e) = self
                    .budget
                    .settle(reservation, &output.model, input, output_tokens)
                    .await
                {
                    warn!(tier = tier.as_str(), "usage settle failed: {e}");
                }
                metrics::histogram!(
                    "llm_call_latency_ms",
                    output.latency_ms as f64,
                    "tier" => tier.as_str()
                );
                Ok(output)
            }
            Err(err) => {
                if let Err(e) = self.budget.release(reservation).await {
                    warn!(tier = tier.as_str(), "reservation release failed: {e}");
                }
                Err(err)
            }
        }
    }

    async fn call_with_failover(
        &self,
        primary_model: &str,
        fallback_model: &str,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> PipelineResult<LlmCallOutput> {
        match self
            .call_with_retries(primary_model, system, user, max_output_tokens)
            .await
        {
            Ok(output) => Ok(output),
            Err(err) if err.is_transient() && fallback_model != primary_model => {
                info!(
                    from = primary_model,
                    to = fallback_model,
                    reason = %err,
                    "failing over to secondary model"
                );
                metrics::increment_counter!("llm_failovers_total");
                self.call_with_retries(fallback_model, system, user, max_output_tokens)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn call_with_retries(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_output_tokens: u32,
    ) -> PipelineResult<LlmCallOutput> {
        let mut attempt = 0u32;
        loop {
            match self
                .chat
                .chat_completion(model, system, user, max_output_tokens, 0.0, self.timeout)
                .await
            {
                Ok(output) => return Ok(output),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        reason = %err,
                        "transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff with jitter: 500ms * 2^attempt, capped at 8s,
/// plus up to 250ms of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = 500u64.saturating_mul(2u64.saturating_pow(attempt)).min(8_000);
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

/// Extract the JSON object from possibly fenced or chatty model output.
pub fn extract_json(content: &str) -> PipelineResult<&str> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e >= s => Ok(&content[s..=e]),
        _ => Err(PipelineError::SchemaValidation(
            "response contains no JSON object".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 0..8 {
            let d = backoff_delay(attempt).as_millis() as u64;
            let base = 500u64.saturating_mul(2u64.saturating_pow(attempt)).min(8_000);
            assert!(d >= base && d < base + 250);
        }
    }

    #[test]
    fn json_extraction_strips_fences() {
        let content = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(content).unwrap(), "{\"a\": 1}");
        assert!(extract_json("no json here").is_err());
    }
}
