//! Embedding provider client with lineage tracking.
//!
//! Token counts are estimated deterministically before the call; oversize
//! input follows the configured overflow policy (`truncate` with a marker
//! or `chunk` with mean-pooled vectors). The budget guard must admit the
//! call before any bytes leave the process.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{OverflowPolicy, Settings};
use crate::dedup::content_hash;
use crate::error::{retryable_status, PipelineError, PipelineResult};
use crate::llm::budget::BudgetGuard;
use crate::models::Tier;
use crate::tokens::{chunk_by_tokens, estimate_tokens, truncate_to_tokens};
use cache::EmbeddingCache;

/// A produced vector plus the lineage persisted alongside it.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub vector: Vec<f32>,
    pub model: String,
    pub input_tokens: usize,
    pub retained_tokens: usize,
    pub truncated: bool,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, content: &str) -> PipelineResult<EmbeddingOutput>;
    fn model_id(&self) -> &str;
}

pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    max_input_tokens: usize,
    overflow_policy: OverflowPolicy,
    timeout: Duration,
    budget: Arc<BudgetGuard>,
    cache: EmbeddingCache,
}

impl EmbeddingClient {
    pub fn new(http: reqwest::Client, settings: &Settings, budget: Arc<BudgetGuard>) -> Self {
        Self {
            http,
            base_url: settings.embedding_base_url.trim_end_matches('/').to_string(),
            api_key: settings.embedding_api_key.clone(),
            model: settings.embedding_model.clone(),
            dimensions: settings.embedding_dimensions,
            max_input_tokens: settings.embedding_max_input_tokens,
            overflow_policy: settings.embedding_overflow_policy,
            timeout: Duration::from_secs(settings.llm_timeout_secs),
            budget,
            cache: EmbeddingCache::new(settings.embedding_cache_size),
        }
    }

    async fn call_provider(&self, input: &str) -> PipelineResult<Vec<f32>> {
        let req = EmbeddingRequest {
            model: self.model.clone(),
            input: input.to_string(),
        };

        let resp = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    PipelineError::TransientProvider {
                        provider: "embedding".into(),
                        message: e.to_string(),
                    }
                } else {
                    PipelineError::Provider {
                        provider: "embedding".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if retryable_status(status) {
            return Err(PipelineError::TransientProvider {
                provider: "embedding".into(),
                message: format!("status {status}"),
            });
        }
        if !(200..300).contains(&status) {
            let snippet: String = body.chars().take(400).collect();
            return Err(PipelineError::Provider {
                provider: "embedding".into(),
                message: format!("status {status}: {snippet}"),
            });
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::Provider {
                provider: "embedding".into(),
                message: format!("json parse: {e}"),
            })?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PipelineError::Provider {
                provider: "embedding".into(),
                message: "empty data array".into(),
            })?;

        if vector.len() != self.dimensions {
            return Err(PipelineError::Provider {
                provider: "embedding".into(),
                message: format!("expected {} dims, got {}", self.dimensions, vector.len()),
            });
        }
        Ok(vector)
    }

    async fn embed_guarded(&self, input: &str) -> PipelineResult<Vec<f32>> {
        let tokens = estimate_tokens(input) as u64;
        let reservation = self.budget.reserve(Tier::Embedding, &self.model, tokens).await?;

        match self.call_provider(input).await {
            Ok(vector) => {
                if let Err(e) = self
                    .budget
                    .settle(reservation, &self.model, tokens, 0)
                    .await
                {
                    warn!("embedding usage settle failed: {e}");
                }
                Ok(vector)
            }
            Err(err) => {
                if let Err(e) = self.budget.release(reservation).await {
                    warn!("embedding reservation release failed: {e}");
                }
                Err(err)
            }
        }
    }
}

/// Element-wise mean of per-chunk vectors.
pub fn mean_pool(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut out = vec![0.0f32; first.len()];
    for v in vectors {
        for (acc, x) in out.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for acc in &mut out {
        *acc /= n;
    }
    out
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, content: &str) -> PipelineResult<EmbeddingOutput> {
        let hash = content_hash(content);
        let input_tokens = estimate_tokens(content);

        if let Some(vector) = self.cache.get(&hash, &self.model) {
            metrics::increment_counter!("embedding_cache_hits_total");
            return Ok(EmbeddingOutput {
                vector,
                model: self.model.clone(),
                input_tokens,
                retained_tokens: input_tokens.min(self.max_input_tokens),
                truncated: input_tokens > self.max_input_tokens,
            });
        }

        let (vector, retained_tokens, truncated) = if input_tokens <= self.max_input_tokens {
            (self.embed_guarded(content).await?, input_tokens, false)
        } else {
            match self.overflow_policy {
                OverflowPolicy::Truncate => {
                    let (kept, _) = truncate_to_tokens(content, self.max_input_tokens);
                    let retained = estimate_tokens(&kept);
                    (self.embed_guarded(&kept).await?, retained, true)
                }
                OverflowPolicy::Chunk => {
                    let chunks = chunk_by_tokens(content, self.max_input_tokens);
                    debug!(chunks = chunks.len(), "chunking oversize embedding input");
                    let mut vectors = Vec::with_capacity(chunks.len());
                    for chunk in &chunks {
                        vectors.push(self.embed_guarded(chunk).await?);
                    }
                    (mean_pool(&vectors), input_tokens, true)
                }
            }
        };

        self.cache.put(&hash, &self.model, vector.clone());
        Ok(EmbeddingOutput {
            vector,
            model: self.model.clone(),
            input_tokens,
            retained_tokens,
            truncated,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::mean_pool;

    #[test]
    fn mean_pool_averages_elementwise() {
        let pooled = mean_pool(&[vec![1.0, 0.0, 3.0], vec![3.0, 2.0, 1.0]]);
        assert_eq!(pooled, vec![2.0, 1.0, 2.0]);
    }

    #[test]
    fn mean_pool_of_nothing_is_empty() {
        assert!(mean_pool(&[]).is_empty());
    }
}
