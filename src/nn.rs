//! Nearest-neighbor search over event embeddings.
//!
//! Two interchangeable strategies behind one trait: `IvfFlat` pushes the
//! search into Postgres (ivfflat index, cosine operator) and is the
//! default; `ExactScan` loads the candidate window and scores in-process,
//! serving as the exact fallback and the reference the replay harness
//! compares approximate strategies against.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use crate::models::Event;

/// Cosine similarity in f64 for stable threshold comparisons.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        na += x as f64 * x as f64;
        nb += y as f64 * y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[async_trait]
pub trait NearestNeighbor: Send + Sync {
    /// Most similar events with matching embedding-model lineage whose
    /// `first_seen_at` falls inside the window, best first. Ties break
    /// toward the oldest event.
    async fn nearest_events(
        &self,
        pool: &PgPool,
        embedding: &Vector,
        model: &str,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<(Event, f64)>>;

    fn name(&self) -> &'static str;
}

/// Index-backed search via the pgvector cosine operator.
pub struct IvfFlat;

#[async_trait]
impl NearestNeighbor for IvfFlat {
    async fn nearest_events(
        &self,
        pool: &PgPool,
        embedding: &Vector,
        model: &str,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<(Event, f64)>> {
        crate::storage::events::cluster_candidates(pool, embedding, model, window, limit).await
    }

    fn name(&self) -> &'static str {
        "ivfflat"
    }
}

/// Exact in-process scan over the candidate window.
pub struct ExactScan;

#[async_trait]
impl NearestNeighbor for ExactScan {
    async fn nearest_events(
        &self,
        pool: &PgPool,
        embedding: &Vector,
        model: &str,
        window: Duration,
        limit: i64,
    ) -> Result<Vec<(Event, f64)>> {
        let since = Utc::now() - window;
        let candidates =
            crate::storage::events::recent_with_embeddings(pool, model, since).await?;

        let query = embedding.as_slice();
        let mut scored: Vec<(Event, f64)> = candidates
            .into_iter()
            .filter_map(|event| {
                let similarity = event
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(query, e.as_slice()))?;
                Some((event, similarity))
            })
            .collect();

        scored.sort_by(|(ea, sa), (eb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ea.first_seen_at.cmp(&eb.first_seen_at))
        });
        scored.truncate(limit as usize);
        Ok(scored)
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

#[cfg(test)]
mod tests {
    use super::cosine_similarity;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
