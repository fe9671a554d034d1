//! Ingest deduplication.
//!
//! A candidate is checked in cost order: normalized URL, then
//! `(source, external_id)`, then content hash, then embedding similarity —
//! each within the configured recency window. Embedding comparison is
//! fail-safe: mismatched model lineage is never compared, so cross-model
//! candidates are treated as new content.

use anyhow::Result;
use chrono::{Duration, Utc};
use pgvector::Vector;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::Settings;

/// Result of a duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupResult {
    pub duplicate: bool,
    pub matched_item_id: Option<Uuid>,
}

impl DedupResult {
    fn fresh() -> Self {
        Self {
            duplicate: false,
            matched_item_id: None,
        }
    }

    fn matched(id: Uuid) -> Self {
        Self {
            duplicate: true,
            matched_item_id: Some(id),
        }
    }
}

/// SHA-256 of the content bytes, hex-encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Normalize a URL for identity comparison: lowercase host, drop `www.`,
/// strip the operator-maintained tracking params, sort what remains.
/// Unparseable URLs fall back to a trimmed lowercase copy.
pub fn normalize_url(raw: &str, tracking_params: &[String], strict_query: bool) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_ascii_lowercase();
    };

    if let Some(host) = url.host_str() {
        let lowered = host.to_ascii_lowercase();
        let stripped = lowered.strip_prefix("www.").unwrap_or(&lowered).to_string();
        let _ = url.set_host(Some(&stripped));
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !tracking_params.iter().any(|t| t == &key)
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if !strict_query {
        pairs.retain(|(_, v)| !v.is_empty());
    }
    pairs.sort();

    url.set_fragment(None);
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let mut out = url.to_string();
    if out.ends_with('/') && url.path() == "/" {
        out.pop();
    }
    out
}

pub struct Deduplicator {
    window: Duration,
    similarity_threshold: f64,
    tracking_params: Vec<String>,
    strict_query: bool,
}

impl Deduplicator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            window: Duration::days(settings.dedup_window_days),
            similarity_threshold: settings.dedup_similarity_threshold,
            tracking_params: settings.tracking_params.clone(),
            strict_query: settings.strict_query_preservation,
        }
    }

    pub fn normalize(&self, raw_url: &str) -> String {
        normalize_url(raw_url, &self.tracking_params, self.strict_query)
    }

    /// Full duplicate check for a candidate item. The embedding leg only
    /// runs when the caller already has a vector (re-checks after
    /// embedding); ingest-time checks pass `None`.
    pub async fn check(
        &self,
        pool: &PgPool,
        source_id: Uuid,
        external_id: &str,
        url: &str,
        content: &str,
        embedding: Option<(&Vector, &str)>,
    ) -> Result<DedupResult> {
        let since = Utc::now() - self.window;
        let normalized = self.normalize(url);

        if let Some(id) = crate::storage::items::find_by_normalized_url(pool, &normalized, since).await? {
            metrics::increment_counter!("dedup_hits_total", "kind" => "url");
            debug!(%id, "dedup hit: normalized url");
            return Ok(DedupResult::matched(id));
        }

        if let Some(id) = crate::storage::items::find_by_external_id(pool, source_id, external_id).await? {
            metrics::increment_counter!("dedup_hits_total", "kind" => "external_id");
            debug!(%id, "dedup hit: external id");
            return Ok(DedupResult::matched(id));
        }

        let hash = content_hash(content);
        if let Some(id) = crate::storage::items::find_by_content_hash(pool, &hash, since).await? {
            metrics::increment_counter!("dedup_hits_total", "kind" => "content_hash");
            debug!(%id, "dedup hit: content hash");
            return Ok(DedupResult::matched(id));
        }

        if let Some((vector, model)) = embedding {
            if let Some((id, similarity)) =
                crate::storage::items::nearest_embedding(pool, vector, model, since).await?
            {
                if similarity >= self.similarity_threshold {
                    metrics::increment_counter!("dedup_hits_total", "kind" => "embedding");
                    debug!(%id, similarity, "dedup hit: embedding similarity");
                    return Ok(DedupResult::matched(id));
                }
            }
        }

        Ok(DedupResult::fresh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<String> {
        ["utm_source", "utm_medium", "fbclid", "ref"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn lowercases_host_and_drops_www() {
        let n = normalize_url("https://WWW.Example.COM/News/Story", &params(), false);
        assert_eq!(n, "https://example.com/News/Story");
    }

    #[test]
    fn strips_tracking_params_and_sorts_rest() {
        let n = normalize_url(
            "https://example.com/a?utm_source=x&b=2&a=1&fbclid=zz",
            &params(),
            false,
        );
        assert_eq!(n, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn identical_articles_normalize_identically() {
        let u1 = "https://www.example.com/story?id=7&utm_medium=rss";
        let u2 = "https://EXAMPLE.com/story?utm_source=feed&id=7";
        assert_eq!(
            normalize_url(u1, &params(), false),
            normalize_url(u2, &params(), false)
        );
    }

    #[test]
    fn drops_fragment_and_trailing_slash() {
        let n = normalize_url("https://example.com/#section", &params(), false);
        assert_eq!(n, "https://example.com");
    }

    #[test]
    fn strict_mode_keeps_empty_values() {
        let lax = normalize_url("https://example.com/a?flag=&x=1", &params(), false);
        let strict = normalize_url("https://example.com/a?flag=&x=1", &params(), true);
        assert_eq!(lax, "https://example.com/a?x=1");
        assert_eq!(strict, "https://example.com/a?flag=&x=1");
    }

    #[test]
    fn unparseable_urls_fall_back() {
        let n = normalize_url("  Not A Url  ", &params(), false);
        assert_eq!(n, "not a url");
    }

    #[test]
    fn content_hash_is_stable_and_distinct() {
        let a = content_hash("troops massing at the border");
        let b = content_hash("troops massing at the border");
        let c = content_hash("troops withdrawing from the border");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
