//! Tier-1 relevance filter.
//!
//! Cheap batch routing: each pending item gets a 0-10 relevance score per
//! active trend. Items whose best score stays under the threshold are
//! noise and never reach embedding or Tier-2. A batch that fails schema
//! validation degrades to per-item calls instead of aborting.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::Tier;

use super::guardrails::{article_token_budget, fence_untrusted, INJECTION_RULE};
use super::policy::{extract_json, LlmPolicy};

const SYSTEM_PROMPT: &str = "You are a geopolitical news triage filter. Score how relevant each \
article is to each tracked trend hypothesis on a 0-10 scale (0 = unrelated, 10 = directly \
reports evidence for or against the hypothesis). Respond with JSON only: \
{\"items\": [{\"item_id\": \"<uuid>\", \"relevance\": {\"<trend_id>\": <score>}}]} with one entry \
per article and one score per trend.";

/// Slim view of an item for scoring.
#[derive(Debug, Clone)]
pub struct Tier1Item {
    pub id: Uuid,
    pub title: String,
    pub content: String,
}

/// A trend the filter scores against.
#[derive(Debug, Clone)]
pub struct Tier1Trend {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Tier1Verdict {
    pub item_id: Uuid,
    pub scores: HashMap<String, f64>,
}

impl Tier1Verdict {
    pub fn max_relevance(&self) -> f64 {
        self.scores.values().copied().fold(0.0, f64::max)
    }
}

pub struct Tier1Filter {
    policy: Arc<LlmPolicy>,
    primary_model: String,
    fallback_model: String,
    max_input_tokens: usize,
}

impl Tier1Filter {
    pub fn new(
        policy: Arc<LlmPolicy>,
        primary_model: &str,
        fallback_model: &str,
        max_input_tokens: usize,
    ) -> Self {
        Self {
            policy,
            primary_model: primary_model.to_string(),
            fallback_model: fallback_model.to_string(),
            max_input_tokens,
        }
    }

    /// Score a batch. On schema failure the batch degrades to per-item
    /// calls; an item whose solo call also fails keeps its error.
    pub async fn classify_batch(
        &self,
        items: &[Tier1Item],
        trends: &[Tier1Trend],
    ) -> Vec<(Uuid, PipelineResult<Tier1Verdict>)> {
        if items.is_empty() || trends.is_empty() {
            return items
                .iter()
                .map(|i| {
                    (
                        i.id,
                        Ok(Tier1Verdict {
                            item_id: i.id,
                            scores: HashMap::new(),
                        }),
                    )
                })
                .collect();
        }

        match self.classify_once(items, trends).await {
            Ok(verdicts) => items
                .iter()
                .map(|item| {
                    let verdict = verdicts
                        .iter()
                        .find(|v| v.item_id == item.id)
                        .cloned()
                        .ok_or_else(|| {
                            PipelineError::SchemaValidation(format!(
                                "batch response missing item {}",
                                item.id
                            ))
                        });
                    (item.id, verdict)
                })
                .collect(),
            // Schema failures degrade to per-item calls; budget and
            // provider failures fan out as-is (a solo retry would only
            // burn more denials).
            Err(batch_err @ PipelineError::SchemaValidation(_)) => {
                warn!(reason = %batch_err, "tier1 batch failed validation, degrading to per-item calls");
                metrics::increment_counter!("tier1_batch_degradations_total");
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let solo = self
                        .classify_once(std::slice::from_ref(item), trends)
                        .await
                        .and_then(|mut v| {
                            v.pop().ok_or_else(|| {
                                PipelineError::SchemaValidation("empty solo response".into())
                            })
                        });
                    out.push((item.id, solo));
                }
                out
            }
            Err(batch_err) => items
                .iter()
                .map(|i| (i.id, Err(batch_err.replicate())))
                .collect(),
        }
    }

    async fn classify_once(
        &self,
        items: &[Tier1Item],
        trends: &[Tier1Trend],
    ) -> PipelineResult<Vec<Tier1Verdict>> {
        let user = self.build_prompt(items, trends);
        let output = self
            .policy
            .invoke(
                Tier::Tier1,
                &self.primary_model,
                &self.fallback_model,
                &format!("{SYSTEM_PROMPT}\n\n{INJECTION_RULE}"),
                &user,
                2048,
            )
            .await?;

        let expected: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let known: Vec<&str> = trends.iter().map(|t| t.id.as_str()).collect();
        parse_response(&output.content, &expected, &known)
    }

    fn build_prompt(&self, items: &[Tier1Item], trends: &[Tier1Trend]) -> String {
        let mut scaffold = String::from("Tracked trends:\n");
        for t in trends {
            scaffold.push_str(&format!("- {} ({}): {}\n", t.id, t.name, t.description));
        }
        scaffold.push_str("\nArticles:\n");

        let per_item_budget =
            article_token_budget(self.max_input_tokens, &scaffold) / items.len().max(1);

        let mut prompt = scaffold;
        for item in items {
            let (fenced, _) = fence_untrusted(
                &format!("{}\n\n{}", item.title, item.content),
                per_item_budget,
            );
            prompt.push_str(&format!("item_id: {}\n{}\n\n", item.id, fenced));
        }
        prompt
    }
}

#[derive(Debug, Deserialize)]
struct Tier1Response {
    items: Vec<Tier1ResponseItem>,
}

#[derive(Debug, Deserialize)]
struct Tier1ResponseItem {
    item_id: Uuid,
    #[serde(default)]
    relevance: HashMap<String, f64>,
}

/// Strict validation of the batch response: every expected item exactly
/// once, every score finite and in [0, 10]. Scores for unknown trend ids
/// are dropped.
pub fn parse_response(
    content: &str,
    expected_items: &[Uuid],
    known_trend_ids: &[&str],
) -> PipelineResult<Vec<Tier1Verdict>> {
    let json = extract_json(content)?;
    let parsed: Tier1Response = serde_json::from_str(json)
        .map_err(|e| PipelineError::SchemaValidation(format!("tier1 response: {e}")))?;

    let mut seen = std::collections::HashSet::new();
    let mut verdicts = Vec::with_capacity(parsed.items.len());
    for entry in parsed.items {
        if !seen.insert(entry.item_id) {
            return Err(PipelineError::SchemaValidation(format!(
                "item {} appears twice",
                entry.item_id
            )));
        }
        let mut scores = HashMap::new();
        for (trend_id, score) in entry.relevance {
            if !score.is_finite() || !(0.0..=10.0).contains(&score) {
                return Err(PipelineError::SchemaValidation(format!(
                    "score {score} for {trend_id} outside [0, 10]"
                )));
            }
            if known_trend_ids.contains(&trend_id.as_str()) {
                scores.insert(trend_id, score);
            }
        }
        verdicts.push(Tier1Verdict {
            item_id: entry.item_id,
            scores,
        });
    }

    for expected in expected_items {
        if !seen.contains(expected) {
            return Err(PipelineError::SchemaValidation(format!(
                "batch response missing item {expected}"
            )));
        }
    }
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_batch_parses() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = format!(
            r#"{{"items": [
                {{"item_id": "{a}", "relevance": {{"eu-russia": 7.0, "other": 1.0}}}},
                {{"item_id": "{b}", "relevance": {{"eu-russia": 2.0}}}}
            ]}}"#
        );
        let verdicts = parse_response(&content, &[a, b], &["eu-russia"]).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert!((verdicts[0].max_relevance() - 7.0).abs() < 1e-12);
        // Unknown trend key dropped.
        assert_eq!(verdicts[0].scores.len(), 1);
    }

    #[test]
    fn missing_item_rejected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let content = format!(r#"{{"items": [{{"item_id": "{a}", "relevance": {{}}}}]}}"#);
        assert!(matches!(
            parse_response(&content, &[a, b], &[]),
            Err(PipelineError::SchemaValidation(_))
        ));
    }

    #[test]
    fn out_of_range_score_rejected() {
        let a = Uuid::new_v4();
        let content = format!(r#"{{"items": [{{"item_id": "{a}", "relevance": {{"t": 11.0}}}}]}}"#);
        assert!(parse_response(&content, &[a], &["t"]).is_err());
    }

    #[test]
    fn duplicate_item_rejected() {
        let a = Uuid::new_v4();
        let content = format!(
            r#"{{"items": [
                {{"item_id": "{a}", "relevance": {{}}}},
                {{"item_id": "{a}", "relevance": {{}}}}
            ]}}"#
        );
        assert!(parse_response(&content, &[a], &[]).is_err());
    }
}
