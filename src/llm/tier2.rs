//! Tier-2 extraction: entities, claim graph, categories, summary, and
//! per-trend impacts.
//!
//! The schema contract is strict. Impacts must carry a known direction and
//! in-range severity/confidence; a duplicate `(trend_id, signal_type)`
//! pair rejects the whole payload. Unknown trend or signal names are NOT
//! schema errors — they are routed to the taxonomy gap queue downstream.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{SignalDirection, Tier};

use super::guardrails::{article_token_budget, fence_untrusted, INJECTION_RULE};
use super::policy::{extract_json, LlmPolicy};

const SYSTEM_PROMPT: &str = "You are a geopolitical intelligence extractor. From the article, \
extract structured facts and their impact on tracked trend hypotheses. Respond with JSON only:\n\
{\"summary\": \"...\", \
\"entities\": {\"who\": [], \"what\": [], \"where\": [], \"when\": null}, \
\"claims\": [{\"id\": \"c1\", \"text\": \"...\", \"supports\": [], \"contradicts\": []}], \
\"categories\": [\"...\"], \
\"impacts\": [{\"trend_id\": \"...\", \"signal_type\": \"...\", \
\"direction\": \"escalatory|de_escalatory\", \"severity\": 0.0, \"confidence\": 0.0, \
\"reasoning\": \"...\"}]}\n\
Only list an impact when the article is genuine evidence; severity and confidence are in [0,1]. \
Never emit two impacts with the same trend_id and signal_type.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier2Extraction {
    pub summary: String,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub impacts: Vec<Impact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub who: Vec<String>,
    #[serde(default)]
    pub what: Vec<String>,
    #[serde(default, rename = "where")]
    pub location: Vec<String>,
    #[serde(default)]
    pub when: Option<String>,
}

/// One node of the normalized claim graph. `supports` / `contradicts`
/// reference other claim ids within the same extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub supports: Vec<String>,
    #[serde(default)]
    pub contradicts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Impact {
    pub trend_id: String,
    pub signal_type: String,
    pub direction: SignalDirection,
    pub severity: f64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Tier2Extraction {
    /// Whether the claim graph contains any contradiction link.
    pub fn has_contradictions(&self) -> bool {
        self.claims.iter().any(|c| !c.contradicts.is_empty())
    }

    /// Claim graph as stored on the event row.
    pub fn claims_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.claims).unwrap_or_else(|_| serde_json::json!([]))
    }

    pub fn entities_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entities).unwrap_or_else(|_| serde_json::json!({}))
    }
}

pub struct Tier2Extractor {
    policy: Arc<LlmPolicy>,
    primary_model: String,
    fallback_model: String,
    max_input_tokens: usize,
}

impl Tier2Extractor {
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

    pub async fn extract(
        &self,
        item_id: Uuid,
        title: &str,
        content: &str,
        trend_catalog: &str,
    ) -> PipelineResult<Tier2Extraction> {
        let scaffold = format!("Tracked trends and their signal types:\n{trend_catalog}\n\nArticle:\n");
        let budget = article_token_budget(self.max_input_tokens, &scaffold);
        let (fenced, truncated) = fence_untrusted(&format!("{title}\n\n{content}"), budget);
        if truncated {
            warn!(item = %item_id, "tier2 input truncated to fit token budget");
        }

        let output = self
            .policy
            .invoke(
                Tier::Tier2,
                &self.primary_model,
                &self.fallback_model,
                &format!("{SYSTEM_PROMPT}\n\n{INJECTION_RULE}"),
                &format!("{scaffold}{fenced}"),
                4096,
            )
            .await?;

        parse_extraction(&output.content)
    }
}

/// Parse and strictly validate a Tier-2 payload.
pub fn parse_extraction(content: &str) -> PipelineResult<Tier2Extraction> {
    let json = extract_json(content)?;
    let mut extraction: Tier2Extraction = serde_json::from_str(json)
        .map_err(|e| PipelineError::SchemaValidation(format!("tier2 response: {e}")))?;

    if extraction.summary.trim().is_empty() {
        return Err(PipelineError::SchemaValidation("empty summary".into()));
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    for impact in &extraction.impacts {
        if !impact.severity.is_finite() || !(0.0..=1.0).contains(&impact.severity) {
            return Err(PipelineError::SchemaValidation(format!(
                "severity {} outside [0, 1]",
                impact.severity
            )));
        }
        if !impact.confidence.is_finite() || !(0.0..=1.0).contains(&impact.confidence) {
            return Err(PipelineError::SchemaValidation(format!(
                "confidence {} outside [0, 1]",
                impact.confidence
            )));
        }
        if impact.trend_id.trim().is_empty() || impact.signal_type.trim().is_empty() {
            return Err(PipelineError::SchemaValidation(
                "impact with empty trend_id or signal_type".into(),
            ));
        }
        let key = (impact.trend_id.clone(), impact.signal_type.clone());
        if !seen.insert(key) {
            return Err(PipelineError::DuplicateImpact {
                trend_id: impact.trend_id.clone(),
                signal_type: impact.signal_type.clone(),
            });
        }
    }

    // Claim ids must be unique; dangling support/contradiction references
    // are dropped rather than failing the payload.
    let claim_ids: HashSet<String> = extraction.claims.iter().map(|c| c.id.clone()).collect();
    if claim_ids.len() != extraction.claims.len() {
        return Err(PipelineError::SchemaValidation("duplicate claim ids".into()));
    }
    for claim in &mut extraction.claims {
        claim.supports.retain(|id| claim_ids.contains(id));
        claim.contradicts.retain(|id| claim_ids.contains(id));
    }

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(impacts: &str) -> String {
        format!(
            r#"{{
                "summary": "Troop columns observed near the border.",
                "entities": {{"who": ["Russia"], "what": ["troop movement"], "where": ["Belgorod"], "when": "2026-07-30"}},
                "claims": [
                    {{"id": "c1", "text": "Columns moved west", "supports": [], "contradicts": []}},
                    {{"id": "c2", "text": "Ministry denies movement", "supports": [], "contradicts": ["c1"]}}
                ],
                "categories": ["military"],
                "impacts": [{impacts}]
            }}"#
        )
    }

    #[test]
    fn valid_payload_parses() {
        let content = payload(
            r#"{"trend_id": "eu-russia", "signal_type": "military_movement",
                "direction": "escalatory", "severity": 0.9, "confidence": 0.95}"#,
        );
        let extraction = parse_extraction(&content).unwrap();
        assert_eq!(extraction.impacts.len(), 1);
        assert_eq!(extraction.impacts[0].direction, SignalDirection::Escalatory);
        assert!(extraction.has_contradictions());
    }

    #[test]
    fn duplicate_trend_signal_pair_rejects_payload() {
        let content = payload(
            r#"{"trend_id": "t", "signal_type": "s", "direction": "escalatory", "severity": 0.5, "confidence": 0.5},
               {"trend_id": "t", "signal_type": "s", "direction": "escalatory", "severity": 0.6, "confidence": 0.6}"#,
        );
        assert!(matches!(
            parse_extraction(&content),
            Err(PipelineError::DuplicateImpact { .. })
        ));
    }

    #[test]
    fn same_trend_different_signal_is_allowed() {
        let content = payload(
            r#"{"trend_id": "t", "signal_type": "a", "direction": "escalatory", "severity": 0.5, "confidence": 0.5},
               {"trend_id": "t", "signal_type": "b", "direction": "de_escalatory", "severity": 0.4, "confidence": 0.6}"#,
        );
        assert_eq!(parse_extraction(&content).unwrap().impacts.len(), 2);
    }

    #[test]
    fn out_of_range_severity_rejected() {
        let content = payload(
            r#"{"trend_id": "t", "signal_type": "s", "direction": "escalatory", "severity": 1.5, "confidence": 0.5}"#,
        );
        assert!(matches!(
            parse_extraction(&content),
            Err(PipelineError::SchemaValidation(_))
        ));
    }

    #[test]
    fn unknown_direction_rejected() {
        let content = payload(
            r#"{"trend_id": "t", "signal_type": "s", "direction": "sideways", "severity": 0.5, "confidence": 0.5}"#,
        );
        assert!(parse_extraction(&content).is_err());
    }

    #[test]
    fn dangling_claim_refs_are_dropped() {
        let content = r#"{
            "summary": "s",
            "claims": [{"id": "c1", "text": "t", "supports": ["ghost"], "contradicts": []}],
            "impacts": []
        }"#;
        let extraction = parse_extraction(content).unwrap();
        assert!(extraction.claims[0].supports.is_empty());
        assert!(!extraction.has_contradictions());
    }
}
