//! Core entities for the trend scoring pipeline.
//!
//! Enumerations mirror the CHECK constraints in `migrations/0001_init.sql`;
//! `as_str`/`parse` keep the Rust side and the database side in lockstep.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feed source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    Gdelt,
    Telegram,
    Api,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Gdelt => "gdelt",
            SourceKind::Telegram => "telegram",
            SourceKind::Api => "api",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Primary,
    Wire,
    Major,
    Regional,
    Aggregator,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Primary => "primary",
            SourceTier::Wire => "wire",
            SourceTier::Major => "major",
            SourceTier::Regional => "regional",
            SourceTier::Aggregator => "aggregator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(SourceTier::Primary),
            "wire" => Some(SourceTier::Wire),
            "major" => Some(SourceTier::Major),
            "regional" => Some(SourceTier::Regional),
            "aggregator" => Some(SourceTier::Aggregator),
            _ => None,
        }
    }

    /// Credibility multiplier applied on top of the source's own score.
    pub fn multiplier(&self) -> f64 {
        match self {
            SourceTier::Primary | SourceTier::Wire => 1.0,
            SourceTier::Major => 0.9,
            SourceTier::Regional => 0.75,
            SourceTier::Aggregator => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingType {
    Firsthand,
    Secondary,
    Aggregator,
}

impl ReportingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingType::Firsthand => "firsthand",
            ReportingType::Secondary => "secondary",
            ReportingType::Aggregator => "aggregator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "firsthand" => Some(ReportingType::Firsthand),
            "secondary" => Some(ReportingType::Secondary),
            "aggregator" => Some(ReportingType::Aggregator),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            ReportingType::Firsthand => 1.0,
            ReportingType::Secondary => 0.85,
            ReportingType::Aggregator => 0.6,
        }
    }
}

/// RawItem pipeline status. Transitions are monotone except the reaper's
/// `processing -> pending` reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Classified,
    Noise,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Classified => "classified",
            ProcessingStatus::Noise => "noise",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "classified" => Some(ProcessingStatus::Classified),
            "noise" => Some(ProcessingStatus::Noise),
            "error" => Some(ProcessingStatus::Error),
            _ => None,
        }
    }
}

/// Event maturity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Emerging,
    Confirmed,
    Fading,
    Archived,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Emerging => "emerging",
            LifecycleStatus::Confirmed => "confirmed",
            LifecycleStatus::Fading => "fading",
            LifecycleStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "emerging" => Some(LifecycleStatus::Emerging),
            "confirmed" => Some(LifecycleStatus::Confirmed),
            "fading" => Some(LifecycleStatus::Fading),
            "archived" => Some(LifecycleStatus::Archived),
            _ => None,
        }
    }
}

/// Indicator direction: which way the evidence pushes the log-odds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    Escalatory,
    DeEscalatory,
}

impl SignalDirection {
    pub fn multiplier(&self) -> f64 {
        match self {
            SignalDirection::Escalatory => 1.0,
            SignalDirection::DeEscalatory => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Occurred,
    DidNotOccur,
    Partial,
    Superseded,
    Ongoing,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Occurred => "occurred",
            OutcomeKind::DidNotOccur => "did_not_occur",
            OutcomeKind::Partial => "partial",
            OutcomeKind::Superseded => "superseded",
            OutcomeKind::Ongoing => "ongoing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "occurred" => Some(OutcomeKind::Occurred),
            "did_not_occur" => Some(OutcomeKind::DidNotOccur),
            "partial" => Some(OutcomeKind::Partial),
            "superseded" => Some(OutcomeKind::Superseded),
            "ongoing" => Some(OutcomeKind::Ongoing),
            _ => None,
        }
    }

    /// Ground-truth value for Brier scoring, when resolvable.
    pub fn actual(&self) -> Option<f64> {
        match self {
            OutcomeKind::Occurred => Some(1.0),
            OutcomeKind::DidNotOccur => Some(0.0),
            OutcomeKind::Partial => Some(0.5),
            OutcomeKind::Superseded | OutcomeKind::Ongoing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Pin,
    MarkNoise,
    Invalidate,
    OverrideDelta,
    CorrectCategory,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Pin => "pin",
            FeedbackAction::MarkNoise => "mark_noise",
            FeedbackAction::Invalidate => "invalidate",
            FeedbackAction::OverrideDelta => "override_delta",
            FeedbackAction::CorrectCategory => "correct_category",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pin" => Some(FeedbackAction::Pin),
            "mark_noise" => Some(FeedbackAction::MarkNoise),
            "invalidate" => Some(FeedbackAction::Invalidate),
            "override_delta" => Some(FeedbackAction::OverrideDelta),
            "correct_category" => Some(FeedbackAction::CorrectCategory),
            _ => None,
        }
    }
}

/// LLM / embedding billing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Tier1,
    Tier2,
    Embedding,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Embedding => "embedding",
        }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Source {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kind: String,
    pub feed_url: Option<String>,
    pub credibility_score: f64,
    pub source_tier: String,
    pub reporting_type: String,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub ingest_watermark: Option<DateTime<Utc>>,
}

impl Source {
    /// Effective credibility: own score × tier × reporting type.
    pub fn effective_credibility(&self) -> f64 {
        let tier = SourceTier::parse(&self.source_tier)
            .map(|t| t.multiplier())
            .unwrap_or(0.5);
        let reporting = ReportingType::parse(&self.reporting_type)
            .map(|r| r.multiplier())
            .unwrap_or(0.6);
        (self.credibility_score * tier * reporting).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawItem {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: String,
    pub url: String,
    pub normalized_url: String,
    pub title: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub content: String,
    pub content_sha256: String,
    pub language: Option<String>,
    pub embedding: Option<Vector>,
    pub embedding_model: Option<String>,
    pub processing_status: String,
    pub processing_started_at: Option<DateTime<Utc>>,
}

/// A new article/post handed to the ingest path by a collector.
#[derive(Debug, Clone)]
pub struct NewRawItem {
    pub source_id: Uuid,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub canonical_summary: String,
    #[serde(skip)]
    #[sqlx(default)]
    pub embedding: Option<Vector>,
    pub embedding_model: Option<String>,
    pub entities: serde_json::Value,
    pub claims: serde_json::Value,
    pub categories: Vec<String>,
    pub source_count: i32,
    pub unique_source_count: i32,
    pub lifecycle_status: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_mention_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub primary_item_id: Option<Uuid>,
    pub contradicted: bool,
    pub contradiction_notes: Option<String>,
    pub suppressed: bool,
    pub pinned: bool,
}

impl Event {
    /// Whether the claim graph carries any contradiction links.
    pub fn has_contradiction_links(&self) -> bool {
        self.contradicted
            || self
                .claims
                .as_array()
                .map(|claims| {
                    claims.iter().any(|c| {
                        c.get("contradicts")
                            .and_then(|v| v.as_array())
                            .map(|a| !a.is_empty())
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Trend {
    pub id: String,
    pub name: String,
    pub description: String,
    pub definition: serde_json::Value,
    pub definition_hash: String,
    pub baseline_log_odds: f64,
    pub current_log_odds: f64,
    pub decay_half_life_days: f64,
    pub is_active: bool,
    pub last_evidence_at: Option<DateTime<Utc>>,
    pub last_decayed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TrendEvidence {
    pub id: Uuid,
    pub trend_id: String,
    pub event_id: Uuid,
    pub signal_type: String,
    pub base_weight: f64,
    pub credibility: f64,
    pub corroboration_factor: f64,
    pub novelty: f64,
    pub evidence_age_days: f64,
    pub temporal_decay_factor: f64,
    pub severity: f64,
    pub confidence: f64,
    pub direction_multiplier: f64,
    pub delta_log_odds: f64,
    pub reasoning: Option<String>,
    pub trend_definition_hash: String,
    pub is_invalidated: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub invalidation_feedback_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TrendSnapshot {
    pub trend_id: String,
    pub ts: DateTime<Utc>,
    pub log_odds: f64,
    pub event_count_24h: i32,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TrendOutcome {
    pub id: Uuid,
    pub trend_id: String,
    pub predicted_probability: f64,
    pub risk_level: String,
    pub probability_band: String,
    pub prediction_date: DateTime<Utc>,
    pub outcome: String,
    pub outcome_date: DateTime<Utc>,
    pub brier_score: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct HumanFeedback {
    pub id: Uuid,
    pub action: String,
    pub event_id: Option<Uuid>,
    pub trend_id: Option<String>,
    pub original_value: Option<serde_json::Value>,
    pub corrected_value: Option<serde_json::Value>,
    pub actor: String,
    pub note: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiUsage {
    pub usage_date: chrono::NaiveDate,
    pub tier: String,
    pub calls: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TaxonomyGap {
    pub id: Uuid,
    pub reason: String,
    pub trend_id: String,
    pub signal_type: Option<String>,
    pub event_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TrendDefinitionVersion {
    pub id: Uuid,
    pub trend_id: String,
    pub definition: serde_json::Value,
    pub definition_hash: String,
    pub actor: String,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in ["pending", "processing", "classified", "noise", "error"] {
            assert_eq!(ProcessingStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(ProcessingStatus::parse("bogus").is_none());
    }

    #[test]
    fn wire_tier_passes_credibility_through() {
        let src = Source {
            id: Uuid::new_v4(),
            slug: "reuters".into(),
            name: "Reuters".into(),
            kind: "rss".into(),
            feed_url: None,
            credibility_score: 0.95,
            source_tier: "wire".into(),
            reporting_type: "firsthand".into(),
            is_active: true,
            last_fetched_at: None,
            ingest_watermark: None,
        };
        assert!((src.effective_credibility() - 0.95).abs() < 1e-12);
    }

    #[test]
    fn aggregator_is_discounted() {
        let src = Source {
            id: Uuid::new_v4(),
            slug: "agg".into(),
            name: "Agg".into(),
            kind: "api".into(),
            feed_url: None,
            credibility_score: 0.8,
            source_tier: "aggregator".into(),
            reporting_type: "aggregator".into(),
            is_active: true,
            last_fetched_at: None,
            ingest_watermark: None,
        };
        assert!((src.effective_credibility() - 0.8 * 0.5 * 0.6).abs() < 1e-12);
    }

    #[test]
    fn contradiction_links_detected_in_claim_graph() {
        let mut ev = Event {
            id: Uuid::new_v4(),
            canonical_summary: "s".into(),
            embedding: None,
            embedding_model: None,
            entities: serde_json::json!({}),
            claims: serde_json::json!([
                {"id": "c1", "text": "troops moved", "supports": ["c2"], "contradicts": []},
                {"id": "c2", "text": "border closed", "supports": [], "contradicts": ["c1"]}
            ]),
            categories: vec![],
            source_count: 1,
            unique_source_count: 1,
            lifecycle_status: "emerging".into(),
            first_seen_at: Utc::now(),
            last_mention_at: Utc::now(),
            confirmed_at: None,
            primary_item_id: None,
            contradicted: false,
            contradiction_notes: None,
            suppressed: false,
            pinned: false,
        };
        assert!(ev.has_contradiction_links());
        ev.claims =
            serde_json::json!([{"id": "c1", "text": "t", "supports": [], "contradicts": []}]);
        assert!(!ev.has_contradiction_links());
    }
}
