//! Runtime configuration.
//!
//! Settings come from the environment (with `_FILE` variants for secrets);
//! trend and source definitions come from operator-maintained YAML files.
//! Everything is loaded once at startup and threaded through constructors.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{SignalDirection, SourceKind, SourceTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "development" => Some(Environment::Development),
            "staging" => Some(Environment::Staging),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }

    /// Staging and production both run with production hardening.
    pub fn is_production_like(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }
}

/// Immutable application settings, built once in `main`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub database_url: String,
    pub port: u16,

    // Dedup
    pub dedup_window_days: i64,
    pub dedup_similarity_threshold: f64,
    pub tracking_params: Vec<String>,
    pub strict_query_preservation: bool,

    // Embedding
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_max_input_tokens: usize,
    pub embedding_overflow_policy: OverflowPolicy,
    pub embedding_cache_size: usize,

    // Clustering
    pub cluster_window_hours: i64,
    pub cluster_similarity_threshold: f64,
    pub confirm_unique_sources: i32,
    pub fading_after_hours: i64,
    pub archive_after_days: i64,

    // LLM
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub tier1_model: String,
    pub tier1_fallback_model: String,
    pub tier2_model: String,
    pub tier2_fallback_model: String,
    pub llm_max_input_tokens: usize,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub tier1_relevance_threshold: f64,
    pub tier1_batch_size: usize,

    // Budgets (0 disables the dimension's cap)
    pub tier1_max_daily_calls: i64,
    pub tier2_max_daily_calls: i64,
    pub embedding_max_daily_calls: i64,
    pub max_daily_tokens: i64,
    pub max_daily_cost_usd: f64,
    pub pricing: PricingMap,

    // Trend engine tunables
    pub max_delta_per_event: f64,
    pub contradiction_penalty: f64,
    pub novelty_floor: f64,
    pub novelty_half_count: f64,
    pub novelty_recency_half_life_days: f64,
    pub default_indicator_half_life_days: f64,

    // Workers
    pub process_interval_secs: u64,
    pub reaper_timeout_minutes: i64,
    pub retention_days: i64,
    pub worker_batch_size: i64,

    // Calibration
    pub calibration_min_samples: usize,
    pub brier_warn_threshold: f64,
    pub brier_critical_threshold: f64,
    pub bucket_error_warn_threshold: f64,
    pub bucket_error_critical_threshold: f64,
    pub drift_webhook_url: Option<String>,

    // Config files
    pub trends_yaml_path: String,
    pub sources_yaml_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the tail and mark the row truncated.
    Truncate,
    /// Embed chunks and mean-pool the vectors.
    Chunk,
}

/// Operator pricing map: `provider:model -> USD per 1M tokens` (input/output).
#[derive(Debug, Clone, Default)]
pub struct PricingMap {
    entries: BTreeMap<String, ModelPricing>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_usd_per_mtok: f64,
    pub output_usd_per_mtok: f64,
}

impl PricingMap {
    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.entries.insert(model.into(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.entries.get(model).copied()
    }

    /// Cost in USD for a call with the given token counts. `None` when the
    /// model has no pricing entry (the policy layer fails closed on that).
    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        self.get(model).map(|p| {
            (input_tokens as f64 / 1_000_000.0) * p.input_usd_per_mtok
                + (output_tokens as f64 / 1_000_000.0) * p.output_usd_per_mtok
        })
    }

    /// Parse `model=in:out,model2=in:out` from the environment.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut map = PricingMap::default();
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (model, prices) = entry
                .split_once('=')
                .with_context(|| format!("pricing entry missing '=': {entry}"))?;
            let (input, output) = prices
                .split_once(':')
                .with_context(|| format!("pricing entry missing ':': {entry}"))?;
            map.insert(
                model.trim(),
                ModelPricing {
                    input_usd_per_mtok: input.trim().parse()?,
                    output_usd_per_mtok: output.trim().parse()?,
                },
            );
        }
        Ok(map)
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let environment = Environment::parse(&env_or("ENVIRONMENT", "development"))
            .context("ENVIRONMENT must be development|staging|production")?;

        let database_url = secret_var("DATABASE_URL")?
            .context("DATABASE_URL missing (set env var or DATABASE_URL_FILE)")?;

        let llm_api_key = secret_var("LLM_API_KEY")?.unwrap_or_default();
        let embedding_api_key = secret_var("EMBEDDING_API_KEY")?
            .or_else(|| (!llm_api_key.is_empty()).then(|| llm_api_key.clone()))
            .unwrap_or_default();

        if environment.is_production_like() && llm_api_key.trim().is_empty() {
            bail!("LLM_API_KEY required in {environment:?}");
        }

        let overflow = match env_or("EMBEDDING_OVERFLOW_POLICY", "truncate").as_str() {
            "truncate" => OverflowPolicy::Truncate,
            "chunk" => OverflowPolicy::Chunk,
            other => bail!("unknown EMBEDDING_OVERFLOW_POLICY: {other}"),
        };

        let pricing = PricingMap::parse(&env_or(
            "LLM_PRICING",
            // Defaults cover the default model pair; operators extend via env.
            "gpt-4o-mini=0.15:0.60,gpt-4o=2.50:10.00,text-embedding-3-small=0.02:0.00",
        ))
        .context("LLM_PRICING parse")?;

        let tracking_params = env_or(
            "DEDUP_TRACKING_PARAMS",
            "utm_source,utm_medium,utm_campaign,utm_term,utm_content,fbclid,gclid,ref,igshid,mc_cid,mc_eid",
        )
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

        Ok(Self {
            environment,
            database_url,
            port: parse_or("PORT", 8080),

            dedup_window_days: parse_or("DEDUP_WINDOW_DAYS", 7),
            dedup_similarity_threshold: parse_or("DEDUP_SIMILARITY_THRESHOLD", 0.92),
            tracking_params,
            strict_query_preservation: flag_or("DEDUP_STRICT_QUERY_PRESERVATION", false),

            embedding_base_url: env_or("EMBEDDING_BASE_URL", "https://api.openai.com/v1"),
            embedding_api_key,
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimensions: parse_or("EMBEDDING_DIMENSIONS", 1536),
            embedding_max_input_tokens: parse_or("EMBEDDING_MAX_INPUT_TOKENS", 8191),
            embedding_overflow_policy: overflow,
            embedding_cache_size: parse_or("EMBEDDING_CACHE_SIZE", 4096),

            cluster_window_hours: parse_or("CLUSTER_WINDOW_HOURS", 48),
            cluster_similarity_threshold: parse_or("CLUSTER_SIMILARITY_THRESHOLD", 0.88),
            confirm_unique_sources: parse_or("CONFIRM_UNIQUE_SOURCES", 3),
            fading_after_hours: parse_or("FADING_AFTER_HOURS", 48),
            archive_after_days: parse_or("ARCHIVE_AFTER_DAYS", 7),

            llm_base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key,
            tier1_model: env_or("TIER1_MODEL", "gpt-4o-mini"),
            tier1_fallback_model: env_or("TIER1_FALLBACK_MODEL", "gpt-4o"),
            tier2_model: env_or("TIER2_MODEL", "gpt-4o"),
            tier2_fallback_model: env_or("TIER2_FALLBACK_MODEL", "gpt-4o-mini"),
            llm_max_input_tokens: parse_or("LLM_MAX_INPUT_TOKENS", 24_000),
            llm_timeout_secs: parse_or("LLM_TIMEOUT_SECS", 60),
            llm_max_retries: parse_or("LLM_MAX_RETRIES", 3),
            tier1_relevance_threshold: parse_or("TIER1_RELEVANCE_THRESHOLD", 5.0),
            tier1_batch_size: parse_or("TIER1_BATCH_SIZE", 10),

            tier1_max_daily_calls: parse_or("TIER1_MAX_DAILY_CALLS", 2000),
            tier2_max_daily_calls: parse_or("TIER2_MAX_DAILY_CALLS", 500),
            embedding_max_daily_calls: parse_or("EMBEDDING_MAX_DAILY_CALLS", 5000),
            max_daily_tokens: parse_or("MAX_DAILY_TOKENS", 10_000_000),
            max_daily_cost_usd: parse_or("MAX_DAILY_COST_USD", 25.0),
            pricing,

            max_delta_per_event: parse_or("MAX_DELTA_PER_EVENT", 0.5),
            contradiction_penalty: parse_or("CONTRADICTION_PENALTY", 0.6),
            novelty_floor: parse_or("NOVELTY_FLOOR", 0.30),
            novelty_half_count: parse_or("NOVELTY_HALF_COUNT", 1.0),
            novelty_recency_half_life_days: parse_or("NOVELTY_RECENCY_HALF_LIFE_DAYS", 7.0),
            default_indicator_half_life_days: parse_or("DEFAULT_INDICATOR_HALF_LIFE_DAYS", 14.0),

            process_interval_secs: parse_or("PROCESS_INTERVAL_SECS", 30),
            reaper_timeout_minutes: parse_or("REAPER_TIMEOUT_MINUTES", 30),
            retention_days: parse_or("RETENTION_DAYS", 90),
            worker_batch_size: parse_or("WORKER_BATCH_SIZE", 50),

            calibration_min_samples: parse_or("CALIBRATION_MIN_SAMPLES", 20),
            brier_warn_threshold: parse_or("BRIER_WARN_THRESHOLD", 0.20),
            brier_critical_threshold: parse_or("BRIER_CRITICAL_THRESHOLD", 0.30),
            bucket_error_warn_threshold: parse_or("BUCKET_ERROR_WARN_THRESHOLD", 0.15),
            bucket_error_critical_threshold: parse_or("BUCKET_ERROR_CRITICAL_THRESHOLD", 0.25),
            drift_webhook_url: std::env::var("DRIFT_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            trends_yaml_path: env_or("TRENDS_YAML_PATH", "./config/trends.yaml"),
            sources_yaml_path: env_or("SOURCES_YAML_PATH", "./config/sources.yaml"),
        })
    }

    pub fn daily_call_cap(&self, tier: crate::models::Tier) -> i64 {
        match tier {
            crate::models::Tier::Tier1 => self.tier1_max_daily_calls,
            crate::models::Tier::Tier2 => self.tier2_max_daily_calls,
            crate::models::Tier::Embedding => self.embedding_max_daily_calls,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn flag_or(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Read `KEY`, falling back to the file named by `KEY_FILE`.
fn secret_var(key: &str) -> Result<Option<String>> {
    if let Ok(v) = std::env::var(key) {
        if !v.trim().is_empty() {
            return Ok(Some(v));
        }
    }
    let file_key = format!("{key}_FILE");
    if let Ok(path) = std::env::var(&file_key) {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("{file_key} points at unreadable {path}"))?;
        return Ok(Some(contents.trim().to_string()));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Operator YAML: trend and source definitions
// ---------------------------------------------------------------------------

/// One tracked hypothesis as declared in trends.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub baseline_probability: f64,
    #[serde(default = "default_half_life")]
    pub decay_half_life_days: f64,
    pub indicators: BTreeMap<String, IndicatorDefinition>,
    #[serde(default)]
    pub disqualifiers: Vec<String>,
    #[serde(default)]
    pub falsification_criteria: Vec<String>,
}

fn default_half_life() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub weight: f64,
    pub direction: SignalDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_life: Option<f64>,
}

impl TrendDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("trend id is empty");
        }
        if !(0.001..=0.999).contains(&self.baseline_probability) {
            bail!(
                "trend {}: baseline_probability {} outside [0.001, 0.999]",
                self.id,
                self.baseline_probability
            );
        }
        if self.decay_half_life_days <= 0.0 {
            bail!("trend {}: non-positive decay half-life", self.id);
        }
        if self.indicators.is_empty() {
            bail!("trend {}: no indicators", self.id);
        }
        for (signal, ind) in &self.indicators {
            if ind.weight <= 0.0 {
                bail!("trend {}: indicator {signal} has non-positive weight", self.id);
            }
            if let Some(hl) = ind.half_life {
                if hl <= 0.0 {
                    bail!("trend {}: indicator {signal} has non-positive half-life", self.id);
                }
            }
        }
        Ok(())
    }

    /// Canonical JSON (sorted keys via BTreeMap round-trip) and its SHA-256.
    /// Only a changed hash appends a new definition version row.
    pub fn canonical_hash(&self) -> Result<(serde_json::Value, String)> {
        let value = serde_json::to_value(self)?;
        let canonical = canonicalize(&value);
        let bytes = serde_json::to_vec(&canonical)?;
        use sha2::Digest;
        let digest = sha2::Sha256::digest(&bytes);
        Ok((canonical, hex::encode(digest)))
    }
}

/// Recursively sort object keys so hashing is insensitive to field order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::to_value(sorted).unwrap_or_default()
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendsFile {
    pub trends: Vec<TrendDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub slug: String,
    pub name: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    pub credibility: f64,
    pub tier: SourceTier,
    #[serde(default = "default_reporting_type")]
    pub reporting_type: crate::models::ReportingType,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_reporting_type() -> crate::models::ReportingType {
    crate::models::ReportingType::Secondary
}

fn default_true() -> bool {
    true
}

pub fn load_trends_file(path: &Path) -> Result<Vec<TrendDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading trends file {}", path.display()))?;
    let parsed: TrendsFile = serde_yaml::from_str(&raw).context("parsing trends yaml")?;
    let mut seen = std::collections::HashSet::new();
    for def in &parsed.trends {
        def.validate()?;
        if !seen.insert(def.id.clone()) {
            bail!("duplicate trend id in yaml: {}", def.id);
        }
    }
    Ok(parsed.trends)
}

pub fn load_sources_file(path: &Path) -> Result<Vec<SourceDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading sources file {}", path.display()))?;
    let parsed: SourcesFile = serde_yaml::from_str(&raw).context("parsing sources yaml")?;
    for src in &parsed.sources {
        if !(0.0..=1.0).contains(&src.credibility) {
            bail!("source {}: credibility outside [0,1]", src.slug);
        }
    }
    Ok(parsed.sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> TrendDefinition {
        serde_yaml::from_str(
            r#"
id: eu-russia
name: EU-Russia escalation
baseline_probability: 0.08
decay_half_life_days: 30
indicators:
  military_movement:
    weight: 0.04
    direction: escalatory
    half_life: 14
  diplomatic_breakthrough:
    weight: 0.05
    direction: de_escalatory
"#,
        )
        .unwrap()
    }

    #[test]
    fn yaml_parses_and_validates() {
        let def = sample_def();
        def.validate().unwrap();
        assert_eq!(def.indicators["military_movement"].weight, 0.04);
        assert_eq!(
            def.indicators["diplomatic_breakthrough"].direction,
            SignalDirection::DeEscalatory
        );
    }

    #[test]
    fn canonical_hash_is_field_order_insensitive() {
        let def = sample_def();
        let (_, h1) = def.canonical_hash().unwrap();
        let (_, h2) = def.canonical_hash().unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn canonical_hash_changes_with_content() {
        let def = sample_def();
        let mut changed = def.clone();
        changed.baseline_probability = 0.09;
        assert_ne!(
            def.canonical_hash().unwrap().1,
            changed.canonical_hash().unwrap().1
        );
    }

    #[test]
    fn pricing_map_parses_and_prices() {
        let map = PricingMap::parse("gpt-4o=2.5:10.0, small=0.15:0.6").unwrap();
        let cost = map.cost("gpt-4o", 1_000_000, 100_000).unwrap();
        assert!((cost - 3.5).abs() < 1e-9);
        assert!(map.cost("unknown", 1, 1).is_none());
    }

    #[test]
    fn bad_pricing_rejected() {
        assert!(PricingMap::parse("gpt-4o2.5:10.0").is_err());
        assert!(PricingMap::parse("gpt-4o=2.5").is_err());
    }
}
