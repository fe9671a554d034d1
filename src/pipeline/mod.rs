//! Pipeline orchestrator.
//!
//! Cost-first stage order per pending item:
//! dedup → Tier-1 routing → embed → cluster → Tier-2 → apply impacts.
//! Tier-1 runs on raw text before any embedding spend; suppressed events
//! short-circuit everything downstream of clustering. Budget denials leave
//! the item `pending` for the after-midnight pass; unrecoverable errors
//! move it to `error` with a message.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterDecision, Clusterer};
use crate::config::{IndicatorDefinition, Settings, TrendDefinition};
use crate::dedup::Deduplicator;
use crate::embedding::Embedder;
use crate::engine::{self, DeltaFactors, NoveltyParams, PriorEvidence, SourceObservation};
use crate::error::PipelineError;
use crate::llm::tier2::Impact;
use crate::llm::{Tier1Filter, Tier1Item, Tier1Trend, Tier2Extraction, Tier2Extractor};
use crate::models::{NewRawItem, ProcessingStatus, RawItem, ReportingType, SourceTier, Trend};
use crate::storage::gaps::GapReason;
use crate::storage::{events, evidence, gaps, items, sources, trends};

/// Result of offering a collector item to the ingest path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Persisted as `pending`.
    Accepted(Uuid),
    /// Duplicate of an existing item; nothing persisted.
    Duplicate(Uuid),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub claimed: usize,
    pub classified: usize,
    pub noise: usize,
    pub deferred: usize,
    pub errored: usize,
}

pub struct Pipeline {
    pool: PgPool,
    settings: Settings,
    dedup: Deduplicator,
    embedder: Arc<dyn Embedder>,
    clusterer: Clusterer,
    tier1: Tier1Filter,
    tier2: Tier2Extractor,
}

impl Pipeline {
    pub fn new(
        pool: PgPool,
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        clusterer: Clusterer,
        tier1: Tier1Filter,
        tier2: Tier2Extractor,
    ) -> Self {
        let dedup = Deduplicator::new(&settings);
        Self {
            pool,
            settings,
            dedup,
            embedder,
            clusterer,
            tier1,
            tier2,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Collector-facing entry: dedup against the corpus, then persist as
    /// `pending`. Duplicates are skipped silently apart from the counter.
    pub async fn ingest(&self, item: &NewRawItem) -> Result<IngestOutcome> {
        let check = self
            .dedup
            .check(
                &self.pool,
                item.source_id,
                &item.external_id,
                &item.url,
                &item.content,
                None,
            )
            .await?;

        if let Some(existing) = check.matched_item_id {
            debug!(%existing, url = %item.url, "ingest duplicate skipped");
            return Ok(IngestOutcome::Duplicate(existing));
        }

        let normalized = self.dedup.normalize(&item.url);
        let hash = crate::dedup::content_hash(&item.content);
        let id = items::insert(&self.pool, item, &normalized, &hash).await?;
        Ok(IngestOutcome::Accepted(id))
    }

    /// Claim and process one batch of pending items. Stage failures are
    /// mapped onto the status FSM per the error taxonomy.
    pub async fn process_pending_batch(&self) -> Result<BatchStats> {
        let claimed = items::claim_pending(&self.pool, self.settings.worker_batch_size).await?;
        let mut stats = BatchStats {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(stats);
        }

        let active_trends = trends::all(&self.pool, true).await?;
        let definitions = load_definitions(&active_trends);

        // Stage 1: dedup within the already-persisted corpus.
        let mut survivors = Vec::with_capacity(claimed.len());
        for item in claimed {
            let since = Utc::now() - Duration::days(self.settings.dedup_window_days);
            match items::find_duplicate_of_item(
                &self.pool,
                item.id,
                &item.normalized_url,
                &item.content_sha256,
                since,
            )
            .await?
            {
                Some(original) => {
                    metrics::increment_counter!("dedup_hits_total", "kind" => "pending_pass");
                    debug!(item = %item.id, %original, "pending item is a duplicate, marking noise");
                    items::set_status(&self.pool, item.id, ProcessingStatus::Noise).await?;
                    stats.noise += 1;
                }
                None => survivors.push(item),
            }
        }

        // Stage 2: Tier-1 routing on raw text, batched.
        let tier1_trends: Vec<Tier1Trend> = active_trends
            .iter()
            .map(|t| Tier1Trend {
                id: t.id.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
            })
            .collect();

        for batch in survivors.chunks(self.settings.tier1_batch_size.max(1)) {
            let tier1_items: Vec<Tier1Item> = batch
                .iter()
                .map(|i| Tier1Item {
                    id: i.id,
                    title: i.title.clone(),
                    content: i.content.clone(),
                })
                .collect();

            let verdicts = self.tier1.classify_batch(&tier1_items, &tier1_trends).await;
            let mut by_id: HashMap<Uuid, _> = verdicts.into_iter().collect();

            for item in batch {
                let outcome = match by_id.remove(&item.id) {
                    Some(Ok(verdict)) => {
                        if verdict.max_relevance() < self.settings.tier1_relevance_threshold {
                            items::set_status(&self.pool, item.id, ProcessingStatus::Noise).await?;
                            stats.noise += 1;
                            continue;
                        }
                        self.process_relevant_item(item, &active_trends, &definitions).await
                    }
                    Some(Err(e)) => Err(e),
                    None => Err(PipelineError::SchemaValidation(format!(
                        "no tier1 verdict for item {}",
                        item.id
                    ))),
                };

                match outcome {
                    Ok(status) => {
                        if status == ProcessingStatus::Noise {
                            stats.noise += 1;
                        } else {
                            stats.classified += 1;
                        }
                    }
                    Err(err) if err.leaves_item_pending() => {
                        info!(item = %item.id, reason = %err, "deferring item to a later pass");
                        items::release_to_pending(&self.pool, item.id).await?;
                        stats.deferred += 1;
                    }
                    Err(err) => {
                        warn!(item = %item.id, reason = %err, "item failed, marking error");
                        items::set_error(&self.pool, item.id, &err.to_string()).await?;
                        stats.errored += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Stages 3-6 for an item that passed Tier-1: embed, cluster, extract,
    /// apply. Returns the terminal status.
    async fn process_relevant_item(
        &self,
        item: &RawItem,
        active_trends: &[Trend],
        definitions: &HashMap<String, TrendDefinition>,
    ) -> Result<ProcessingStatus, PipelineError> {
        // Stage 3: embed.
        let embedding = self
            .embedder
            .embed(&format!("{}\n\n{}", item.title, item.content))
            .await?;
        let vector = Vector::from(embedding.vector.clone());
        items::store_embedding(
            &self.pool,
            item.id,
            &vector,
            &embedding.model,
            embedding.input_tokens as i32,
            embedding.retained_tokens as i32,
            embedding.truncated,
        )
        .await
        .map_err(wrap_db)?;

        // Stage 4: cluster.
        let decision = self
            .clusterer
            .assign(&self.pool, item, &vector, &embedding.model)
            .await
            .map_err(wrap_db)?;

        let event_id = match decision {
            ClusterDecision::Suppressed(_) => {
                items::set_status(&self.pool, item.id, ProcessingStatus::Noise)
                    .await
                    .map_err(wrap_db)?;
                return Ok(ProcessingStatus::Noise);
            }
            other => other.event_id(),
        };

        // Stage 5: Tier-2 extraction.
        let catalog = trend_catalog(definitions);
        let extraction = self
            .tier2
            .extract(item.id, &item.title, &item.content, &catalog)
            .await?;

        // Stage 6: merge extraction into the event and apply impacts.
        self.apply_extraction(item, event_id, &extraction, active_trends, definitions)
            .await?;

        items::set_status(&self.pool, item.id, ProcessingStatus::Classified)
            .await
            .map_err(wrap_db)?;
        Ok(ProcessingStatus::Classified)
    }

    async fn apply_extraction(
        &self,
        item: &RawItem,
        event_id: Uuid,
        extraction: &Tier2Extraction,
        active_trends: &[Trend],
        definitions: &HashMap<String, TrendDefinition>,
    ) -> Result<(), PipelineError> {
        events::merge_extraction(
            &self.pool,
            event_id,
            &extraction.entities_json(),
            &extraction.claims_json(),
            &extraction.categories,
            extraction.has_contradictions(),
            None,
        )
        .await
        .map_err(wrap_db)?;

        let has_contradictions = extraction.has_contradictions();
        for impact in &extraction.impacts {
            self.apply_impact(item, event_id, impact, has_contradictions, active_trends, definitions)
                .await?;
        }
        Ok(())
    }

    /// Route one Tier-2 impact: unknown names go to the taxonomy gap
    /// queue and are never scored; known ones flow through the factor
    /// pipeline into the ledger.
    async fn apply_impact(
        &self,
        item: &RawItem,
        event_id: Uuid,
        impact: &Impact,
        has_contradictions: bool,
        active_trends: &[Trend],
        definitions: &HashMap<String, TrendDefinition>,
    ) -> Result<(), PipelineError> {
        let payload = serde_json::to_value(impact).unwrap_or_default();

        let Some(trend) = active_trends.iter().find(|t| t.id == impact.trend_id) else {
            gaps::record(
                &self.pool,
                GapReason::UnknownTrendId,
                &impact.trend_id,
                Some(&impact.signal_type),
                Some(event_id),
                &payload,
            )
            .await
            .map_err(wrap_db)?;
            info!(trend = %impact.trend_id, "unknown trend id, impact skipped");
            return Ok(());
        };

        let Some(definition) = definitions.get(&trend.id) else {
            return Err(PipelineError::Invariant(format!(
                "trend {} has an unparseable definition",
                trend.id
            )));
        };

        let Some(indicator) = resolve_indicator(definition, &impact.signal_type) else {
            gaps::record(
                &self.pool,
                GapReason::UnknownSignalType,
                &impact.trend_id,
                Some(&impact.signal_type),
                Some(event_id),
                &payload,
            )
            .await
            .map_err(wrap_db)?;
            info!(
                trend = %impact.trend_id,
                signal = %impact.signal_type,
                "unknown signal type, impact skipped"
            );
            return Ok(());
        };

        let factors = self
            .compute_factors(item, event_id, trend, indicator, impact, has_contradictions)
            .await
            .map_err(wrap_db)?;
        let delta = engine::evidence_delta(&factors, self.settings.max_delta_per_event);

        engine::apply_impact(
            &self.pool,
            &trend.id,
            event_id,
            &impact.signal_type,
            &factors,
            delta,
            impact.reasoning.as_deref(),
            &trend.definition_hash,
        )
        .await
        .map_err(wrap_db)?;
        Ok(())
    }

    async fn compute_factors(
        &self,
        item: &RawItem,
        event_id: Uuid,
        trend: &Trend,
        indicator: &IndicatorDefinition,
        impact: &Impact,
        has_contradictions: bool,
    ) -> Result<DeltaFactors> {
        // Credibility of the reporting source.
        let credibility = match sources::by_id(&self.pool, item.source_id).await? {
            Some(src) => src.effective_credibility(),
            None => 0.5,
        };

        // Independent corroboration across the event's linked sources.
        let observations: Vec<SourceObservation> = events::source_observations(&self.pool, event_id)
            .await?
            .into_iter()
            .map(|(url, score, tier, reporting, slug)| {
                let tier_mult = SourceTier::parse(&tier).map(|t| t.multiplier()).unwrap_or(0.5);
                let rep_mult = ReportingType::parse(&reporting)
                    .map(|r| r.multiplier())
                    .unwrap_or(0.6);
                SourceObservation {
                    domain: domain_of(&url).unwrap_or(slug),
                    credibility: (score * tier_mult * rep_mult).clamp(0.0, 1.0),
                }
            })
            .collect();
        let weights = engine::independent_cluster_weights(&observations);
        let (corroboration_factor, _) = engine::corroboration(
            &weights,
            has_contradictions,
            self.settings.contradiction_penalty,
        );

        // Novelty over prior active rows for this (trend, signal_type).
        let prior: Vec<PriorEvidence> =
            evidence::prior_ages_days(&self.pool, &trend.id, &impact.signal_type)
                .await?
                .into_iter()
                .map(|age_days| PriorEvidence { age_days })
                .collect();
        let novelty = engine::novelty(
            &prior,
            &NoveltyParams {
                floor: self.settings.novelty_floor,
                half_count: self.settings.novelty_half_count,
                recency_half_life_days: self.settings.novelty_recency_half_life_days,
            },
        );

        // Age of the evidence itself, from publication when known.
        let published = item.published_at.unwrap_or(item.fetched_at);
        let evidence_age_days = ((Utc::now() - published).num_seconds() as f64 / 86_400.0).max(0.0);
        let half_life = indicator
            .half_life
            .unwrap_or(self.settings.default_indicator_half_life_days);
        let temporal_decay = engine::temporal_decay_factor(evidence_age_days, half_life);

        // The indicator's configured direction is authoritative; a
        // disagreeing extraction is logged but cannot flip the sign.
        if impact.direction != indicator.direction {
            warn!(
                trend = %trend.id,
                signal = %impact.signal_type,
                "extraction direction disagrees with indicator definition"
            );
        }

        Ok(DeltaFactors {
            base_weight: indicator.weight,
            credibility,
            corroboration_factor,
            novelty,
            evidence_age_days,
            temporal_decay_factor: temporal_decay,
            severity: impact.severity,
            confidence: impact.confidence,
            direction_multiplier: indicator.direction.multiplier(),
        })
    }
}

fn wrap_db(err: anyhow::Error) -> PipelineError {
    match err.downcast::<sqlx::Error>() {
        Ok(db) => PipelineError::Database(db),
        Err(other) => PipelineError::Invariant(other.to_string()),
    }
}

/// Parse the stored definition JSON of each active trend.
pub fn load_definitions(active_trends: &[Trend]) -> HashMap<String, TrendDefinition> {
    active_trends
        .iter()
        .filter_map(|t| {
            match serde_json::from_value::<TrendDefinition>(t.definition.clone()) {
                Ok(def) => Some((t.id.clone(), def)),
                Err(e) => {
                    warn!(trend = %t.id, "stored definition failed to parse: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Find the indicator matching a Tier-2 signal type: the indicator keyed
/// by the name, or one whose explicit `type` field names it.
pub fn resolve_indicator<'a>(
    definition: &'a TrendDefinition,
    signal_type: &str,
) -> Option<&'a IndicatorDefinition> {
    if let Some(ind) = definition.indicators.get(signal_type) {
        return Some(ind);
    }
    definition
        .indicators
        .values()
        .find(|ind| ind.signal_type.as_deref() == Some(signal_type))
}

/// Human-readable trend/signal catalog for the Tier-2 prompt.
pub fn trend_catalog(definitions: &HashMap<String, TrendDefinition>) -> String {
    let mut ids: Vec<&String> = definitions.keys().collect();
    ids.sort();
    let mut out = String::new();
    for id in ids {
        let def = &definitions[id];
        let mut signals: Vec<&String> = def.indicators.keys().collect();
        signals.sort();
        out.push_str(&format!(
            "- {} ({}): signal types: {}\n",
            id,
            def.name,
            signals
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    out
}

fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def() -> TrendDefinition {
        serde_yaml::from_str(
            r#"
id: eu-russia
name: EU-Russia escalation
baseline_probability: 0.08
indicators:
  military_movement:
    weight: 0.04
    direction: escalatory
  sanctions:
    weight: 0.03
    direction: escalatory
    type: sanctions_announcement
"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_indicator_by_key_and_type_alias() {
        let d = def();
        assert!(resolve_indicator(&d, "military_movement").is_some());
        assert!(resolve_indicator(&d, "sanctions_announcement").is_some());
        assert!(resolve_indicator(&d, "unknown_signal").is_none());
    }

    #[test]
    fn catalog_lists_trends_and_signals() {
        let mut map = HashMap::new();
        map.insert("eu-russia".to_string(), def());
        let catalog = trend_catalog(&map);
        assert!(catalog.contains("eu-russia"));
        assert!(catalog.contains("military_movement"));
        assert!(catalog.contains("sanctions"));
    }

    #[test]
    fn domains_extracted_for_clustering() {
        assert_eq!(
            domain_of("https://example.com/a/b").as_deref(),
            Some("example.com")
        );
        assert!(domain_of("not a url").is_none());
    }
}
