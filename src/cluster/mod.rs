//! Event clustering: place each classified item into exactly one event.
//!
//! Ordering matters: the junction insert precedes every metadata
//! recomputation so confirmation counts can never drift by one, and a
//! lost unique-link race deterministically resolves to the winner's event
//! without reapplying metadata.

pub mod lifecycle;

use anyhow::Result;
use chrono::Duration;
use pgvector::Vector;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{LifecycleStatus, RawItem};
use crate::nn::NearestNeighbor;
use crate::storage::events::{self, LinkOutcome};

/// Where an item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDecision {
    /// Linked into an existing event.
    Merged(Uuid),
    /// No candidate above threshold; a new emerging event was created.
    Created(Uuid),
    /// Best match is suppressed; the item is noise and must not proceed.
    Suppressed(Uuid),
}

impl ClusterDecision {
    pub fn event_id(&self) -> Uuid {
        match self {
            ClusterDecision::Merged(id)
            | ClusterDecision::Created(id)
            | ClusterDecision::Suppressed(id) => *id,
        }
    }
}

pub struct Clusterer {
    nn: Arc<dyn NearestNeighbor>,
    window: Duration,
    similarity_threshold: f64,
    confirm_unique_sources: i32,
    candidate_limit: i64,
}

impl Clusterer {
    pub fn new(settings: &Settings, nn: Arc<dyn NearestNeighbor>) -> Self {
        Self {
            nn,
            window: Duration::hours(settings.cluster_window_hours),
            similarity_threshold: settings.cluster_similarity_threshold,
            confirm_unique_sources: settings.confirm_unique_sources,
            candidate_limit: 8,
        }
    }

    /// Assign `item` (already embedded) to an event.
    pub async fn assign(
        &self,
        pool: &PgPool,
        item: &RawItem,
        embedding: &Vector,
        model: &str,
    ) -> Result<ClusterDecision> {
        let candidates = self
            .nn
            .nearest_events(pool, embedding, model, self.window, self.candidate_limit)
            .await?;

        // Highest similarity wins; the query breaks ties toward the
        // oldest event. Candidates below threshold are not matches.
        let matched = candidates
            .into_iter()
            .find(|(_, similarity)| *similarity >= self.similarity_threshold);

        let Some((event, similarity)) = matched else {
            let event_id = events::create(
                pool,
                &item.title,
                embedding,
                model,
                item.id,
                item.fetched_at,
            )
            .await?;
            let _ = events::link_item(pool, event_id, item.id, item.source_id).await?;
            events::recompute_counts(pool, event_id).await?;
            info!(%event_id, item = %item.id, "new emerging event");
            return Ok(ClusterDecision::Created(event_id));
        };

        if event.suppressed {
            debug!(event = %event.id, similarity, "match is suppressed, item is noise");
            return Ok(ClusterDecision::Suppressed(event.id));
        }

        match events::link_item(pool, event.id, item.id, item.source_id).await? {
            LinkOutcome::AlreadyLinked(winner) => {
                // A concurrent linker won; its path owns the metadata pass.
                debug!(item = %item.id, %winner, "link conflict resolved to winner");
                return Ok(ClusterDecision::Merged(winner));
            }
            LinkOutcome::Linked => {}
        }

        self.refresh_after_link(pool, event.id).await?;
        debug!(event = %event.id, item = %item.id, similarity, "item merged into event");
        Ok(ClusterDecision::Merged(event.id))
    }

    /// Post-link metadata pass: counts, lifecycle, primary re-selection.
    /// The canonical summary is rewritten only when the primary changes.
    async fn refresh_after_link(&self, pool: &PgPool, event_id: Uuid) -> Result<()> {
        let (_, unique_sources) = events::recompute_counts(pool, event_id).await?;

        let Some(event) = events::by_id(pool, event_id).await? else {
            return Ok(());
        };

        let current = LifecycleStatus::parse(&event.lifecycle_status)
            .unwrap_or(LifecycleStatus::Emerging);
        let next = lifecycle::on_new_mention(current, unique_sources, self.confirm_unique_sources);
        if next != current {
            events::set_lifecycle(pool, event_id, next).await?;
            info!(%event_id, from = current.as_str(), to = next.as_str(), "event lifecycle transition");
        }

        if let Some((best_item, _)) = events::best_primary_candidate(pool, event_id).await? {
            if event.primary_item_id != Some(best_item) {
                if let Some(item) = crate::storage::items::by_id(pool, best_item).await? {
                    events::set_primary(pool, event_id, best_item, &item.title).await?;
                    debug!(%event_id, primary = %best_item, "primary re-selected");
                }
            }
        }
        Ok(())
    }
}
