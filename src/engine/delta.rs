//! Evidence delta factorization.
//!
//! One observed signal produces a single signed log-odds delta:
//!
//! ```text
//! raw = base_weight × credibility × corroboration × novelty
//!       × temporal_decay × severity × confidence × direction
//! delta = clamp(raw, -max_delta, +max_delta)
//! ```
//!
//! All factors are recorded on the ledger row so any delta can be
//! re-derived from its inputs.

use std::collections::HashMap;

/// One source's observation contributing to an event, used to derive
/// independent corroboration clusters.
#[derive(Debug, Clone)]
pub struct SourceObservation {
    /// Registrable domain (or source slug when no URL exists). Observations
    /// sharing a domain are treated as one non-independent cluster.
    pub domain: String,
    /// Effective credibility (score × tier × reporting multipliers).
    pub credibility: f64,
}

/// Collapse observations into independent cluster weights: one weight per
/// domain, the maximum member credibility. Syndicated copies of the same
/// outlet therefore count once.
pub fn independent_cluster_weights(observations: &[SourceObservation]) -> Vec<f64> {
    let mut clusters: HashMap<&str, f64> = HashMap::new();
    for obs in observations {
        let w = clusters.entry(obs.domain.as_str()).or_insert(0.0);
        if obs.credibility > *w {
            *w = obs.credibility;
        }
    }
    let mut weights: Vec<f64> = clusters.into_values().collect();
    // Deterministic ordering regardless of hash iteration.
    weights.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    weights
}

/// Corroboration compression: `min(1, sqrt(effective) / 3)` where
/// `effective = Σ cluster_weights × contradiction_penalty`.
///
/// Returns `(corroboration_factor, effective_independent_corroboration)`.
pub fn corroboration(
    cluster_weights: &[f64],
    has_contradiction: bool,
    contradiction_penalty: f64,
) -> (f64, f64) {
    let penalty = if has_contradiction {
        contradiction_penalty.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let effective = cluster_weights.iter().sum::<f64>().max(0.0) * penalty;
    let factor = (effective.sqrt() / 3.0).min(1.0);
    (factor, effective)
}

/// A prior active ledger row for the same `(trend, signal_type)`, reduced
/// to its age for the novelty computation.
#[derive(Debug, Clone, Copy)]
pub struct PriorEvidence {
    pub age_days: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct NoveltyParams {
    /// Lower bound of the novelty range (0.30 per the scoring contract).
    pub floor: f64,
    /// Recency-weighted prior count at which novelty halves its headroom.
    pub half_count: f64,
    /// Half-life governing how fast old repetitions stop counting.
    pub recency_half_life_days: f64,
}

impl Default for NoveltyParams {
    fn default() -> Self {
        Self {
            floor: 0.30,
            half_count: 1.0,
            recency_half_life_days: 7.0,
        }
    }
}

/// Recency-aware novelty in [floor, 1.0].
///
/// `w = Σ 0.5^(age_i / recency_half_life)` counts prior signals with
/// recent ones near 1 and stale ones near 0; novelty then decays its
/// headroom by `0.5^(w / half_count)`. Continuous, monotone decreasing in
/// prior volume, and exactly 1.0 for the first observation.
pub fn novelty(prior: &[PriorEvidence], params: &NoveltyParams) -> f64 {
    let weighted: f64 = prior
        .iter()
        .map(|p| 0.5f64.powf(p.age_days.max(0.0) / params.recency_half_life_days.max(1e-9)))
        .sum();
    let headroom = (1.0 - params.floor).max(0.0);
    (params.floor + headroom * 0.5f64.powf(weighted / params.half_count.max(1e-9)))
        .clamp(params.floor, 1.0)
}

/// `0.5 ^ (age_days / half_life_days)`, clamped to [0, 1].
pub fn temporal_decay_factor(evidence_age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5f64
        .powf(evidence_age_days.max(0.0) / half_life_days)
        .clamp(0.0, 1.0)
}

/// The complete factorization for one ledger row.
#[derive(Debug, Clone, Copy)]
pub struct DeltaFactors {
    pub base_weight: f64,
    pub credibility: f64,
    pub corroboration_factor: f64,
    pub novelty: f64,
    pub evidence_age_days: f64,
    pub temporal_decay_factor: f64,
    pub severity: f64,
    pub confidence: f64,
    pub direction_multiplier: f64,
}

/// Multiply the factor chain and clamp to the per-event bound.
pub fn evidence_delta(f: &DeltaFactors, max_delta_per_event: f64) -> f64 {
    let raw = f.base_weight
        * f.credibility
        * f.corroboration_factor
        * f.novelty
        * f.temporal_decay_factor
        * f.severity
        * f.confidence
        * f.direction_multiplier;
    raw.clamp(-max_delta_per_event.abs(), max_delta_per_event.abs())
}
