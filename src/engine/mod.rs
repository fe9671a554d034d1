//! Trend engine: deterministic log-odds arithmetic plus the atomic
//! database operations that apply it.
//!
//! The math lives in `logodds`/`delta` and is pure — no I/O, no clocks —
//! so every invariant is unit-testable. `apply` and `decay` own the
//! concurrency-sensitive SQL (idempotent ledger insert, single-expression
//! increment, row-locked decay).

pub mod apply;
pub mod decay;
pub mod delta;
pub mod logodds;
pub mod queries;

#[cfg(test)]
mod delta_tests;
#[cfg(test)]
mod logodds_tests;

pub use apply::{apply_impact, invalidate_event_evidence, ImpactOutcome};
pub use decay::{decay_toward_baseline, run_decay_for_trend};
pub use delta::{
    corroboration, evidence_delta, independent_cluster_weights, novelty, temporal_decay_factor,
    DeltaFactors, NoveltyParams, PriorEvidence, SourceObservation,
};
pub use logodds::{logodds_to_prob, prob_to_logodds, MAX_P, MIN_P};
pub use queries::{
    confidence_rating, direction_label, probability_band, risk_level, ConfidenceRating,
    DirectionLabel, RiskLevel,
};
