//! End-to-end scoring scenarios over the deterministic engine core.
//!
//! These walk the documented escalation arithmetic without a database:
//! the same factor pipeline the orchestrator drives, applied step by step.

use trendwatch_backend::calibration::{bucket_analysis, drift};
use trendwatch_backend::engine::{
    corroboration, decay_toward_baseline, evidence_delta, independent_cluster_weights,
    logodds_to_prob, novelty, prob_to_logodds, risk_level, DeltaFactors, NoveltyParams,
    PriorEvidence, RiskLevel, SourceObservation,
};

fn wire(domain: &str) -> SourceObservation {
    SourceObservation {
        domain: domain.to_string(),
        credibility: 0.95,
    }
}

/// Fresh escalation: three wire-tier sources report troop movements
/// against an 8% baseline. Each successive report strengthens
/// corroboration while novelty damps repetition; the trend moves up but
/// stays in single digits.
#[test]
fn fresh_escalation_scenario() {
    let baseline = prob_to_logodds(0.08);
    assert!((baseline - (-2.442)).abs() < 1e-3);

    let params = NoveltyParams::default();
    let mut log_odds = baseline;
    let mut observations: Vec<SourceObservation> = Vec::new();
    let mut prior: Vec<PriorEvidence> = Vec::new();
    let mut deltas = Vec::new();

    for (i, domain) in ["reuters.com", "apnews.com", "afp.com"].iter().enumerate() {
        observations.push(wire(domain));
        let weights = independent_cluster_weights(&observations);
        assert_eq!(weights.len(), i + 1);

        let (corr, effective) = corroboration(&weights, false, 0.6);
        assert!((effective - 0.95 * (i + 1) as f64).abs() < 1e-9);

        let factors = DeltaFactors {
            base_weight: 0.04,
            credibility: 0.95,
            corroboration_factor: corr,
            novelty: novelty(&prior, &params),
            evidence_age_days: 0.0,
            temporal_decay_factor: 1.0,
            severity: 0.9,
            confidence: 0.95,
            direction_multiplier: 1.0,
        };
        let delta = evidence_delta(&factors, 0.5);
        assert!(delta > 0.0 && delta < 0.05);
        deltas.push(delta);
        log_odds += delta;
        prior.push(PriorEvidence { age_days: 0.0 });
    }

    // First delta matches the hand computation for a single wire source.
    let expected_first = 0.04 * 0.95 * (0.95f64.sqrt() / 3.0) * 0.9 * 0.95;
    assert!((deltas[0] - expected_first).abs() < 1e-12);

    // Later corroboration grows but novelty shrinks; the trend rises
    // modestly and the probability stays under 10%.
    assert!(log_odds > baseline);
    let probability = logodds_to_prob(log_odds);
    assert!(probability > 0.08 && probability < 0.10);
    assert_eq!(risk_level(probability), RiskLevel::Low);
}

/// De-escalation evidence pushes the other way and decay then walks the
/// trend back toward its anchor from below.
#[test]
fn de_escalation_and_decay_scenario() {
    let baseline = prob_to_logodds(0.08);
    let (corr, _) = corroboration(&[0.95, 0.94], false, 0.6);
    let factors = DeltaFactors {
        base_weight: 0.08,
        credibility: 0.95,
        corroboration_factor: corr,
        novelty: 1.0,
        evidence_age_days: 0.0,
        temporal_decay_factor: 1.0,
        severity: 0.8,
        confidence: 0.9,
        direction_multiplier: -1.0,
    };
    let delta = evidence_delta(&factors, 0.5);
    assert!(delta < 0.0);

    let dropped = baseline + delta;
    assert!(dropped < baseline);

    // One half-life of quiet recovers half the displacement.
    let recovered = decay_toward_baseline(dropped, baseline, 30.0, 30.0);
    assert!((recovered - (baseline + delta / 2.0)).abs() < 1e-12);
    assert!(recovered < baseline);
}

/// Invalidation reversal: subtracting the accumulated deltas restores the
/// pre-application state exactly (the DB path applies the same arithmetic
/// through one atomic transaction).
#[test]
fn invalidation_restores_prior_state() {
    let baseline = prob_to_logodds(0.08);
    let deltas = [0.0103, 0.0206, 0.0309];

    let mut log_odds = baseline;
    for d in deltas {
        log_odds += d;
    }
    let applied: f64 = deltas.iter().sum();
    assert!((log_odds - (baseline + 0.0618)).abs() < 1e-12);

    let reversed = log_odds - applied;
    assert!((reversed - baseline).abs() < 1e-12);
}

/// Calibration bucket scenario: 100 predictions in the 20-30% band with a
/// 25% hit rate are perfectly calibrated and raise no drift alert.
#[test]
fn calibration_bucket_scenario() {
    let mut pairs = Vec::new();
    for i in 0..100 {
        pairs.push((0.25, if i < 25 { 1.0 } else { 0.0 }));
    }
    let report = bucket_analysis(&pairs);
    let bucket = &report.buckets[2];
    assert_eq!(bucket.count, 100);
    assert!((bucket.actual_rate - 0.25).abs() < 1e-12);
    assert!(bucket.calibration_error < 1e-12);

    let thresholds = drift::DriftThresholds {
        brier_warn: 0.20,
        brier_critical: 0.30,
        bucket_error_warn: 0.15,
        bucket_error_critical: 0.25,
        min_samples: 20,
    };
    assert_eq!(
        drift::evaluate(&report, &thresholds).level,
        drift::DriftLevel::Ok
    );
}

/// Probability bounds hold under pathological evidence volumes.
#[test]
fn probability_stays_bounded_under_extreme_evidence() {
    let mut log_odds = prob_to_logodds(0.5);
    let factors = DeltaFactors {
        base_weight: 1.0,
        credibility: 1.0,
        corroboration_factor: 1.0,
        novelty: 1.0,
        evidence_age_days: 0.0,
        temporal_decay_factor: 1.0,
        severity: 1.0,
        confidence: 1.0,
        direction_multiplier: 1.0,
    };
    for _ in 0..10_000 {
        log_odds += evidence_delta(&factors, 0.5);
    }
    let p = logodds_to_prob(log_odds);
    assert!(p <= 0.999);
    assert!(p >= 0.001);
}
