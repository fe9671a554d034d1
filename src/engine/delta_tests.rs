use super::delta::*;

fn obs(domain: &str, credibility: f64) -> SourceObservation {
    SourceObservation {
        domain: domain.to_string(),
        credibility,
    }
}

#[test]
fn single_wire_source_matches_hand_computation() {
    // One wire source at 0.95 credibility, indicator weight 0.04,
    // severity 0.9, confidence 0.95, fresh evidence, first observation.
    let weights = independent_cluster_weights(&[obs("reuters.com", 0.95)]);
    let (corr, effective) = corroboration(&weights, false, 0.6);
    assert!((effective - 0.95).abs() < 1e-12);
    assert!((corr - (0.95f64.sqrt() / 3.0)).abs() < 1e-12);

    let f = DeltaFactors {
        base_weight: 0.04,
        credibility: 0.95,
        corroboration_factor: corr,
        novelty: 1.0,
        evidence_age_days: 0.0,
        temporal_decay_factor: 1.0,
        severity: 0.9,
        confidence: 0.95,
        direction_multiplier: 1.0,
    };
    let delta = evidence_delta(&f, 0.5);
    let expected = 0.04 * 0.95 * (0.95f64.sqrt() / 3.0) * 0.9 * 0.95;
    assert!((delta - expected).abs() < 1e-12);
    assert!(delta > 0.0 && delta < 0.02);
}

#[test]
fn duplicate_domains_collapse_to_one_cluster() {
    let weights = independent_cluster_weights(&[
        obs("reuters.com", 0.95),
        obs("reuters.com", 0.90),
        obs("apnews.com", 0.93),
    ]);
    assert_eq!(weights.len(), 2);
    assert!((weights[0] - 0.95).abs() < 1e-12);
    assert!((weights[1] - 0.93).abs() < 1e-12);
}

#[test]
fn corroboration_saturates_at_one() {
    // Nine-plus independent full-credibility clusters saturate sqrt(n)/3.
    let weights: Vec<f64> = vec![1.0; 12];
    let (corr, _) = corroboration(&weights, false, 0.6);
    assert!((corr - 1.0).abs() < 1e-12);
}

#[test]
fn contradiction_penalty_reduces_corroboration() {
    let weights = vec![0.9, 0.9, 0.9];
    let (clean, clean_eff) = corroboration(&weights, false, 0.6);
    let (penalized, pen_eff) = corroboration(&weights, true, 0.6);
    assert!(penalized < clean);
    assert!((pen_eff - clean_eff * 0.6).abs() < 1e-12);
}

#[test]
fn novelty_starts_at_one_and_decays() {
    let params = NoveltyParams::default();
    assert!((novelty(&[], &params) - 1.0).abs() < 1e-12);

    let one_fresh = novelty(&[PriorEvidence { age_days: 0.0 }], &params);
    // One fresh prior halves the headroom: 0.30 + 0.70 * 0.5 = 0.65.
    assert!((one_fresh - 0.65).abs() < 1e-12);

    let two_fresh = novelty(
        &[
            PriorEvidence { age_days: 0.0 },
            PriorEvidence { age_days: 0.0 },
        ],
        &params,
    );
    assert!(two_fresh < one_fresh);
    assert!(two_fresh >= params.floor);
}

#[test]
fn novelty_is_recency_aware() {
    let params = NoveltyParams::default();
    let fresh_prior = novelty(&[PriorEvidence { age_days: 0.0 }], &params);
    let stale_prior = novelty(&[PriorEvidence { age_days: 70.0 }], &params);
    // A ten-half-life-old repetition barely dampens.
    assert!(stale_prior > fresh_prior);
    assert!(stale_prior > 0.99);
}

#[test]
fn novelty_never_leaves_range() {
    let params = NoveltyParams::default();
    let many: Vec<PriorEvidence> = (0..200).map(|_| PriorEvidence { age_days: 0.0 }).collect();
    let n = novelty(&many, &params);
    assert!((params.floor..=1.0).contains(&n));
    assert!((n - params.floor).abs() < 1e-9);
}

#[test]
fn temporal_decay_half_life_semantics() {
    assert!((temporal_decay_factor(0.0, 14.0) - 1.0).abs() < 1e-12);
    assert!((temporal_decay_factor(14.0, 14.0) - 0.5).abs() < 1e-12);
    assert!((temporal_decay_factor(28.0, 14.0) - 0.25).abs() < 1e-12);
    // Zero half-life disables age damping rather than dividing by zero.
    assert!((temporal_decay_factor(100.0, 0.0) - 1.0).abs() < 1e-12);
}

#[test]
fn delta_is_clamped_symmetrically() {
    let mut f = DeltaFactors {
        base_weight: 10.0,
        credibility: 1.0,
        corroboration_factor: 1.0,
        novelty: 1.0,
        evidence_age_days: 0.0,
        temporal_decay_factor: 1.0,
        severity: 1.0,
        confidence: 1.0,
        direction_multiplier: 1.0,
    };
    assert!((evidence_delta(&f, 0.5) - 0.5).abs() < 1e-12);
    f.direction_multiplier = -1.0;
    assert!((evidence_delta(&f, 0.5) + 0.5).abs() < 1e-12);
}

#[test]
fn de_escalatory_direction_flips_sign() {
    let f = DeltaFactors {
        base_weight: 0.05,
        credibility: 0.9,
        corroboration_factor: 0.4,
        novelty: 0.8,
        evidence_age_days: 1.0,
        temporal_decay_factor: 0.95,
        severity: 0.7,
        confidence: 0.85,
        direction_multiplier: -1.0,
    };
    assert!(evidence_delta(&f, 0.5) < 0.0);
}
