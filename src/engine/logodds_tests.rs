use super::logodds::*;

#[test]
fn round_trip_within_tolerance() {
    for i in 1..=999 {
        let p = i as f64 / 1000.0;
        if (MIN_P..=MAX_P).contains(&p) {
            let back = logodds_to_prob(prob_to_logodds(p));
            assert!((back - p).abs() < 1e-9, "p={p} came back as {back}");
        }
    }
}

#[test]
fn clamps_extremes() {
    assert!((logodds_to_prob(f64::MAX / 2.0) - MAX_P).abs() < 1e-12);
    assert!((logodds_to_prob(f64::MIN / 2.0) - MIN_P).abs() < 1e-12);
    assert!((prob_to_logodds(0.0) - prob_to_logodds(MIN_P)).abs() < 1e-12);
    assert!((prob_to_logodds(1.0) - prob_to_logodds(MAX_P)).abs() < 1e-12);
}

#[test]
fn known_values() {
    assert!(prob_to_logodds(0.5).abs() < 1e-12);
    // baseline_probability = 0.08 -> about -2.442
    assert!((prob_to_logodds(0.08) - (-2.4423470353692043)).abs() < 1e-9);
    assert!((logodds_to_prob(0.0) - 0.5).abs() < 1e-12);
}

#[test]
fn monotone() {
    let mut prev = f64::NEG_INFINITY;
    for i in 1..=99 {
        let lo = prob_to_logodds(i as f64 / 100.0);
        assert!(lo > prev);
        prev = lo;
    }
}
