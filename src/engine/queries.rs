//! Derived read-side classifications over trend state.

use serde::Serialize;

/// Direction of travel for a trend's probability over a lookback window,
/// using ±5 / ±1 percentage-point bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionLabel {
    RisingFast,
    Rising,
    Stable,
    Falling,
    FallingFast,
}

pub fn direction_label(prob_now: f64, prob_then: f64) -> DirectionLabel {
    let delta_pp = (prob_now - prob_then) * 100.0;
    if delta_pp >= 5.0 {
        DirectionLabel::RisingFast
    } else if delta_pp >= 1.0 {
        DirectionLabel::Rising
    } else if delta_pp <= -5.0 {
        DirectionLabel::FallingFast
    } else if delta_pp <= -1.0 {
        DirectionLabel::Falling
    } else {
        DirectionLabel::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Guarded,
    Elevated,
    High,
    Severe,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Guarded => "guarded",
            RiskLevel::Elevated => "elevated",
            RiskLevel::High => "high",
            RiskLevel::Severe => "severe",
        }
    }
}

pub fn risk_level(probability: f64) -> RiskLevel {
    if probability < 0.10 {
        RiskLevel::Low
    } else if probability < 0.25 {
        RiskLevel::Guarded
    } else if probability < 0.50 {
        RiskLevel::Elevated
    } else if probability < 0.75 {
        RiskLevel::High
    } else {
        RiskLevel::Severe
    }
}

/// Ten-percent probability band, e.g. `"20-30%"`. The top band is closed.
pub fn probability_band(probability: f64) -> String {
    let p = probability.clamp(0.0, 1.0);
    let lower = ((p * 10.0).floor() as u32).min(9) * 10;
    format!("{}-{}%", lower, lower + 10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRating {
    Low,
    Medium,
    High,
}

impl ConfidenceRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceRating::Low => "low",
            ConfidenceRating::Medium => "medium",
            ConfidenceRating::High => "high",
        }
    }
}

/// Evidence volume × mean corroboration. Thin or uncorroborated ledgers
/// rate low no matter where the probability sits.
pub fn confidence_rating(active_evidence_count: usize, mean_corroboration: f64) -> ConfidenceRating {
    let score = active_evidence_count as f64 * mean_corroboration.clamp(0.0, 1.0);
    if score < 0.5 {
        ConfidenceRating::Low
    } else if score < 2.0 {
        ConfidenceRating::Medium
    } else {
        ConfidenceRating::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_bands() {
        assert_eq!(direction_label(0.20, 0.10), DirectionLabel::RisingFast);
        assert_eq!(direction_label(0.12, 0.10), DirectionLabel::Rising);
        assert_eq!(direction_label(0.105, 0.10), DirectionLabel::Stable);
        assert_eq!(direction_label(0.08, 0.10), DirectionLabel::Falling);
        assert_eq!(direction_label(0.02, 0.10), DirectionLabel::FallingFast);
    }

    #[test]
    fn risk_levels_follow_documented_cutoffs() {
        assert_eq!(risk_level(0.05), RiskLevel::Low);
        assert_eq!(risk_level(0.10), RiskLevel::Guarded);
        assert_eq!(risk_level(0.25), RiskLevel::Elevated);
        assert_eq!(risk_level(0.50), RiskLevel::High);
        assert_eq!(risk_level(0.75), RiskLevel::Severe);
        assert_eq!(risk_level(0.99), RiskLevel::Severe);
    }

    #[test]
    fn bands() {
        assert_eq!(probability_band(0.0), "0-10%");
        assert_eq!(probability_band(0.25), "20-30%");
        assert_eq!(probability_band(0.999), "90-100%");
        assert_eq!(probability_band(1.0), "90-100%");
    }

    #[test]
    fn confidence_combines_volume_and_corroboration() {
        assert_eq!(confidence_rating(0, 1.0), ConfidenceRating::Low);
        assert_eq!(confidence_rating(1, 0.3), ConfidenceRating::Low);
        assert_eq!(confidence_rating(3, 0.4), ConfidenceRating::Medium);
        assert_eq!(confidence_rating(10, 0.5), ConfidenceRating::High);
    }
}
