//! Side-effect-free what-if simulation.
//!
//! Two modes: remove a historical event's applied impact from a trend, or
//! inject a hypothetical signal observation. Both return the projected
//! state and the full factor breakdown without touching any row.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Settings;
use crate::engine::{
    corroboration, evidence_delta, logodds_to_prob, novelty, temporal_decay_factor, DeltaFactors,
    NoveltyParams, PriorEvidence,
};
use crate::pipeline::{load_definitions, resolve_indicator};
use crate::storage::{evidence, trends};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SimulationMode {
    /// Remove every active evidence row this event contributed.
    RemoveEvent { event_id: Uuid },
    /// Score a hypothetical observation of a known signal type.
    InjectSignal {
        signal_type: String,
        severity: f64,
        confidence: f64,
        /// Effective credibility of the hypothetical source.
        #[serde(default = "default_credibility")]
        credibility: f64,
    },
}

fn default_credibility() -> f64 {
    0.9
}

#[derive(Debug, Clone, Serialize)]
pub struct FactorBreakdown {
    pub base_weight: f64,
    pub credibility: f64,
    pub corroboration_factor: f64,
    pub novelty: f64,
    pub temporal_decay_factor: f64,
    pub severity: f64,
    pub confidence: f64,
    pub direction_multiplier: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub trend_id: String,
    pub current_log_odds: f64,
    pub current_probability: f64,
    pub projected_log_odds: f64,
    pub projected_probability: f64,
    pub delta_log_odds: f64,
    /// Present for injections; removals list the reversed rows instead.
    pub factors: Option<FactorBreakdown>,
    /// Evidence rows that would be reversed by a removal.
    pub reversed_rows: usize,
}

pub async fn simulate(
    pool: &PgPool,
    settings: &Settings,
    trend_id: &str,
    mode: SimulationMode,
) -> Result<SimulationResult> {
    let trend = trends::by_id(pool, trend_id)
        .await?
        .ok_or_else(|| anyhow!("unknown trend {trend_id}"))?;

    match mode {
        SimulationMode::RemoveEvent { event_id } => {
            let rows = evidence::for_event(pool, event_id, false).await?;
            let removed: f64 = rows
                .iter()
                .filter(|r| r.trend_id == trend_id)
                .map(|r| r.delta_log_odds)
                .sum();
            let count = rows.iter().filter(|r| r.trend_id == trend_id).count();
            let projected = trend.current_log_odds - removed;
            Ok(SimulationResult {
                trend_id: trend.id,
                current_log_odds: trend.current_log_odds,
                current_probability: logodds_to_prob(trend.current_log_odds),
                projected_log_odds: projected,
                projected_probability: logodds_to_prob(projected),
                delta_log_odds: -removed,
                factors: None,
                reversed_rows: count,
            })
        }
        SimulationMode::InjectSignal {
            signal_type,
            severity,
            confidence,
            credibility,
        } => {
            if !(0.0..=1.0).contains(&severity) || !(0.0..=1.0).contains(&confidence) {
                return Err(anyhow!("severity and confidence must be in [0, 1]"));
            }

            let definitions = load_definitions(std::slice::from_ref(&trend));
            let definition = definitions
                .get(trend_id)
                .ok_or_else(|| anyhow!("trend {trend_id} has an unparseable definition"))?;
            let indicator = resolve_indicator(definition, &signal_type)
                .ok_or_else(|| anyhow!("unknown signal type {signal_type} for {trend_id}"))?;

            let prior: Vec<PriorEvidence> = evidence::prior_ages_days(pool, trend_id, &signal_type)
                .await?
                .into_iter()
                .map(|age_days| PriorEvidence { age_days })
                .collect();
            let novelty_value = novelty(
                &prior,
                &NoveltyParams {
                    floor: settings.novelty_floor,
                    half_count: settings.novelty_half_count,
                    recency_half_life_days: settings.novelty_recency_half_life_days,
                },
            );

            // One hypothetical independent source, fresh evidence.
            let (corroboration_factor, _) =
                corroboration(&[credibility], false, settings.contradiction_penalty);
            let temporal = temporal_decay_factor(
                0.0,
                indicator
                    .half_life
                    .unwrap_or(settings.default_indicator_half_life_days),
            );

            let factors = DeltaFactors {
                base_weight: indicator.weight,
                credibility,
                corroboration_factor,
                novelty: novelty_value,
                evidence_age_days: 0.0,
                temporal_decay_factor: temporal,
                severity,
                confidence,
                direction_multiplier: indicator.direction.multiplier(),
            };
            let delta = evidence_delta(&factors, settings.max_delta_per_event);
            let projected = trend.current_log_odds + delta;

            Ok(SimulationResult {
                trend_id: trend.id,
                current_log_odds: trend.current_log_odds,
                current_probability: logodds_to_prob(trend.current_log_odds),
                projected_log_odds: projected,
                projected_probability: logodds_to_prob(projected),
                delta_log_odds: delta,
                factors: Some(FactorBreakdown {
                    base_weight: factors.base_weight,
                    credibility: factors.credibility,
                    corroboration_factor: factors.corroboration_factor,
                    novelty: factors.novelty,
                    temporal_decay_factor: factors.temporal_decay_factor,
                    severity: factors.severity,
                    confidence: factors.confidence,
                    direction_multiplier: factors.direction_multiplier,
                }),
                reversed_rows: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_json_round_trips() {
        let inject: SimulationMode = serde_json::from_str(
            r#"{"mode": "inject_signal", "signal_type": "military_movement",
                "severity": 0.9, "confidence": 0.95}"#,
        )
        .unwrap();
        match inject {
            SimulationMode::InjectSignal {
                signal_type,
                severity,
                credibility,
                ..
            } => {
                assert_eq!(signal_type, "military_movement");
                assert!((severity - 0.9).abs() < 1e-12);
                assert!((credibility - 0.9).abs() < 1e-12);
            }
            _ => panic!("wrong variant"),
        }

        let remove: SimulationMode = serde_json::from_str(&format!(
            r#"{{"mode": "remove_event", "event_id": "{}"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(matches!(remove, SimulationMode::RemoveEvent { .. }));
    }
}
