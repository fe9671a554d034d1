//! Drift alerting over the calibration report.
//!
//! An alert fires only when a threshold is breached AND the resolved
//! sample count clears the minimum, so thin data cannot page anyone.
//! Delivery is an optional webhook with bounded retry.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::CalibrationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftLevel {
    Ok,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct DriftThresholds {
    pub brier_warn: f64,
    pub brier_critical: f64,
    pub bucket_error_warn: f64,
    pub bucket_error_critical: f64,
    pub min_samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftAssessment {
    pub level: DriftLevel,
    pub sample_count: usize,
    pub brier_mean: Option<f64>,
    pub max_bucket_error: Option<f64>,
    pub reason: Option<String>,
}

pub fn evaluate(report: &CalibrationReport, thresholds: &DriftThresholds) -> DriftAssessment {
    let mut assessment = DriftAssessment {
        level: DriftLevel::Ok,
        sample_count: report.sample_count,
        brier_mean: report.brier_mean,
        max_bucket_error: report.max_bucket_error,
        reason: None,
    };

    if report.sample_count < thresholds.min_samples {
        return assessment;
    }

    let brier = report.brier_mean.unwrap_or(0.0);
    let bucket_err = report.max_bucket_error.unwrap_or(0.0);

    if brier >= thresholds.brier_critical || bucket_err >= thresholds.bucket_error_critical {
        assessment.level = DriftLevel::Critical;
        assessment.reason = Some(format!(
            "brier_mean={brier:.4}, max_bucket_error={bucket_err:.4} breached critical thresholds"
        ));
    } else if brier >= thresholds.brier_warn || bucket_err >= thresholds.bucket_error_warn {
        assessment.level = DriftLevel::Warn;
        assessment.reason = Some(format!(
            "brier_mean={brier:.4}, max_bucket_error={bucket_err:.4} breached warn thresholds"
        ));
    }
    assessment
}

/// Webhook delivery with bounded exponential backoff. Failures are logged
/// and swallowed — alerting must never take the pipeline down.
pub struct DriftNotifier {
    http: reqwest::Client,
    url: Option<String>,
    max_attempts: u32,
}

impl DriftNotifier {
    pub fn new(http: reqwest::Client, url: Option<String>) -> Self {
        Self {
            http,
            url,
            max_attempts: 3,
        }
    }

    pub async fn notify(&self, assessment: &DriftAssessment) {
        if assessment.level == DriftLevel::Ok {
            return;
        }
        warn!(
            level = ?assessment.level,
            reason = assessment.reason.as_deref().unwrap_or(""),
            "calibration drift detected"
        );
        metrics::increment_counter!("calibration_drift_alerts_total");

        let Some(url) = &self.url else {
            return;
        };

        for attempt in 0..self.max_attempts {
            let result = self
                .http
                .post(url)
                .timeout(Duration::from_secs(10))
                .json(assessment)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!("drift alert delivered");
                    return;
                }
                Ok(resp) => warn!(status = resp.status().as_u16(), attempt, "drift webhook rejected"),
                Err(e) => warn!(attempt, "drift webhook failed: {e}"),
            }
            tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt))).await;
        }
        error!("drift alert delivery exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::bucket_analysis;

    fn thresholds() -> DriftThresholds {
        DriftThresholds {
            brier_warn: 0.20,
            brier_critical: 0.30,
            bucket_error_warn: 0.15,
            bucket_error_critical: 0.25,
            min_samples: 20,
        }
    }

    #[test]
    fn calibrated_data_raises_no_alert() {
        let mut pairs = Vec::new();
        for i in 0..100 {
            pairs.push((0.25, if i < 25 { 1.0 } else { 0.0 }));
        }
        let report = bucket_analysis(&pairs);
        assert_eq!(evaluate(&report, &thresholds()).level, DriftLevel::Ok);
    }

    #[test]
    fn thin_samples_never_alert() {
        // Badly miscalibrated but under the minimum sample gate.
        let pairs: Vec<(f64, f64)> = (0..10).map(|_| (0.95, 0.0)).collect();
        let report = bucket_analysis(&pairs);
        assert_eq!(evaluate(&report, &thresholds()).level, DriftLevel::Ok);
    }

    #[test]
    fn gross_miscalibration_is_critical() {
        let pairs: Vec<(f64, f64)> = (0..30).map(|_| (0.95, 0.0)).collect();
        let report = bucket_analysis(&pairs);
        let assessment = evaluate(&report, &thresholds());
        assert_eq!(assessment.level, DriftLevel::Critical);
        assert!(assessment.reason.is_some());
    }

    #[test]
    fn moderate_miscalibration_warns() {
        // Predicted 35%, occurred 55% of the time: bucket error 0.20.
        let pairs: Vec<(f64, f64)> = (0..40)
            .map(|i| (0.35, if i % 20 < 11 { 1.0 } else { 0.0 }))
            .collect();
        let report = bucket_analysis(&pairs);
        let assessment = evaluate(&report, &thresholds());
        assert_eq!(assessment.level, DriftLevel::Warn);
    }
}
