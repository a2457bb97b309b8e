//! Per-decision contributor breakdown, built only when diagnostics are enabled.

use serde::{Deserialize, Serialize};

use super::{AdaptiveDataSet, IntegrationPath};
use crate::calibration::CalibrationPhase;
use crate::performance::{performance_trend, PerformanceTrend};
use crate::types::{LearningZone, PracticeOutcome};

pub const DIAGNOSTICS_TARGET: &str = "retention_engine::diagnostics";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub source: String,
    pub tau: f64,
    pub confidence: f64,
    pub weight: f64,
    /// Fraction of the adaptive tau this source accounts for.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TauDiagnostics {
    pub final_tau: f64,
    pub baseline_tau: f64,
    pub demographic_tau: f64,
    pub adaptive_tau: f64,
    pub overall_confidence: f64,
    pub path: IntegrationPath,
    pub contributors: Vec<Contributor>,
    pub calibration_phase: CalibrationPhase,
    pub trend: PerformanceTrend,
    /// Zone of the most recent session in the item history.
    pub latest_zone: Option<LearningZone>,
}

impl TauDiagnostics {
    pub fn build(
        final_tau: f64,
        dataset: &AdaptiveDataSet,
        history: &[PracticeOutcome],
        calibration_phase: CalibrationPhase,
    ) -> Self {
        let total_weight: f64 = dataset.signals().map(|s| s.weight).sum();
        let contributors = dataset
            .signals()
            .map(|s| Contributor {
                source: s.kind.as_str().to_string(),
                tau: s.tau,
                confidence: s.confidence,
                weight: s.weight,
                share: if total_weight > 0.0 {
                    s.weight / total_weight
                } else {
                    0.0
                },
            })
            .collect();

        Self {
            final_tau,
            baseline_tau: dataset.baseline_tau,
            demographic_tau: dataset.demographic_tau,
            adaptive_tau: dataset.adaptive_tau,
            overall_confidence: dataset.overall_confidence,
            path: dataset.path,
            contributors,
            calibration_phase,
            trend: performance_trend(history),
            latest_zone: history
                .iter()
                .max_by_key(|o| o.timestamp)
                .map(PracticeOutcome::learning_zone),
        }
    }

    pub fn emit(&self, item_id: Option<&str>) {
        let payload = serde_json::to_string(self).unwrap_or_default();
        tracing::debug!(
            target: DIAGNOSTICS_TARGET,
            item_id = item_id.unwrap_or(""),
            final_tau = self.final_tau,
            confidence = self.overall_confidence,
            sources = self.contributors.len(),
            %payload,
            "tau decision"
        );
    }
}
