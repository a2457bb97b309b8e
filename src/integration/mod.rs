//! Adaptive integration - multi-source tau blending
//!
//! Three optional signals, each weighted by its own confidence:
//!
//! | signal             | value                                        | max weight |
//! |--------------------|----------------------------------------------|------------|
//! | calibration        | personalized tau (≥3 class sessions)         | 0.40       |
//! | stability          | S × 0.7 × (1 + difficulty × 0.3) (≥2 reviews) | 0.50       |
//! | recent performance | demographic tau × score multiplier           | 0.30       |
//!
//! adaptive   = Σ(value × weight) / Σ weight
//! confidence = mean(source confidences) × 1.2 (≥2 sources) × 1.1 (all 3)
//! final      = demographic (c < 0.1), 0.9 × adaptive + 0.1 × demographic
//!              (c > 0.8), otherwise linear interpolation
//!
//! The public entry point never fails: any internal inconsistency falls back
//! to the policy baseline.

pub mod diagnostics;

pub use diagnostics::{Contributor, TauDiagnostics};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::CalibrationStore;
use crate::config::EngineConfig;
use crate::curve::{age_factor, baseline_tau, clamp_tau};
use crate::performance::RecentPerformance;
use crate::sanitize::sanitize_unit;
use crate::stability::StabilitySource;
use crate::types::{Difficulty, LearnerProfile, PracticeOutcome};

pub const CALIBRATION_MAX_WEIGHT: f64 = 0.40;
pub const STABILITY_MAX_WEIGHT: f64 = 0.50;
pub const PERFORMANCE_MAX_WEIGHT: f64 = 0.30;

const CALIBRATION_MIN_SESSIONS: u32 = 3;
const CALIBRATION_FULL_SESSIONS: f64 = 10.0;
const STABILITY_FULL_REVIEWS: f64 = 5.0;
const STABILITY_TAU_SCALE: f64 = 0.7;
const STABILITY_DIFFICULTY_GAIN: f64 = 0.3;
const MULTI_SOURCE_BOOST: f64 = 1.2;
const ALL_SOURCES_BOOST: f64 = 1.1;
const LOW_CONFIDENCE: f64 = 0.1;
const HIGH_CONFIDENCE: f64 = 0.8;
const HIGH_CONFIDENCE_ADAPTIVE_SHARE: f64 = 0.9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("non-finite {stage}: {value}")]
    NonFinite { stage: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Calibration,
    Stability,
    RecentPerformance,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calibration => "calibration",
            Self::Stability => "stability",
            Self::RecentPerformance => "recent_performance",
        }
    }

    pub fn max_weight(&self) -> f64 {
        match self {
            Self::Calibration => CALIBRATION_MAX_WEIGHT,
            Self::Stability => STABILITY_MAX_WEIGHT,
            Self::RecentPerformance => PERFORMANCE_MAX_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalReading {
    pub kind: SignalKind,
    pub tau: f64,
    pub confidence: f64,
    pub weight: f64,
}

impl SignalReading {
    fn new(kind: SignalKind, tau: f64, confidence: f64) -> Self {
        let confidence = sanitize_unit("signal_confidence", confidence);
        Self {
            kind,
            tau: clamp_tau(tau),
            confidence,
            weight: kind.max_weight() * confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationPath {
    AdaptiveDisabled,
    NoItemData,
    Blended,
    Fallback,
}

/// Transient per-call breakdown of a tau decision. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveDataSet {
    pub baseline_tau: f64,
    pub demographic_tau: f64,
    pub calibration: Option<SignalReading>,
    pub stability: Option<SignalReading>,
    pub recent_performance: Option<SignalReading>,
    pub adaptive_tau: f64,
    pub overall_confidence: f64,
    pub path: IntegrationPath,
}

impl AdaptiveDataSet {
    fn baseline_only(baseline_tau: f64, demographic_tau: f64, path: IntegrationPath) -> Self {
        Self {
            baseline_tau,
            demographic_tau,
            calibration: None,
            stability: None,
            recent_performance: None,
            adaptive_tau: baseline_tau,
            overall_confidence: 0.0,
            path,
        }
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalReading> {
        [&self.calibration, &self.stability, &self.recent_performance]
            .into_iter()
            .flatten()
    }

    pub fn source_count(&self) -> usize {
        self.signals().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TauDecision {
    pub tau: f64,
    pub dataset: AdaptiveDataSet,
    pub diagnostics: Option<TauDiagnostics>,
}

#[derive(Debug, Clone, Copy)]
pub struct IntegrationRequest<'a> {
    pub difficulty: Difficulty,
    pub repetitions: i32,
    pub stage: i32,
    pub item_id: Option<&'a str>,
    pub history: &'a [PracticeOutcome],
    pub profile: Option<&'a LearnerProfile>,
}

impl<'a> IntegrationRequest<'a> {
    pub fn new(difficulty: Difficulty, repetitions: i32, stage: i32) -> Self {
        Self {
            difficulty,
            repetitions,
            stage,
            item_id: None,
            history: &[],
            profile: None,
        }
    }

    pub fn with_item(mut self, item_id: &'a str, history: &'a [PracticeOutcome]) -> Self {
        self.item_id = Some(item_id);
        self.history = history;
        self
    }

    pub fn with_profile(mut self, profile: &'a LearnerProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

/// Averages present confidences and rewards agreement between sources.
pub fn overall_confidence(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    let mut confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
    if confidences.len() >= 2 {
        confidence *= MULTI_SOURCE_BOOST;
    }
    if confidences.len() >= 3 {
        confidence *= ALL_SOURCES_BOOST;
    }
    confidence.clamp(0.0, 1.0)
}

/// Confidence-weighted blend of the adaptive and demographic taus (unclamped).
pub fn blend(adaptive_tau: f64, demographic_tau: f64, confidence: f64) -> f64 {
    if confidence < LOW_CONFIDENCE {
        demographic_tau
    } else if confidence > HIGH_CONFIDENCE {
        HIGH_CONFIDENCE_ADAPTIVE_SHARE * adaptive_tau
            + (1.0 - HIGH_CONFIDENCE_ADAPTIVE_SHARE) * demographic_tau
    } else {
        adaptive_tau * confidence + demographic_tau * (1.0 - confidence)
    }
}

pub struct AdaptiveIntegrationManager<'a> {
    config: &'a EngineConfig,
    calibration: &'a CalibrationStore,
    stability: &'a dyn StabilitySource,
}

impl<'a> AdaptiveIntegrationManager<'a> {
    pub fn new(
        config: &'a EngineConfig,
        calibration: &'a CalibrationStore,
        stability: &'a dyn StabilitySource,
    ) -> Self {
        Self {
            config,
            calibration,
            stability,
        }
    }

    /// Baseline tau scaled by the learner's experience multiplier and age taper.
    pub fn demographic_tau(&self, request: &IntegrationRequest<'_>) -> f64 {
        let baseline = baseline_tau(request.difficulty, request.repetitions, request.stage);
        match request.profile {
            Some(profile) => {
                let multiplier = self
                    .config
                    .experience_multipliers
                    .multiplier_for(profile.experience)
                    * age_factor(profile.age);
                clamp_tau(baseline * multiplier)
            }
            None => baseline,
        }
    }

    /// Master entry point. Always returns a tau in [1, 180].
    pub fn integrated_tau(&self, request: &IntegrationRequest<'_>) -> TauDecision {
        match self.try_integrated_tau(request) {
            Ok(decision) => decision,
            Err(err) => {
                let baseline = baseline_tau(request.difficulty, request.repetitions, request.stage);
                tracing::warn!(
                    error = %err,
                    item_id = request.item_id.unwrap_or(""),
                    difficulty = %request.difficulty,
                    fallback = baseline,
                    "adaptive integration failed, using baseline tau"
                );
                TauDecision {
                    tau: baseline,
                    dataset: AdaptiveDataSet::baseline_only(
                        baseline,
                        baseline,
                        IntegrationPath::Fallback,
                    ),
                    diagnostics: None,
                }
            }
        }
    }

    pub fn try_integrated_tau(
        &self,
        request: &IntegrationRequest<'_>,
    ) -> Result<TauDecision, IntegrationError> {
        let baseline = baseline_tau(request.difficulty, request.repetitions, request.stage);
        let flags = &self.config.feature_flags;

        if !flags.use_adaptive_systems {
            let dataset =
                AdaptiveDataSet::baseline_only(baseline, baseline, IntegrationPath::AdaptiveDisabled);
            return Ok(self.finish(baseline, dataset, request));
        }

        let demographic = self.demographic_tau(request);
        ensure_finite("demographic tau", demographic)?;

        let item_id = match request.item_id {
            Some(id) if !request.history.is_empty() => id,
            _ => {
                let dataset = AdaptiveDataSet::baseline_only(
                    baseline,
                    demographic,
                    IntegrationPath::NoItemData,
                );
                return Ok(self.finish(demographic, dataset, request));
            }
        };

        let calibration = if flags.use_calibration {
            self.calibration_signal(request)
        } else {
            None
        };
        let stability = if flags.use_stability {
            self.stability_signal(item_id)
        } else {
            None
        };
        let recent_performance = self.performance_signal(request.history, demographic);

        let mut dataset = AdaptiveDataSet {
            baseline_tau: baseline,
            demographic_tau: demographic,
            calibration,
            stability,
            recent_performance,
            adaptive_tau: baseline,
            overall_confidence: 0.0,
            path: IntegrationPath::Blended,
        };

        let total_weight: f64 = dataset.signals().map(|s| s.weight).sum();
        if total_weight > 0.0 {
            let weighted: f64 = dataset.signals().map(|s| s.tau * s.weight).sum();
            dataset.adaptive_tau = weighted / total_weight;
        }
        ensure_finite("adaptive tau", dataset.adaptive_tau)?;

        let confidences: Vec<f64> = dataset.signals().map(|s| s.confidence).collect();
        dataset.overall_confidence = overall_confidence(&confidences);

        let blended = blend(dataset.adaptive_tau, demographic, dataset.overall_confidence);
        ensure_finite("blended tau", blended)?;

        Ok(self.finish(clamp_tau(blended), dataset, request))
    }

    fn finish(
        &self,
        tau: f64,
        dataset: AdaptiveDataSet,
        request: &IntegrationRequest<'_>,
    ) -> TauDecision {
        let tau = clamp_tau(tau);
        let diagnostics = if self.config.feature_flags.enable_diagnostics {
            let diagnostics = TauDiagnostics::build(
                tau,
                &dataset,
                request.history,
                self.calibration.phase(),
            );
            diagnostics.emit(request.item_id);
            Some(diagnostics)
        } else {
            None
        };
        TauDecision {
            tau,
            dataset,
            diagnostics,
        }
    }

    fn calibration_signal(&self, request: &IntegrationRequest<'_>) -> Option<SignalReading> {
        let sessions = self.calibration.session_count(request.difficulty);
        if sessions < CALIBRATION_MIN_SESSIONS {
            return None;
        }
        let tau = self.calibration.personalized_tau(
            request.difficulty,
            request.repetitions,
            request.stage,
        );
        if !tau.is_finite() {
            tracing::warn!(difficulty = %request.difficulty, tau, "calibration signal skipped: invalid tau");
            return None;
        }
        let confidence = (sessions as f64 / CALIBRATION_FULL_SESSIONS).min(1.0);
        Some(SignalReading::new(SignalKind::Calibration, tau, confidence))
    }

    fn stability_signal(&self, item_id: &str) -> Option<SignalReading> {
        let estimate = match self.stability.stability(item_id) {
            Ok(Some(estimate)) => estimate,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, item_id, "stability signal skipped");
                return None;
            }
        };
        if !estimate.is_established() {
            return None;
        }

        let difficulty = if estimate.item_difficulty.is_finite() {
            estimate.item_difficulty.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let tau = estimate.stability_days
            * STABILITY_TAU_SCALE
            * (1.0 + difficulty * STABILITY_DIFFICULTY_GAIN);
        if !tau.is_finite() {
            tracing::warn!(item_id, stability = estimate.stability_days, "stability signal skipped: invalid value");
            return None;
        }
        let confidence = (estimate.review_count as f64 / STABILITY_FULL_REVIEWS).min(1.0);
        Some(SignalReading::new(SignalKind::Stability, tau, confidence))
    }

    fn performance_signal(
        &self,
        history: &[PracticeOutcome],
        demographic_tau: f64,
    ) -> Option<SignalReading> {
        let recent = RecentPerformance::from_history(history)?;
        Some(SignalReading::new(
            SignalKind::RecentPerformance,
            demographic_tau * recent.multiplier,
            recent.confidence,
        ))
    }
}

fn ensure_finite(stage: &'static str, value: f64) -> Result<(), IntegrationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(IntegrationError::NonFinite { stage, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignalError;
    use crate::stability::StabilityEstimate;
    use crate::types::ExperienceLevel;
    use chrono::{TimeZone, Utc};

    struct FixedStability(Result<Option<StabilityEstimate>, SignalError>);

    impl StabilitySource for FixedStability {
        fn stability(&self, _item_id: &str) -> Result<Option<StabilityEstimate>, SignalError> {
            self.0.clone()
        }
    }

    fn no_stability() -> FixedStability {
        FixedStability(Ok(None))
    }

    fn estimate(stability_days: f64, reviews: u32) -> FixedStability {
        FixedStability(Ok(Some(StabilityEstimate {
            stability_days,
            item_difficulty: 0.5,
            review_count: reviews,
            is_new: false,
        })))
    }

    fn history(scores: &[f64]) -> Vec<PracticeOutcome> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| {
                let ts = Utc.with_ymd_and_hms(2024, 4, 1 + i as u32, 18, 0, 0).unwrap();
                PracticeOutcome::new("toccata", ts, 10.0, 8, 2, Some("average"))
                    .with_performance_score(*score)
            })
            .collect()
    }

    #[test]
    fn test_blend_boundaries() {
        assert_eq!(blend(30.0, 9.0, 0.0), 9.0);
        assert_eq!(blend(30.0, 9.0, 0.05), 9.0);
        assert!((blend(30.0, 9.0, 1.0) - (0.9 * 30.0 + 0.1 * 9.0)).abs() < 1e-12);
        assert!((blend(30.0, 9.0, 0.5) - 19.5).abs() < 1e-12);
    }

    #[test]
    fn test_overall_confidence_boosts() {
        assert_eq!(overall_confidence(&[]), 0.0);
        assert!((overall_confidence(&[0.5]) - 0.5).abs() < 1e-12);
        assert!((overall_confidence(&[0.5, 0.5]) - 0.6).abs() < 1e-12);
        assert!((overall_confidence(&[0.5, 0.5, 0.5]) - 0.66).abs() < 1e-12);
        assert_eq!(overall_confidence(&[1.0, 1.0, 1.0]), 1.0);
    }

    #[test]
    fn test_adaptive_disabled_returns_baseline() {
        let mut config = EngineConfig::default();
        config.feature_flags.use_adaptive_systems = false;
        let calibration = CalibrationStore::new();
        let source = estimate(100.0, 10);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let outcomes = history(&[9.0, 9.0, 9.0]);
        let profile = LearnerProfile::new(ExperienceLevel::Expert);
        let request = IntegrationRequest::new(Difficulty::Easy, 4, 0)
            .with_item("toccata", &outcomes)
            .with_profile(&profile);

        let decision = manager.integrated_tau(&request);
        assert_eq!(decision.tau, baseline_tau(Difficulty::Easy, 4, 0));
        assert_eq!(decision.dataset.path, IntegrationPath::AdaptiveDisabled);
    }

    #[test]
    fn test_no_history_returns_demographic() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let source = estimate(100.0, 10);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let profile = LearnerProfile::new(ExperienceLevel::Beginner);

        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_profile(&profile);
        let decision = manager.integrated_tau(&request);
        assert!((decision.tau - 9.0 * 0.8).abs() < 1e-9);
        assert_eq!(decision.dataset.path, IntegrationPath::NoItemData);

        let empty: Vec<PracticeOutcome> = Vec::new();
        let with_item = request.with_item("toccata", &empty);
        assert_eq!(manager.integrated_tau(&with_item).dataset.path, IntegrationPath::NoItemData);
    }

    #[test]
    fn test_single_performance_signal_blend() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let source = no_stability();
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let outcomes = history(&[9.0, 9.0, 9.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_item("toccata", &outcomes);

        let decision = manager.integrated_tau(&request);
        let data = &decision.dataset;
        assert_eq!(data.source_count(), 1);
        assert!((data.adaptive_tau - 9.0 * 1.4).abs() < 1e-9);
        assert_eq!(data.overall_confidence, 1.0);
        let expected = 0.9 * 12.6 + 0.1 * 9.0;
        assert!((decision.tau - expected).abs() < 1e-9);
    }

    #[test]
    fn test_stability_signal_weighting() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let source = estimate(20.0, 5);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let outcomes = history(&[6.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_item("toccata", &outcomes);

        let data = manager.integrated_tau(&request).dataset;
        let stability = data.stability.clone().unwrap();
        assert!((stability.tau - 20.0 * 0.7 * 1.15).abs() < 1e-9);
        assert!((stability.weight - 0.5).abs() < 1e-12);

        let perf = data.recent_performance.clone().unwrap();
        assert!((perf.weight - 0.1).abs() < 1e-12);

        let expected_adaptive = (stability.tau * 0.5 + 9.0 * 0.1) / 0.6;
        assert!((data.adaptive_tau - expected_adaptive).abs() < 1e-9);
        let expected_conf = ((1.0 + 1.0 / 3.0) / 2.0 * 1.2f64).min(1.0);
        assert!((data.overall_confidence - expected_conf).abs() < 1e-12);
    }

    #[test]
    fn test_new_or_sparse_stability_is_ignored() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let outcomes = history(&[6.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_item("toccata", &outcomes);

        let sparse = estimate(50.0, 1);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &sparse);
        assert!(manager.integrated_tau(&request).dataset.stability.is_none());
    }

    #[test]
    fn test_failing_stability_source_is_skipped() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let broken = FixedStability(Err(SignalError::Unavailable("offline".into())));
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &broken);
        let outcomes = history(&[6.0, 6.0, 6.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_item("toccata", &outcomes);

        let decision = manager.integrated_tau(&request);
        assert!(decision.dataset.stability.is_none());
        assert!(decision.dataset.recent_performance.is_some());
        assert!((1.0..=180.0).contains(&decision.tau));
    }

    #[test]
    fn test_stability_flag_off_skips_source() {
        let mut config = EngineConfig::default();
        config.feature_flags.use_stability = false;
        let calibration = CalibrationStore::new();
        let source = estimate(40.0, 8);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let outcomes = history(&[6.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 0, 0).with_item("toccata", &outcomes);
        assert!(manager.integrated_tau(&request).dataset.stability.is_none());
    }

    #[test]
    fn test_huge_stability_stays_bounded() {
        let config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let source = estimate(1e12, 50);
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let outcomes = history(&[10.0, 10.0, 10.0]);
        let request = IntegrationRequest::new(Difficulty::Mastered, 1000, 9).with_item("toccata", &outcomes);
        let decision = manager.integrated_tau(&request);
        assert!(decision.tau <= 180.0);
    }

    #[test]
    fn test_diagnostics_only_when_enabled() {
        let mut config = EngineConfig::default();
        let calibration = CalibrationStore::new();
        let source = estimate(20.0, 5);
        let outcomes = history(&[8.0, 8.0]);
        let request = IntegrationRequest::new(Difficulty::Average, 2, 0).with_item("toccata", &outcomes);

        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        assert!(manager.integrated_tau(&request).diagnostics.is_none());

        config.feature_flags.enable_diagnostics = true;
        let manager = AdaptiveIntegrationManager::new(&config, &calibration, &source);
        let diagnostics = manager.integrated_tau(&request).diagnostics.unwrap();
        assert_eq!(diagnostics.contributors.len(), 2);
        let share: f64 = diagnostics.contributors.iter().map(|c| c.share).sum();
        assert!((share - 1.0).abs() < 1e-9);
    }
}
