//! Per-difficulty calibration - learner-specific tau adjustment
//!
//! One record per difficulty class. Each practice outcome compares the
//! curve's expected retention with a retention estimate derived from the
//! session itself and nudges the class's adjustment factor toward a target:
//!
//! accuracy = 1 - |R_expected - R_estimated|
//! target   = 0.7 (<0.3), 0.85 (<0.5), 1.3 (>0.8), else 1.15
//! factor  += 0.1 × (target - factor), clamped to [0.3, 3.0]
//!
//! The factor reaches `personalized_tau` through a confidence ramp so that a
//! handful of sessions cannot swing the schedule far from the baseline.

pub mod rapid;

pub use rapid::{RapidCalibration, RapidContext, RapidNudge};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::curve::{self, baseline_tau, clamp_tau, RETENTION_AMPLITUDE, RETENTION_FLOOR};
use crate::memory::ItemMemoryState;
use crate::sanitize::sanitize_finite;
use crate::types::{Difficulty, LearnerProfile, PracticeOutcome};

pub const FACTOR_MIN: f64 = 0.3;
pub const FACTOR_MAX: f64 = 3.0;
pub const LEARNING_RATE: f64 = 0.1;
/// Learner-wide session count below which the rapid confidence ramp applies.
pub const RAPID_PHASE_SESSIONS: u32 = 5;
pub const STABLE_PHASE_SESSIONS: u32 = 10;

const RAPID_CONFIDENCE_CAP: f64 = 0.6;
const RAPID_CONFIDENCE_SESSIONS: f64 = 3.0;
const STABLE_CONFIDENCE_SESSIONS: f64 = 25.0;
const RECORD_CONFIDENCE_SESSIONS: f64 = 20.0;
const FLUENT_REPS_PER_MINUTE: f64 = 2.0;
const MIN_SESSION_MINUTES: f64 = 1.0 / 60.0;
const EFFICIENCY_WEIGHT: f64 = 0.6;
const FLUENCY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyCalibration {
    pub adjustment_factor: f64,
    pub session_count: u32,
    pub confidence: f64,
    #[serde(default)]
    pub rapid_adjustments: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for DifficultyCalibration {
    fn default() -> Self {
        Self {
            adjustment_factor: 1.0,
            session_count: 0,
            confidence: 0.0,
            rapid_adjustments: 0,
            last_updated: None,
        }
    }
}

impl DifficultyCalibration {
    fn sanitized(mut self) -> Self {
        self.adjustment_factor = if self.adjustment_factor.is_finite() {
            self.adjustment_factor.clamp(FACTOR_MIN, FACTOR_MAX)
        } else {
            1.0
        };
        self.confidence = record_confidence(self.session_count);
        self
    }
}

fn record_confidence(session_count: u32) -> f64 {
    (session_count as f64 / RECORD_CONFIDENCE_SESSIONS).min(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationPhase {
    /// Fewer than 5 learner-wide sessions.
    Rapid,
    /// 5 to 9 sessions: meaningful but not yet settled.
    Settling,
    Stable,
}

impl CalibrationPhase {
    pub fn from_sessions(total_sessions: u32) -> Self {
        if total_sessions < RAPID_PHASE_SESSIONS {
            Self::Rapid
        } else if total_sessions < STABLE_PHASE_SESSIONS {
            Self::Settling
        } else {
            Self::Stable
        }
    }

    pub fn is_meaningful(&self) -> bool {
        !matches!(self, Self::Rapid)
    }
}

/// Persisted form of a learner's calibration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSnapshot {
    pub total_sessions: u32,
    pub records: BTreeMap<Difficulty, DifficultyCalibration>,
}

/// Outcome of one slow (learning-rate) calibration update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationUpdate {
    pub difficulty: Difficulty,
    pub expected_retention: f64,
    pub estimated_retention: f64,
    pub prediction_accuracy: f64,
    pub target_adjustment: f64,
    pub adjustment_factor: f64,
    pub session_count: u32,
}

/// Heuristic retention estimate from the session itself: more successful
/// repetitions per minute with fewer failed attempts reads as stronger recall.
pub fn estimated_actual_retention(outcome: &PracticeOutcome) -> f64 {
    let attempts = outcome.attempts();
    let successes = outcome.successes.max(0);
    if attempts == 0 || successes == 0 {
        return RETENTION_FLOOR;
    }

    let minutes = sanitize_finite("duration_minutes", outcome.duration_minutes, MIN_SESSION_MINUTES)
        .max(MIN_SESSION_MINUTES);
    let reps_per_minute = successes as f64 / minutes;
    let fluency = (reps_per_minute / FLUENT_REPS_PER_MINUTE).min(1.0);

    let attempts_to_success = attempts as f64 / successes as f64;
    let efficiency = 1.0 / attempts_to_success;

    let estimate = RETENTION_FLOOR
        + RETENTION_AMPLITUDE * (EFFICIENCY_WEIGHT * efficiency + FLUENCY_WEIGHT * fluency);
    estimate.clamp(RETENTION_FLOOR, RETENTION_FLOOR + RETENTION_AMPLITUDE)
}

pub fn target_adjustment(prediction_accuracy: f64) -> f64 {
    if prediction_accuracy < 0.3 {
        0.7
    } else if prediction_accuracy < 0.5 {
        0.85
    } else if prediction_accuracy > 0.8 {
        1.3
    } else {
        1.15
    }
}

/// Calibration records for one learner, keyed by difficulty class.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    state: RwLock<CalibrationSnapshot>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CalibrationSnapshot) -> Self {
        let store = Self::new();
        store.restore(snapshot);
        store
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.state.read().clone()
    }

    pub fn restore(&self, snapshot: CalibrationSnapshot) {
        let records = snapshot
            .records
            .into_iter()
            .map(|(difficulty, record)| (difficulty, record.sanitized()))
            .collect();
        *self.state.write() = CalibrationSnapshot {
            total_sessions: snapshot.total_sessions,
            records,
        };
    }

    /// Drops every record, returning to the neutral factor of 1.0.
    pub fn reset(&self) {
        *self.state.write() = CalibrationSnapshot::default();
    }

    /// Read-only lookup; never creates a record.
    pub fn record(&self, difficulty: Difficulty) -> Option<DifficultyCalibration> {
        self.state.read().records.get(&difficulty).cloned()
    }

    pub fn total_sessions(&self) -> u32 {
        self.state.read().total_sessions
    }

    pub fn session_count(&self, difficulty: Difficulty) -> u32 {
        self.record(difficulty).map(|r| r.session_count).unwrap_or(0)
    }

    pub fn phase(&self) -> CalibrationPhase {
        CalibrationPhase::from_sessions(self.total_sessions())
    }

    /// Confidence with which the class factor is applied to the baseline.
    pub fn applied_confidence(&self, difficulty: Difficulty) -> f64 {
        let state = self.state.read();
        let Some(record) = state.records.get(&difficulty) else {
            return 0.0;
        };
        if record.session_count == 0 {
            return 0.0;
        }
        if state.total_sessions < RAPID_PHASE_SESSIONS {
            (record.session_count as f64 / RAPID_CONFIDENCE_SESSIONS).min(RAPID_CONFIDENCE_CAP)
        } else {
            (state.total_sessions as f64 / STABLE_CONFIDENCE_SESSIONS).min(1.0)
        }
    }

    /// `1 + (factor - 1) × confidence`, clamped to [0.3, 3.0]. Exactly 1.0
    /// when the class has no calibration data.
    pub fn multiplier(&self, difficulty: Difficulty) -> f64 {
        let Some(record) = self.record(difficulty) else {
            return 1.0;
        };
        let confidence = self.applied_confidence(difficulty);
        if confidence <= 0.0 {
            return 1.0;
        }
        (1.0 + (record.adjustment_factor - 1.0) * confidence).clamp(FACTOR_MIN, FACTOR_MAX)
    }

    pub fn personalized_tau(&self, difficulty: Difficulty, repetitions: i32, stage: i32) -> f64 {
        let baseline = baseline_tau(difficulty, repetitions, stage);
        let multiplier = self.multiplier(difficulty);
        if multiplier == 1.0 {
            return baseline;
        }
        clamp_tau(baseline * multiplier)
    }

    /// Slow Bayesian-style update from one practice outcome. `prior` is the
    /// item's memory state before this outcome was applied.
    pub fn update_from_outcome(
        &self,
        outcome: &PracticeOutcome,
        prior: Option<&ItemMemoryState>,
        profile: &LearnerProfile,
    ) -> CalibrationUpdate {
        let outcome = outcome.sanitized();
        let difficulty = outcome.difficulty;
        let repetitions = prior
            .map(|s| s.review_count.min(i32::MAX as u32) as i32)
            .unwrap_or(0);
        let prior_tau = prior
            .map(|s| s.tau)
            .unwrap_or_else(|| baseline_tau(difficulty, repetitions, 0));
        let elapsed = prior
            .and_then(|s| s.days_since_review(outcome.timestamp))
            .unwrap_or(0.0);

        let expected =
            curve::retention_for_profile(elapsed, prior_tau, repetitions, difficulty, profile);
        let estimated = estimated_actual_retention(&outcome);
        let accuracy = (1.0 - (expected - estimated).abs()).clamp(0.0, 1.0);
        let target = target_adjustment(accuracy);

        let mut state = self.state.write();
        state.total_sessions = state.total_sessions.saturating_add(1);
        let record = state.records.entry(difficulty).or_default();
        let before = record.adjustment_factor;
        record.adjustment_factor = (record.adjustment_factor
            + LEARNING_RATE * (target - record.adjustment_factor))
            .clamp(FACTOR_MIN, FACTOR_MAX);
        record.session_count = record.session_count.saturating_add(1);
        record.confidence = record_confidence(record.session_count);
        record.last_updated = Some(outcome.timestamp);

        tracing::debug!(
            difficulty = %difficulty,
            expected,
            estimated,
            accuracy,
            target,
            factor_before = before,
            factor_after = record.adjustment_factor,
            session_count = record.session_count,
            "calibration updated"
        );

        CalibrationUpdate {
            difficulty,
            expected_retention: expected,
            estimated_retention: estimated,
            prediction_accuracy: accuracy,
            target_adjustment: target,
            adjustment_factor: record.adjustment_factor,
            session_count: record.session_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, 19, 30, 0).unwrap()
    }

    fn outcome(successes: i32, failures: i32, minutes: f64, day: u32) -> PracticeOutcome {
        PracticeOutcome::new("sonata-mvt1", ts(day), minutes, successes, failures, Some("easy"))
    }

    #[test]
    fn test_no_data_is_identity() {
        let store = CalibrationStore::new();
        for difficulty in Difficulty::ALL {
            assert_eq!(store.multiplier(difficulty), 1.0);
            for stage in 0..6 {
                assert_eq!(
                    store.personalized_tau(difficulty, 7, stage),
                    baseline_tau(difficulty, 7, stage)
                );
            }
        }
        assert!(store.record(Difficulty::Average).is_none());
    }

    #[test]
    fn test_target_adjustment_table() {
        assert_eq!(target_adjustment(0.1), 0.7);
        assert_eq!(target_adjustment(0.4), 0.85);
        assert_eq!(target_adjustment(0.6), 1.15);
        assert_eq!(target_adjustment(0.8), 1.15);
        assert_eq!(target_adjustment(0.95), 1.3);
    }

    #[test]
    fn test_estimated_retention_rewards_fluency() {
        let fluent = estimated_actual_retention(&outcome(20, 0, 5.0, 1));
        let slow = estimated_actual_retention(&outcome(20, 0, 60.0, 1));
        let sloppy = estimated_actual_retention(&outcome(20, 20, 5.0, 1));
        assert!((fluent - 0.95).abs() < 1e-12);
        assert!(slow < fluent);
        assert!(sloppy < fluent);
        assert_eq!(estimated_actual_retention(&outcome(0, 5, 5.0, 1)), RETENTION_FLOOR);
    }

    #[test]
    fn test_update_moves_factor_by_learning_rate() {
        let store = CalibrationStore::new();
        // No prior state: expected retention 0.95; fluent clean session estimates 0.95.
        let update = store.update_from_outcome(&outcome(20, 0, 5.0, 1), None, &LearnerProfile::default());
        assert!((update.prediction_accuracy - 1.0).abs() < 1e-12);
        assert_eq!(update.target_adjustment, 1.3);
        assert!((update.adjustment_factor - 1.03).abs() < 1e-12);
        assert_eq!(update.session_count, 1);

        let record = store.record(Difficulty::Easy).unwrap();
        assert!((record.confidence - 0.05).abs() < 1e-12);
        assert_eq!(store.total_sessions(), 1);
    }

    #[test]
    fn test_poor_prediction_pulls_factor_down() {
        let store = CalibrationStore::new();
        let profile = LearnerProfile::default();
        for day in 1..=10 {
            store.update_from_outcome(&outcome(0, 8, 10.0, day), None, &profile);
        }
        let record = store.record(Difficulty::Easy).unwrap();
        // accuracy = 1 - |0.95 - 0.15| = 0.2 -> target 0.7
        assert!(record.adjustment_factor < 1.0);
        assert!(record.adjustment_factor > 0.7);
        assert_eq!(record.session_count, 10);
        assert!((record.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_ramp_phases() {
        let store = CalibrationStore::new();
        let profile = LearnerProfile::default();
        store.update_from_outcome(&outcome(20, 0, 5.0, 1), None, &profile);
        assert!((store.applied_confidence(Difficulty::Easy) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(store.phase(), CalibrationPhase::Rapid);

        for day in 2..=4 {
            store.update_from_outcome(&outcome(20, 0, 5.0, day), None, &profile);
        }
        assert!((store.applied_confidence(Difficulty::Easy) - 0.6).abs() < 1e-12);

        store.update_from_outcome(&outcome(20, 0, 5.0, 5), None, &profile);
        assert_eq!(store.phase(), CalibrationPhase::Settling);
        assert!((store.applied_confidence(Difficulty::Easy) - 5.0 / 25.0).abs() < 1e-12);

        for day in 6..=30 {
            store.update_from_outcome(&outcome(20, 0, 5.0, day), None, &profile);
        }
        assert_eq!(store.phase(), CalibrationPhase::Stable);
        assert_eq!(store.applied_confidence(Difficulty::Easy), 1.0);
    }

    #[test]
    fn test_personalized_tau_follows_factor() {
        let store = CalibrationStore::new();
        let profile = LearnerProfile::default();
        for day in 1..=25 {
            store.update_from_outcome(&outcome(20, 0, 5.0, day), None, &profile);
        }
        let baseline = baseline_tau(Difficulty::Easy, 0, 0);
        let personalized = store.personalized_tau(Difficulty::Easy, 0, 0);
        assert!(personalized > baseline);
        assert_eq!(store.personalized_tau(Difficulty::Difficult, 0, 0), baseline_tau(Difficulty::Difficult, 0, 0));
    }

    #[test]
    fn test_prior_state_drives_expected_retention() {
        let store = CalibrationStore::new();
        let mut prior = ItemMemoryState::new("sonata-mvt1", 5.0);
        prior.apply_review(1.0, true, 0.8, ts(1));
        let update = store.update_from_outcome(
            &outcome(20, 0, 5.0, 15),
            Some(&prior),
            &LearnerProfile::default(),
        );
        assert!(update.expected_retention < 0.5);
        assert!(update.prediction_accuracy < 0.8);
    }

    #[test]
    fn test_restore_sanitizes_records() {
        let mut snapshot = CalibrationSnapshot::default();
        snapshot.total_sessions = 4;
        snapshot.records.insert(
            Difficulty::Average,
            DifficultyCalibration {
                adjustment_factor: 17.0,
                session_count: 4,
                confidence: 3.0,
                rapid_adjustments: 0,
                last_updated: None,
            },
        );
        let store = CalibrationStore::from_snapshot(snapshot);
        let record = store.record(Difficulty::Average).unwrap();
        assert_eq!(record.adjustment_factor, FACTOR_MAX);
        assert!((record.confidence - 0.2).abs() < 1e-12);
    }
}
