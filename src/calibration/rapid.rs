//! Rapid calibration - immediate nudges for new learners and new items.
//!
//! During a learner's first 5 sessions, or an item's first 3, a performance
//! score that deviates from the expected 6.0 by more than 1.5 multiplies the
//! class's adjustment factor directly (0.8 on poor, 1.25 on good), bypassing
//! the learning-rate path. Nudges do not count as calibration sessions; they
//! are tallied separately in `rapid_adjustments`.

use serde::Serialize;

use super::{CalibrationStore, FACTOR_MAX, FACTOR_MIN};
use crate::types::Difficulty;

pub const EXPECTED_BASELINE_SCORE: f64 = 6.0;
pub const DEVIATION_THRESHOLD: f64 = 1.5;
pub const LEARNER_RAPID_SESSIONS: u32 = 5;
pub const ITEM_RAPID_SESSIONS: u32 = 3;

const SHORTEN_FACTOR: f64 = 0.8;
const LENGTHEN_FACTOR: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RapidNudge {
    Shorten,
    Lengthen,
}

impl RapidNudge {
    pub fn from_score(performance_score: f64) -> Option<Self> {
        if !performance_score.is_finite() {
            return None;
        }
        let deviation = performance_score - EXPECTED_BASELINE_SCORE;
        if deviation.abs() <= DEVIATION_THRESHOLD {
            None
        } else if deviation < 0.0 {
            Some(Self::Shorten)
        } else {
            Some(Self::Lengthen)
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            Self::Shorten => SHORTEN_FACTOR,
            Self::Lengthen => LENGTHEN_FACTOR,
        }
    }
}

/// Session counts observed *before* the outcome being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RapidContext {
    pub learner_sessions: u32,
    pub item_sessions: u32,
}

impl RapidContext {
    pub fn is_rapid_phase(&self) -> bool {
        self.learner_sessions < LEARNER_RAPID_SESSIONS || self.item_sessions < ITEM_RAPID_SESSIONS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RapidCalibration {
    pub difficulty: Difficulty,
    pub nudge: RapidNudge,
    pub deviation: f64,
    pub factor_before: f64,
    pub factor_after: f64,
}

impl CalibrationStore {
    /// Applies a rapid nudge when the context is still in its rapid phase and
    /// the score deviates enough. Returns `None` when nothing was changed.
    pub fn apply_rapid_calibration(
        &self,
        difficulty: Difficulty,
        performance_score: f64,
        context: RapidContext,
    ) -> Option<RapidCalibration> {
        if !context.is_rapid_phase() {
            return None;
        }
        let nudge = RapidNudge::from_score(performance_score)?;

        let mut state = self.state.write();
        let record = state.records.entry(difficulty).or_default();
        let before = record.adjustment_factor;
        record.adjustment_factor = (before * nudge.factor()).clamp(FACTOR_MIN, FACTOR_MAX);
        record.rapid_adjustments = record.rapid_adjustments.saturating_add(1);

        tracing::debug!(
            difficulty = %difficulty,
            performance_score,
            factor_before = before,
            factor_after = record.adjustment_factor,
            learner_sessions = context.learner_sessions,
            item_sessions = context.item_sessions,
            "rapid calibration nudge applied"
        );

        Some(RapidCalibration {
            difficulty,
            nudge,
            deviation: performance_score - EXPECTED_BASELINE_SCORE,
            factor_before: before,
            factor_after: record.adjustment_factor,
        })
    }
}
