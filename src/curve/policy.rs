//! Safety clamps and retention-target policy.

use serde::{Deserialize, Serialize};

use crate::types::Difficulty;

pub const TAU_MIN: f64 = 1.0;
pub const TAU_MAX: f64 = 180.0;
pub const INTERVAL_MIN: f64 = 1.0;
pub const INTERVAL_MAX: f64 = 365.0;
pub const TAU_INTERVAL_CAP: f64 = 5.0;
/// Average-difficulty baseline, used when a tau is NaN and no better context exists.
pub const DEFAULT_TAU: f64 = 9.0;

pub fn clamp_tau(tau: f64) -> f64 {
    if tau.is_nan() {
        tracing::debug!(field = "tau", substitute = DEFAULT_TAU, "substituted invalid numeric input");
        return DEFAULT_TAU;
    }
    tau.clamp(TAU_MIN, TAU_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampReason {
    InvalidInput,
    MinConsolidation,
    SafetyMax365,
    Cap5xTau,
}

impl ClampReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::MinConsolidation => "min_consolidation",
            Self::SafetyMax365 => "safety_max_365",
            Self::Cap5xTau => "cap_5x_tau",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalClamp {
    pub days: f64,
    pub reasons: Vec<ClampReason>,
}

impl IntervalClamp {
    pub fn was_clamped(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// Fired clamps joined with `+` in the order they applied, or `"none"`.
    pub fn reason(&self) -> String {
        if self.reasons.is_empty() {
            return "none".to_string();
        }
        self.reasons
            .iter()
            .map(ClampReason::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Clamps a proposed interval to `[1, 365]` and, when a tau is given, to `5 × tau`.
pub fn clamp_interval(interval: f64, tau: Option<f64>) -> IntervalClamp {
    let mut reasons = Vec::new();
    let mut days = interval;

    if !days.is_finite() || days < 0.0 {
        tracing::debug!(
            field = "interval",
            value = interval,
            substitute = INTERVAL_MIN,
            "substituted invalid numeric input"
        );
        days = INTERVAL_MIN;
        reasons.push(ClampReason::InvalidInput);
    }

    if days < INTERVAL_MIN {
        days = INTERVAL_MIN;
        reasons.push(ClampReason::MinConsolidation);
    }

    if days > INTERVAL_MAX {
        days = INTERVAL_MAX;
        reasons.push(ClampReason::SafetyMax365);
    }

    if let Some(tau) = tau {
        let cap = TAU_INTERVAL_CAP * clamp_tau(tau);
        if days > cap {
            days = cap;
            reasons.push(ClampReason::Cap5xTau);
        }
    }

    IntervalClamp { days, reasons }
}

/// Default retention target R* per difficulty class.
pub fn retention_target(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::Difficult => 0.85,
        Difficulty::Average => 0.80,
        Difficulty::Easy => 0.70,
        Difficulty::Mastered => 0.65,
    }
}
