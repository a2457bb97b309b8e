//! Per-item memory state - incremental tau updates from observed outcomes
//!
//! Each review moves the item's tau toward the value that would have made the
//! observed outcome match the retention target:
//!
//! - correct:   adj = clamp(0.35 × (t/τ + ln R*), -0.15, 0.50), τ_p = τ × (1 + adj)
//! - incorrect: τ_p = τ × (1 - 0.45 × severity), severity = 0.7 if the miss was
//!   already predicted (R_pred < R* - 0.05), else 1.0
//! - smoothing: τ_new = clamp(0.8 × τ + 0.2 × τ_p, 1, 180)
//!
//! Contains:
//! - [`ItemMemoryState`] - one record per practiced item
//! - [`MemoryStateStore`] - shared keyed store of those records
//! - [`plan_next_interval`] - inverse of the retention curve

mod store;

pub use store::MemoryStateStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::curve::{clamp_interval, clamp_tau, IntervalClamp};
use crate::sanitize::{sanitize_non_negative, sanitize_range};

const MIN_INTERVAL_DAYS: f64 = 0.1;
const TARGET_MIN: f64 = 0.50;
const TARGET_MAX: f64 = 0.95;
const DEFAULT_TARGET: f64 = 0.80;
const CORRECT_GAIN: f64 = 0.35;
const ADJ_MIN: f64 = -0.15;
const ADJ_MAX: f64 = 0.50;
const MISS_PENALTY: f64 = 0.45;
const EXPECTED_MISS_SEVERITY: f64 = 0.7;
const EXPECTED_MISS_MARGIN: f64 = 0.05;
const SMOOTHING: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMemoryState {
    pub item_id: String,
    pub tau: f64,
    pub review_count: u32,
    pub last_review: Option<DateTime<Utc>>,
    pub last_predicted_retention: f64,
    pub last_planned_interval: f64,
}

impl ItemMemoryState {
    pub fn new(item_id: impl Into<String>, initial_tau: f64) -> Self {
        let tau = clamp_tau(initial_tau);
        Self {
            item_id: item_id.into(),
            tau,
            review_count: 0,
            last_review: None,
            last_predicted_retention: 1.0,
            last_planned_interval: plan_next_interval(tau, DEFAULT_TARGET).days,
        }
    }

    /// Days elapsed between the last review and `now`, if the item has been reviewed.
    pub fn days_since_review(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_review
            .map(|last| (now - last).num_milliseconds() as f64 / 86_400_000.0)
            .map(|days| days.max(0.0))
    }

    /// Applies one observed review. `interval_days` is the time that passed
    /// since the previous review.
    pub fn apply_review(
        &mut self,
        interval_days: f64,
        was_correct: bool,
        target_retention: f64,
        reviewed_at: DateTime<Utc>,
    ) {
        let interval = sanitize_non_negative("interval_days", interval_days, MIN_INTERVAL_DAYS)
            .max(MIN_INTERVAL_DAYS);
        let target = sanitize_range(
            "target_retention",
            target_retention,
            TARGET_MIN,
            TARGET_MAX,
            DEFAULT_TARGET,
        );
        let old_tau = clamp_tau(self.tau);

        let predicted_retention = (-interval / old_tau).exp();
        let target_ratio = -target.ln();
        let observed_ratio = interval / old_tau;

        let proposed_tau = if was_correct {
            let delta = observed_ratio - target_ratio;
            let adj = (CORRECT_GAIN * delta).clamp(ADJ_MIN, ADJ_MAX);
            old_tau * (1.0 + adj)
        } else {
            let severity = if predicted_retention < target - EXPECTED_MISS_MARGIN {
                EXPECTED_MISS_SEVERITY
            } else {
                1.0
            };
            old_tau * (1.0 - MISS_PENALTY * severity)
        };

        let new_tau = clamp_tau((1.0 - SMOOTHING) * old_tau + SMOOTHING * proposed_tau);

        self.tau = new_tau;
        self.review_count = self.review_count.saturating_add(1);
        self.last_review = Some(reviewed_at);
        self.last_predicted_retention = predicted_retention.clamp(0.0, 1.0);
        self.last_planned_interval = plan_next_interval(new_tau, target).days;
    }
}

/// Interval at which predicted retention `e^(-t/τ)` falls to `target_retention`.
pub fn plan_next_interval(tau: f64, target_retention: f64) -> IntervalClamp {
    plan_scaled_interval(tau, target_retention, 1.0)
}

/// [`plan_next_interval`] with the raw interval stretched by `multiplier`
/// before clamping. The 5×τ cap still applies to the unscaled tau.
pub fn plan_scaled_interval(tau: f64, target_retention: f64, multiplier: f64) -> IntervalClamp {
    let tau = clamp_tau(tau);
    let target = sanitize_range("target_retention", target_retention, 0.01, 0.99, DEFAULT_TARGET);
    let multiplier = sanitize_range("interval_multiplier", multiplier, 0.01, 100.0, 1.0);
    let raw = -tau * target.ln() * multiplier;
    clamp_interval(raw, Some(tau))
}
