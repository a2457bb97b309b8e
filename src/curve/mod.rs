//! Forgetting curve - parametrized exponential retention model
//!
//! R(t) = A × e^(-t'/τ') + F
//!
//! Parameters:
//! - A = 0.80 (decaying share of retention)
//! - F = 0.15 (long-term retention floor)
//! - τ_base = 3.0 days × 3.0 material factor = 9.0 days
//! - t' = elapsed time with a motor-skill plateau over the first 0.4 days
//! - τ' = τ × repetition bonus × individual variability
//!
//! Every function here is total: invalid numeric input is substituted with a
//! safe default (see [`crate::sanitize`]) instead of failing.

pub mod policy;

pub use policy::{
    clamp_interval, clamp_tau, retention_target, ClampReason, IntervalClamp, DEFAULT_TAU,
    INTERVAL_MAX, INTERVAL_MIN, TAU_INTERVAL_CAP, TAU_MAX, TAU_MIN,
};

use crate::sanitize::{sanitize_count, sanitize_non_negative};
use crate::types::{Difficulty, ExperienceLevel, LearnerProfile};

pub const BASE_TAU_DAYS: f64 = 3.0;
pub const MATERIAL_FACTOR: f64 = 3.0;
pub const RETENTION_AMPLITUDE: f64 = 0.80;
pub const RETENTION_FLOOR: f64 = 0.15;
pub const RETENTION_AT_ZERO: f64 = 0.95;

const REPETITION_BONUS_RATE: f64 = 0.15;
const REPETITION_BONUS_CAP: f64 = 2.0;
const PLATEAU_WINDOW_DAYS: f64 = 0.4;
const PLATEAU_MAX_REDUCTION: f64 = 0.4;
const AGE_TAPER_START: u32 = 30;
const AGE_TAPER_PER_YEAR: f64 = 0.005;
const AGE_FACTOR_FLOOR: f64 = 0.85;
const EPSILON: f64 = 1e-12;

/// Stage-aware multiplier on the base tau. Early "mastered" judgments are
/// discounted until consolidation has had a few stages to settle.
pub fn difficulty_modifier(difficulty: Difficulty, stage: i32) -> f64 {
    match difficulty {
        Difficulty::Difficult => 0.6,
        Difficulty::Average => 1.0,
        Difficulty::Easy => 1.7,
        Difficulty::Mastered => {
            if stage <= 3 {
                2.0
            } else if stage == 4 {
                2.5
            } else {
                3.5
            }
        }
    }
}

fn repetition_scale(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::Difficult => 1.3,
        Difficulty::Average => 1.0,
        Difficulty::Easy => 0.9,
        Difficulty::Mastered => 0.7,
    }
}

/// `1 + ln(1 + reps) × 0.15 × scale(difficulty)`, capped at 2.0.
pub fn repetition_bonus(repetitions: i32, difficulty: Difficulty) -> f64 {
    let reps = sanitize_count("repetitions", repetitions) as f64;
    let bonus = 1.0 + (1.0 + reps).ln() * REPETITION_BONUS_RATE * repetition_scale(difficulty);
    bonus.min(REPETITION_BONUS_CAP)
}

/// Linear taper after 30 years of age, floored at 0.85.
pub fn age_factor(age: Option<u32>) -> f64 {
    match age {
        Some(age) if age > AGE_TAPER_START => {
            let years = (age - AGE_TAPER_START) as f64;
            (1.0 - years * AGE_TAPER_PER_YEAR).max(AGE_FACTOR_FLOOR)
        }
        _ => 1.0,
    }
}

pub fn individual_variability(experience: ExperienceLevel, age: Option<u32>) -> f64 {
    experience.variability() * age_factor(age)
}

/// Policy baseline tau in days for a difficulty class, clamped to `[1, 180]`.
pub fn baseline_tau(difficulty: Difficulty, repetitions: i32, stage: i32) -> f64 {
    let stage = stage.max(0);
    let tau = BASE_TAU_DAYS
        * MATERIAL_FACTOR
        * difficulty_modifier(difficulty, stage)
        * repetition_bonus(repetitions, difficulty);
    clamp_tau(tau)
}

/// Effective elapsed time. Inside the plateau window decay is slowed by up to
/// 40%, fading linearly to no correction at 0.4 days.
pub fn effective_elapsed(days: f64) -> f64 {
    if days >= PLATEAU_WINDOW_DAYS {
        return days;
    }
    let reduction = PLATEAU_MAX_REDUCTION * (1.0 - days / PLATEAU_WINDOW_DAYS);
    days * (1.0 - reduction)
}

/// Predicted retention after `days_since_practice` for an item with the given tau.
pub fn retention(
    days_since_practice: f64,
    tau: f64,
    repetitions: i32,
    difficulty: Difficulty,
    experience: ExperienceLevel,
) -> f64 {
    retention_with_age(
        days_since_practice,
        tau,
        repetitions,
        difficulty,
        experience,
        None,
    )
}

pub fn retention_for_profile(
    days_since_practice: f64,
    tau: f64,
    repetitions: i32,
    difficulty: Difficulty,
    profile: &LearnerProfile,
) -> f64 {
    retention_with_age(
        days_since_practice,
        tau,
        repetitions,
        difficulty,
        profile.experience,
        profile.age,
    )
}

fn retention_with_age(
    days_since_practice: f64,
    tau: f64,
    repetitions: i32,
    difficulty: Difficulty,
    experience: ExperienceLevel,
    age: Option<u32>,
) -> f64 {
    let days = sanitize_non_negative("days_since_practice", days_since_practice, 0.0);
    let tau = if tau.is_nan() {
        let fallback = baseline_tau(difficulty, repetitions, 0);
        tracing::debug!(field = "tau", substitute = fallback, "substituted invalid numeric input");
        fallback
    } else {
        clamp_tau(tau)
    };

    let effective_days = effective_elapsed(days);
    if effective_days <= EPSILON {
        return RETENTION_AT_ZERO;
    }

    let effective_tau = tau
        * repetition_bonus(repetitions, difficulty)
        * individual_variability(experience, age);

    let r = RETENTION_AMPLITUDE * (-effective_days / effective_tau).exp() + RETENTION_FLOOR;
    r.clamp(0.0, 1.0)
}
