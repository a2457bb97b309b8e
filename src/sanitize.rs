//! Numeric sanitation
//!
//! Every public operation funnels its raw inputs through these helpers.
//! Invalid values are replaced with a safe default and the substitution is
//! reported on the `debug` channel; nothing here ever fails.

/// Upper bound for repetition and failure counts.
pub const MAX_COUNT: i32 = 1000;

fn report(field: &'static str, value: f64, substitute: f64) {
    tracing::debug!(field, value, substitute, "substituted invalid numeric input");
}

/// Counts are clamped into `[0, MAX_COUNT]`.
pub fn sanitize_count(field: &'static str, value: i32) -> i32 {
    let clamped = value.clamp(0, MAX_COUNT);
    if clamped != value {
        report(field, value as f64, clamped as f64);
    }
    clamped
}

/// Replaces NaN and infinities with `default`.
pub fn sanitize_finite(field: &'static str, value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        report(field, value, default);
        default
    }
}

/// Replaces NaN, infinities and negative values with `default`.
pub fn sanitize_non_negative(field: &'static str, value: f64, default: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        report(field, value, default);
        default
    }
}

/// Finite values are clamped into `[min, max]`; non-finite ones become `default`.
pub fn sanitize_range(field: &'static str, value: f64, min: f64, max: f64, default: f64) -> f64 {
    if !value.is_finite() {
        report(field, value, default);
        return default;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        report(field, value, clamped);
    }
    clamped
}

/// Confidence and weight values live in `[0, 1]`.
pub fn sanitize_unit(field: &'static str, value: f64) -> f64 {
    sanitize_range(field, value, 0.0, 1.0, 0.0)
}
