//! Recent-performance signal and score trend.

use serde::{Deserialize, Serialize};

use crate::types::PracticeOutcome;

pub const RECENT_WINDOW: usize = 3;
pub const TREND_WINDOW: usize = 10;

const POOR_SCORE: f64 = 4.0;
const STRONG_SCORE: f64 = 7.5;
const POOR_MULTIPLIER: f64 = 0.7;
const STRONG_MULTIPLIER: f64 = 1.4;
const TREND_MIN_SAMPLES: usize = 3;
const TREND_SLOPE_THRESHOLD: f64 = 0.25;

/// Performance over an item's most recent outcomes (0-10 scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPerformance {
    pub average_score: f64,
    pub sessions_considered: usize,
    pub multiplier: f64,
    pub confidence: f64,
}

impl RecentPerformance {
    /// Uses the three most recent outcomes by timestamp. `None` on empty history.
    pub fn from_history(history: &[PracticeOutcome]) -> Option<Self> {
        let recent = most_recent(history, RECENT_WINDOW);
        if recent.is_empty() {
            return None;
        }
        let n = recent.len();
        let average_score = recent.iter().map(|o| o.performance_score()).sum::<f64>() / n as f64;

        Some(Self {
            average_score,
            sessions_considered: n,
            multiplier: Self::multiplier_for(average_score),
            confidence: (n as f64 / RECENT_WINDOW as f64).min(1.0),
        })
    }

    pub fn multiplier_for(average_score: f64) -> f64 {
        if average_score < POOR_SCORE {
            POOR_MULTIPLIER
        } else if average_score > STRONG_SCORE {
            STRONG_MULTIPLIER
        } else {
            1.0
        }
    }
}

fn most_recent(history: &[PracticeOutcome], n: usize) -> Vec<&PracticeOutcome> {
    let mut sorted: Vec<&PracticeOutcome> = history.iter().collect();
    sorted.sort_by_key(|o| o.timestamp);
    let skip = sorted.len().saturating_sub(n);
    sorted.into_iter().skip(skip).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTrend {
    Up,
    #[default]
    Flat,
    Down,
}

/// Least-squares slope of scores over the last ten sessions.
pub fn performance_trend(history: &[PracticeOutcome]) -> PerformanceTrend {
    let scores: Vec<f64> = most_recent(history, TREND_WINDOW)
        .iter()
        .map(|o| o.performance_score())
        .collect();
    if scores.len() < TREND_MIN_SAMPLES {
        return PerformanceTrend::Flat;
    }

    let slope = compute_slope(&scores);
    if slope > TREND_SLOPE_THRESHOLD {
        PerformanceTrend::Up
    } else if slope < -TREND_SLOPE_THRESHOLD {
        PerformanceTrend::Down
    } else {
        PerformanceTrend::Flat
    }
}

fn compute_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_xx - sum_x.powi(2);
    if denominator.abs() < 1e-10 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}
