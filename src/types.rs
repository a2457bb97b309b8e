use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sanitize::{sanitize_count, sanitize_non_negative};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Difficult,
    #[default]
    Average,
    Easy,
    Mastered,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Difficult,
        Difficulty::Average,
        Difficulty::Easy,
        Difficulty::Mastered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Difficult => "difficult",
            Self::Average => "average",
            Self::Easy => "easy",
            Self::Mastered => "mastered",
        }
    }

    /// Normalizes a free-text label. Legacy "normal", empty and unknown
    /// labels all map to `Average`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "difficult" => Self::Difficult,
            "easy" => Self::Easy,
            "mastered" => Self::Mastered,
            _ => Self::Average,
        }
    }

    pub fn from_label(label: Option<&str>) -> Self {
        label.map(Self::parse).unwrap_or_default()
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Expert,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "novice" => Self::Beginner,
            "advanced" => Self::Advanced,
            "expert" | "professional" => Self::Expert,
            _ => Self::Intermediate,
        }
    }

    /// Individual variability factor applied to the effective tau.
    pub fn variability(&self) -> f64 {
        match self {
            Self::Beginner => 0.8,
            Self::Intermediate => 1.0,
            Self::Advanced => 1.2,
            Self::Expert => 1.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningZone {
    TooHard,
    Exploration,
    Consolidation,
    Polish,
    Mastered,
}

impl LearningZone {
    pub fn classify(success_ratio: f64) -> Self {
        let ratio = if success_ratio.is_finite() {
            success_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if ratio < 0.50 {
            Self::TooHard
        } else if ratio < 0.70 {
            Self::Exploration
        } else if ratio < 0.85 {
            Self::Consolidation
        } else if ratio < 0.95 {
            Self::Polish
        } else {
            Self::Mastered
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooHard => "too_hard",
            Self::Exploration => "exploration",
            Self::Consolidation => "consolidation",
            Self::Polish => "polish",
            Self::Mastered => "mastered",
        }
    }
}

/// One captured practice session for a single passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeOutcome {
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_minutes: f64,
    pub successes: i32,
    pub failures: i32,
    pub difficulty: Difficulty,
    /// Externally rated score on the 0-10 scale, when the capture workflow has one.
    #[serde(default)]
    pub performance_score: Option<f64>,
}

impl PracticeOutcome {
    pub fn new(
        item_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration_minutes: f64,
        successes: i32,
        failures: i32,
        difficulty_label: Option<&str>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            timestamp,
            duration_minutes,
            successes,
            failures,
            difficulty: Difficulty::from_label(difficulty_label),
            performance_score: None,
        }
    }

    pub fn with_performance_score(mut self, score: f64) -> Self {
        self.performance_score = Some(score);
        self
    }

    /// Copy with counts and duration pulled into their valid ranges.
    pub fn sanitized(&self) -> Self {
        Self {
            item_id: self.item_id.clone(),
            timestamp: self.timestamp,
            duration_minutes: sanitize_non_negative("duration_minutes", self.duration_minutes, 0.0),
            successes: sanitize_count("successes", self.successes),
            failures: sanitize_count("failures", self.failures),
            difficulty: self.difficulty,
            performance_score: self.performance_score.filter(|s| s.is_finite()),
        }
    }

    /// Widened so unsanitized counts near `i32::MAX` cannot overflow.
    pub fn attempts(&self) -> i64 {
        i64::from(self.successes.max(0)) + i64::from(self.failures.max(0))
    }

    pub fn success_ratio(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            return 0.0;
        }
        self.successes.max(0) as f64 / attempts as f64
    }

    pub fn was_correct(&self) -> bool {
        self.success_ratio() >= 0.5
    }

    pub fn learning_zone(&self) -> LearningZone {
        LearningZone::classify(self.success_ratio())
    }

    pub fn performance_score(&self) -> f64 {
        match self.performance_score {
            Some(score) if score.is_finite() => score.clamp(0.0, 10.0),
            _ => (self.success_ratio() * 10.0).clamp(0.0, 10.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub experience: ExperienceLevel,
    #[serde(default)]
    pub age: Option<u32>,
}

impl LearnerProfile {
    pub fn new(experience: ExperienceLevel) -> Self {
        Self {
            experience,
            age: None,
        }
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(successes: i32, failures: i32) -> PracticeOutcome {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        PracticeOutcome::new("etude-1", ts, 10.0, successes, failures, Some("Average"))
    }

    #[test]
    fn test_difficulty_parse_case_insensitive() {
        assert_eq!(Difficulty::parse("DIFFICULT"), Difficulty::Difficult);
        assert_eq!(Difficulty::parse(" easy "), Difficulty::Easy);
        assert_eq!(Difficulty::parse("Mastered"), Difficulty::Mastered);
        assert_eq!(Difficulty::parse("average"), Difficulty::Average);
    }

    #[test]
    fn test_difficulty_legacy_and_unknown_labels() {
        assert_eq!(Difficulty::parse("Normal"), Difficulty::Average);
        assert_eq!(Difficulty::parse(""), Difficulty::Average);
        assert_eq!(Difficulty::parse("impossible"), Difficulty::Average);
        assert_eq!(Difficulty::from_label(None), Difficulty::Average);
    }

    #[test]
    fn test_difficulty_serde_lowercase() {
        let json = serde_json::to_string(&Difficulty::Mastered).unwrap();
        assert_eq!(json, "\"mastered\"");
    }

    #[test]
    fn test_experience_parse() {
        assert_eq!(ExperienceLevel::parse("average"), ExperienceLevel::Intermediate);
        assert_eq!(ExperienceLevel::parse("Expert"), ExperienceLevel::Expert);
        assert!((ExperienceLevel::Beginner.variability() - 0.8).abs() < 1e-12);
        assert!((ExperienceLevel::Expert.variability() - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_success_ratio() {
        assert!((outcome(3, 1).success_ratio() - 0.75).abs() < 1e-12);
        assert_eq!(outcome(0, 0).success_ratio(), 0.0);
        assert!(outcome(2, 2).was_correct());
        assert!(!outcome(1, 3).was_correct());
    }

    #[test]
    fn test_learning_zones() {
        assert_eq!(LearningZone::classify(0.2), LearningZone::TooHard);
        assert_eq!(LearningZone::classify(0.6), LearningZone::Exploration);
        assert_eq!(LearningZone::classify(0.8), LearningZone::Consolidation);
        assert_eq!(LearningZone::classify(0.9), LearningZone::Polish);
        assert_eq!(LearningZone::classify(1.0), LearningZone::Mastered);
        assert_eq!(LearningZone::classify(f64::NAN), LearningZone::TooHard);
    }

    #[test]
    fn test_performance_score_prefers_explicit() {
        assert!((outcome(4, 1).performance_score() - 8.0).abs() < 1e-12);
        let rated = outcome(4, 1).with_performance_score(3.5);
        assert!((rated.performance_score() - 3.5).abs() < 1e-12);
        let wild = outcome(4, 1).with_performance_score(42.0);
        assert!((wild.performance_score() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_sanitized_caps_counts() {
        let mut raw = outcome(5000, -3);
        raw.duration_minutes = f64::NAN;
        let clean = raw.sanitized();
        assert_eq!(clean.successes, 1000);
        assert_eq!(clean.failures, 0);
        assert_eq!(clean.duration_minutes, 0.0);
    }

    #[test]
    fn test_extreme_counts_do_not_overflow() {
        let raw = outcome(i32::MAX, i32::MAX);
        assert_eq!(raw.attempts(), 2 * i64::from(i32::MAX));
        assert!((raw.success_ratio() - 0.5).abs() < 1e-12);
        assert!((raw.performance_score() - 5.0).abs() < 1e-12);
        assert_eq!(outcome(i32::MIN, 4).attempts(), 4);
    }
}
