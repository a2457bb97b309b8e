use serde::{Deserialize, Serialize};

use crate::curve::retention_target;
use crate::error::EngineError;
use crate::types::{Difficulty, ExperienceLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionTargets {
    pub difficult: f64,
    pub average: f64,
    pub easy: f64,
    pub mastered: f64,
}

impl Default for RetentionTargets {
    fn default() -> Self {
        Self {
            difficult: retention_target(Difficulty::Difficult),
            average: retention_target(Difficulty::Average),
            easy: retention_target(Difficulty::Easy),
            mastered: retention_target(Difficulty::Mastered),
        }
    }
}

impl RetentionTargets {
    /// Configured R*, or the table default when the override is outside (0, 1).
    pub fn target_for(&self, difficulty: Difficulty) -> f64 {
        let value = match difficulty {
            Difficulty::Difficult => self.difficult,
            Difficulty::Average => self.average,
            Difficulty::Easy => self.easy,
            Difficulty::Mastered => self.mastered,
        };
        if value.is_finite() && value > 0.0 && value < 1.0 {
            value
        } else {
            retention_target(difficulty)
        }
    }

    fn validated(&self) -> Self {
        let mut out = self.clone();
        for difficulty in Difficulty::ALL {
            let fixed = self.target_for(difficulty);
            let slot = match difficulty {
                Difficulty::Difficult => &mut out.difficult,
                Difficulty::Average => &mut out.average,
                Difficulty::Easy => &mut out.easy,
                Difficulty::Mastered => &mut out.mastered,
            };
            if *slot != fixed {
                tracing::warn!(
                    difficulty = %difficulty,
                    configured = *slot,
                    substitute = fixed,
                    "retention target out of range, using default"
                );
                *slot = fixed;
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceMultipliers {
    pub beginner: f64,
    pub intermediate: f64,
    pub advanced: f64,
    pub expert: f64,
}

impl Default for ExperienceMultipliers {
    fn default() -> Self {
        Self {
            beginner: ExperienceLevel::Beginner.variability(),
            intermediate: ExperienceLevel::Intermediate.variability(),
            advanced: ExperienceLevel::Advanced.variability(),
            expert: ExperienceLevel::Expert.variability(),
        }
    }
}

impl ExperienceMultipliers {
    pub fn multiplier_for(&self, experience: ExperienceLevel) -> f64 {
        let value = match experience {
            ExperienceLevel::Beginner => self.beginner,
            ExperienceLevel::Intermediate => self.intermediate,
            ExperienceLevel::Advanced => self.advanced,
            ExperienceLevel::Expert => self.expert,
        };
        if value.is_finite() && value > 0.0 {
            value
        } else {
            experience.variability()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub use_adaptive_systems: bool,
    pub use_calibration: bool,
    pub use_stability: bool,
    pub enable_diagnostics: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            use_adaptive_systems: true,
            use_calibration: true,
            use_stability: true,
            enable_diagnostics: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub retention_targets: RetentionTargets,
    pub experience_multipliers: ExperienceMultipliers,
    pub interval_multiplier: f64,
    pub feature_flags: FeatureFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_targets: RetentionTargets::default(),
            experience_multipliers: ExperienceMultipliers::default(),
            interval_multiplier: 1.0,
            feature_flags: FeatureFlags::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RETENTION_USE_ADAPTIVE") {
            config.feature_flags.use_adaptive_systems = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RETENTION_USE_CALIBRATION") {
            config.feature_flags.use_calibration = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RETENTION_USE_STABILITY") {
            config.feature_flags.use_stability = val.parse().unwrap_or(true);
        }
        if let Ok(val) = std::env::var("RETENTION_DIAGNOSTICS") {
            config.feature_flags.enable_diagnostics = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("RETENTION_INTERVAL_MULTIPLIER") {
            config.interval_multiplier = val.parse().unwrap_or(1.0);
        }

        config.validated()
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid settings document: {e}")))?;
        Ok(config.validated())
    }

    /// Replaces out-of-range overrides with table defaults.
    pub fn validated(&self) -> Self {
        let mut config = self.clone();
        config.retention_targets = self.retention_targets.validated();

        let defaults = ExperienceMultipliers::default();
        for (slot, fallback, name) in [
            (&mut config.experience_multipliers.beginner, defaults.beginner, "beginner"),
            (&mut config.experience_multipliers.intermediate, defaults.intermediate, "intermediate"),
            (&mut config.experience_multipliers.advanced, defaults.advanced, "advanced"),
            (&mut config.experience_multipliers.expert, defaults.expert, "expert"),
        ] {
            if !(slot.is_finite() && *slot > 0.0) {
                tracing::warn!(experience = name, configured = *slot, substitute = fallback, "tau multiplier out of range, using default");
                *slot = fallback;
            }
        }

        if !(config.interval_multiplier.is_finite() && config.interval_multiplier > 0.0) {
            tracing::warn!(
                configured = config.interval_multiplier,
                "interval multiplier out of range, using 1.0"
            );
            config.interval_multiplier = 1.0;
        }

        config
    }

    pub fn retention_target(&self, difficulty: Difficulty) -> f64 {
        self.retention_targets.target_for(difficulty)
    }
}
