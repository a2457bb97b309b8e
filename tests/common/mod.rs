#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use retention_engine::{EngineConfig, FeatureFlags, PracticeOutcome};

pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap() + Duration::days(n)
}

pub fn session(item_id: &str, day_offset: i64, successes: i32, failures: i32, label: &str) -> PracticeOutcome {
    PracticeOutcome::new(item_id, day(day_offset), 15.0, successes, failures, Some(label))
}

pub fn scored(item_id: &str, day_offset: i64, score: f64, label: &str) -> PracticeOutcome {
    session(item_id, day_offset, 8, 2, label).with_performance_score(score)
}

pub fn config_with(flags: FeatureFlags) -> EngineConfig {
    EngineConfig {
        feature_flags: flags,
        ..EngineConfig::default()
    }
}

pub fn baseline_only_flags() -> FeatureFlags {
    FeatureFlags {
        use_adaptive_systems: false,
        ..Default::default()
    }
}
