//! Retention engine - one instance per learner profile
//!
//! Owns the per-item memory store, the per-difficulty calibration store and
//! the stability tracker, and turns each practice outcome into a bounded
//! scheduling decision.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::calibration::{CalibrationStore, CalibrationUpdate, RapidCalibration, RapidContext};
use crate::config::EngineConfig;
use crate::curve::{baseline_tau, retention_for_profile};
use crate::integration::{
    AdaptiveIntegrationManager, IntegrationRequest, TauDecision, TauDiagnostics,
};
use crate::memory::{plan_scaled_interval, MemoryStateStore};
use crate::persistence::EngineSnapshot;
use crate::stability::{FsrsStabilityTracker, MergedStability, StabilitySource};
use crate::types::{Difficulty, LearnerProfile, PracticeOutcome};

const MIN_ELAPSED_DAYS: f64 = 0.1;
const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDecision {
    pub item_id: String,
    pub difficulty: Difficulty,
    pub tau_days: f64,
    pub interval_days: f64,
    /// Clamp reasons joined with `+`, or `none`.
    pub clamp_reason: String,
    pub predicted_retention: f64,
    pub next_due: DateTime<Utc>,
    /// The item's own smoothed tau after this outcome.
    pub memory_tau: Option<f64>,
    pub calibration: Option<CalibrationUpdate>,
    pub rapid_calibration: Option<RapidCalibration>,
    pub diagnostics: Option<TauDiagnostics>,
}

/// Inputs for a read-only recommendation.
#[derive(Debug, Clone, Copy)]
pub struct RecommendRequest<'a> {
    pub item_id: &'a str,
    pub difficulty: Difficulty,
    pub history: &'a [PracticeOutcome],
    pub profile: &'a LearnerProfile,
    pub stage: i32,
    pub now: DateTime<Utc>,
}

pub struct RetentionEngine {
    config: EngineConfig,
    calibration: CalibrationStore,
    memory: MemoryStateStore,
    stability: FsrsStabilityTracker,
    external_stability: Option<Arc<dyn StabilitySource>>,
}

impl RetentionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: config.validated(),
            calibration: CalibrationStore::new(),
            memory: MemoryStateStore::new(),
            stability: FsrsStabilityTracker::default(),
            external_stability: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    /// Replaces the built-in FSRS tracker as the primary stability source.
    /// Item memory still feeds the stability signal, but the built-in tracker
    /// is no longer updated while an external source is set.
    pub fn with_stability_source(mut self, source: Arc<dyn StabilitySource>) -> Self {
        self.external_stability = Some(source);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn memory(&self) -> &MemoryStateStore {
        &self.memory
    }

    pub fn stability_tracker(&self) -> &FsrsStabilityTracker {
        &self.stability
    }

    fn calibration_enabled(&self) -> bool {
        let flags = &self.config.feature_flags;
        flags.use_adaptive_systems && flags.use_calibration
    }

    fn stability_enabled(&self) -> bool {
        let flags = &self.config.feature_flags;
        flags.use_adaptive_systems && flags.use_stability
    }

    fn primary_stability(&self) -> &dyn StabilitySource {
        match &self.external_stability {
            Some(source) => source.as_ref(),
            None => &self.stability,
        }
    }

    pub fn integrated_tau(&self, request: &IntegrationRequest<'_>) -> TauDecision {
        let stability = MergedStability::new(self.primary_stability(), &self.memory);
        AdaptiveIntegrationManager::new(&self.config, &self.calibration, &stability)
            .integrated_tau(request)
    }

    /// Applies one practice outcome to every enabled subsystem and returns the
    /// next review decision. Calls for the same item must arrive in event order.
    pub fn record_outcome(
        &self,
        outcome: &PracticeOutcome,
        history: &[PracticeOutcome],
        profile: &LearnerProfile,
        stage: i32,
    ) -> ScheduleDecision {
        let outcome = outcome.sanitized();
        let difficulty = outcome.difficulty;
        let prior = self.memory.get(&outcome.item_id);

        let mut calibration = None;
        let mut rapid_calibration = None;
        if self.calibration_enabled() {
            let context = RapidContext {
                learner_sessions: self.calibration.total_sessions(),
                item_sessions: prior.as_ref().map(|s| s.review_count).unwrap_or(0),
            };
            calibration = Some(self.calibration.update_from_outcome(
                &outcome,
                prior.as_ref(),
                profile,
            ));
            rapid_calibration = self.calibration.apply_rapid_calibration(
                difficulty,
                outcome.performance_score(),
                context,
            );
        }

        if self.stability_enabled() && self.external_stability.is_none() {
            self.stability.record(&outcome);
        }

        let elapsed = prior
            .as_ref()
            .and_then(|s| s.days_since_review(outcome.timestamp))
            .unwrap_or(0.0)
            .max(MIN_ELAPSED_DAYS);
        let memory_state = self.memory.update_at(
            &outcome.item_id,
            elapsed,
            outcome.was_correct(),
            self.config.retention_target(difficulty),
            || baseline_tau(difficulty, 0, stage),
            outcome.timestamp,
        );

        let repetitions = memory_state.review_count.min(i32::MAX as u32) as i32;
        let mut outcomes = item_history(history, &outcome.item_id);
        if !outcomes.iter().any(|o| o.timestamp == outcome.timestamp) {
            outcomes.push(outcome.clone());
        }
        let request = IntegrationRequest::new(difficulty, repetitions, stage)
            .with_item(&outcome.item_id, &outcomes)
            .with_profile(profile);
        let tau = self.integrated_tau(&request);

        let mut decision = self.decide(
            &outcome.item_id,
            difficulty,
            repetitions,
            profile,
            outcome.timestamp,
            tau,
        );
        decision.memory_tau = Some(memory_state.tau);
        decision.calibration = calibration;
        decision.rapid_calibration = rapid_calibration;

        tracing::info!(
            item_id = %decision.item_id,
            difficulty = %difficulty,
            tau = decision.tau_days,
            interval = decision.interval_days,
            clamp = %decision.clamp_reason,
            "practice outcome recorded"
        );
        decision
    }

    /// Same decision as [`record_outcome`](Self::record_outcome) would produce
    /// from the current state, without mutating any store.
    pub fn recommend(&self, request: &RecommendRequest<'_>) -> ScheduleDecision {
        let memory_state = self.memory.get(request.item_id);
        let repetitions = memory_state
            .as_ref()
            .map(|s| s.review_count.min(i32::MAX as u32) as i32)
            .unwrap_or(0);

        let history = item_history(request.history, request.item_id);
        let integration = IntegrationRequest::new(request.difficulty, repetitions, request.stage)
            .with_item(request.item_id, &history)
            .with_profile(request.profile);
        let tau = self.integrated_tau(&integration);

        let mut decision = self.decide(
            request.item_id,
            request.difficulty,
            repetitions,
            request.profile,
            request.now,
            tau,
        );
        decision.memory_tau = memory_state.map(|s| s.tau);
        decision
    }

    fn decide(
        &self,
        item_id: &str,
        difficulty: Difficulty,
        repetitions: i32,
        profile: &LearnerProfile,
        from: DateTime<Utc>,
        tau: TauDecision,
    ) -> ScheduleDecision {
        let interval = plan_scaled_interval(
            tau.tau,
            self.config.retention_target(difficulty),
            self.config.interval_multiplier,
        );
        let predicted_retention =
            retention_for_profile(interval.days, tau.tau, repetitions, difficulty, profile)
                .clamp(0.0, 1.0);
        let next_due = from + Duration::milliseconds((interval.days * MS_PER_DAY).round() as i64);

        ScheduleDecision {
            item_id: item_id.to_string(),
            difficulty,
            tau_days: tau.tau,
            interval_days: interval.days,
            clamp_reason: interval.reason(),
            predicted_retention,
            next_due,
            memory_tau: None,
            calibration: None,
            rapid_calibration: None,
            diagnostics: tau.diagnostics,
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot::new(
            self.calibration.snapshot(),
            self.memory.snapshot(),
            self.stability.snapshot(),
        )
    }

    pub fn restore(&self, snapshot: EngineSnapshot) {
        self.calibration.restore(snapshot.calibration);
        self.memory.restore(snapshot.memory);
        self.stability.restore(snapshot.stability);
        tracing::info!(
            items = self.memory.len(),
            calibration_sessions = self.calibration.total_sessions(),
            "engine state restored"
        );
    }
}

/// Caller-supplied outcomes for one item, with counts and durations
/// sanitized the same way the current outcome is.
fn item_history(history: &[PracticeOutcome], item_id: &str) -> Vec<PracticeOutcome> {
    history
        .iter()
        .filter(|o| o.item_id == item_id)
        .map(PracticeOutcome::sanitized)
        .collect()
}
