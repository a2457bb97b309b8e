//! # retention-engine - forgetting-curve scheduling for practice passages
//!
//! Decides how far into the future the next rehearsal of a musical passage
//! should be placed:
//!
//! - **Curve & policy** - exponential forgetting curve, baseline tau, safety clamps
//! - **Item memory** - per-item tau smoothed from observed outcomes
//! - **Calibration** - per-difficulty adjustment learned from prediction accuracy
//! - **Adaptive integration** - confidence-weighted blend of calibration,
//!   stability and recent performance against the demographic baseline
//!
//! ## Modules
//!
//! - [`curve`] - retention formula, `baseline_tau`, `clamp_tau`, `clamp_interval`
//! - [`memory`] - [`ItemMemoryState`], [`MemoryStateStore`], `plan_next_interval`
//! - [`calibration`] - [`CalibrationStore`], rapid-phase nudges
//! - [`stability`] - FSRS stability tracker, the [`StabilitySource`] seam and
//!   its merge with item memory
//! - [`performance`] - recent-performance signal and score trend
//! - [`integration`] - [`AdaptiveIntegrationManager`]
//! - [`engine`] - [`RetentionEngine`], one per learner profile
//! - [`persistence`] - JSON snapshots of engine state
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use retention_engine::{EngineConfig, LearnerProfile, PracticeOutcome, RetentionEngine};
//!
//! let engine = RetentionEngine::new(EngineConfig::default());
//! let outcome = PracticeOutcome::new("nocturne-op9-2", Utc::now(), 15.0, 8, 2, Some("Difficult"));
//! let decision = engine.record_outcome(&outcome, &[], &LearnerProfile::default(), 0);
//! assert!((1.0..=365.0).contains(&decision.interval_days));
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod calibration;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod integration;
pub mod logging;
pub mod memory;
pub mod performance;
pub mod persistence;
pub mod sanitize;
pub mod stability;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use calibration::{CalibrationPhase, CalibrationSnapshot, CalibrationStore, DifficultyCalibration};
pub use config::{EngineConfig, FeatureFlags};
pub use curve::{baseline_tau, clamp_interval, clamp_tau, retention, retention_target, ClampReason, IntervalClamp};
pub use engine::{RecommendRequest, RetentionEngine, ScheduleDecision};
pub use error::{EngineError, SignalError};
pub use integration::{AdaptiveDataSet, AdaptiveIntegrationManager, IntegrationRequest, TauDecision};
pub use memory::{plan_next_interval, ItemMemoryState, MemoryStateStore};
pub use persistence::EngineSnapshot;
pub use stability::{FsrsStabilityTracker, MergedStability, StabilityEstimate, StabilitySource};
