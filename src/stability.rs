//! Memory stability - FSRS-style per-item stability tracking
//!
//! Stability S is the number of days after which recall probability falls to
//! 90%: R(t) = (1 + F × t / S)^D with D = -0.5, F = 19/81.
//!
//! The integration manager consumes stability through [`StabilitySource`], so
//! any external spaced-repetition subsystem can stand in for the built-in
//! [`FsrsStabilityTracker`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::types::PracticeOutcome;

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;
const MIN_STABILITY: f64 = 0.1;
const MAX_STABILITY: f64 = 36500.0;
const D_MIN: f64 = 1.0;
const D_MAX: f64 = 10.0;

pub const ESTABLISHED_REVIEWS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsrsParams {
    pub w: [f64; 17],
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability per rating
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn from_success_ratio(ratio: f64) -> Self {
        if !ratio.is_finite() || ratio < 0.5 {
            Self::Again
        } else if ratio < 0.75 {
            Self::Hard
        } else if ratio < 0.95 {
            Self::Good
        } else {
            Self::Easy
        }
    }

    pub fn from_outcome(outcome: &PracticeOutcome) -> Self {
        Self::from_success_ratio(outcome.success_ratio())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsrsState {
    pub stability: f64,
    /// 1 (easiest) to 10 (hardest).
    pub difficulty: f64,
    pub reps: u32,
    pub lapses: u32,
    pub last_review: Option<DateTime<Utc>>,
}

impl Default for FsrsState {
    fn default() -> Self {
        Self {
            stability: 1.0,
            difficulty: 5.0,
            reps: 0,
            lapses: 0,
            last_review: None,
        }
    }
}

impl FsrsState {
    pub fn is_new(&self) -> bool {
        self.reps == 0
    }

    pub fn normalized_difficulty(&self) -> f64 {
        ((self.difficulty - D_MIN) / (D_MAX - D_MIN)).clamp(0.0, 1.0)
    }

    /// Applies one review `elapsed_days` after the previous one.
    pub fn review(&self, rating: Rating, elapsed_days: f64, params: &FsrsParams) -> Self {
        let w = &params.w;
        let rating_val = rating as i32;

        if self.is_new() {
            return Self {
                stability: initial_stability(w, rating_val),
                difficulty: initial_difficulty(w, rating_val),
                reps: 1,
                lapses: u32::from(rating == Rating::Again),
                last_review: self.last_review,
            };
        }

        let elapsed = if elapsed_days.is_finite() {
            elapsed_days.max(0.0)
        } else {
            0.0
        };
        let r = retrievability(self.stability, elapsed);
        let difficulty = next_difficulty(w, self.difficulty, rating_val);

        let (stability, lapses) = if rating == Rating::Again {
            (
                next_forget_stability(w, self.difficulty, self.stability, r),
                self.lapses.saturating_add(1),
            )
        } else {
            (
                next_recall_stability(w, self.difficulty, self.stability, r, rating_val),
                self.lapses,
            )
        };

        Self {
            stability,
            difficulty,
            reps: self.reps.saturating_add(1),
            lapses,
            last_review: self.last_review,
        }
    }
}

pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability.is_nan() || stability <= 0.0 {
        return 0.0;
    }
    let elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * elapsed / stability).powf(DECAY)
}

fn initial_stability(w: &[f64; 17], rating: i32) -> f64 {
    w[(rating - 1) as usize].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; 17], rating: i32) -> f64 {
    (w[4] - (rating - 3) as f64 * w[5]).clamp(D_MIN, D_MAX)
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: i32) -> f64 {
    let d_new = d - w[6] * (rating - 3) as f64;
    let d_mean = w[7] * w[4] + (1.0 - w[7]) * d_new;
    d_mean.clamp(D_MIN, D_MAX)
}

fn next_recall_stability(w: &[f64; 17], d: f64, s: f64, r: f64, rating: i32) -> f64 {
    let hard_penalty = if rating == 2 { w[15] } else { 1.0 };
    let easy_bonus = if rating == 4 { w[16] } else { 1.0 };

    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.clamp(MIN_STABILITY, MAX_STABILITY)
}

fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let new_s = w[11] * d.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * (w[14] * (1.0 - r)).exp();
    new_s.clamp(MIN_STABILITY, s.max(MIN_STABILITY))
}

/// Stability reading for one item, as consumed by the integration manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityEstimate {
    pub stability_days: f64,
    /// 0 (easiest) to 1 (hardest).
    pub item_difficulty: f64,
    pub review_count: u32,
    pub is_new: bool,
}

impl StabilityEstimate {
    /// Enough reviews for the estimate to count as a signal.
    pub fn is_established(&self) -> bool {
        !self.is_new && self.review_count >= ESTABLISHED_REVIEWS
    }
}

pub trait StabilitySource: Send + Sync {
    /// `Ok(None)` when the source has no record of the item.
    fn stability(&self, item_id: &str) -> Result<Option<StabilityEstimate>, SignalError>;
}

#[derive(Debug, Default)]
pub struct FsrsStabilityTracker {
    params: FsrsParams,
    states: RwLock<HashMap<String, FsrsState>>,
}

impl FsrsStabilityTracker {
    pub fn new(params: FsrsParams) -> Self {
        Self {
            params,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, item_id: &str) -> Option<FsrsState> {
        self.states.read().get(item_id).cloned()
    }

    pub fn record(&self, outcome: &PracticeOutcome) -> FsrsState {
        let rating = Rating::from_outcome(outcome);
        let mut states = self.states.write();
        let state = states.entry(outcome.item_id.clone()).or_default();

        let elapsed = state
            .last_review
            .map(|last| (outcome.timestamp - last).num_milliseconds() as f64 / 86_400_000.0)
            .unwrap_or(0.0);

        let mut next = state.review(rating, elapsed, &self.params);
        next.last_review = Some(outcome.timestamp);
        *state = next;

        tracing::debug!(
            item_id = %outcome.item_id,
            ?rating,
            stability = state.stability,
            difficulty = state.difficulty,
            reps = state.reps,
            "stability updated"
        );
        state.clone()
    }

    pub fn snapshot(&self) -> BTreeMap<String, FsrsState> {
        self.states
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect()
    }

    pub fn restore(&self, records: BTreeMap<String, FsrsState>) {
        let mut states = self.states.write();
        states.clear();
        states.extend(records);
    }
}

impl StabilitySource for FsrsStabilityTracker {
    fn stability(&self, item_id: &str) -> Result<Option<StabilityEstimate>, SignalError> {
        let Some(state) = self.get(item_id) else {
            return Ok(None);
        };
        if !state.stability.is_finite() || state.stability <= 0.0 {
            return Err(SignalError::InvalidState {
                source_name: "fsrs_stability",
                value: state.stability,
            });
        }
        Ok(Some(StabilityEstimate {
            stability_days: state.stability,
            item_difficulty: state.normalized_difficulty(),
            review_count: state.reps,
            is_new: state.is_new(),
        }))
    }
}

/// Merges a primary stability source with the item's own memory estimate.
///
/// Established estimates from both are averaged, weighted by review count.
/// The primary source supplies item difficulty whenever it has a record.
/// A failing primary source is skipped while item memory can still answer.
pub struct MergedStability<'a> {
    primary: &'a dyn StabilitySource,
    memory: &'a dyn StabilitySource,
}

impl<'a> MergedStability<'a> {
    pub fn new(primary: &'a dyn StabilitySource, memory: &'a dyn StabilitySource) -> Self {
        Self { primary, memory }
    }
}

impl StabilitySource for MergedStability<'_> {
    fn stability(&self, item_id: &str) -> Result<Option<StabilityEstimate>, SignalError> {
        let memory = match self.memory.stability(item_id) {
            Ok(estimate) => estimate.filter(StabilityEstimate::is_established),
            Err(err) => {
                tracing::warn!(error = %err, item_id, "item memory estimate skipped");
                None
            }
        };
        let primary = match self.primary.stability(item_id) {
            Ok(estimate) => estimate,
            Err(err) if memory.is_some() => {
                tracing::warn!(error = %err, item_id, "primary stability source failed, using item memory");
                None
            }
            Err(err) => return Err(err),
        };

        Ok(match (primary, memory) {
            (Some(primary), Some(memory)) if primary.is_established() => {
                let pw = f64::from(primary.review_count);
                let mw = f64::from(memory.review_count);
                Some(StabilityEstimate {
                    stability_days: (primary.stability_days * pw + memory.stability_days * mw)
                        / (pw + mw),
                    item_difficulty: primary.item_difficulty,
                    review_count: primary.review_count.max(memory.review_count),
                    is_new: false,
                })
            }
            (Some(primary), Some(memory)) => Some(StabilityEstimate {
                item_difficulty: primary.item_difficulty,
                ..memory
            }),
            (primary, memory) => primary.or(memory),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(day: u32, successes: i32, failures: i32) -> PracticeOutcome {
        let ts = Utc.with_ymd_and_hms(2024, 7, day, 8, 0, 0).unwrap();
        PracticeOutcome::new("chorale", ts, 15.0, successes, failures, None)
    }

    #[test]
    fn test_rating_from_success_ratio() {
        assert_eq!(Rating::from_success_ratio(0.2), Rating::Again);
        assert_eq!(Rating::from_success_ratio(0.6), Rating::Hard);
        assert_eq!(Rating::from_success_ratio(0.8), Rating::Good);
        assert_eq!(Rating::from_success_ratio(1.0), Rating::Easy);
        assert_eq!(Rating::from_success_ratio(f64::NAN), Rating::Again);
    }

    #[test]
    fn test_retrievability_decay() {
        let r0 = retrievability(10.0, 0.0);
        let r5 = retrievability(10.0, 5.0);
        let r10 = retrievability(10.0, 10.0);
        assert!((r0 - 1.0).abs() < 1e-9);
        assert!(r0 > r5 && r5 > r10);
        assert!((r10 - 0.9).abs() < 1e-9);
        assert_eq!(retrievability(0.0, 3.0), 0.0);
    }

    #[test]
    fn test_new_item_good_rating() {
        let params = FsrsParams::default();
        let next = FsrsState::default().review(Rating::Good, 0.0, &params);
        assert_eq!(next.reps, 1);
        assert!((next.stability - 2.4).abs() < 1e-12);
        assert!((next.difficulty - 4.93).abs() < 1e-12);
    }

    #[test]
    fn test_successful_reviews_grow_stability() {
        let tracker = FsrsStabilityTracker::default();
        let first = tracker.record(&outcome(1, 9, 1));
        let second = tracker.record(&outcome(4, 10, 0));
        assert!(second.stability > first.stability);
        assert_eq!(second.reps, 2);
    }

    #[test]
    fn test_lapse_shrinks_stability() {
        let tracker = FsrsStabilityTracker::default();
        tracker.record(&outcome(1, 10, 0));
        let before = tracker.record(&outcome(6, 10, 0));
        let after = tracker.record(&outcome(20, 1, 9));
        assert!(after.stability <= before.stability);
        assert_eq!(after.lapses, 1);
    }

    #[test]
    fn test_source_reports_unknown_items_as_none() {
        let tracker = FsrsStabilityTracker::default();
        assert_eq!(tracker.stability("unknown").unwrap(), None);
        tracker.record(&outcome(1, 10, 0));
        let estimate = tracker.stability("chorale").unwrap().unwrap();
        assert_eq!(estimate.review_count, 1);
        assert!(!estimate.is_new);
        assert!((0.0..=1.0).contains(&estimate.item_difficulty));
    }

    #[test]
    fn test_source_rejects_corrupt_state() {
        let tracker = FsrsStabilityTracker::default();
        let mut records = BTreeMap::new();
        records.insert(
            "broken".to_string(),
            FsrsState {
                stability: f64::NAN,
                ..Default::default()
            },
        );
        tracker.restore(records);
        assert!(tracker.stability("broken").is_err());
    }

    fn memory_with(item_id: &str, tau: f64, reviews: u32) -> crate::memory::MemoryStateStore {
        let store = crate::memory::MemoryStateStore::new();
        let mut state = crate::memory::ItemMemoryState::new(item_id, tau);
        state.review_count = reviews;
        store.restore(BTreeMap::from([(item_id.to_string(), state)]));
        store
    }

    struct Offline;

    impl StabilitySource for Offline {
        fn stability(&self, _item_id: &str) -> Result<Option<StabilityEstimate>, SignalError> {
            Err(SignalError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn test_merged_uses_memory_alone() {
        let tracker = FsrsStabilityTracker::default();
        let memory = memory_with("chorale", 30.0, 4);
        let estimate = MergedStability::new(&tracker, &memory)
            .stability("chorale")
            .unwrap()
            .unwrap();
        assert_eq!(estimate.stability_days, 30.0);
        assert_eq!(estimate.review_count, 4);
        assert!((estimate.item_difficulty - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_merged_weights_by_review_count() {
        let tracker = FsrsStabilityTracker::default();
        tracker.record(&outcome(1, 10, 0));
        tracker.record(&outcome(5, 10, 0));
        let fsrs = tracker.stability("chorale").unwrap().unwrap();
        let memory = memory_with("chorale", 40.0, 6);

        let merged = MergedStability::new(&tracker, &memory)
            .stability("chorale")
            .unwrap()
            .unwrap();
        let expected = (fsrs.stability_days * 2.0 + 40.0 * 6.0) / 8.0;
        assert!((merged.stability_days - expected).abs() < 1e-9);
        assert_eq!(merged.item_difficulty, fsrs.item_difficulty);
        assert_eq!(merged.review_count, 6);
    }

    #[test]
    fn test_merged_ignores_unestablished_memory() {
        let tracker = FsrsStabilityTracker::default();
        tracker.record(&outcome(1, 10, 0));
        let memory = memory_with("chorale", 90.0, 1);
        let merged = MergedStability::new(&tracker, &memory)
            .stability("chorale")
            .unwrap()
            .unwrap();
        assert_eq!(merged, tracker.stability("chorale").unwrap().unwrap());
    }

    #[test]
    fn test_merged_survives_failing_primary() {
        let memory = memory_with("chorale", 25.0, 3);
        let merged = MergedStability::new(&Offline, &memory);
        assert_eq!(merged.stability("chorale").unwrap().unwrap().stability_days, 25.0);
        assert!(merged.stability("unknown").is_err());
    }
}
