use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::ItemMemoryState;
use crate::error::SignalError;
use crate::stability::{StabilityEstimate, StabilitySource};

/// Item memory carries no difficulty of its own.
const NEUTRAL_ITEM_DIFFICULTY: f64 = 0.5;

/// Keyed store of per-item memory states. A single coarse lock serializes
/// writers; callers must still apply updates for one item in event order.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, ItemMemoryState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, item_id: &str) -> Option<ItemMemoryState> {
        self.states.read().get(item_id).cloned()
    }

    /// Returns the item's state, creating it from `init_tau` on first access.
    /// `init_tau` runs under the store lock and must not call back into the store.
    pub fn get_or_init<F>(&self, item_id: &str, init_tau: F) -> ItemMemoryState
    where
        F: FnOnce() -> f64,
    {
        if let Some(state) = self.get(item_id) {
            return state;
        }
        let mut states = self.states.write();
        states
            .entry(item_id.to_string())
            .or_insert_with(|| ItemMemoryState::new(item_id, init_tau()))
            .clone()
    }

    pub fn update<F>(
        &self,
        item_id: &str,
        interval_days: f64,
        was_correct: bool,
        target_retention: f64,
        init_tau: F,
    ) -> ItemMemoryState
    where
        F: FnOnce() -> f64,
    {
        self.update_at(
            item_id,
            interval_days,
            was_correct,
            target_retention,
            init_tau,
            Utc::now(),
        )
    }

    pub fn update_at<F>(
        &self,
        item_id: &str,
        interval_days: f64,
        was_correct: bool,
        target_retention: f64,
        init_tau: F,
        reviewed_at: DateTime<Utc>,
    ) -> ItemMemoryState
    where
        F: FnOnce() -> f64,
    {
        let mut states = self.states.write();
        let state = states
            .entry(item_id.to_string())
            .or_insert_with(|| ItemMemoryState::new(item_id, init_tau()));

        if let Some(last) = state.last_review {
            if reviewed_at < last {
                tracing::warn!(
                    item_id,
                    %reviewed_at,
                    last_review = %last,
                    "memory state update applied out of event order"
                );
            }
        }

        let old_tau = state.tau;
        state.apply_review(interval_days, was_correct, target_retention, reviewed_at);
        tracing::debug!(
            item_id,
            old_tau,
            new_tau = state.tau,
            was_correct,
            review_count = state.review_count,
            "item memory state updated"
        );
        state.clone()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Ordered copy of every record, for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, ItemMemoryState> {
        self.states
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    pub fn restore(&self, records: BTreeMap<String, ItemMemoryState>) {
        let mut states = self.states.write();
        states.clear();
        for (id, mut state) in records {
            state.tau = crate::curve::clamp_tau(state.tau);
            states.insert(id, state);
        }
    }
}

/// Exposes each item's smoothed tau as a stability-like estimate in days.
impl StabilitySource for MemoryStateStore {
    fn stability(&self, item_id: &str) -> Result<Option<StabilityEstimate>, SignalError> {
        let Some(state) = self.get(item_id) else {
            return Ok(None);
        };
        if !state.tau.is_finite() {
            return Err(SignalError::InvalidState {
                source_name: "item_memory",
                value: state.tau,
            });
        }
        Ok(Some(StabilityEstimate {
            stability_days: state.tau,
            item_difficulty: NEUTRAL_ITEM_DIFFICULTY,
            review_count: state.review_count,
            is_new: state.review_count == 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    #[test]
    fn test_lazy_init_uses_factory_once() {
        let store = MemoryStateStore::new();
        let calls = Cell::new(0);
        let factory = || {
            calls.set(calls.get() + 1);
            12.0
        };
        let first = store.get_or_init("nocturne", factory);
        let second = store.get_or_init("nocturne", || 99.0);
        assert_eq!(first.tau, 12.0);
        assert_eq!(second.tau, 12.0);
        assert_eq!(calls.get(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let store = MemoryStateStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_creates_then_mutates() {
        let store = MemoryStateStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let state = store.update_at("fugue", 9.0, true, 0.8, || 9.0, t0);
        assert_eq!(state.review_count, 1);
        assert!((state.tau - 9.49).abs() < 0.01);

        let again = store.update_at("fugue", 2.0, false, 0.8, || 50.0, t0 + chrono::Duration::days(2));
        assert_eq!(again.review_count, 2);
        assert!(again.tau < state.tau);
    }

    #[test]
    fn test_restore_clamps_corrupt_tau() {
        let store = MemoryStateStore::new();
        let mut records = BTreeMap::new();
        let mut bad = ItemMemoryState::new("x", 9.0);
        bad.tau = 9000.0;
        records.insert("x".to_string(), bad);
        store.restore(records);
        assert_eq!(store.get("x").unwrap().tau, 180.0);
    }

    #[test]
    fn test_stability_estimate_from_tau() {
        let store = MemoryStateStore::new();
        assert_eq!(store.stability("nocturne").unwrap(), None);

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let state = store.update_at("nocturne", 5.0, true, 0.8, || 12.0, t0);
        let estimate = store.stability("nocturne").unwrap().unwrap();
        assert_eq!(estimate.stability_days, state.tau);
        assert_eq!(estimate.review_count, 1);
        assert!(!estimate.is_new);
        assert!(!estimate.is_established());
    }
}
