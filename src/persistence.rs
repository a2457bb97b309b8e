//! Snapshot format for engine state.
//!
//! Storage location and scheduling of saves belong to the host; this module
//! only converts between [`EngineSnapshot`] and JSON text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationSnapshot;
use crate::error::EngineError;
use crate::memory::ItemMemoryState;
use crate::stability::FsrsState;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub version: u32,
    #[serde(default)]
    pub calibration: CalibrationSnapshot,
    #[serde(default)]
    pub memory: BTreeMap<String, ItemMemoryState>,
    #[serde(default)]
    pub stability: BTreeMap<String, FsrsState>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self::new(CalibrationSnapshot::default(), BTreeMap::new(), BTreeMap::new())
    }
}

impl EngineSnapshot {
    pub fn new(
        calibration: CalibrationSnapshot,
        memory: BTreeMap<String, ItemMemoryState>,
        stability: BTreeMap<String, FsrsState>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            calibration,
            memory,
            stability,
        }
    }
}

pub fn to_json(snapshot: &EngineSnapshot) -> Result<String, EngineError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn from_json(json: &str) -> Result<EngineSnapshot, EngineError> {
    let snapshot: EngineSnapshot = serde_json::from_str(json)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineError::InvalidSnapshot(format!(
            "unsupported version {} (expected {SNAPSHOT_VERSION})",
            snapshot.version
        )));
    }
    if let Some((id, state)) = snapshot.memory.iter().find(|(id, s)| **id != s.item_id) {
        return Err(EngineError::InvalidSnapshot(format!(
            "memory record {id} carries item id {}",
            state.item_id
        )));
    }
    Ok(snapshot)
}

/// Parses a snapshot, falling back to neutral state when it cannot be read.
pub fn load_or_default(json: &str) -> EngineSnapshot {
    match from_json(json) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(error = %err, "failed to load engine snapshot, starting from defaults");
            EngineSnapshot::default()
        }
    }
}
