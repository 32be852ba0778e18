//! The synchronized data store.
//!
//! An immutable, versioned key/value snapshot replicated across all agents.
//! Snapshots are never mutated in place: `update` layers new entries on top
//! of the prior snapshot, and `advance_period` starts a fresh period keeping
//! only the keys flagged cross-period-persistent. The persistent map makes
//! both derivations cheap via structural sharing.

use crate::identifiers::Participant;
use indexmap::IndexSet;
use serde_json::Value;
use thiserror::Error;

/// Reserved key holding the recognized participant addresses.
pub const PARTICIPANTS_KEY: &str = "participants";

/// Errors observing a synchronized data snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncDataError {
    /// A required key is absent from the snapshot.
    #[error("synchronized data has no value for key '{key}'")]
    MissingKey { key: String },

    /// A key is present but its value has the wrong shape.
    #[error("synchronized data key '{key}' is malformed: {reason}")]
    MalformedKey { key: String, reason: String },
}

/// One immutable snapshot of the replicated workflow state.
///
/// Only a round's end-of-block evaluation produces a new snapshot; every
/// other code path is a read-only observer of the latest one. Cloning is
/// cheap (structural sharing), so snapshots are passed by value freely.
#[derive(Debug, Clone, Default)]
pub struct SynchronizedData {
    period_count: u64,
    version: u64,
    data: im::HashMap<String, Value>,
}

impl SynchronizedData {
    /// Create the genesis snapshot for period 0.
    pub fn new(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            period_count: 0,
            version: 0,
            data: entries.into_iter().collect(),
        }
    }

    /// The workflow period this snapshot belongs to.
    pub fn period_count(&self) -> u64 {
        self.period_count
    }

    /// Monotonically increasing snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a value, failing if it is absent or explicitly null.
    pub fn get_strict(&self, key: &str) -> Result<&Value, SyncDataError> {
        match self.data.get(key) {
            Some(Value::Null) | None => Err(SyncDataError::MissingKey {
                key: key.to_owned(),
            }),
            Some(value) => Ok(value),
        }
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Derive a new snapshot layering `entries` on top of this one.
    pub fn update(&self, entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut data = self.data.clone();
        for (key, value) in entries {
            data.insert(key, value);
        }
        Self {
            period_count: self.period_count,
            version: self.version + 1,
            data,
        }
    }

    /// Derive the first snapshot of the next period, retaining only the
    /// keys flagged cross-period-persistent.
    pub fn advance_period(&self, persisted_keys: &IndexSet<String>) -> Self {
        let data = self
            .data
            .iter()
            .filter(|(key, _)| persisted_keys.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self {
            period_count: self.period_count + 1,
            version: self.version + 1,
            data,
        }
    }

    /// Parse the recognized participant set from the reserved key.
    ///
    /// The snapshot stores participants as an array of address strings;
    /// order is preserved as stored.
    pub fn participants(&self) -> Result<IndexSet<Participant>, SyncDataError> {
        let raw = self.get_strict(PARTICIPANTS_KEY)?;
        let entries = raw.as_array().ok_or_else(|| SyncDataError::MalformedKey {
            key: PARTICIPANTS_KEY.to_owned(),
            reason: "expected an array of addresses".to_owned(),
        })?;
        entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(Participant::new)
                    .ok_or_else(|| SyncDataError::MalformedKey {
                        key: PARTICIPANTS_KEY.to_owned(),
                        reason: format!("expected an address string, got {entry}"),
                    })
            })
            .collect()
    }
}
