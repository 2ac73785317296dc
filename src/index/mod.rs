pub mod uid;

use crate::json::to_pretty_bytes;
use crate::storage::{ObjectStore, StoreError, StoreErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use uid::UidGenerator;

const MAX_UID_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("event index {key} is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("event index {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("serialize event index: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not allocate an unused event uid after {attempts} attempts")]
    UidExhausted { attempts: usize },
    #[error("source uuid {0} is not in the event index")]
    UnknownSource(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIndexEntry {
    #[serde(rename = "dhis2_uuid")]
    pub event_uid: String,
    pub uploaded: bool,
    pub deleted: bool,
}

/// Source uuid -> destination event, accumulated across every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventIndex {
    entries: BTreeMap<String, EventIndexEntry>,
    assigned: HashSet<String>,
}

impl EventIndex {
    pub fn from_entries(entries: BTreeMap<String, EventIndexEntry>) -> Self {
        let assigned = entries.values().map(|e| e.event_uid.clone()).collect();
        Self { entries, assigned }
    }

    pub fn from_json_slice(bytes: &[u8], key: &str) -> Result<Self, IndexError> {
        let entries: BTreeMap<String, EventIndexEntry> =
            serde_json::from_slice(bytes).map_err(|source| IndexError::Corrupt {
                key: key.to_string(),
                source,
            })?;
        Ok(Self::from_entries(entries))
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, IndexError> {
        Ok(to_pretty_bytes(&self.entries)?)
    }

    pub fn get(&self, source_uuid: &str) -> Option<&EventIndexEntry> {
        self.entries.get(source_uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for `source_uuid`, allocating a fresh event uid the first
    /// time the uuid is seen. The bool is true when the entry was just created.
    pub fn get_or_create(
        &mut self,
        source_uuid: &str,
        ids: &mut dyn UidGenerator,
    ) -> Result<(&EventIndexEntry, bool), IndexError> {
        if self.entries.contains_key(source_uuid) {
            return Ok((&self.entries[source_uuid], false));
        }

        let mut event_uid = None;
        for _ in 0..MAX_UID_ATTEMPTS {
            let candidate = ids.generate();
            if !self.assigned.contains(&candidate) {
                event_uid = Some(candidate);
                break;
            }
        }
        let event_uid = event_uid.ok_or(IndexError::UidExhausted {
            attempts: MAX_UID_ATTEMPTS,
        })?;

        self.assigned.insert(event_uid.clone());
        let entry = self
            .entries
            .entry(source_uuid.to_string())
            .or_insert(EventIndexEntry {
                event_uid,
                uploaded: false,
                deleted: false,
            });
        Ok((entry, true))
    }

    /// Returns true when the flag flipped.
    pub fn mark_uploaded(&mut self, source_uuid: &str) -> Result<bool, IndexError> {
        let entry = self
            .entries
            .get_mut(source_uuid)
            .ok_or_else(|| IndexError::UnknownSource(source_uuid.to_string()))?;
        let changed = !entry.uploaded;
        entry.uploaded = true;
        Ok(changed)
    }

    /// Flags every entry whose uuid is not in `seen`. Returns the uuids that were
    /// newly flagged, in key order.
    pub fn reconcile_deleted(&mut self, seen: &HashSet<String>) -> Vec<String> {
        let mut flagged = Vec::new();
        for (source_uuid, entry) in self.entries.iter_mut() {
            if seen.contains(source_uuid) || entry.deleted {
                continue;
            }
            entry.deleted = true;
            flagged.push(source_uuid.clone());
        }
        flagged
    }
}

/// Reads the full index. A missing blob is only tolerated with `allow_missing`.
pub fn load_index(
    store: &dyn ObjectStore,
    key: &str,
    allow_missing: bool,
) -> Result<EventIndex, IndexError> {
    match store.get(key) {
        Ok(bytes) => EventIndex::from_json_slice(&bytes, key),
        Err(err) if allow_missing && err.code == StoreErrorCode::NotFound => {
            tracing::warn!(key, "event index not found; starting from an empty index");
            Ok(EventIndex::default())
        }
        Err(source) => Err(IndexError::Store {
            key: key.to_string(),
            source,
        }),
    }
}

pub fn save_index(store: &dyn ObjectStore, key: &str, index: &EventIndex) -> Result<(), IndexError> {
    let bytes = index.to_json_bytes()?;
    store.put(key, &bytes).map_err(|source| IndexError::Store {
        key: key.to_string(),
        source,
    })
}
