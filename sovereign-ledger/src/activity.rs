//! Append-only audit trail of notable events.
//!
//! Entries reference a transaction id, a proof digest or an external storage
//! reference. They are never edited; the only removal is [`ActivityLog::clear`].

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

const ACTIVITY_TREE: &str = "activity_log";

/// What an activity entry points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Transfer,
    Proof,
    StorageReference,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Proof => "proof",
            Self::StorageReference => "storage-reference",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub reference: String,
}

#[derive(Clone)]
pub struct ActivityLog {
    backend: Arc<ActivityBackend>,
}

enum ActivityBackend {
    InMemory(Mutex<MemoryEntries>),
    Persistent { db: sled::Db, tree: sled::Tree },
}

#[derive(Default)]
struct MemoryEntries {
    next_id: u64,
    entries: Vec<ActivityEntry>,
}

impl ActivityLog {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(ActivityBackend::InMemory(Mutex::new(MemoryEntries::default()))),
        }
    }

    /// Store entries in the `activity_log` tree of `db`.
    pub fn persistent(db: &sled::Db) -> Result<Self, LedgerError> {
        let tree = db
            .open_tree(ACTIVITY_TREE)
            .map_err(|e| LedgerError::Storage(format!("Failed to open activity tree: {}", e)))?;
        Ok(Self {
            backend: Arc::new(ActivityBackend::Persistent {
                db: db.clone(),
                tree,
            }),
        })
    }

    pub fn record(
        &self,
        kind: ActivityKind,
        reference: impl Into<String>,
    ) -> Result<ActivityEntry, LedgerError> {
        let reference = reference.into();
        let entry = match &*self.backend {
            ActivityBackend::InMemory(store) => {
                let mut guard = store
                    .lock()
                    .map_err(|_| LedgerError::Storage("activity log poisoned".into()))?;
                guard.next_id += 1;
                let entry = ActivityEntry {
                    id: guard.next_id,
                    timestamp: sovereign_common::now(),
                    kind,
                    reference,
                };
                guard.entries.push(entry.clone());
                entry
            }
            ActivityBackend::Persistent { db, tree } => {
                // sled ids are monotonic across restarts; start at 1.
                let id = db.generate_id()? + 1;
                let entry = ActivityEntry {
                    id,
                    timestamp: sovereign_common::now(),
                    kind,
                    reference,
                };
                tree.insert(id.to_be_bytes(), serde_json::to_vec(&entry)?)?;
                entry
            }
        };

        tracing::debug!(
            id = entry.id,
            kind = %entry.kind,
            reference = %sovereign_common::short_ref(&entry.reference),
            "Activity recorded"
        );
        Ok(entry)
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Result<Vec<ActivityEntry>, LedgerError> {
        match &*self.backend {
            ActivityBackend::InMemory(store) => {
                let guard = store
                    .lock()
                    .map_err(|_| LedgerError::Storage("activity log poisoned".into()))?;
                Ok(guard.entries.iter().rev().cloned().collect())
            }
            ActivityBackend::Persistent { tree, .. } => {
                let mut entries = Vec::new();
                for item in tree.iter().rev() {
                    let (_, bytes) = item?;
                    entries.push(serde_json::from_slice(&bytes)?);
                }
                Ok(entries)
            }
        }
    }

    pub fn clear(&self) -> Result<(), LedgerError> {
        match &*self.backend {
            ActivityBackend::InMemory(store) => {
                store
                    .lock()
                    .map_err(|_| LedgerError::Storage("activity log poisoned".into()))?
                    .entries
                    .clear();
            }
            ActivityBackend::Persistent { tree, .. } => tree.clear()?,
        }
        tracing::info!("Activity log cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(log: &ActivityLog) {
        log.record(ActivityKind::Transfer, "tx_1").unwrap();
        log.record(ActivityKind::Proof, "abcd").unwrap();
        log.record(ActivityKind::StorageReference, "bafy").unwrap();

        let entries = log.entries().unwrap();
        let refs: Vec<&str> = entries.iter().map(|e| e.reference.as_str()).collect();
        assert_eq!(refs, vec!["bafy", "abcd", "tx_1"]);
        assert!(entries[0].id > entries[1].id && entries[1].id > entries[2].id);

        log.clear().unwrap();
        assert!(log.entries().unwrap().is_empty());

        let after = log.record(ActivityKind::Transfer, "tx_2").unwrap();
        assert!(after.id > entries[0].id);
    }

    #[test]
    fn memory_log_is_newest_first_and_clearable() {
        exercise(&ActivityLog::in_memory());
    }

    #[test]
    fn sled_log_is_newest_first_and_clearable() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        exercise(&ActivityLog::persistent(&db).unwrap());
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ActivityKind::StorageReference).unwrap();
        assert_eq!(json, "\"storage-reference\"");
    }
}
