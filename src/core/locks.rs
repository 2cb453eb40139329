//! Per-record write serialization.
//!
//! Every `(ProjectId, StateKey)` gets its own mutex, so two saves of the same record
//! run the write pipeline one after another (backup copy and primary rename never
//! interleave), while saves of different records proceed in parallel.
//!
//! Entries are leaked for the lifetime of the process and handed out as `&'static`.
//! One mutex per distinct record is never freed, so a long-lived host that touches
//! an unbounded set of projects or keys grows this table without limit.

use crate::core::error::StateError;
use crate::core::store::{ProjectId, StateKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, OnceLock};

type RecordKey = (ProjectId, StateKey);

pub struct KeyedLocks {
    entries: Mutex<HashMap<RecordKey, &'static Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_entry(&self, project: &ProjectId, key: &StateKey) -> Result<&'static Mutex<()>, StateError> {
        let mut entries = self.entries.lock().map_err(|_| {
            StateError::ValidationError("KeyedLocks entries lock poisoned".to_string())
        })?;
        let record = (project.clone(), key.clone());
        if let Some(entry) = entries.get(&record) {
            return Ok(*entry);
        }
        let entry: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
        entries.insert(record, entry);
        Ok(entry)
    }

    /// Run `f` while holding the write lock for one record.
    pub fn with_key<F, R>(&self, project: &ProjectId, key: &StateKey, f: F) -> Result<R, StateError>
    where
        F: FnOnce() -> R,
    {
        let entry = self.get_entry(project, key)?;
        // Poisoning is ignored: the guarded state lives on disk, not in the mutex.
        let _guard = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(f())
    }

    /// Run `f` while holding the write locks of several records of one project.
    ///
    /// Locks are taken in key order; single-key holders never wait on a second lock,
    /// so this cannot deadlock against them.
    pub fn with_keys<F, R>(&self, project: &ProjectId, keys: &[StateKey], f: F) -> Result<R, StateError>
    where
        F: FnOnce() -> R,
    {
        let ordered: BTreeSet<&StateKey> = keys.iter().collect();
        let entries = ordered
            .into_iter()
            .map(|key| self.get_entry(project, key))
            .collect::<Result<Vec<_>, _>>()?;
        let _guards: Vec<_> = entries
            .into_iter()
            .map(|entry| entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect();
        Ok(f())
    }

    /// Number of records that have ever been locked.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide lock table shared by every store rooted anywhere.
pub fn global_locks() -> &'static KeyedLocks {
    static LOCKS: OnceLock<KeyedLocks> = OnceLock::new();
    LOCKS.get_or_init(KeyedLocks::new)
}
