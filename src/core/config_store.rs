//! Secondary tier: a flat, namespaced configuration store owned by the host.
//!
//! The store only needs two primitives from its host (`config_get`, `config_set`),
//! plus prefix removal for project deletion. Records live under namespace
//! [`NAMESPACE`] with keys `projectData.<project>.<key>`.

use crate::core::db;
use crate::core::error::{StateError, TierError};
use crate::core::store::{ProjectId, StateKey, TierKind};
use crate::core::tier::Tier;
use crate::core::time;
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const NAMESPACE: &str = "projstate";

pub fn config_key(project: &ProjectId, key: &StateKey) -> String {
    format!("projectData.{}.{}", project, key)
}

pub fn project_prefix(project: &ProjectId) -> String {
    format!("projectData.{}.", project)
}

pub trait ConfigStore: Send + Sync {
    fn config_get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    fn config_set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StateError>;

    /// Remove every key in `namespace` starting with `prefix`. Returns the count removed.
    fn config_remove_prefix(&self, namespace: &str, prefix: &str) -> Result<usize, StateError>;
}

/// Settings table in a WAL-mode SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
    db_path: PathBuf,
}

impl SqliteConfigStore {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let db_path = db_path.into();
        db::initialize_settings_db(&db_path)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl ConfigStore for SqliteConfigStore {
    fn config_get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        let conn = db::db_connect(&self.db_path)?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn config_set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        let conn = db::db_connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO settings (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace, key, value, time::now_epoch_z()],
        )?;
        Ok(())
    }

    fn config_remove_prefix(&self, namespace: &str, prefix: &str) -> Result<usize, StateError> {
        let conn = db::db_connect(&self.db_path)?;
        let removed = conn.execute(
            "DELETE FROM settings WHERE namespace = ?1 AND substr(key, 1, length(?2)) = ?2",
            params![namespace, prefix],
        )?;
        Ok(removed)
    }
}

/// In-process config store for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>>, StateError> {
        self.entries
            .lock()
            .map_err(|_| StateError::ValidationError("MemoryConfigStore lock poisoned".to_string()))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn config_get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self
            .lock()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn config_set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.lock()?
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn config_remove_prefix(&self, namespace: &str, prefix: &str) -> Result<usize, StateError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(ns, key), _| !(ns == namespace && key.starts_with(prefix)));
        Ok(before - entries.len())
    }
}

/// Adapts a [`ConfigStore`] to the [`Tier`] contract.
pub struct SecondaryTier<C: ConfigStore> {
    store: C,
}

impl<C: ConfigStore> SecondaryTier<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &C {
        &self.store
    }
}

fn to_tier_error(err: StateError) -> TierError {
    match err {
        StateError::RusqliteError(e) => e.into(),
        StateError::IoError(e) => e.into(),
        other => TierError::Unreadable(other.to_string()),
    }
}

impl<C: ConfigStore> Tier for SecondaryTier<C> {
    fn kind(&self) -> TierKind {
        TierKind::Secondary
    }

    fn get(&self, project: &ProjectId, key: &StateKey) -> Result<Vec<u8>, TierError> {
        self.store
            .config_get(NAMESPACE, &config_key(project, key))
            .map_err(to_tier_error)?
            .ok_or(TierError::NotFound)
    }

    fn put(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), TierError> {
        self.store
            .config_set(NAMESPACE, &config_key(project, key), bytes)
            .map_err(to_tier_error)
    }

    fn purge(&self, project: &ProjectId) -> Result<(), TierError> {
        let removed = self
            .store
            .config_remove_prefix(NAMESPACE, &project_prefix(project))
            .map_err(to_tier_error)?;
        tracing::debug!(project = %project, removed, "purged secondary keys");
        Ok(())
    }

    fn locate(&self, project: &ProjectId, key: &StateKey) -> String {
        format!("{}:{}", NAMESPACE, config_key(project, key))
    }
}
