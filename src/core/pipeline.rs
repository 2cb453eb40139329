//! Tiered store: the write pipeline and the read/recovery pipeline.
//!
//! Tiers form a fixed-priority chain: the primary file tier first, then any number of
//! fallback tiers (by default the backup file and the secondary config store).
//!
//! Save:
//! 1. serialize the value
//! 2. stage the bytes in a temp file next to the primary target
//! 3. copy the current primary (if parseable) into every backup tier, best-effort
//! 4. rename the temp file onto the primary (copy fallback), verify it exists
//! 5. mirror the bytes into every other fallback tier, best-effort
//!
//! Only step 2 and 4 can fail a save. Steps run under the record's key lock.
//!
//! Load walks the chain and returns the first parseable value. A value found below the
//! primary is written back through the full save pipeline (self-heal), and into every
//! backup tier ranked above the tier it came from. The heal runs under the key lock and
//! is dropped when the primary no longer matches what the read observed, so it never
//! replaces a save that committed in between.

use crate::core::error::{TierError, WriteError};
use crate::core::locks::{KeyedLocks, global_locks};
use crate::core::store::{DefaultReason, Loaded, ProjectId, Provenance, StateKey, TierKind};
use crate::core::tier::{PrimaryTier, Tier, TierStat};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Primary contents as seen by the read that triggered a heal.
type PrimarySnapshot = Result<Vec<u8>, TierError>;

/// When self-heal writes run relative to the `load` that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealMode {
    /// Heal before `load` returns.
    #[default]
    Inline,
    /// Heal on a background thread; `load` returns immediately.
    Deferred,
}

/// Per-tier health of one record, as reported by [`TieredStore::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TierStatus {
    Parseable,
    Missing,
    Unparseable(String),
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub tier: TierKind,
    pub location: String,
    pub status: TierStatus,
    pub stat: Option<TierStat>,
}

#[derive(Clone)]
pub struct TieredStore {
    primary: Arc<PrimaryTier>,
    fallbacks: Arc<Vec<Arc<dyn Tier>>>,
    locks: &'static KeyedLocks,
    heal_mode: HealMode,
    pending_heals: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

fn is_parseable_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(bytes).is_ok()
}

impl TieredStore {
    /// A store with only the primary tier; add fallbacks with [`TieredStore::with_tier`].
    pub fn new(primary: PrimaryTier) -> Self {
        Self {
            primary: Arc::new(primary),
            fallbacks: Arc::new(Vec::new()),
            locks: global_locks(),
            heal_mode: HealMode::Inline,
            pending_heals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append a fallback tier at the lowest priority.
    pub fn with_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        let mut tiers: Vec<Arc<dyn Tier>> = self.fallbacks.iter().cloned().collect();
        tiers.push(tier);
        self.fallbacks = Arc::new(tiers);
        self
    }

    pub fn with_heal_mode(mut self, mode: HealMode) -> Self {
        self.heal_mode = mode;
        self
    }

    pub fn with_locks(mut self, locks: &'static KeyedLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn primary(&self) -> &PrimaryTier {
        &self.primary
    }

    pub fn heal_mode(&self) -> HealMode {
        self.heal_mode
    }

    /// Tier kinds in read priority.
    pub fn tier_kinds(&self) -> Vec<TierKind> {
        self.chain().map(|t| t.kind()).collect()
    }

    fn chain(&self) -> impl Iterator<Item = &dyn Tier> {
        std::iter::once(self.primary.as_ref() as &dyn Tier)
            .chain(self.fallbacks.iter().map(|t| &**t))
    }

    /// Persist `value` for `(project, key)`.
    ///
    /// Fails only when the primary commit cannot be made durable.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        project: &ProjectId,
        key: &StateKey,
        value: &T,
    ) -> Result<(), WriteError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.save_bytes(project, key, &bytes)
    }

    fn save_bytes(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), WriteError> {
        self.locks
            .with_key(project, key, || self.commit_locked(project, key, bytes))
            .map_err(|e| WriteError::CommitFailed {
                path: self.primary.path(project, key),
                reason: e.to_string(),
            })?
    }

    fn commit_locked(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), WriteError> {
        let staged = self.primary.stage(project, key, bytes)?;

        match self.primary.get(project, key) {
            Ok(previous) if is_parseable_json(&previous) => {
                for tier in self.fallbacks.iter().filter(|t| t.kind() == TierKind::Backup) {
                    if let Err(e) = tier.put(project, key, &previous) {
                        tracing::warn!(
                            project = %project,
                            key = %key,
                            location = %tier.locate(project, key),
                            error = %e,
                            "backup copy failed"
                        );
                    }
                }
            }
            Ok(previous) => {
                tracing::warn!(
                    project = %project,
                    key = %key,
                    bytes = previous.len(),
                    sha256 = %fingerprint(&previous),
                    "primary unparseable, keeping existing backup"
                );
            }
            Err(_) => {}
        }

        let outcome = staged.commit()?;
        tracing::debug!(project = %project, key = %key, ?outcome, "primary committed");

        for tier in self.fallbacks.iter().filter(|t| t.kind() != TierKind::Backup) {
            if let Err(e) = tier.put(project, key, bytes) {
                tracing::warn!(
                    project = %project,
                    key = %key,
                    tier = %tier.kind(),
                    location = %tier.locate(project, key),
                    error = %e,
                    "mirror write failed"
                );
            }
        }
        Ok(())
    }

    /// Load the value for `(project, key)`, or `default` when no tier holds a
    /// parseable copy. Never fails.
    pub fn load<T>(&self, project: &ProjectId, key: &StateKey, default: T) -> T
    where
        T: Serialize + DeserializeOwned,
    {
        self.load_with_provenance(project, key, default).value
    }

    /// Like [`TieredStore::load`], without a default.
    pub fn load_opt<T>(&self, project: &ProjectId, key: &StateKey) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.read_chain(project, key).ok().map(|loaded| loaded.value)
    }

    pub fn load_with_provenance<T>(&self, project: &ProjectId, key: &StateKey, default: T) -> Loaded<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match self.read_chain(project, key) {
            Ok(loaded) => loaded,
            Err(reason) => {
                match reason {
                    DefaultReason::Empty => {
                        tracing::debug!(project = %project, key = %key, "no stored value, using default")
                    }
                    DefaultReason::AllUnreadable => tracing::warn!(
                        project = %project,
                        key = %key,
                        "every tier failed, using default"
                    ),
                }
                Loaded {
                    value: default,
                    provenance: Provenance::Default(reason),
                }
            }
        }
    }

    fn read_chain<T>(&self, project: &ProjectId, key: &StateKey) -> Result<Loaded<T>, DefaultReason>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut saw_damage = false;
        let mut primary_seen: PrimarySnapshot = Err(TierError::NotFound);
        for (position, tier) in self.chain().enumerate() {
            let read = tier.get(project, key);
            if position == 0 {
                primary_seen = read.clone();
            }
            match read {
                Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => {
                        if position > 0 {
                            tracing::info!(
                                project = %project,
                                key = %key,
                                tier = %tier.kind(),
                                "recovered from fallback tier"
                            );
                            self.heal(project, key, &value, position, primary_seen.clone());
                        }
                        return Ok(Loaded {
                            value,
                            provenance: Provenance::Tier(tier.kind()),
                        });
                    }
                    Err(e) => {
                        saw_damage = true;
                        self.log_damage(tier, project, key, Some(&bytes), &e.to_string());
                    }
                },
                Err(TierError::NotFound) => {
                    tracing::debug!(
                        project = %project,
                        key = %key,
                        tier = %tier.kind(),
                        "not present"
                    );
                }
                Err(e) => {
                    saw_damage = true;
                    self.log_damage(tier, project, key, None, &e.to_string());
                }
            }
        }
        Err(if saw_damage {
            DefaultReason::AllUnreadable
        } else {
            DefaultReason::Empty
        })
    }

    fn log_damage(&self, tier: &dyn Tier, project: &ProjectId, key: &StateKey, bytes: Option<&[u8]>, error: &str) {
        let stat = tier.stat(project, key);
        tracing::warn!(
            project = %project,
            key = %key,
            tier = %tier.kind(),
            location = %tier.locate(project, key),
            bytes = stat.map(|s| s.bytes).or(bytes.map(|b| b.len() as u64)),
            mtime = stat.and_then(|s| s.modified_epoch_secs),
            sha256 = %bytes.map(fingerprint).unwrap_or_default(),
            error = %error,
            "tier read failed"
        );
    }

    fn heal<T: Serialize>(
        &self,
        project: &ProjectId,
        key: &StateKey,
        value: &T,
        origin: usize,
        primary_seen: PrimarySnapshot,
    ) {
        let bytes = match serde_json::to_vec_pretty(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(project = %project, key = %key, error = %e, "self-heal serialize failed");
                return;
            }
        };
        match self.heal_mode {
            HealMode::Inline => self.heal_bytes(project, key, &bytes, origin, &primary_seen),
            HealMode::Deferred => {
                let store = self.clone();
                let project = project.clone();
                let key = key.clone();
                let handle = std::thread::spawn(move || {
                    store.heal_bytes(&project, &key, &bytes, origin, &primary_seen)
                });
                match self.pending_heals.lock() {
                    Ok(mut pending) => pending.push(handle),
                    Err(_) => tracing::warn!("pending heal list poisoned, heal detached"),
                }
            }
        }
    }

    fn heal_bytes(
        &self,
        project: &ProjectId,
        key: &StateKey,
        bytes: &[u8],
        origin: usize,
        primary_seen: &PrimarySnapshot,
    ) {
        let locked = self.locks.with_key(project, key, || -> Result<bool, WriteError> {
            if &self.primary.get(project, key) != primary_seen {
                tracing::debug!(project = %project, key = %key, "primary changed since read, heal skipped");
                return Ok(false);
            }
            self.commit_locked(project, key, bytes)?;
            // Backup tiers between the primary and the origin were skipped by the
            // pipeline (it only preserves a parseable previous primary).
            for tier in self
                .fallbacks
                .iter()
                .take(origin.saturating_sub(1))
                .filter(|t| t.kind() == TierKind::Backup)
            {
                if let Err(e) = tier.put(project, key, bytes) {
                    tracing::warn!(
                        project = %project,
                        key = %key,
                        location = %tier.locate(project, key),
                        error = %e,
                        "self-heal of backup failed"
                    );
                }
            }
            Ok(true)
        });
        match locked {
            Ok(Ok(true)) => tracing::info!(project = %project, key = %key, "self-heal complete"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => tracing::warn!(project = %project, key = %key, error = %e, "self-heal of primary failed"),
            Err(e) => tracing::warn!(project = %project, key = %key, error = %e, "self-heal lock failed"),
        }
    }

    /// Join every deferred heal started so far.
    pub fn wait_for_heals(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending_heals.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("deferred heal panicked");
            }
        }
    }

    /// Per-tier status of one record.
    pub fn inspect(&self, project: &ProjectId, key: &StateKey) -> Vec<TierReport> {
        self.chain()
            .map(|tier| {
                let status = match tier.get(project, key) {
                    Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                        Ok(_) => TierStatus::Parseable,
                        Err(e) => TierStatus::Unparseable(e.to_string()),
                    },
                    Err(TierError::NotFound) => TierStatus::Missing,
                    Err(e) => TierStatus::Error(e.to_string()),
                };
                TierReport {
                    tier: tier.kind(),
                    location: tier.locate(project, key),
                    status,
                    stat: tier.stat(project, key),
                }
            })
            .collect()
    }

    /// Remove every record of `project` from every tier.
    ///
    /// Holds the lock of every key with a file under the project directory. All tiers
    /// are attempted; the first failure is returned.
    pub fn purge_project(&self, project: &ProjectId) -> Result<(), TierError> {
        let keys = self.primary.stored_keys(project)?;
        let purge_all = || {
            let mut first_err = None;
            for tier in self.chain() {
                if let Err(e) = tier.purge(project) {
                    tracing::warn!(project = %project, tier = %tier.kind(), error = %e, "purge failed");
                    first_err.get_or_insert(e);
                }
            }
            first_err
        };
        let first_err = self
            .locks
            .with_keys(project, &keys, purge_all)
            .map_err(|e| TierError::Unreadable(e.to_string()))?;
        match first_err {
            Some(e) => Err(e),
            None => {
                tracing::info!(project = %project, "project purged from all tiers");
                Ok(())
            }
        }
    }
}
