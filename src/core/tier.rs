//! Storage tiers: a uniform get/put-bytes contract over independent backends.
//!
//! Layout of the file-backed tiers under `state_root`:
//!
//! ```text
//! <state_root>/<project>/<key>.json       primary
//! <state_root>/<project>/<key>.json.bak   backup (previous primary generation)
//! <state_root>/<project>/<key>.json.tmp   transient, staged primary write
//! ```
//!
//! No `put` exposes a partial write: file writes are staged next to the target and
//! renamed into place. The secondary tier lives in `config_store`.

use crate::core::error::{TierError, WriteError};
use crate::core::store::{ProjectId, StateKey, TierKind};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const PRIMARY_EXT: &str = "json";
const BACKUP_SUFFIX: &str = ".bak";
const TEMP_SUFFIX: &str = ".tmp";

/// Size and modification time of a tier entry, for corruption diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TierStat {
    pub bytes: u64,
    pub modified_epoch_secs: Option<u64>,
}

pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    fn get(&self, project: &ProjectId, key: &StateKey) -> Result<Vec<u8>, TierError>;

    fn put(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), TierError>;

    /// Remove everything this tier holds for `project`.
    fn purge(&self, project: &ProjectId) -> Result<(), TierError>;

    /// Human-readable location of the entry (path or config key).
    fn locate(&self, project: &ProjectId, key: &StateKey) -> String;

    fn stat(&self, _project: &ProjectId, _key: &StateKey) -> Option<TierStat> {
        None
    }
}

fn stat_path(path: &Path) -> Option<TierStat> {
    let meta = fs::metadata(path).ok()?;
    let modified_epoch_secs = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    Some(TierStat {
        bytes: meta.len(),
        modified_epoch_secs,
    })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// How a staged write reached its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Renamed,
    /// The filesystem rejected the rename; the staged bytes were copied instead.
    Copied,
}

/// Bytes written next to their final target, not yet visible to readers.
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    pub fn stage(target: &Path, bytes: &[u8]) -> Result<Self, WriteError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| WriteError::Stage {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let temp = with_suffix(target, TEMP_SUFFIX);
        write_synced(&temp, bytes).map_err(|source| WriteError::Stage {
            path: temp.clone(),
            source,
        })?;
        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp(&self) -> &Path {
        &self.temp
    }

    /// Move the staged bytes onto the target.
    ///
    /// Rename first; if the filesystem refuses (cross-device, permissions), copy the
    /// temp file over the target and delete it. The target must exist afterwards.
    pub fn commit(self) -> Result<CommitOutcome, WriteError> {
        let outcome = match fs::rename(&self.temp, &self.target) {
            Ok(()) => CommitOutcome::Renamed,
            Err(rename_err) => {
                tracing::warn!(
                    path = %self.target.display(),
                    error = %rename_err,
                    "rename failed, falling back to copy"
                );
                if let Err(copy_err) = fs::copy(&self.temp, &self.target) {
                    let _ = fs::remove_file(&self.temp);
                    return Err(WriteError::CommitFailed {
                        path: self.target.clone(),
                        reason: format!("rename: {}; copy: {}", rename_err, copy_err),
                    });
                }
                if let Err(e) = fs::remove_file(&self.temp) {
                    tracing::debug!(path = %self.temp.display(), error = %e, "temp cleanup failed");
                }
                CommitOutcome::Copied
            }
        };

        if !self.target.exists() {
            return Err(WriteError::CommitFailed {
                path: self.target.clone(),
                reason: "target missing after commit".to_string(),
            });
        }
        Ok(outcome)
    }

    /// Drop the staged bytes without touching the target.
    pub fn abandon(self) {
        let _ = fs::remove_file(&self.temp);
    }
}

/// Stage-and-commit in one step, for files outside the tier layout
/// (documents, registry, exports).
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<CommitOutcome, WriteError> {
    StagedWrite::stage(target, bytes)?.commit()
}

/// One file per `(project, key)` under a project-scoped directory.
#[derive(Debug, Clone)]
pub struct PrimaryTier {
    root: PathBuf,
}

impl PrimaryTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join(project.as_str())
    }

    pub fn path(&self, project: &ProjectId, key: &StateKey) -> PathBuf {
        self.project_dir(project)
            .join(format!("{}.{}", key.as_str(), PRIMARY_EXT))
    }

    pub fn backup_path(&self, project: &ProjectId, key: &StateKey) -> PathBuf {
        with_suffix(&self.path(project, key), BACKUP_SUFFIX)
    }

    pub fn temp_path(&self, project: &ProjectId, key: &StateKey) -> PathBuf {
        with_suffix(&self.path(project, key), TEMP_SUFFIX)
    }

    /// Write `bytes` next to the primary file without making them visible.
    pub fn stage(
        &self,
        project: &ProjectId,
        key: &StateKey,
        bytes: &[u8],
    ) -> Result<StagedWrite, WriteError> {
        StagedWrite::stage(&self.path(project, key), bytes)
    }

    /// Keys with any file (primary, backup or staged) under the project directory.
    pub fn stored_keys(&self, project: &ProjectId) -> Result<Vec<StateKey>, TierError> {
        let entries = match fs::read_dir(self.project_dir(project)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = BTreeSet::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let name = name.strip_suffix(TEMP_SUFFIX).unwrap_or(name);
            let name = name.strip_suffix(BACKUP_SUFFIX).unwrap_or(name);
            let Some(stem) = name.strip_suffix(".json") else { continue };
            if let Ok(key) = StateKey::new(stem) {
                keys.insert(key);
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Remove `*.tmp` leftovers of interrupted saves. Returns how many were removed.
    pub fn sweep_temp(&self, project: &ProjectId) -> Result<usize, TierError> {
        let dir = self.project_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TEMP_SUFFIX));
            if is_temp {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "removed stale temp file");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl Tier for PrimaryTier {
    fn kind(&self) -> TierKind {
        TierKind::Primary
    }

    fn get(&self, project: &ProjectId, key: &StateKey) -> Result<Vec<u8>, TierError> {
        Ok(fs::read(self.path(project, key))?)
    }

    fn put(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), TierError> {
        self.stage(project, key, bytes)
            .and_then(StagedWrite::commit)
            .map(|_| ())
            .map_err(|e| TierError::Unreadable(e.to_string()))
    }

    fn purge(&self, project: &ProjectId) -> Result<(), TierError> {
        match fs::remove_dir_all(self.project_dir(project)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, project: &ProjectId, key: &StateKey) -> String {
        self.path(project, key).display().to_string()
    }

    fn stat(&self, project: &ProjectId, key: &StateKey) -> Option<TierStat> {
        stat_path(&self.path(project, key))
    }
}

/// Sibling `.bak` file holding the previous primary generation.
#[derive(Debug, Clone)]
pub struct BackupTier {
    layout: PrimaryTier,
}

impl BackupTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: PrimaryTier::new(root),
        }
    }

    pub fn path(&self, project: &ProjectId, key: &StateKey) -> PathBuf {
        self.layout.backup_path(project, key)
    }
}

impl Tier for BackupTier {
    fn kind(&self) -> TierKind {
        TierKind::Backup
    }

    fn get(&self, project: &ProjectId, key: &StateKey) -> Result<Vec<u8>, TierError> {
        Ok(fs::read(self.path(project, key))?)
    }

    fn put(&self, project: &ProjectId, key: &StateKey, bytes: &[u8]) -> Result<(), TierError> {
        write_atomic(&self.path(project, key), bytes)
            .map(|_| ())
            .map_err(|e| TierError::Unreadable(e.to_string()))
    }

    fn purge(&self, project: &ProjectId) -> Result<(), TierError> {
        let dir = self.layout.project_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(BACKUP_SUFFIX) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn locate(&self, project: &ProjectId, key: &StateKey) -> String {
        self.path(project, key).display().to_string()
    }

    fn stat(&self, project: &ProjectId, key: &StateKey) -> Option<TierStat> {
        stat_path(&self.path(project, key))
    }
}
