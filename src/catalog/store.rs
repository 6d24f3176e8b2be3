//! Atomic catalog store
//!
//! The only code that writes the catalog file. Every mutating call runs the
//! same sequence, and any failure before the final rename leaves the catalog
//! file byte-for-byte as it was:
//!
//! ```text
//! Idle -> BackedUp -> Loaded -> Mutated -> Validated -> TempWritten -> TempVerified -> Committed
//! ```
//!
//! The sequence runs under an advisory lock file, and the new state is staged
//! in a sibling temp file that is fsync'ed, re-parsed and then renamed over
//! the catalog.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::backup::{BackupInfo, BackupManager, RetentionPolicy};
use super::error::{CatalogError, StoreStage, UpdateFailure, ValidationIssue};
use super::lock::{temp_path, CatalogLock};
use super::model::{Catalog, MetadataPatch, ScriptSet};
use super::validate::validate_catalog;

/// Result of a committed mutation
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    /// Backup of the state before the call
    pub backup: PathBuf,
    /// Canonical ids of the controls written
    pub controls: Vec<String>,
    /// Backups deleted by the retention policy afterwards
    pub pruned: Vec<PathBuf>,
}

/// Owner of one catalog file and its backups
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
    backups: BackupManager,
    retention: RetentionPolicy,
}

/// Tracks how far a call got, for the failure report
struct Progress {
    stage: StoreStage,
    backup: Option<PathBuf>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: StoreStage::Idle,
            backup: None,
        }
    }

    fn fail(&self, error: CatalogError) -> UpdateFailure {
        tracing::warn!(stage = %self.stage, error = %error, "Catalog update aborted");
        UpdateFailure {
            stage: self.stage,
            backup: self.backup.clone(),
            error,
        }
    }
}

impl CatalogStore {
    /// Open the store for an existing catalog file
    ///
    /// A temp file left behind by an interrupted run is removed.
    pub fn open(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        if !path.is_file() {
            return Err(CatalogError::NotFound { path });
        }

        let stale = temp_path(&path);
        if stale.exists() {
            tracing::warn!(path = %stale.display(), "Removing stale catalog temp file");
            std::fs::remove_file(&stale).map_err(|e| CatalogError::io("remove stale temp", &stale, e))?;
        }

        let backups = BackupManager::new(&path, backup_dir);
        Ok(Self {
            path,
            backups,
            retention: RetentionPolicy::keep_all(),
        })
    }

    /// Apply a backup retention policy after each commit
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Catalog file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the current catalog
    pub fn load(&self) -> Result<Catalog, CatalogError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| CatalogError::io("read catalog", &self.path, e))?;
        Catalog::from_json(&text)
    }

    /// Merge scripts into one control
    pub fn update_one(
        &self,
        control_id: &str,
        scripts: ScriptSet,
        patch: &MetadataPatch,
    ) -> Result<UpdateOutcome, UpdateFailure> {
        let updates = BTreeMap::from([(control_id.to_string(), scripts)]);
        self.update_batch(&updates, patch)
    }

    /// Merge scripts into many controls in one atomic write
    pub fn update_batch(
        &self,
        updates: &BTreeMap<String, ScriptSet>,
        patch: &MetadataPatch,
    ) -> Result<UpdateOutcome, UpdateFailure> {
        let mut progress = Progress::new();
        let _lock = CatalogLock::acquire(&self.path).map_err(|e| progress.fail(e))?;

        let backup = self
            .backups
            .create(&self.path, Some("pre-update"))
            .map_err(|e| progress.fail(e))?;
        progress.backup = Some(backup.clone());
        progress.stage = StoreStage::BackedUp;

        let mut catalog = self.load().map_err(|e| progress.fail(e))?;
        progress.stage = StoreStage::Loaded;

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut issues = Vec::new();
        let mut written = Vec::new();
        for (control_id, scripts) in updates {
            match catalog.get_mut(control_id) {
                Some(entry) => {
                    entry.merge_scripts(scripts, patch, &timestamp);
                    written.push(entry.control_id.clone());
                }
                None => issues.push(ValidationIssue::UnknownControl {
                    control_id: control_id.clone(),
                }),
            }
        }
        progress.stage = StoreStage::Mutated;

        issues.extend(validate_catalog(&catalog));
        if !issues.is_empty() {
            return Err(progress.fail(CatalogError::Validation { issues }));
        }
        progress.stage = StoreStage::Validated;

        let text = catalog.to_json().map_err(|e| progress.fail(e))?;
        self.replace(&text, &mut progress)?;

        tracing::info!(
            path = %self.path.display(),
            controls = written.len(),
            backup = %backup.display(),
            "Committed catalog update"
        );
        Ok(UpdateOutcome {
            pruned: self.apply_retention(&backup),
            backup,
            controls: written,
        })
    }

    /// Restore the catalog from a backup
    ///
    /// The current state is backed up first (label `pre-rollback`), so a
    /// rollback can itself be rolled back.
    pub fn rollback(&self, backup_path: &Path) -> Result<UpdateOutcome, UpdateFailure> {
        let mut progress = Progress::new();
        let _lock = CatalogLock::acquire(&self.path).map_err(|e| progress.fail(e))?;

        let text = std::fs::read_to_string(backup_path)
            .map_err(|e| progress.fail(CatalogError::io("read backup", backup_path, e)))?;
        let restored = Catalog::from_json(&text).map_err(|e| progress.fail(e))?;
        let issues = validate_catalog(&restored);
        if !issues.is_empty() {
            return Err(progress.fail(CatalogError::Validation { issues }));
        }

        let backup = self
            .backups
            .create(&self.path, Some("pre-rollback"))
            .map_err(|e| progress.fail(e))?;
        progress.backup = Some(backup.clone());
        progress.stage = StoreStage::Validated;

        self.replace(&text, &mut progress)?;
        tracing::info!(
            path = %self.path.display(),
            from = %backup_path.display(),
            backup = %backup.display(),
            "Rolled back catalog"
        );
        Ok(UpdateOutcome {
            pruned: self.apply_retention(&backup),
            backup,
            controls: restored.controls.into_iter().map(|c| c.control_id).collect(),
        })
    }

    /// Backups of this catalog, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, CatalogError> {
        self.backups.list()
    }

    fn apply_retention(&self, keep: &Path) -> Vec<PathBuf> {
        match self.backups.prune(&self.retention, keep, Utc::now()) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Backup retention failed");
                Vec::new()
            }
        }
    }

    fn replace(&self, text: &str, progress: &mut Progress) -> Result<(), UpdateFailure> {
        let staged = self.stage(text, progress)?;
        staged.commit().map_err(|e| progress.fail(e))?;
        progress.stage = StoreStage::Committed;
        Ok(())
    }

    /// Write and verify the temp file without committing
    fn stage(&self, text: &str, progress: &mut Progress) -> Result<StagedCatalog, UpdateFailure> {
        let staged = StagedCatalog {
            temp: temp_path(&self.path),
            target: self.path.clone(),
        };

        write_synced(&staged.temp, text).map_err(|e| progress.fail(e))?;
        progress.stage = StoreStage::TempWritten;

        let written = std::fs::read_to_string(&staged.temp)
            .map_err(|e| progress.fail(CatalogError::io("verify temp", &staged.temp, e)))?;
        if written != text {
            return Err(progress.fail(CatalogError::Io {
                operation: "verify temp",
                path: staged.temp.clone(),
                message: "temp file content differs from what was written".to_string(),
            }));
        }
        Catalog::from_json(&written).map_err(|e| progress.fail(e))?;
        progress.stage = StoreStage::TempVerified;

        Ok(staged)
    }
}

fn write_synced(path: &Path, text: &str) -> Result<(), CatalogError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| CatalogError::io("write temp", path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| CatalogError::io("write temp", path, e))?;
    file.sync_all().map_err(|e| CatalogError::io("sync temp", path, e))
}

/// A verified temp file waiting to replace the catalog
///
/// Dropping it without [`commit`](StagedCatalog::commit) removes the temp
/// file and leaves the catalog alone.
#[derive(Debug)]
struct StagedCatalog {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedCatalog {
    #[cfg(test)]
    fn temp_path(&self) -> &Path {
        &self.temp
    }

    fn commit(self) -> Result<(), CatalogError> {
        std::fs::rename(&self.temp, &self.target).map_err(|e| CatalogError::io("rename", &self.target, e))?;
        if let Some(dir) = self.target.parent() {
            // Persist the rename itself where the platform allows opening directories
            if let Ok(handle) = File::open(dir) {
                let _ = handle.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedCatalog {
    fn drop(&mut self) {
        if self.temp.exists() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
