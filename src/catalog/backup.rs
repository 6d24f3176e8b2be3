//! Catalog backups
//!
//! One file per backup, a full copy of the catalog named
//! `<stem>_<YYYYmmddTHHMMSS.ffffffZ>[_<label>].<ext>`. Backups are never
//! modified; they are only created and, under a retention policy, deleted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use super::error::CatalogError;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const TIMESTAMP_PARSE: &str = "%Y%m%dT%H%M%S%.fZ";

/// A backup on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub label: Option<String>,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// How many backups to keep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many, newest first
    pub max_count: Option<usize>,
    /// Delete backups older than this
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// Keep everything
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Whether the policy never deletes anything
    pub fn is_unbounded(&self) -> bool {
        self.max_count.is_none() && self.max_age.is_none()
    }
}

/// Creates and enumerates backups of one catalog file
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    stem: String,
    extension: String,
}

/// Reduce a label to `[A-Za-z0-9-]`
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    cleaned.trim_matches('-').to_string()
}

impl BackupManager {
    /// Backups of `catalog` kept in `dir`
    pub fn new(catalog: &Path, dir: impl Into<PathBuf>) -> Self {
        let stem = catalog
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".to_string());
        let extension = catalog
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "json".to_string());
        Self {
            dir: dir.into(),
            stem,
            extension,
        }
    }

    /// Backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, at: DateTime<Utc>, label: Option<&str>) -> String {
        let mut name = format!("{}_{}", self.stem, at.format(TIMESTAMP_FORMAT));
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            name.push('_');
            name.push_str(label);
        }
        name.push('.');
        name.push_str(&self.extension);
        name
    }

    /// Copy `source` into a new backup
    ///
    /// A name collision moves the timestamp forward one microsecond at a
    /// time, so every backup gets its own file.
    pub fn create(&self, source: &Path, label: Option<&str>) -> Result<PathBuf, CatalogError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CatalogError::io("create backup dir", &self.dir, e))?;

        let label = label.map(sanitize_label);
        let mut at = Utc::now();
        let mut path = self.dir.join(self.file_name(at, label.as_deref()));
        while path.exists() {
            at += chrono::Duration::microseconds(1);
            path = self.dir.join(self.file_name(at, label.as_deref()));
        }

        std::fs::copy(source, &path).map_err(|e| CatalogError::io("backup", &path, e))?;
        tracing::info!(path = %path.display(), label = ?label, "Created catalog backup");
        Ok(path)
    }

    /// Parse a backup file name into (timestamp, label)
    fn parse_name(&self, name: &str) -> Option<(DateTime<Utc>, Option<String>)> {
        let rest = name.strip_prefix(&format!("{}_", self.stem))?;
        let rest = rest.strip_suffix(&format!(".{}", self.extension))?;
        let (ts, label) = match rest.split_once('_') {
            Some((ts, label)) => (ts, Some(label.to_string())),
            None => (rest, None),
        };
        let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_PARSE).ok()?;
        Some((naive.and_utc(), label))
    }

    /// Every backup, newest first
    pub fn list(&self) -> Result<Vec<BackupInfo>, CatalogError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CatalogError::io("list backups", &self.dir, e))?;

        let mut backups = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((created, label)) = self.parse_name(name) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            backups.push(BackupInfo {
                path,
                label,
                size,
                created,
            });
        }
        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.path.cmp(&a.path)));
        Ok(backups)
    }

    /// Delete backups outside the policy, never touching `keep`
    pub fn prune(&self, policy: &RetentionPolicy, keep: &Path, now: DateTime<Utc>) -> Result<Vec<PathBuf>, CatalogError> {
        if policy.is_unbounded() {
            return Ok(Vec::new());
        }

        let cutoff = policy
            .max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| now - age);

        let mut removed = Vec::new();
        for (position, backup) in self.list()?.into_iter().enumerate() {
            if backup.path == keep {
                continue;
            }
            let over_count = policy.max_count.is_some_and(|max| position >= max);
            let too_old = cutoff.is_some_and(|cutoff| backup.created < cutoff);
            if over_count || too_old {
                std::fs::remove_file(&backup.path).map_err(|e| CatalogError::io("prune backup", &backup.path, e))?;
                tracing::debug!(path = %backup.path.display(), "Pruned catalog backup");
                removed.push(backup.path);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path) -> (PathBuf, BackupManager) {
        let catalog = dir.join("controls.json");
        std::fs::write(&catalog, "{\"controls\": []}\n").unwrap();
        let backups = BackupManager::new(&catalog, dir.join("backups"));
        (catalog, backups)
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("pre-update"), "pre-update");
        assert_eq!(sanitize_label("family AC/2_x"), "family-AC-2-x");
        assert_eq!(sanitize_label("__"), "");
    }

    #[test]
    fn test_create_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, backups) = manager(dir.path());

        let first = backups.create(&catalog, Some("pre-update")).unwrap();
        let second = backups.create(&catalog, None).unwrap();
        let third = backups.create(&catalog, Some("pre rollback")).unwrap();
        assert_ne!(first, second);

        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("controls_"));
        assert!(name.ends_with("_pre-update.json"));

        let listed = backups.list().unwrap();
        let paths: Vec<&PathBuf> = listed.iter().map(|b| &b.path).collect();
        assert_eq!(paths, vec![&third, &second, &first]);
        assert_eq!(listed[0].label.as_deref(), Some("pre-rollback"));
        assert_eq!(listed[1].label, None);
        assert_eq!(listed[2].size, std::fs::metadata(&catalog).unwrap().len());
    }

    #[test]
    fn test_list_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, backups) = manager(dir.path());
        backups.create(&catalog, None).unwrap();
        std::fs::write(dir.path().join("backups/notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("backups/controls_garbage.json"), "x").unwrap();
        assert_eq!(backups.list().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_by_count_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, backups) = manager(dir.path());
        let oldest = backups.create(&catalog, None).unwrap();
        backups.create(&catalog, None).unwrap();
        let newest = backups.create(&catalog, None).unwrap();

        let policy = RetentionPolicy {
            max_count: Some(1),
            max_age: None,
        };
        let removed = backups.prune(&policy, &oldest, Utc::now()).unwrap();
        assert_eq!(removed.len(), 1);

        let left: Vec<PathBuf> = backups.list().unwrap().into_iter().map(|b| b.path).collect();
        assert_eq!(left, vec![newest, oldest]);
    }

    #[test]
    fn test_prune_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, backups) = manager(dir.path());
        let keep = backups.create(&catalog, None).unwrap();
        backups.create(&catalog, None).unwrap();

        let policy = RetentionPolicy {
            max_count: None,
            max_age: Some(Duration::from_secs(60)),
        };
        let later = Utc::now() + chrono::Duration::hours(1);
        let removed = backups.prune(&policy, &keep, later).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(keep.exists());

        assert!(backups.prune(&RetentionPolicy::keep_all(), &keep, later).unwrap().is_empty());
    }
}
