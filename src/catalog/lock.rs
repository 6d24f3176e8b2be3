//! Advisory lock around catalog mutation
//!
//! The lock is a sibling file `.<catalog>.lock`, created exclusively and
//! holding the owner's pid. It is removed when the guard drops. A lock left
//! behind by a killed process has to be removed by the operator.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::error::CatalogError;

/// Path of the lock file guarding `catalog`
pub fn lock_path(catalog: &Path) -> PathBuf {
    sibling(catalog, "lock")
}

/// Path of the temp file a new catalog state is staged in
pub fn temp_path(catalog: &Path) -> PathBuf {
    sibling(catalog, "tmp")
}

fn sibling(catalog: &Path, suffix: &str) -> PathBuf {
    let name = catalog
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".to_string());
    catalog.with_file_name(format!(".{}.{}", name, suffix))
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct CatalogLock {
    path: PathBuf,
}

impl CatalogLock {
    /// Take the lock or fail with [`CatalogError::Locked`]
    pub fn acquire(catalog: &Path) -> Result<Self, CatalogError> {
        let path = lock_path(catalog);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id()).map_err(|e| CatalogError::io("write lock", &path, e))?;
                tracing::debug!(path = %path.display(), "Acquired catalog lock");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(|pid| format!("pid {}", pid))
                    .unwrap_or_else(|| "an unknown process".to_string());
                Err(CatalogError::Locked { path, holder })
            }
            Err(e) => Err(CatalogError::io("create lock", &path, e)),
        }
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release catalog lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_paths() {
        let catalog = Path::new("/srv/data/controls.json");
        assert_eq!(lock_path(catalog), PathBuf::from("/srv/data/.controls.json.lock"));
        assert_eq!(temp_path(catalog), PathBuf::from("/srv/data/.controls.json.tmp"));
    }

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("controls.json");

        let lock = CatalogLock::acquire(&catalog).unwrap();
        let err = CatalogLock::acquire(&catalog).unwrap_err();
        match err {
            CatalogError::Locked { holder, .. } => assert_eq!(holder, format!("pid {}", std::process::id())),
            other => panic!("expected Locked, got {:?}", other),
        }

        drop(lock);
        assert!(!lock_path(&catalog).exists());
        assert!(CatalogLock::acquire(&catalog).is_ok());
    }
}
