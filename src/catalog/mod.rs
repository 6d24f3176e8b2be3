//! Atomic catalog store
//!
//! The catalog is a JSON document of control records, each carrying rendered
//! scripts per platform and target. It is read by other services while this
//! crate writes it, so it must be a complete, parseable snapshot at every
//! instant. [`CatalogStore`] is the only writer: it backs up, validates the
//! whole document, stages a verified temp file and renames it into place.
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::catalog::{CatalogStore, MetadataPatch};
//!
//! let store = CatalogStore::open("data/controls.json", "data/backups")?;
//! let outcome = store.update_batch(&updates, &MetadataPatch::provenance("migration"))?;
//! println!("backup at {}", outcome.backup.display());
//! ```

mod backup;
mod error;
mod lock;
mod model;
mod store;
mod validate;

pub use backup::{sanitize_label, BackupInfo, BackupManager, RetentionPolicy};
pub use error::{CatalogError, StoreStage, UpdateFailure, ValidationIssue};
pub use lock::{lock_path, temp_path, CatalogLock};
pub use model::{control_key, Catalog, CatalogEntry, EntryMetadata, MetadataPatch, ScriptSet};
pub use store::{CatalogStore, UpdateOutcome};
pub use validate::{validate_catalog, validate_scripts};
