//! Error types for batch migration

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::corpus::CorpusError;

/// Failures that stop a migration before it can report per-control outcomes
///
/// Render failures and conflicts are not errors at this level; they end the
/// run with an aborted [`MigrationReport`](super::MigrationReport) instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Corpus missing or unreadable
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// Catalog missing or unreadable
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The progress record could not be written or read
    #[error("progress record {path:?}: {message}")]
    Progress { path: PathBuf, message: String },

    /// No control in the corpus belongs to the family
    #[error("no controls found for family '{family}'")]
    UnknownFamily { family: String },

    /// Options that cannot produce a run
    #[error("invalid migration options: {0}")]
    InvalidOptions(String),
}
