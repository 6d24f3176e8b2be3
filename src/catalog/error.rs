//! Error types for the catalog store

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// One reason a catalog state is rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Two entries share a control id (compared case-insensitively)
    DuplicateControlId { control_id: String, first: usize, second: usize },

    /// A required field is absent or blank
    MissingField {
        index: usize,
        control_id: Option<String>,
        field: &'static str,
    },

    /// A script body or its platform/target key is blank
    EmptyScript {
        control_id: String,
        platform: String,
        target: String,
    },

    /// An update names a control that is not in the catalog
    UnknownControl { control_id: String },

    /// The document cannot be (de)serialized
    Serialization { message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateControlId { control_id, first, second } => {
                write!(f, "duplicate control id '{}' at entries {} and {}", control_id, first, second)
            }
            Self::MissingField {
                index,
                control_id: Some(id),
                field,
            } => write!(f, "entry {} ({}) is missing '{}'", index, id, field),
            Self::MissingField { index, field, .. } => write!(f, "entry {} is missing '{}'", index, field),
            Self::EmptyScript {
                control_id,
                platform,
                target,
            } => write!(f, "{}: empty script for platform '{}' target '{}'", control_id, platform, target),
            Self::UnknownControl { control_id } => write!(f, "control '{}' is not in the catalog", control_id),
            Self::Serialization { message } => write!(f, "serialization failed: {}", message),
        }
    }
}

impl ValidationIssue {
    /// Control the issue is about, when it names one
    pub fn control_id(&self) -> Option<&str> {
        match self {
            Self::DuplicateControlId { control_id, .. }
            | Self::EmptyScript { control_id, .. }
            | Self::UnknownControl { control_id } => Some(control_id),
            Self::MissingField { control_id, .. } => control_id.as_deref(),
            Self::Serialization { .. } => None,
        }
    }
}

/// Errors from reading or mutating the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog (or a proposed state of it) failed validation
    #[error("catalog validation failed: {}", join_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    /// The catalog file does not exist
    #[error("catalog not found at {path:?}")]
    NotFound { path: PathBuf },

    /// Another process holds the catalog lock
    #[error("catalog is locked by {holder} (lock file {path:?}); remove the lock file if that process is gone")]
    Locked { path: PathBuf, holder: String },

    /// Backup, write or rename failure
    #[error("catalog IO error during {operation} on {path:?}: {message}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        message: String,
    },
}

impl CatalogError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn serialization(message: impl fmt::Display) -> Self {
        Self::Validation {
            issues: vec![ValidationIssue::Serialization {
                message: message.to_string(),
            }],
        }
    }

    /// Whether this is a validation failure (as opposed to IO)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Validation issues, empty for IO failures
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation { issues } => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}

/// Point a mutating call reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStage {
    Idle,
    BackedUp,
    Loaded,
    Mutated,
    Validated,
    TempWritten,
    TempVerified,
    Committed,
}

impl fmt::Display for StoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::BackedUp => "backed-up",
            Self::Loaded => "loaded",
            Self::Mutated => "mutated",
            Self::Validated => "validated",
            Self::TempWritten => "temp-written",
            Self::TempVerified => "temp-verified",
            Self::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// A mutating call that stopped before commit
///
/// The catalog file is untouched. `backup` is the backup taken at the start
/// of the call, when it got that far.
#[derive(Debug, Error)]
#[error("catalog update aborted after stage {stage}: {error}")]
pub struct UpdateFailure {
    pub stage: StoreStage,
    pub backup: Option<PathBuf>,
    #[source]
    pub error: CatalogError,
}
