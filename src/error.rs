//! Crate-level error taxonomy
//!
//! Each module has its own error enum ([`CorpusError`], [`RenderError`],
//! [`CatalogError`], [`MigrationError`]). This type folds them into the
//! categories an operator acts on:
//!
//! | Variant | Meaning | Catalog |
//! |---------|---------|---------|
//! | `CorpusMissing` | required corpus paths absent | untouched |
//! | `TemplateRender` | macro or placeholder failure | untouched |
//! | `CatalogValidation` | duplicate id, missing field, bad script | untouched |
//! | `CatalogIo` | backup, write, rename or lock failure | untouched |
//! | `Conflict` | existing scripts need an explicit override | untouched |

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::{CatalogError, UpdateFailure, ValidationIssue};
use crate::corpus::CorpusError;
use crate::migrate::{MigrationError, MigrationReport, Outcome};
use crate::observability::ObservabilityError;
use crate::render::RenderError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error categories
#[derive(Debug, Error)]
pub enum Error {
    /// Required corpus paths are absent
    #[error("corpus at {root:?} is incomplete; missing {missing:?}")]
    CorpusMissing { root: PathBuf, missing: Vec<PathBuf> },

    /// The corpus exists but a file in it could not be used
    #[error(transparent)]
    Corpus(CorpusError),

    /// A template or macro failed to render
    #[error(transparent)]
    TemplateRender(#[from] RenderError),

    /// The catalog state was rejected
    #[error("catalog validation failed: {}", join_issues(.issues))]
    CatalogValidation { issues: Vec<ValidationIssue> },

    /// Backup, write, rename or lock failure
    #[error(transparent)]
    CatalogIo(CatalogError),

    /// Controls already carry scripts that would be overwritten
    #[error("{} control(s) already carry scripts: {}", .controls.len(), .controls.join(", "))]
    Conflict { controls: Vec<String> },

    /// A migration stopped before committing
    #[error("migration of family {family} aborted at stage {stage}: {}", .errors.join("; "))]
    Aborted {
        family: String,
        stage: String,
        errors: Vec<String>,
    },

    /// Configuration file or value is invalid
    #[error("configuration error{}: {message}", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Config { path: Option<PathBuf>, message: String },

    /// Logging could not be initialized
    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    /// Migration options or other caller input is invalid
    #[error("{0}")]
    InvalidInput(String),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}

impl Error {
    pub(crate) fn config(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path,
            message: message.into(),
        }
    }
}

impl From<CorpusError> for Error {
    fn from(e: CorpusError) -> Self {
        match e {
            CorpusError::Missing { root, missing } => Self::CorpusMissing { root, missing },
            other => Self::Corpus(other),
        }
    }
}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Validation { issues } => Self::CatalogValidation { issues },
            other => Self::CatalogIo(other),
        }
    }
}

impl From<UpdateFailure> for Error {
    fn from(failure: UpdateFailure) -> Self {
        tracing::debug!(stage = %failure.stage, backup = ?failure.backup, "Catalog update failure converted");
        failure.error.into()
    }
}

impl From<MigrationError> for Error {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Corpus(e) => e.into(),
            MigrationError::Catalog(e) => e.into(),
            MigrationError::Progress { path, message } => Self::CatalogIo(CatalogError::Io {
                operation: "write progress",
                path,
                message,
            }),
            MigrationError::UnknownFamily { family } => {
                Self::InvalidInput(format!("no controls found for family '{}'", family))
            }
            MigrationError::InvalidOptions(message) => Self::InvalidInput(message),
        }
    }
}

impl MigrationReport {
    /// The report as a result: aborted runs become errors
    pub fn into_result(self) -> Result<Self> {
        if self.outcome != Outcome::Aborted {
            return Ok(self);
        }
        if self.counters.conflicts > 0 && self.counters.failed == 0 {
            let controls = self
                .with_status(crate::migrate::ControlStatus::Conflict)
                .map(|c| c.control_id.clone())
                .collect();
            return Err(Error::Conflict { controls });
        }
        Err(Error::Aborted {
            family: self.family,
            stage: self.stage.to_string(),
            errors: self.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_missing_maps_to_category() {
        let err: Error = CorpusError::Missing {
            root: PathBuf::from("/corpus"),
            missing: vec![PathBuf::from("/corpus/controls")],
        }
        .into();
        assert!(matches!(err, Error::CorpusMissing { .. }));
        assert!(err.to_string().contains("controls"));

        let err: Error = CorpusError::RuleNotFound {
            rule_id: "r".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Corpus(_)));
    }

    #[test]
    fn test_catalog_errors_split_by_kind() {
        let err: Error = CatalogError::Validation {
            issues: vec![ValidationIssue::UnknownControl {
                control_id: "ZZ-1".to_string(),
            }],
        }
        .into();
        assert!(err.to_string().contains("ZZ-1"));
        assert!(matches!(err, Error::CatalogValidation { .. }));

        let err: Error = CatalogError::NotFound {
            path: PathBuf::from("controls.json"),
        }
        .into();
        assert!(matches!(err, Error::CatalogIo(_)));
    }

    #[test]
    fn test_config_error_names_file() {
        let err = Error::config(Some(PathBuf::from("remediation.toml")), "bad value");
        assert_eq!(err.to_string(), "configuration error in remediation.toml: bad value");
        let err = Error::config(None, "bad value");
        assert_eq!(err.to_string(), "configuration error: bad value");
    }
}
