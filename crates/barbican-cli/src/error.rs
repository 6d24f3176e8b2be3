//! Error types for the remediation CLI

use std::path::PathBuf;
use thiserror::Error;

use barbican_remediation::catalog::{CatalogError, UpdateFailure};
use barbican_remediation::migrate::MigrationError;
use barbican_remediation::render::RenderError;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Pipeline failure (corpus, render, catalog, config)
    #[error(transparent)]
    Pipeline(#[from] barbican_remediation::Error),

    /// A migration ended without committing
    #[error("Migration of {family} aborted at stage {stage}; catalog not modified")]
    MigrationAborted { family: String, stage: String },

    /// Operator declined the confirmation prompt
    #[error("Cancelled; catalog not modified")]
    Cancelled,

    /// A rule produced no script for the platform and target
    #[error("Rule {rule} produced no {target} script for {platform}: {reason}")]
    NothingRendered {
        rule: String,
        platform: String,
        target: String,
        reason: String,
    },

    /// Invalid command-line value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Create an invalid value error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<MigrationError> for CliError {
    fn from(e: MigrationError) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<UpdateFailure> for CliError {
    fn from(e: UpdateFailure) -> Self {
        Self::Pipeline(e.into())
    }
}

impl From<RenderError> for CliError {
    fn from(e: RenderError) -> Self {
        Self::Pipeline(e.into())
    }
}
