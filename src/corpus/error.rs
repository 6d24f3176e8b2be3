//! Error types for corpus discovery

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading the rule-authority corpus
#[derive(Debug, Clone, Error)]
pub enum CorpusError {
    /// Required top-level corpus paths are absent
    #[error("corpus at {root} is missing required paths: {}", display_paths(.missing))]
    Missing { root: PathBuf, missing: Vec<PathBuf> },

    /// A rule id has no definition file in the corpus
    #[error("rule '{rule_id}' not found in corpus")]
    RuleNotFound { rule_id: String },

    /// IO error reading a corpus file
    #[error("IO error for {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    /// YAML parse error in a corpus file
    #[error("parse error{}: {message}", .path.as_ref().map(|p| format!(" in {:?}", p)).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },
}

impl CorpusError {
    /// Whether this is the fatal "required input paths absent" condition
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
