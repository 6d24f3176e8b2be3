//! Error types for template expansion

use std::path::PathBuf;

use thiserror::Error;

use crate::corpus::CorpusError;
use crate::target::RenderTarget;

/// Errors raised while expanding a template into a script
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The template text is malformed
    #[error("template {template}: syntax error at line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    /// A call-site names a macro outside the registry
    #[error("template {template}: unknown macro '{name}'")]
    UnknownMacro { template: String, name: String },

    /// A macro for one target was used in another target's template
    #[error("template {template}: macro '{name}' is for {expected} templates, not {actual}")]
    WrongTarget {
        template: String,
        name: String,
        expected: RenderTarget,
        actual: RenderTarget,
    },

    /// A macro was invoked with missing or invalid arguments
    #[error("template {template}: macro '{name}': {message}")]
    MacroArgument {
        template: String,
        name: String,
        message: String,
    },

    /// A placeholder has no value in the render context
    #[error("template {template}: unresolved placeholder '{name}'")]
    UnresolvedPlaceholder { template: String, name: String },

    /// A filter name is not known
    #[error("template {template}: unknown filter '{name}'")]
    UnknownFilter { template: String, name: String },

    /// Template body could not be read
    #[error("cannot read template {path:?}: {message}")]
    TemplateIo { path: PathBuf, message: String },

    /// The finished script fails validation
    #[error("rendered {target} script for {control} on {platform} is invalid: {reason}")]
    InvalidScript {
        control: String,
        platform: String,
        target: RenderTarget,
        reason: String,
    },

    /// Rule or template lookup failed
    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

impl RenderError {
    /// Template the error was raised in, when known
    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Syntax { template, .. }
            | Self::UnknownMacro { template, .. }
            | Self::WrongTarget { template, .. }
            | Self::MacroArgument { template, .. }
            | Self::UnresolvedPlaceholder { template, .. }
            | Self::UnknownFilter { template, .. } => Some(template),
            _ => None,
        }
    }

    /// Macro the error was raised in, when known
    pub fn macro_name(&self) -> Option<&str> {
        match self {
            Self::UnknownMacro { name, .. }
            | Self::WrongTarget { name, .. }
            | Self::MacroArgument { name, .. } => Some(name),
            _ => None,
        }
    }
}
