//! Logging Infrastructure
//!
//! Library code uses standard `tracing` macros with structured fields
//! (`control`, `family`, `rule`, `platform`, `target`, `path`, `stage`) and
//! never installs a subscriber itself. Binaries call [`init`] once at
//! startup.
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::observability::{init, ObservabilityConfig};
//!
//! // From environment variables
//! init(&ObservabilityConfig::from_env())?;
//! ```

mod config;
mod providers;

pub use config::{LogFormat, ObservabilityConfig};
pub use providers::init_tracing;

use thiserror::Error;

/// Initialize logging.
///
/// Must be called at most once per process, before any logging occurs.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    init_tracing(config)?;

    tracing::debug!(
        log_format = %config.log_format,
        log_filter = %config.log_filter,
        "Logging initialized"
    );

    Ok(())
}

/// Logging initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid configuration
    #[error("Observability config error: {0}")]
    Config(String),
    /// Subscriber installation failed
    #[error("Provider error: {0}")]
    Provider(String),
}
