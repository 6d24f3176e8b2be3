//! # Barbican Remediation
//!
//! Renders ComplianceAsCode remediation templates into a control catalog
//! that other services read while it is being written.
//!
//! ## Features
//!
//! - **Rule discovery**: control files, rule definitions, templates and
//!   automation classification from a corpus on disk
//! - **Template rendering**: `{{{ }}}` / `{{% %}}` templates with a macro
//!   library for bash and Ansible targets
//! - **Atomic catalog store**: backup, whole-document validation,
//!   verified temp file and rename, rollback
//! - **Batch migration**: all-or-nothing updates per control family with
//!   conflict detection and a progress log
//!
//! ## Quick Start
//!
//! ```ignore
//! use barbican_remediation::PipelineConfig;
//! use barbican_remediation::observability::init;
//!
//! fn main() -> barbican_remediation::Result<()> {
//!     let config = PipelineConfig::load(None)?;
//!     init(&config.logging)?;
//!
//!     let mut orchestrator = config.orchestrator()?;
//!     let report = orchestrator.migrate(&config.migration_options("AC"))?;
//!     println!("{}", report);
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
mod config;
pub mod corpus;
mod error;
pub mod migrate;
pub mod observability;
mod parse;
pub mod render;
mod target;
pub mod testing;
mod value;

// Re-exports
pub use config::{PipelineConfig, ProfileSelection, RetentionConfig, DEFAULT_CONFIG_FILE};
pub use error::{Error, Result};
pub use parse::{format_size, parse_duration};
pub use target::RenderTarget;
pub use value::Value;
