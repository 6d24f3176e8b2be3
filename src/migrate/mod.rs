//! Batch migration of control families into the catalog
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::catalog::CatalogStore;
//! use barbican_remediation::corpus::DiscoveryIndex;
//! use barbican_remediation::migrate::{MigrationOptions, Orchestrator, ProgressLog};
//!
//! let store = CatalogStore::open("data/controls.json", "data/backups")?;
//! let mut orchestrator = Orchestrator::new(DiscoveryIndex::new("content"), store)
//!     .with_progress_log(ProgressLog::new("data/migration-progress.jsonl"));
//!
//! let report = orchestrator.migrate(&MigrationOptions::new("AC").dry_run(true))?;
//! println!("{report}");
//! ```

mod error;
mod orchestrator;
mod preflight;
mod progress;
mod report;

pub use error::MigrationError;
pub use orchestrator::{ControlSummary, Orchestrator, DEFAULT_PROVENANCE};
pub use preflight::{is_placeholder, MigrationOptions, PlannedControl, PreflightReport};
pub use progress::{ProgressLog, ProgressRecord};
pub use report::{ControlOutcome, ControlStatus, Counters, MigrationReport, Outcome, Stage};
