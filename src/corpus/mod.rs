//! Rule-authority corpus access
//!
//! Reads a ComplianceAsCode checkout: control files mapping control ids to
//! rule ids, `rule.yml` definitions with their template references, template
//! bodies under `shared/templates`, and product profiles.
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::corpus::DiscoveryIndex;
//!
//! let mut index = DiscoveryIndex::new("/srv/content");
//! for control in index.controls_in_family("AC")? {
//!     let status = index.classify_automation_status(&control.rule_ids());
//!     println!("{} {}", control.id, status);
//! }
//! ```

mod control;
mod error;
mod index;
mod profile;
mod rule;
mod types;

pub use control::{ControlEntry, ControlFile, ControlLevel};
pub use error::CorpusError;
pub use index::{
    ControlRuleMapping, CorpusCache, DiscoveryIndex, MappedControl, CONTROLS_DIR, RULE_ROOTS, TEMPLATES_DIR,
};
pub use profile::{Profile, ProfileCollection};
pub use rule::{Rule, Severity, TemplateRef};
pub use types::{AutomationStatus, ControlId};
