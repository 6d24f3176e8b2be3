//! Macro expansion engine
//!
//! Turns remediation templates into scripts. A template is parsed once
//! ([`Template`]), expanded against a layered [`RenderContext`] with the
//! closed macro library in [`macros`], and the expansions of a control's
//! rules are composed into a validated [`RenderedScript`] by [`Renderer`].
//!
//! Rendering has no side effects: every change a script makes to a host
//! happens when the script runs, outside this crate.
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::corpus::DiscoveryIndex;
//! use barbican_remediation::render::{ContextBuilder, Platform, Renderer};
//! use barbican_remediation::RenderTarget;
//!
//! let mut index = DiscoveryIndex::new("/srv/content");
//! let rules = index.build_mapping()?.rules_for("AC-12");
//! let mut renderer = Renderer::new(ContextBuilder::new());
//! let script = renderer.render_control(&mut index, "AC-12", &rules, &Platform::lookup("rhel9"), RenderTarget::Bash)?;
//! ```

pub mod audit;
mod context;
pub mod engine;
mod error;
pub mod macros;
mod platform;
mod renderer;
mod script;
mod template;

pub use audit::{AuditPlan, AuditRuleSpec, AuditRuleStore, AuditTool};
pub use context::{ContextBuilder, RenderContext, ENGINE_DEFAULTS};
pub use engine::TemplateCache;
pub use error::RenderError;
pub use platform::{PackageManager, Platform};
pub use renderer::{Renderer, RuleExpansion, SkipReason};
pub use script::{RenderedScript, DEFAULT_MIN_SCRIPT_LEN};
pub use template::Template;
