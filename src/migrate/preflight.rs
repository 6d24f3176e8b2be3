//! Pre-flight validation
//!
//! Everything a migration checks before it renders for real: corpus layout,
//! catalog presence of every control, template bodies of every linked rule,
//! a trial render of every (platform, target) pair and conflicts with
//! scripts already in the catalog. Problems are accumulated so the operator
//! sees all of them in one run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{Catalog, CatalogEntry};
use crate::corpus::{AutomationStatus, CorpusError, DiscoveryIndex, MappedControl};
use crate::render::{Platform, Renderer};
use crate::target::RenderTarget;
use crate::value::Value;

use super::error::MigrationError;

/// Markers of a script that is a stand-in rather than a real remediation
const PLACEHOLDER_MARKERS: &[&str] = &["todo", "placeholder", "manual remediation"];

/// What to migrate and how
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Control family (e.g., "AC")
    pub family: String,
    /// Validate only; never render for real or touch the catalog
    pub dry_run: bool,
    /// Overwrite existing non-placeholder scripts
    pub force: bool,
    /// Platform ids to render for
    pub platforms: Vec<String>,
    /// Targets to render for
    pub targets: Vec<RenderTarget>,
    /// Explicit variable overrides, applied last
    pub overrides: BTreeMap<String, Value>,
}

impl MigrationOptions {
    /// Options for a family with the default platform (rhel9) and every target
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            dry_run: false,
            force: false,
            platforms: vec!["rhel9".to_string()],
            targets: RenderTarget::ALL.to_vec(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn targets(mut self, targets: impl IntoIterator<Item = RenderTarget>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub(crate) fn check(&self) -> Result<(), MigrationError> {
        if self.family.trim().is_empty() {
            return Err(MigrationError::InvalidOptions("family is empty".to_string()));
        }
        if self.platforms.iter().all(|p| p.trim().is_empty()) {
            return Err(MigrationError::InvalidOptions("no platforms selected".to_string()));
        }
        if self.targets.is_empty() {
            return Err(MigrationError::InvalidOptions("no targets selected".to_string()));
        }
        Ok(())
    }

    /// Selected platforms, de-duplicated, in the order given
    pub(crate) fn resolved_platforms(&self) -> Vec<Platform> {
        let mut seen = Vec::<String>::new();
        for id in self.platforms.iter().map(|p| p.trim().to_lowercase()) {
            if !id.is_empty() && !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen.iter().map(|id| Platform::lookup(id)).collect()
    }

    /// Selected targets, de-duplicated and sorted
    pub(crate) fn resolved_targets(&self) -> Vec<RenderTarget> {
        let mut targets = self.targets.clone();
        targets.sort();
        targets.dedup();
        targets
    }
}

/// Whether an existing script may be overwritten without `force`
///
/// Blank, too short, or carrying a TODO / placeholder / manual-remediation
/// marker (case-insensitive).
pub fn is_placeholder(script: &str, min_len: usize) -> bool {
    let trimmed = script.trim();
    if trimmed.is_empty() || trimmed.len() < min_len {
        return true;
    }
    let lower = trimmed.to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pre-flight view of one control
#[derive(Debug, Clone, Serialize)]
pub struct PlannedControl {
    pub control_id: String,
    pub title: Option<String>,
    pub automation: AutomationStatus,
    pub rules: Vec<String>,
    pub in_catalog: bool,
    /// `platform/target` → digest of the trial render
    pub digests: BTreeMap<String, String>,
    /// `platform/target` pairs whose existing script would be overwritten
    pub conflicts: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PlannedControl {
    fn new(control: &MappedControl, automation: AutomationStatus) -> Self {
        Self {
            control_id: control.id.to_string(),
            title: control.title.clone(),
            automation,
            rules: control.rule_ids(),
            in_catalog: false,
            digests: BTreeMap::new(),
            conflicts: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Whether the render stage should render this control
    pub fn is_renderable(&self) -> bool {
        self.in_catalog && self.automation.is_renderable() && self.errors.is_empty() && !self.digests.is_empty()
    }
}

/// Result of pre-flight validation for a family
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub family: String,
    pub controls: Vec<PlannedControl>,
    /// Problems not tied to one control
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    /// Whether any control or the family as a whole failed validation
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.controls.iter().any(|c| !c.errors.is_empty())
    }

    /// Controls with existing scripts in the way
    pub fn conflicts(&self) -> impl Iterator<Item = &PlannedControl> {
        self.controls.iter().filter(|c| !c.conflicts.is_empty())
    }

    /// Number of scripts the trial render produced
    pub fn script_count(&self) -> usize {
        self.controls.iter().map(|c| c.digests.len()).sum()
    }
}

/// Validate a family against the corpus and the current catalog
pub(crate) fn run(
    index: &mut DiscoveryIndex,
    renderer: &mut Renderer,
    catalog: &Catalog,
    options: &MigrationOptions,
) -> Result<PreflightReport, MigrationError> {
    index.check_layout()?;

    let family = options.family.trim().to_uppercase();
    let controls = index.controls_in_family(&family)?;
    if controls.is_empty() {
        return Err(MigrationError::UnknownFamily { family });
    }

    let platforms = options.resolved_platforms();
    let targets = options.resolved_targets();
    let mut report = PreflightReport {
        family: family.clone(),
        controls: Vec::with_capacity(controls.len()),
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    if !index.templates_available() {
        report
            .warnings
            .push("corpus has no shared/templates directory; nothing can be rendered".to_string());
    }

    for control in &controls {
        let automation = index.classify_automation_status(&control.rule_ids());
        let mut planned = PlannedControl::new(control, automation);

        let Some(entry) = catalog.get(&planned.control_id) else {
            tracing::warn!(control = %planned.control_id, "Control not in catalog, skipping");
            planned.warnings.push("not in the catalog; skipped".to_string());
            report.controls.push(planned);
            continue;
        };
        planned.in_catalog = true;

        if !automation.is_renderable() {
            tracing::info!(control = %planned.control_id, status = %automation, "Control is not automated, skipping");
            report.controls.push(planned);
            continue;
        }

        check_templates(index, &targets, &mut planned)?;
        trial_render(index, renderer, entry, &platforms, &targets, &mut planned);

        if planned.errors.is_empty() && planned.digests.is_empty() {
            planned
                .warnings
                .push("no script rendered for any selected platform and target".to_string());
        }
        report.controls.push(planned);
    }

    tracing::info!(
        family = %family,
        controls = report.controls.len(),
        scripts = report.script_count(),
        conflicts = report.conflicts().count(),
        failed = report.controls.iter().filter(|c| !c.errors.is_empty()).count(),
        "Pre-flight validation finished"
    );
    Ok(report)
}

/// Every template a control's rules reference must have bodies on disk
fn check_templates(
    index: &mut DiscoveryIndex,
    targets: &[RenderTarget],
    planned: &mut PlannedControl,
) -> Result<(), MigrationError> {
    for rule_id in &planned.rules {
        let rule = match index.get_rule_info(rule_id) {
            Ok(rule) => rule.clone(),
            Err(CorpusError::RuleNotFound { .. }) => {
                planned.warnings.push(format!("rule {} not found in the corpus", rule_id));
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let Some(template) = &rule.template else {
            continue;
        };

        let files = index.find_template_files(&template.name);
        if files.is_empty() {
            planned.errors.push(format!(
                "rule {}: template '{}' has no bodies in the corpus",
                rule_id, template.name
            ));
            continue;
        }
        for target in targets {
            if template.backend_enabled(target.as_str()) && !files.contains_key(target) {
                planned.warnings.push(format!(
                    "rule {}: template '{}' has no {} body",
                    rule_id, template.name, target
                ));
            }
        }
    }
    Ok(())
}

fn trial_render(
    index: &mut DiscoveryIndex,
    renderer: &mut Renderer,
    entry: &CatalogEntry,
    platforms: &[Platform],
    targets: &[RenderTarget],
    planned: &mut PlannedControl,
) {
    for platform in platforms {
        for target in targets {
            let key = format!("{}/{}", platform.id, target);
            match renderer.render_control(index, &planned.control_id, &planned.rules, platform, *target) {
                Ok(Some(script)) => {
                    if let Some(existing) = entry.script(&platform.id, target.as_str()) {
                        if existing != script.text && !is_placeholder(existing, renderer.min_script_len()) {
                            planned.conflicts.push(key.clone());
                        }
                    }
                    planned.digests.insert(key, script.sha256);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(control = %planned.control_id, platform = %platform.id, target = %target, error = %e, "Trial render failed");
                    planned.errors.push(format!("{}: {}", key, e));
                }
            }
        }
    }
}
