//! Batch migration orchestrator
//!
//! ```text
//! Preflight -> (stop if dry run) -> Render -> Commit -> Progress -> Summary
//! ```
//!
//! A render failure for any control aborts the run before the commit stage,
//! so the catalog only ever sees a whole family at once, through a single
//! [`CatalogStore::update_batch`] call.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{CatalogStore, MetadataPatch, ScriptSet};
use crate::corpus::{AutomationStatus, DiscoveryIndex};
use crate::render::{ContextBuilder, Renderer, DEFAULT_MIN_SCRIPT_LEN};

use super::error::MigrationError;
use super::preflight::{self, MigrationOptions, PreflightReport};
use super::progress::ProgressLog;
use super::report::{ControlOutcome, ControlStatus, MigrationReport, Outcome, Stage};

/// Default provenance stamped on migrated entries
pub const DEFAULT_PROVENANCE: &str = "barbican-remediation migration";

/// Classification of one control for `status`
#[derive(Debug, Clone, Serialize)]
pub struct ControlSummary {
    pub control_id: String,
    pub title: Option<String>,
    pub automation: AutomationStatus,
    pub rules: Vec<String>,
    pub in_catalog: bool,
    pub has_scripts: bool,
}

/// Drives migrations of control families into the catalog
#[derive(Debug)]
pub struct Orchestrator {
    index: DiscoveryIndex,
    store: CatalogStore,
    contexts: ContextBuilder,
    progress: Option<ProgressLog>,
    provenance: String,
    min_script_len: usize,
}

impl Orchestrator {
    pub fn new(index: DiscoveryIndex, store: CatalogStore) -> Self {
        Self {
            index,
            store,
            contexts: ContextBuilder::new(),
            progress: None,
            provenance: DEFAULT_PROVENANCE.to_string(),
            min_script_len: DEFAULT_MIN_SCRIPT_LEN,
        }
    }

    /// Context layers used for every render
    pub fn with_contexts(mut self, contexts: ContextBuilder) -> Self {
        self.contexts = contexts;
        self
    }

    /// Append run outcomes to a progress record
    pub fn with_progress_log(mut self, progress: ProgressLog) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Provenance stamped on migrated entries
    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }

    /// Shortest accepted script
    pub fn with_min_script_len(mut self, min_script_len: usize) -> Self {
        self.min_script_len = min_script_len;
        self
    }

    pub fn index_mut(&mut self) -> &mut DiscoveryIndex {
        &mut self.index
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    fn renderer(&self, options: &MigrationOptions) -> Renderer {
        Renderer::new(self.contexts.clone().with_overrides(options.overrides.clone()))
            .with_min_script_len(self.min_script_len)
    }

    /// Run pre-flight validation only
    pub fn preflight(&mut self, options: &MigrationOptions) -> Result<PreflightReport, MigrationError> {
        options.check()?;
        let catalog = self.store.load()?;
        let mut renderer = self.renderer(options);
        preflight::run(&mut self.index, &mut renderer, &catalog, options)
    }

    /// Classify every control of a family
    pub fn status(&mut self, family: &str) -> Result<Vec<ControlSummary>, MigrationError> {
        let catalog = self.store.load()?;
        let controls = self.index.controls_in_family(family)?;
        if controls.is_empty() {
            return Err(MigrationError::UnknownFamily {
                family: family.to_uppercase(),
            });
        }

        let mut out = Vec::with_capacity(controls.len());
        for control in controls {
            let rules = control.rule_ids();
            let automation = self.index.classify_automation_status(&rules);
            let control_id = control.id.to_string();
            let entry = catalog.get(&control_id);
            out.push(ControlSummary {
                in_catalog: entry.is_some(),
                has_scripts: entry.map(|e| e.metadata.has_scripts).unwrap_or(false),
                control_id,
                title: control.title,
                automation,
                rules,
            });
        }
        Ok(out)
    }

    /// Migrate one family
    ///
    /// Returns `Err` only when the run cannot start (corpus or catalog
    /// missing, unknown family). Every other failure ends in a report with
    /// outcome [`Outcome::Aborted`] and the catalog untouched.
    pub fn migrate(&mut self, options: &MigrationOptions) -> Result<MigrationReport, MigrationError> {
        options.check()?;
        let mut report = MigrationReport::new(&options.family, options.dry_run);
        tracing::info!(
            family = %report.family,
            run_id = %report.run_id,
            dry_run = options.dry_run,
            force = options.force,
            "Starting migration"
        );

        let catalog = self.store.load()?;
        let mut renderer = self.renderer(options);
        let plan = preflight::run(&mut self.index, &mut renderer, &catalog, options)?;

        // ====================================================================
        // Preflight
        // ====================================================================

        report.errors.extend(plan.errors.iter().cloned());
        let mut renderable = Vec::new();
        for planned in &plan.controls {
            let mut outcome = ControlOutcome::new(&planned.control_id, planned.title.clone(), planned.automation);
            outcome.errors = planned.errors.clone();
            outcome.warnings = planned.warnings.clone();
            if !planned.errors.is_empty() {
                outcome.status = ControlStatus::Failed;
            } else if !planned.conflicts.is_empty() && !options.force {
                outcome.status = ControlStatus::Conflict;
                outcome.warnings.push(format!(
                    "existing scripts would be overwritten: {}",
                    planned.conflicts.join(", ")
                ));
            } else if planned.is_renderable() {
                if !planned.conflicts.is_empty() {
                    outcome.warnings.push(format!(
                        "overwriting existing scripts: {}",
                        planned.conflicts.join(", ")
                    ));
                }
                outcome.status = ControlStatus::Rendered;
                outcome.digests = planned.digests.clone();
                renderable.push(planned);
            }
            report.controls.push(outcome);
        }

        let conflicts = report.with_status(ControlStatus::Conflict).count();
        if plan.has_errors() {
            report.errors.push("pre-flight validation failed".to_string());
            return Ok(self.finish(report, Outcome::Aborted));
        }
        if conflicts > 0 {
            report.errors.push(format!(
                "{} control(s) already carry scripts; rerun with force to overwrite",
                conflicts
            ));
            return Ok(self.finish(report, Outcome::Aborted));
        }
        if options.dry_run {
            return Ok(self.finish(report, Outcome::DryRun));
        }

        // ====================================================================
        // Render
        // ====================================================================

        report.stage = Stage::Render;
        let platforms = options.resolved_platforms();
        let targets = options.resolved_targets();
        let mut updates: BTreeMap<String, ScriptSet> = BTreeMap::new();
        let mut render_failed = false;

        for planned in renderable {
            let mut scripts = ScriptSet::new();
            let mut digests = BTreeMap::new();
            let mut errors = Vec::new();
            for platform in &platforms {
                for target in &targets {
                    match renderer.render_control(&mut self.index, &planned.control_id, &planned.rules, platform, *target) {
                        Ok(Some(script)) => {
                            digests.insert(format!("{}/{}", platform.id, target), script.sha256.clone());
                            scripts
                                .entry(platform.id.clone())
                                .or_default()
                                .insert(target.to_string(), script.text);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(
                                control = %planned.control_id,
                                platform = %platform.id,
                                target = %target,
                                template = e.template().unwrap_or("-"),
                                macro_name = e.macro_name().unwrap_or("-"),
                                error = %e,
                                "Render failed"
                            );
                            errors.push(format!("{}/{}: {}", platform.id, target, e));
                        }
                    }
                }
            }

            if let Some(outcome) = report.control_mut(&planned.control_id) {
                outcome.digests = digests;
                if !errors.is_empty() {
                    outcome.status = ControlStatus::Failed;
                    outcome.errors.extend(errors.iter().cloned());
                }
            }
            if errors.is_empty() && !scripts.is_empty() {
                updates.insert(planned.control_id.clone(), scripts);
            } else if !errors.is_empty() {
                render_failed = true;
            }
        }

        if render_failed {
            report
                .errors
                .push("rendering failed; no control of the family was written".to_string());
            return Ok(self.finish(report, Outcome::Aborted));
        }

        // ====================================================================
        // Commit
        // ====================================================================

        if updates.is_empty() {
            tracing::info!(family = %report.family, "Nothing to commit");
        } else {
            report.stage = Stage::Commit;
            match self
                .store
                .update_batch(&updates, &MetadataPatch::provenance(self.provenance.clone()))
            {
                Ok(committed) => {
                    report.catalog_touched = true;
                    report.backup = Some(committed.backup);
                }
                Err(failure) => {
                    report.backup = failure.backup.clone();
                    for issue in failure.error.issues() {
                        if let Some(outcome) = issue.control_id().and_then(|id| report.control_mut(id)) {
                            outcome.status = ControlStatus::Failed;
                            outcome.errors.push(issue.to_string());
                        }
                    }
                    report.errors.push(failure.to_string());
                    return Ok(self.finish(report, Outcome::Aborted));
                }
            }
        }

        report.stage = Stage::Progress;
        Ok(self.finish(report, Outcome::Succeeded))
    }

    /// Record the outcome and close the report
    fn finish(&self, mut report: MigrationReport, outcome: Outcome) -> MigrationReport {
        report.outcome = outcome;
        report.tally();

        if outcome != Outcome::DryRun {
            if let Some(progress) = &self.progress {
                progress.record_run(&report);
            }
        }
        if outcome == Outcome::Succeeded {
            report.stage = Stage::Summary;
        }

        match outcome {
            Outcome::Aborted => tracing::warn!(
                family = %report.family,
                stage = %report.stage,
                failed = report.counters.failed,
                conflicts = report.counters.conflicts,
                "Migration aborted; catalog not modified"
            ),
            _ => tracing::info!(
                family = %report.family,
                outcome = %report.outcome,
                rendered = report.counters.rendered,
                scripts = report.counters.scripts,
                catalog_touched = report.catalog_touched,
                "Migration finished"
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::testing::{write_catalog, FixtureCorpus};

    struct Setup {
        dir: tempfile::TempDir,
        orchestrator: Orchestrator,
    }

    impl Setup {
        fn new(entries: &[CatalogEntry]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let corpus = dir.path().join("corpus");
            FixtureCorpus::standard().write(&corpus).unwrap();
            let catalog = write_catalog(dir.path(), entries).unwrap();
            let store = CatalogStore::open(&catalog, dir.path().join("backups")).unwrap();
            let orchestrator = Orchestrator::new(DiscoveryIndex::new(&corpus), store)
                .with_progress_log(ProgressLog::new(dir.path().join("progress.jsonl")));
            Self { dir, orchestrator }
        }

        fn catalog_text(&self) -> String {
            std::fs::read_to_string(self.orchestrator.store().path()).unwrap()
        }

        fn progress_lines(&self) -> usize {
            std::fs::read_to_string(self.dir.path().join("progress.jsonl"))
                .map(|t| t.lines().count())
                .unwrap_or(0)
        }
    }

    fn au_entries() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new("AU-2", "Event Logging", "AU"),
            CatalogEntry::new("AU-12", "Audit Record Generation", "AU"),
        ]
    }

    #[test]
    fn test_migrate_commits_family() {
        let mut setup = Setup::new(&au_entries());
        let report = setup.orchestrator.migrate(&MigrationOptions::new("AU")).unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded, "{report}");
        assert_eq!(report.stage, Stage::Summary);
        assert!(report.catalog_touched);
        assert!(report.backup.as_ref().unwrap().exists());

        let catalog = setup.orchestrator.store().load().unwrap();
        let au2 = catalog.get("AU-2").unwrap();
        assert!(au2.script("rhel9", "bash").unwrap().starts_with("#!/usr/bin/env bash"));
        assert!(au2.script("rhel9", "ansible").unwrap().starts_with("---"));
        assert!(au2.metadata.has_scripts);
        assert_eq!(au2.metadata.provenance.as_deref(), Some(DEFAULT_PROVENANCE));

        assert_eq!(report.control("AU-2").unwrap().digests.len(), 2);
        assert!(setup.progress_lines() > 0);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let mut setup = Setup::new(&au_entries());
        let before = setup.catalog_text();
        let report = setup
            .orchestrator
            .migrate(&MigrationOptions::new("AU").dry_run(true))
            .unwrap();

        assert_eq!(report.outcome, Outcome::DryRun);
        assert_eq!(report.stage, Stage::Preflight);
        assert!(!report.catalog_touched);
        assert!(report.counters.scripts > 0);
        assert_eq!(setup.catalog_text(), before);
        assert!(setup.orchestrator.store().list_backups().unwrap().is_empty());
        assert_eq!(setup.progress_lines(), 0);
    }

    #[test]
    fn test_render_failure_aborts_whole_family() {
        let mut setup = Setup::new(&au_entries());
        let before = setup.catalog_text();
        // A blank audit key breaks both AU-2 rules; AU-12 renders fine
        let options = MigrationOptions::new("AU").with_override("KEY", "");
        let report = setup.orchestrator.migrate(&options).unwrap();

        assert_eq!(report.outcome, Outcome::Aborted);
        assert!(report.stage <= Stage::Render);
        assert!(!report.catalog_touched);
        assert_eq!(report.control("AU-2").unwrap().status, ControlStatus::Failed);
        assert_eq!(setup.catalog_text(), before);
        assert!(setup.orchestrator.store().list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_conflicts_need_force() {
        let mut au2 = CatalogEntry::new("AU-2", "Event Logging", "AU");
        au2.implementation_scripts.entry("rhel9".into()).or_default().insert(
            "bash".into(),
            "#!/bin/bash\n# reviewed by the audit team\nauditctl -w /etc/passwd -p wa -k passwd\n".into(),
        );
        let mut setup = Setup::new(&[au2, CatalogEntry::new("AU-12", "Audit Record Generation", "AU")]);
        let before = setup.catalog_text();

        let report = setup.orchestrator.migrate(&MigrationOptions::new("AU")).unwrap();
        assert_eq!(report.outcome, Outcome::Aborted);
        assert_eq!(report.stage, Stage::Preflight);
        assert_eq!(report.control("AU-2").unwrap().status, ControlStatus::Conflict);
        assert_eq!(setup.catalog_text(), before);

        let report = setup
            .orchestrator
            .migrate(&MigrationOptions::new("AU").force(true))
            .unwrap();
        assert_eq!(report.outcome, Outcome::Succeeded);
        let catalog = setup.orchestrator.store().load().unwrap();
        assert!(catalog.get("AU-2").unwrap().script("rhel9", "bash").unwrap().contains("# Rule:"));
    }

    #[test]
    fn test_rerun_is_not_a_conflict() {
        let mut setup = Setup::new(&au_entries());
        assert!(setup.orchestrator.migrate(&MigrationOptions::new("AU")).unwrap().is_success());
        let report = setup.orchestrator.migrate(&MigrationOptions::new("AU")).unwrap();
        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(report.counters.conflicts, 0);
    }

    #[test]
    fn test_controls_missing_from_catalog_are_skipped() {
        let mut setup = Setup::new(&[CatalogEntry::new("AU-12", "Audit Record Generation", "AU")]);
        let report = setup.orchestrator.migrate(&MigrationOptions::new("AU")).unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
        let au2 = report.control("AU-2").unwrap();
        assert_eq!(au2.status, ControlStatus::Skipped);
        assert!(au2.warnings.iter().any(|w| w.contains("not in the catalog")));
        assert_eq!(report.control("AU-12").unwrap().status, ControlStatus::Rendered);
    }

    #[test]
    fn test_status_classifies_controls() {
        let mut setup = Setup::new(&au_entries());
        let status = setup.orchestrator.status("cm").unwrap();
        let cm6 = status.iter().find(|s| s.control_id == "CM-6").unwrap();
        assert_eq!(cm6.automation, AutomationStatus::Manual);
        assert!(!cm6.in_catalog);

        assert!(matches!(
            setup.orchestrator.status("zz"),
            Err(MigrationError::UnknownFamily { .. })
        ));
    }
}
