//! Migration outcomes

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::corpus::AutomationStatus;

/// Stage of an orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preflight,
    Render,
    Commit,
    Progress,
    Summary,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preflight => "preflight",
            Self::Render => "render",
            Self::Commit => "commit",
            Self::Progress => "progress",
            Self::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Scripts were committed (or there was nothing to commit)
    Succeeded,
    /// Validation only; nothing was rendered for real
    DryRun,
    /// Stopped before commit, or the commit failed; catalog untouched
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::DryRun => "dry run",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Per-control result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    /// Scripts rendered (and committed unless the run aborted)
    Rendered,
    /// Nothing to render, or not in the catalog
    Skipped,
    /// Preflight, render or commit error
    Failed,
    /// Existing scripts would be overwritten without `force`
    Conflict,
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rendered => "rendered",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// What happened to one control
#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub control_id: String,
    pub title: Option<String>,
    pub automation: AutomationStatus,
    pub status: ControlStatus,
    /// `platform/target` → SHA-256 of the rendered script
    pub digests: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ControlOutcome {
    pub fn new(control_id: impl Into<String>, title: Option<String>, automation: AutomationStatus) -> Self {
        Self {
            control_id: control_id.into(),
            title,
            automation,
            status: ControlStatus::Skipped,
            digests: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Family-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: usize,
    pub rendered: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub scripts: usize,
}

/// Full account of one orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub family: String,
    pub started: DateTime<Utc>,
    pub dry_run: bool,
    pub outcome: Outcome,
    /// Last stage entered
    pub stage: Stage,
    /// Whether the catalog file was replaced
    pub catalog_touched: bool,
    /// Backup taken by the commit, if it got that far
    pub backup: Option<PathBuf>,
    pub controls: Vec<ControlOutcome>,
    /// Errors not tied to one control
    pub errors: Vec<String>,
    pub counters: Counters,
}

impl MigrationReport {
    pub(crate) fn new(family: &str, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            family: family.to_uppercase(),
            started: Utc::now(),
            dry_run,
            outcome: Outcome::Aborted,
            stage: Stage::Preflight,
            catalog_touched: false,
            backup: None,
            controls: Vec::new(),
            errors: Vec::new(),
            counters: Counters::default(),
        }
    }

    /// Recompute counters from the control outcomes
    pub(crate) fn tally(&mut self) {
        let mut counters = Counters {
            total: self.controls.len(),
            ..Counters::default()
        };
        for control in &self.controls {
            match control.status {
                ControlStatus::Rendered => counters.rendered += 1,
                ControlStatus::Skipped => counters.skipped += 1,
                ControlStatus::Failed => counters.failed += 1,
                ControlStatus::Conflict => counters.conflicts += 1,
            }
            counters.scripts += control.digests.len();
        }
        self.counters = counters;
    }

    /// Whether the run ended without aborting
    pub fn is_success(&self) -> bool {
        self.outcome != Outcome::Aborted
    }

    /// Outcome of one control
    pub fn control(&self, control_id: &str) -> Option<&ControlOutcome> {
        let key = crate::catalog::control_key(control_id);
        self.controls.iter().find(|c| crate::catalog::control_key(&c.control_id) == key)
    }

    pub(crate) fn control_mut(&mut self, control_id: &str) -> Option<&mut ControlOutcome> {
        self.controls.iter_mut().find(|c| c.control_id == control_id)
    }

    /// Controls with a given status
    pub fn with_status(&self, status: ControlStatus) -> impl Iterator<Item = &ControlOutcome> {
        self.controls.iter().filter(move |c| c.status == status)
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration of family {} {} at stage {} (run {})",
            self.family, self.outcome, self.stage, self.run_id
        )?;
        writeln!(
            f,
            "  controls: {} total, {} rendered, {} skipped, {} failed, {} conflicts; {} scripts",
            self.counters.total,
            self.counters.rendered,
            self.counters.skipped,
            self.counters.failed,
            self.counters.conflicts,
            self.counters.scripts
        )?;
        writeln!(
            f,
            "  catalog {}",
            if self.catalog_touched { "updated" } else { "not modified" }
        )?;
        if let Some(backup) = &self.backup {
            writeln!(f, "  backup: {}", backup.display())?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {}", error)?;
        }
        Ok(())
    }
}
