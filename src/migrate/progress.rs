//! Append-only progress record
//!
//! JSON Lines: one object per control outcome and one family summary per
//! run. The pipeline only ever appends; [`ProgressLog::read`] is for
//! operators and tooling.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MigrationError;
use super::report::{ControlStatus, Counters, MigrationReport, Outcome, Stage};

/// One line of the progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressRecord {
    Control {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        family: String,
        control_id: String,
        status: ControlStatus,
        stage: Stage,
        digests: BTreeMap<String, String>,
        errors: Vec<String>,
    },
    Family {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        family: String,
        outcome: Outcome,
        stage: Stage,
        catalog_touched: bool,
        backup: Option<PathBuf>,
        counters: Counters,
    },
}

impl ProgressRecord {
    /// Every record describing a finished run
    pub fn from_report(report: &MigrationReport) -> Vec<Self> {
        let timestamp = Utc::now();
        let mut records: Vec<Self> = report
            .controls
            .iter()
            .map(|c| Self::Control {
                run_id: report.run_id,
                timestamp,
                family: report.family.clone(),
                control_id: c.control_id.clone(),
                status: c.status,
                stage: report.stage,
                digests: c.digests.clone(),
                errors: c.errors.clone(),
            })
            .collect();
        records.push(Self::Family {
            run_id: report.run_id,
            timestamp,
            family: report.family.clone(),
            outcome: report.outcome,
            stage: report.stage,
            catalog_touched: report.catalog_touched,
            backup: report.backup.clone(),
            counters: report.counters,
        });
        records
    }
}

/// Writer for the progress record file
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, one JSON object per line
    pub fn append(&self, records: &[ProgressRecord]) -> Result<(), MigrationError> {
        let fail = |message: String| MigrationError::Progress {
            path: self.path.clone(),
            message,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record).map_err(|e| fail(e.to_string()))?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| fail(e.to_string()))?;
        file.write_all(buf.as_bytes()).map_err(|e| fail(e.to_string()))
    }

    /// Every record in the file, oldest first; a missing file has none
    pub fn read(&self) -> Result<Vec<ProgressRecord>, MigrationError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MigrationError::Progress {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| MigrationError::Progress {
                    path: self.path.clone(),
                    message: format!("line {}: {}", n + 1, e),
                })
            })
            .collect()
    }

    /// Append a run's records; a failure is logged and swallowed
    pub fn record_run(&self, report: &MigrationReport) -> bool {
        let records = ProgressRecord::from_report(report);
        match self.append(&records) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), records = records.len(), "Recorded migration progress");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Progress record not written; the run result stands");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::AutomationStatus;
    use crate::migrate::report::ControlOutcome;

    fn report() -> MigrationReport {
        let mut report = MigrationReport::new("au", false);
        let mut outcome = ControlOutcome::new("AU-2", None, AutomationStatus::Automated);
        outcome.status = ControlStatus::Rendered;
        outcome.digests.insert("rhel9/bash".to_string(), "ab".repeat(32));
        report.controls.push(outcome);
        report.outcome = Outcome::Succeeded;
        report.stage = Stage::Progress;
        report.tally();
        report
    }

    #[test]
    fn test_records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(dir.path().join("logs/progress.jsonl"));
        assert!(log.record_run(&report()));
        assert!(log.record_run(&report()));

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["kind"], "control");
        assert_eq!(lines[0]["control_id"], "AU-2");
        assert_eq!(lines[0]["status"], "rendered");
        assert_eq!(lines[1]["kind"], "family");
        assert_eq!(lines[1]["family"], "AU");
        assert_eq!(lines[1]["counters"]["scripts"], 1);
        assert_ne!(lines[0]["run_id"], lines[2]["run_id"]);
    }

    #[test]
    fn test_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::new(dir.path().join("progress.jsonl"));
        assert!(log.read().unwrap().is_empty());

        log.record_run(&report());
        let records = log.read().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            &records[1],
            ProgressRecord::Family { outcome: Outcome::Succeeded, counters, .. } if counters.rendered == 1
        ));

        std::fs::write(log.path(), "{\"kind\": \"control\"}\n").unwrap();
        let err = log.read().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_unwritable_record_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let log = ProgressLog::new(dir.path());
        assert!(!log.record_run(&report()));
    }
}
