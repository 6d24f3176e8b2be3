//! End-to-end migration through a fixture corpus and an on-disk catalog

use std::path::PathBuf;

use barbican_remediation::catalog::{Catalog, CatalogEntry};
use barbican_remediation::migrate::{ControlStatus, Outcome, ProgressLog, ProgressRecord};
use barbican_remediation::testing::{standard_catalog_entries, write_catalog, FixtureCorpus};
use barbican_remediation::{Error, PipelineConfig};

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: PipelineConfig,
}

impl Workspace {
    fn new(entries: &[CatalogEntry]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        FixtureCorpus::standard().write(root.join("content")).unwrap();
        write_catalog(root.join("data"), entries).unwrap();

        let config_path = root.join("remediation.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
corpus_dir = "{corpus}"
catalog = "{catalog}"
platforms = ["rhel9"]
provenance = "integration-test"

[profile]
product = "rhel9"
name = "moderate"
"#,
                corpus = root.join("content").display(),
                catalog = root.join("data/controls.json").display(),
            ),
        )
        .unwrap();

        let config = PipelineConfig::from_file(&config_path).unwrap();
        Self { _dir: dir, root, config }
    }

    fn catalog_text(&self) -> String {
        std::fs::read_to_string(&self.config.catalog).unwrap()
    }

    fn catalog(&self) -> Catalog {
        Catalog::from_json(&self.catalog_text()).unwrap()
    }

    fn progress(&self) -> Vec<ProgressRecord> {
        ProgressLog::new(self.config.progress_path()).read().unwrap()
    }
}

#[test]
fn migrates_two_families_and_rolls_back_the_second() {
    let ws = Workspace::new(&standard_catalog_entries());
    assert_eq!(ws.config.progress_path(), ws.root.join("data/migration-progress.jsonl"));

    let mut orchestrator = ws.config.orchestrator().unwrap();

    let ac = orchestrator
        .migrate(&ws.config.migration_options("ac"))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(ac.outcome, Outcome::Succeeded);
    assert_eq!(ac.family, "AC");
    assert_eq!(ac.control("AC-17(2)").unwrap().status, ControlStatus::Skipped);
    let after_ac = ws.catalog_text();

    let catalog = ws.catalog();
    let ac2 = catalog.get("AC-2").unwrap();
    assert!(ac2.script("rhel9", "bash").unwrap().contains("PermitRootLogin"));
    // Ansible backend is switched off for this rule
    assert!(ac2.script("rhel9", "ansible").is_none());
    assert_eq!(ac2.metadata.provenance.as_deref(), Some("integration-test"));

    let ac12 = catalog.get("ac-12").unwrap();
    assert!(ac12.script("rhel9", "bash").unwrap().contains("ClientAliveInterval"));
    assert!(ac12.script("rhel9", "ansible").unwrap().starts_with("---"));
    assert!(!catalog.get("AU-2").unwrap().metadata.has_scripts);

    let au = orchestrator.migrate(&ws.config.migration_options("AU")).unwrap();
    assert!(au.is_success(), "{au}");
    let au_backup = au.backup.clone().unwrap();
    assert!(ws
        .catalog()
        .get("AU-2")
        .unwrap()
        .script("rhel9", "bash")
        .unwrap()
        .contains("-k audit_rules_usergroup_modification"));

    // The AU run's backup is the catalog as the AC run left it
    ws.config.open_store().unwrap().rollback(&au_backup).unwrap();
    assert_eq!(ws.catalog_text(), after_ac);

    let families: Vec<String> = ws
        .progress()
        .into_iter()
        .filter_map(|record| match record {
            ProgressRecord::Family { family, outcome, .. } => {
                assert_eq!(outcome, Outcome::Succeeded);
                Some(family)
            }
            ProgressRecord::Control { .. } => None,
        })
        .collect();
    assert_eq!(families, vec!["AC", "AU"]);
}

#[test]
fn conflict_leaves_catalog_byte_identical() {
    let mut entries = standard_catalog_entries();
    let ac12 = entries.iter_mut().find(|e| e.control_id == "AC-12").unwrap();
    ac12.implementation_scripts.entry("rhel9".into()).or_default().insert(
        "bash".into(),
        "#!/bin/bash\nsed -i 's/^ClientAliveInterval.*/ClientAliveInterval 300/' /etc/ssh/sshd_config\n".into(),
    );
    let ws = Workspace::new(&entries);
    let before = ws.catalog_text();

    let mut orchestrator = ws.config.orchestrator().unwrap();
    let report = orchestrator.migrate(&ws.config.migration_options("AC")).unwrap();
    assert_eq!(report.outcome, Outcome::Aborted);
    assert!(!report.catalog_touched);
    assert_eq!(ws.catalog_text(), before);
    assert!(ws.config.open_store().unwrap().list_backups().unwrap().is_empty());

    match report.into_result() {
        Err(Error::Conflict { controls }) => assert_eq!(controls, vec!["AC-12"]),
        other => panic!("expected conflict, got {:?}", other.map(|r| r.outcome)),
    }

    let forced = orchestrator
        .migrate(&ws.config.migration_options("AC").force(true))
        .unwrap();
    assert_eq!(forced.outcome, Outcome::Succeeded);
    assert_ne!(ws.catalog_text(), before);
}

#[test]
fn missing_corpus_is_reported_before_anything_runs() {
    let ws = Workspace::new(&standard_catalog_entries());
    let mut config = ws.config.clone();
    config.corpus_dir = ws.root.join("no-such-corpus");
    config.profile = None;
    let before = ws.catalog_text();

    let err: Error = config
        .orchestrator()
        .unwrap()
        .migrate(&config.migration_options("AC"))
        .unwrap_err()
        .into();
    assert!(matches!(err, Error::CorpusMissing { .. }), "{err}");
    assert_eq!(ws.catalog_text(), before);
    assert!(ws.progress().is_empty());
}
