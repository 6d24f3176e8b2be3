//! Test Fixtures
//!
//! Builders for small on-disk corpora and catalogs, shared by unit tests,
//! the integration tests and anyone exercising the pipeline against a
//! throwaway directory.
//!
//! # Usage
//!
//! ```ignore
//! use barbican_remediation::testing::{write_catalog, FixtureCorpus};
//! use barbican_remediation::catalog::CatalogEntry;
//!
//! let dir = tempfile::tempdir()?;
//! FixtureCorpus::standard().write(dir.path().join("corpus"))?;
//! let catalog = write_catalog(dir.path(), &[CatalogEntry::new("AU-2", "Event Logging", "AU")])?;
//! ```

use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, CatalogEntry, CatalogError};
use crate::corpus::{CONTROLS_DIR, TEMPLATES_DIR};
use crate::target::RenderTarget;

/// File name [`write_catalog`] uses
pub const CATALOG_FILE_NAME: &str = "controls.json";

// ============================================================================
// Corpus Builder
// ============================================================================

/// An in-memory corpus written out on demand
#[derive(Debug, Clone, Default)]
pub struct FixtureCorpus {
    files: Vec<(PathBuf, String)>,
}

impl FixtureCorpus {
    /// An empty corpus (no directories at all)
    pub fn new() -> Self {
        Self::default()
    }

    /// A small NIST-mapped corpus covering every template family
    ///
    /// | Control | Rules | Classification |
    /// |---------|-------|----------------|
    /// | AC-2 | sshd_disable_root_login (ansible backend off) | automated |
    /// | AC-12 | sshd_set_idle_timeout | automated |
    /// | AC-17(2) | none | pending |
    /// | AU-2 | two audit rules, also listed as AU-02 by the STIG file | automated |
    /// | AU-12 | package_audit_installed, manual_review_rule | partial |
    /// | CM-6 | manual_review_rule | manual |
    /// | IA-5, IA-5(1) | nested, selector syntax only / manual | pending / manual |
    pub fn standard() -> Self {
        Self::new()
            .control_file("nist_rhel9.yml", NIST_CONTROLS)
            .control_file("stig_rhel9.yml", STIG_CONTROLS)
            .rule("linux_os/guide/services/ssh/ssh_server", "sshd_set_idle_timeout", RULE_IDLE_TIMEOUT)
            .rule("linux_os/guide/services/ssh/ssh_server", "sshd_disable_root_login", RULE_ROOT_LOGIN)
            .rule("linux_os/guide/auditing/package", "package_audit_installed", RULE_AUDIT_PACKAGE)
            .rule(
                "linux_os/guide/auditing/auditd_configure_rules/audit_file_modification",
                "audit_rules_unsuccessful_file_modification_open",
                RULE_AUDIT_OPEN,
            )
            .rule(
                "linux_os/guide/auditing/auditd_configure_rules/audit_account_changes",
                "audit_rules_usergroup_modification_passwd",
                RULE_AUDIT_PASSWD,
            )
            .rule("applications/manual", "manual_review_rule", RULE_MANUAL)
            .template("sshd_lineinfile", RenderTarget::Bash, SSHD_BASH)
            .template("sshd_lineinfile", RenderTarget::Ansible, SSHD_ANSIBLE)
            .template("package_installed", RenderTarget::Bash, PACKAGE_BASH)
            .template("package_installed", RenderTarget::Ansible, PACKAGE_ANSIBLE)
            .template("audit_rules_watch", RenderTarget::Bash, WATCH_BASH)
            .template("audit_rules_watch", RenderTarget::Ansible, WATCH_ANSIBLE)
            .template("audit_rules_unsuccessful_file_modification", RenderTarget::Bash, SYSCALL_BASH)
            .template("audit_rules_unsuccessful_file_modification", RenderTarget::Ansible, SYSCALL_ANSIBLE)
            .profile("rhel9", "moderate", PROFILE_MODERATE)
    }

    /// Add a file at a path relative to the corpus root
    pub fn file(mut self, relative: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.push((relative.into(), content.into()));
        self
    }

    /// Add `controls/<name>`
    pub fn control_file(self, name: &str, yaml: &str) -> Self {
        self.file(Path::new(CONTROLS_DIR).join(name), yaml)
    }

    /// Add `<parent>/<rule_id>/rule.yml`
    pub fn rule(self, parent: &str, rule_id: &str, yaml: &str) -> Self {
        self.file(Path::new(parent).join(rule_id).join("rule.yml"), yaml)
    }

    /// Add `shared/templates/<name>/<target>.template`
    pub fn template(self, name: &str, target: RenderTarget, body: &str) -> Self {
        self.file(Path::new(TEMPLATES_DIR).join(name).join(target.template_file_name()), body)
    }

    /// Add `products/<product>/profiles/<name>.profile`
    pub fn profile(self, product: &str, name: &str, yaml: &str) -> Self {
        self.file(
            Path::new("products")
                .join(product)
                .join("profiles")
                .join(format!("{}.profile", name)),
            yaml,
        )
    }

    /// Drop every file under a relative path
    pub fn without(mut self, relative: impl AsRef<Path>) -> Self {
        let relative = relative.as_ref();
        self.files.retain(|(path, _)| !path.starts_with(relative));
        self
    }

    /// Write the corpus under `root`, creating directories as needed
    pub fn write(&self, root: impl AsRef<Path>) -> std::io::Result<()> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        for (relative, content) in &self.files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        Ok(())
    }
}

// ============================================================================
// Catalog Builder
// ============================================================================

/// Write a catalog with the given entries to `<dir>/controls.json`
pub fn write_catalog(dir: impl AsRef<Path>, entries: &[CatalogEntry]) -> Result<PathBuf, CatalogError> {
    let dir = dir.as_ref();
    let path = dir.join(CATALOG_FILE_NAME);
    std::fs::create_dir_all(dir).map_err(|e| CatalogError::io("create catalog dir", dir, e))?;

    let catalog = Catalog {
        controls: entries.to_vec(),
        extra: Default::default(),
    };
    let text = catalog.to_json()?;
    std::fs::write(&path, text).map_err(|e| CatalogError::io("write catalog", &path, e))?;
    Ok(path)
}

/// Catalog entries for every control of [`FixtureCorpus::standard`]
pub fn standard_catalog_entries() -> Vec<CatalogEntry> {
    [
        ("AC-2", "Account Management", "AC"),
        ("AC-12", "Session Termination", "AC"),
        ("AC-17(2)", "Protection of Confidentiality and Integrity Using Encryption", "AC"),
        ("AU-2", "Event Logging", "AU"),
        ("AU-12", "Audit Record Generation", "AU"),
        ("CM-6", "Configuration Settings", "CM"),
        ("IA-5", "Authenticator Management", "IA"),
    ]
    .into_iter()
    .map(|(id, name, family)| CatalogEntry::new(id, name, family))
    .collect()
}

// ============================================================================
// Standard Corpus Content
// ============================================================================

const NIST_CONTROLS: &str = r#"policy: NIST SP 800-53 Revision 5
title: NIST 800-53 Moderate for Red Hat Enterprise Linux 9
id: nist_rhel9
version: 5
product: rhel9
levels:
  - id: low
  - id: moderate
    inherits_from:
      - low
controls:
  - id: ac-2
    title: Account Management
    levels:
      - low
    status: automated
    rules:
      - sshd_disable_root_login
  - id: AC-12
    title: Session Termination
    levels:
      - moderate
    status: automated
    rules:
      - sshd_set_idle_timeout
      - var_sshd_set_keepalive=1
  - id: ac-17.2
    title: Protection of Confidentiality and Integrity Using Encryption
    status: pending
    rules: []
  - id: au-2
    title: Event Logging
    status: automated
    rules:
      - audit_rules_usergroup_modification_passwd
      - audit_rules_unsuccessful_file_modification_open
  - id: au-12
    title: Audit Record Generation
    status: partial
    rules:
      - package_audit_installed
      - manual_review_rule
  - id: cm-6
    title: Configuration Settings
    status: manual
    notes: Reviewed by the platform owner each quarter.
    rules:
      - manual_review_rule
  - id: ia-5
    title: Authenticator Management
    rules:
      - '!sshd_disable_root_login'
    controls:
      - id: ia-5.1
        title: Password-based Authentication
        rules:
          - manual_review_rule
"#;

const STIG_CONTROLS: &str = r#"policy: DISA STIG for Red Hat Enterprise Linux 9
id: stig_rhel9
controls:
  - id: AU-02
    title: Audit record content
    rules:
      - audit_rules_unsuccessful_file_modification_open
      - audit_rules_usergroup_modification_passwd
"#;

const RULE_IDLE_TIMEOUT: &str = r#"documentation_complete: true

prodtype: fedora,rhel8,rhel9,ubuntu2204

title: 'Set SSH Client Alive Interval'

description: |-
    SSH allows administrators to set a network responsiveness timeout interval.

severity: medium

platform: system_with_kernel

template:
    name: sshd_lineinfile
    vars:
        parameter: ClientAliveInterval
        value: 600
"#;

const RULE_ROOT_LOGIN: &str = r#"documentation_complete: true

prodtype: rhel8,rhel9

title: 'Disable SSH Root Login'

severity: medium

template:
    name: sshd_lineinfile
    vars:
        parameter: PermitRootLogin
        value: 'no'
    backends:
        ansible: 'off'
"#;

const RULE_AUDIT_PACKAGE: &str = r#"documentation_complete: true

prodtype: rhel8,rhel9

title: 'Ensure the audit Subsystem is Installed'

severity: medium

platforms:
    - machine

template:
    name: package_installed
    vars:
        pkgname: audit
"#;

const RULE_AUDIT_OPEN: &str = r#"documentation_complete: true

title: 'Record Unsuccessful Access Attempts to Files - open'

severity: medium

template:
    name: audit_rules_unsuccessful_file_modification
    vars:
        name: open
        key: unsuccessful-access
"#;

const RULE_AUDIT_PASSWD: &str = r#"documentation_complete: true

title: 'Record Events that Modify User/Group Information - /etc/passwd'

severity: medium

template:
    name: audit_rules_watch
    vars:
        filepath: /etc/passwd
        key: audit_rules_usergroup_modification
"#;

const RULE_MANUAL: &str = r#"documentation_complete: true

title: 'Review Configuration Baseline Manually'

severity: low
"#;

const SSHD_BASH: &str = r#"{{# Fragment-aware: conflicting sshd_config.d definitions are commented out #}}
{{{ bash_sshd_set(parameter=PARAMETER, value=VALUE) }}}
"#;

const SSHD_ANSIBLE: &str = r#"{{{ ansible_sshd_set(parameter=PARAMETER, value=VALUE) }}}
"#;

const PACKAGE_BASH: &str = r#"{{{ bash_package_install(package=PKGNAME) }}}
"#;

const PACKAGE_ANSIBLE: &str = r#"{{% if not PKG_OPTIONAL %}}
{{{ ansible_package_install(package=PKGNAME) }}}
{{% endif %}}
"#;

const WATCH_BASH: &str = r#"{{{ bash_fix_audit_watch_rule(path=FILEPATH, key=KEY) }}}
"#;

const WATCH_ANSIBLE: &str = r#"{{{ ansible_fix_audit_watch_rule(path=FILEPATH, key=KEY) }}}
"#;

const SYSCALL_BASH: &str = r#"{{# 32-bit and 64-bit rules share one key #}}
{{{ bash_fix_audit_syscall_rule(action_arch_filters="-a always,exit -F arch=b32", other_filters="-F exit=-EACCES", auid_filters="-F auid>=1000 -F auid!=unset", syscalls=[NAME], key=KEY, syscall_grouping=["creat", "open", "openat", "open_by_handle_at", "truncate", "ftruncate"]) }}}
{{{ bash_fix_audit_syscall_rule(action_arch_filters="-a always,exit -F arch=b64", other_filters="-F exit=-EACCES", auid_filters="-F auid>=1000 -F auid!=unset", syscalls=[NAME], key=KEY, syscall_grouping=["creat", "open", "openat", "open_by_handle_at", "truncate", "ftruncate"]) }}}
"#;

const SYSCALL_ANSIBLE: &str = r#"{{{ ansible_fix_audit_syscall_rule(action_arch_filters="-a always,exit -F arch=b32", other_filters="-F exit=-EACCES", auid_filters="-F auid>=1000 -F auid!=unset", syscalls=[NAME], key=KEY, syscall_grouping=["creat", "open", "openat", "open_by_handle_at", "truncate", "ftruncate"]) }}}
{{{ ansible_fix_audit_syscall_rule(action_arch_filters="-a always,exit -F arch=b64", other_filters="-F exit=-EACCES", auid_filters="-F auid>=1000 -F auid!=unset", syscalls=[NAME], key=KEY, syscall_grouping=["creat", "open", "openat", "open_by_handle_at", "truncate", "ftruncate"]) }}}
"#;

const PROFILE_MODERATE: &str = r#"documentation_complete: true

title: 'NIST 800-53 Moderate'

selections:
    - var_sshd_set_keepalive=1
    - var_accounts_tmout=900
    - sshd_set_idle_timeout
    - '!sshd_disable_root_login'
"#;
