//! Rule Discovery Index
//!
//! Answers two questions about a ComplianceAsCode checkout: which rules
//! implement control X, and what template and variables rule Y uses.
//! Everything read from disk is kept in a [`CorpusCache`] owned by the index,
//! so one run never parses the same file twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::target::RenderTarget;

use super::control::ControlFile;
use super::error::CorpusError;
use super::rule::Rule;
use super::types::{AutomationStatus, ControlId};

/// Directory of control-definition files
pub const CONTROLS_DIR: &str = "controls";

/// Directories searched for `rule.yml` files
pub const RULE_ROOTS: [&str; 2] = ["linux_os/guide", "applications"];

/// Directory of template bodies
pub const TEMPLATES_DIR: &str = "shared/templates";

/// A control with the rules linked to it across every control file
#[derive(Debug, Clone, Serialize)]
pub struct MappedControl {
    /// Canonical control id
    pub id: ControlId,

    /// First title seen for the control
    pub title: Option<String>,

    /// Linked rule ids, de-duplicated and sorted
    pub rules: BTreeSet<String>,

    /// Control files that mention the control
    pub sources: Vec<String>,
}

impl MappedControl {
    /// Family of the control (e.g., "AC")
    pub fn family(&self) -> &str {
        self.id.family()
    }

    /// Rule ids as owned strings in sorted order
    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.iter().cloned().collect()
    }
}

/// Control id to rule ids, built once per run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlRuleMapping {
    controls: BTreeMap<ControlId, MappedControl>,
}

impl ControlRuleMapping {
    /// Look up a control by any accepted spelling of its id
    pub fn get(&self, control_id: &str) -> Option<&MappedControl> {
        let id = ControlId::parse(control_id)?;
        self.controls.get(&id)
    }

    /// Rule ids for a control; empty when the control is unknown
    pub fn rules_for(&self, control_id: &str) -> Vec<String> {
        self.get(control_id).map(|c| c.rule_ids()).unwrap_or_default()
    }

    /// Controls of a family in natural id order
    pub fn in_family(&self, family: &str) -> Vec<&MappedControl> {
        self.controls.values().filter(|c| c.id.in_family(family)).collect()
    }

    /// Every control in natural id order
    pub fn iter(&self) -> impl Iterator<Item = &MappedControl> {
        self.controls.values()
    }

    /// Distinct families present
    pub fn families(&self) -> BTreeSet<String> {
        self.controls.keys().map(|id| id.family().to_string()).collect()
    }

    /// Number of controls
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Whether no control was found
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    fn merge_file(&mut self, source: &str, file: &ControlFile) {
        for entry in file.flattened() {
            let Some(id) = entry.control_id() else {
                tracing::debug!(source, control = %entry.id, "Skipping control with unusable id");
                continue;
            };
            let mapped = self.controls.entry(id.clone()).or_insert_with(|| MappedControl {
                id,
                title: None,
                rules: BTreeSet::new(),
                sources: Vec::new(),
            });
            if mapped.title.is_none() {
                mapped.title = entry.title.clone();
            }
            mapped.rules.extend(entry.linked_rules().map(str::to_string));
            if !mapped.sources.iter().any(|s| s == source) {
                mapped.sources.push(source.to_string());
            }
        }
    }
}

/// Parsed corpus data retained for the life of one index
///
/// Nothing here is invalidated while the process runs; a long-lived caller
/// that needs fresh data calls [`CorpusCache::clear`] or builds a new index.
#[derive(Debug, Default)]
pub struct CorpusCache {
    mapping: Option<ControlRuleMapping>,
    rule_paths: Option<HashMap<String, PathBuf>>,
    rules: HashMap<String, Rule>,
}

impl CorpusCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything cached
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of parsed rules held
    pub fn cached_rules(&self) -> usize {
        self.rules.len()
    }
}

/// Read-only view of a rule-authority corpus
#[derive(Debug)]
pub struct DiscoveryIndex {
    root: PathBuf,
    cache: CorpusCache,
}

impl DiscoveryIndex {
    /// Create an index over a corpus root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_cache(root, CorpusCache::new())
    }

    /// Create an index reusing an existing cache
    pub fn with_cache(root: impl Into<PathBuf>, cache: CorpusCache) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    /// Give the cache back to the caller
    pub fn into_cache(self) -> CorpusCache {
        self.cache
    }

    /// Corpus root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the required top-level directories exist
    pub fn check_layout(&self) -> Result<(), CorpusError> {
        let mut missing = Vec::new();
        if !self.root.is_dir() {
            missing.push(self.root.clone());
        } else {
            let controls = self.root.join(CONTROLS_DIR);
            if !controls.is_dir() {
                missing.push(controls);
            }
            if !RULE_ROOTS.iter().any(|r| self.root.join(r).is_dir()) {
                missing.extend(RULE_ROOTS.iter().map(|r| self.root.join(r)));
            }
        }

        if missing.is_empty() {
            if !self.templates_available() {
                tracing::warn!(path = ?self.root.join(TEMPLATES_DIR), "Corpus has no templates directory");
            }
            Ok(())
        } else {
            Err(CorpusError::Missing {
                root: self.root.clone(),
                missing,
            })
        }
    }

    /// Whether `shared/templates` exists
    pub fn templates_available(&self) -> bool {
        self.root.join(TEMPLATES_DIR).is_dir()
    }

    /// Build (once) the control-to-rule mapping from every control file
    pub fn build_mapping(&mut self) -> Result<&ControlRuleMapping, CorpusError> {
        if self.cache.mapping.is_none() {
            self.check_layout()?;
            let mapping = self.scan_control_files()?;
            tracing::info!(
                controls = mapping.len(),
                families = mapping.families().len(),
                "Built control-to-rule mapping"
            );
            self.cache.mapping = Some(mapping);
        }

        match self.cache.mapping.as_ref() {
            Some(mapping) => Ok(mapping),
            None => Err(CorpusError::Parse {
                path: None,
                message: "control mapping unavailable".to_string(),
            }),
        }
    }

    fn scan_control_files(&self) -> Result<ControlRuleMapping, CorpusError> {
        let dir = self.root.join(CONTROLS_DIR);
        let entries = std::fs::read_dir(&dir).map_err(|e| CorpusError::Io {
            path: dir.clone(),
            message: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e == "yml" || e == "yaml")
                        .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut mapping = ControlRuleMapping::default();
        for path in &files {
            match ControlFile::from_file(path) {
                Ok(file) => {
                    let source = if file.id.is_empty() {
                        path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string()
                    } else {
                        file.id.clone()
                    };
                    tracing::debug!(path = ?path, controls = file.control_count(), "Loaded control file");
                    mapping.merge_file(&source, &file);
                }
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Skipping unreadable control file");
                }
            }
        }

        Ok(mapping)
    }

    /// Controls of one family, in natural id order
    pub fn controls_in_family(&mut self, family: &str) -> Result<Vec<MappedControl>, CorpusError> {
        Ok(self.build_mapping()?.in_family(family).into_iter().cloned().collect())
    }

    /// Parse (once) the definition of a rule
    ///
    /// Incomplete metadata is default-filled; only a missing rule file fails.
    pub fn get_rule_info(&mut self, rule_id: &str) -> Result<&Rule, CorpusError> {
        if !self.cache.rules.contains_key(rule_id) {
            let path = self
                .rule_paths()
                .get(rule_id)
                .cloned()
                .ok_or_else(|| CorpusError::RuleNotFound {
                    rule_id: rule_id.to_string(),
                })?;
            let rule = Rule::from_file(rule_id, &path)?;
            if !rule.defaulted.is_empty() {
                tracing::debug!(rule = rule_id, defaulted = ?rule.defaulted, "Rule metadata default-filled");
            }
            self.cache.rules.insert(rule_id.to_string(), rule);
        }

        self.cache
            .rules
            .get(rule_id)
            .ok_or_else(|| CorpusError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })
    }

    /// Location of every `rule.yml`, keyed by rule id
    fn rule_paths(&mut self) -> &HashMap<String, PathBuf> {
        let root = &self.root;
        self.cache.rule_paths.get_or_insert_with(|| {
            let mut paths = HashMap::new();
            for rule_root in RULE_ROOTS {
                let dir = root.join(rule_root);
                if dir.is_dir() {
                    find_rules_recursive(&dir, &mut paths);
                }
            }
            tracing::debug!(rules = paths.len(), "Indexed rule definitions");
            paths
        })
    }

    /// Template bodies available for a template name, one per target
    ///
    /// An unknown template yields an empty map.
    pub fn find_template_files(&self, template_name: &str) -> BTreeMap<RenderTarget, PathBuf> {
        let dir = self.root.join(TEMPLATES_DIR).join(template_name);
        RenderTarget::ALL
            .iter()
            .map(|t| (*t, dir.join(t.template_file_name())))
            .filter(|(_, path)| path.is_file())
            .collect()
    }

    /// Classify a control by how many of its rules carry a template
    pub fn classify_automation_status(&mut self, rule_ids: &[String]) -> AutomationStatus {
        if rule_ids.is_empty() {
            return AutomationStatus::Pending;
        }

        let mut templated = 0usize;
        for rule_id in rule_ids {
            match self.get_rule_info(rule_id) {
                Ok(rule) if rule.has_template() => templated += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(rule = %rule_id, error = %e, "Linked rule not found"),
            }
        }

        if templated == rule_ids.len() {
            AutomationStatus::Automated
        } else if templated > 0 {
            AutomationStatus::Partial
        } else {
            AutomationStatus::Manual
        }
    }
}

fn find_rules_recursive(dir: &Path, paths: &mut HashMap<String, PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::debug!(path = ?dir, "Unreadable directory in rule tree");
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let rule_yml = path.join("rule.yml");
        if rule_yml.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                paths.entry(name.to_string()).or_insert(rule_yml);
            }
        }
        find_rules_recursive(&path, paths);
    }
}
