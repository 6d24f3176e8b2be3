//! ComplianceAsCode Control File Parser
//!
//! Parses control mapping files like `controls/nist_rhel9.yml`. Each control
//! lists the rule ids that implement it; controls may nest sub-controls.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::CorpusError;
use super::types::ControlId;

/// A ComplianceAsCode control file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFile {
    /// Policy name (e.g., "NIST SP 800-53 Revision 5")
    #[serde(default)]
    pub policy: String,

    /// Policy title
    #[serde(default)]
    pub title: Option<String>,

    /// Control file identifier (e.g., "nist_rhel9")
    #[serde(default)]
    pub id: String,

    /// Policy version
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: Option<String>,

    /// Target product (e.g., "rhel9")
    #[serde(default)]
    pub product: Option<String>,

    /// Severity/tier levels defined by this policy
    #[serde(default)]
    pub levels: Vec<ControlLevel>,

    /// Individual controls
    #[serde(default)]
    pub controls: Vec<ControlEntry>,
}

impl ControlFile {
    /// Load a control file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CorpusError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            CorpusError::Parse { message, .. } => CorpusError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Parse a control file from YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, CorpusError> {
        serde_yaml::from_str(yaml).map_err(|e| CorpusError::Parse {
            path: None,
            message: e.to_string(),
        })
    }

    /// All controls, nested ones included, in document order
    pub fn flattened(&self) -> Vec<&ControlEntry> {
        let mut out = Vec::new();
        for control in &self.controls {
            control.collect_into(&mut out);
        }
        out
    }

    /// Get all unique rule IDs referenced by controls
    pub fn all_rule_ids(&self) -> Vec<&str> {
        let mut rule_ids: Vec<&str> = self
            .flattened()
            .into_iter()
            .flat_map(|c| c.rules.iter().map(|s| s.as_str()))
            .collect();
        rule_ids.sort();
        rule_ids.dedup();
        rule_ids
    }

    /// Get total control count, nested controls included
    pub fn control_count(&self) -> usize {
        self.flattened().len()
    }
}

/// A severity/tier level definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlLevel {
    /// Level identifier (e.g., "low", "moderate", "high")
    pub id: String,

    /// Levels this inherits from
    #[serde(default)]
    pub inherits_from: Vec<String>,
}

/// A single control from a control file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlEntry {
    /// Control identifier as written in the file (e.g., "ac-2", "AC-2(1)")
    #[serde(deserialize_with = "string_or_number_required")]
    pub id: String,

    /// Control title
    #[serde(default)]
    pub title: Option<String>,

    /// Levels this control applies to
    #[serde(default)]
    pub levels: Vec<String>,

    /// ComplianceAsCode rule IDs that implement this control
    #[serde(default)]
    pub rules: Vec<String>,

    /// Control status (automated, manual, ...); kept as text
    #[serde(default)]
    pub status: Option<String>,

    /// Implementation notes
    #[serde(default)]
    pub notes: Option<String>,

    /// Nested sub-controls
    #[serde(default)]
    pub controls: Vec<ControlEntry>,
}

impl ControlEntry {
    /// Canonical id of this control
    pub fn control_id(&self) -> Option<ControlId> {
        ControlId::parse(&self.id)
    }

    /// Rule ids with selector syntax stripped
    ///
    /// Control files may list `var_x=value` variable selections next to rule
    /// ids, and `!rule` for unselections; neither is a rule link.
    pub fn linked_rules(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty() && !r.contains('=') && !r.starts_with('!'))
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a ControlEntry>) {
        out.push(self);
        for child in &self.controls {
            child.collect_into(out);
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| scalar_to_string(&v)))
}

fn string_or_number_required<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(&value).ok_or_else(|| serde::de::Error::custom("control id must be a scalar"))
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
