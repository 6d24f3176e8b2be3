//! Catalog document model
//!
//! The catalog is a JSON document shared with a serving API, so unknown keys
//! at every level are carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::corpus::ControlId;

use super::error::CatalogError;

/// Scripts of one control: platform → target → script text
pub type ScriptSet = BTreeMap<String, BTreeMap<String, String>>;

/// The whole catalog document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub controls: Vec<CatalogEntry>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// One control record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(default)]
    pub control_id: String,

    #[serde(default)]
    pub control_name: String,

    #[serde(default)]
    pub family: String,

    #[serde(default)]
    pub implementation_scripts: ScriptSet,

    #[serde(default)]
    pub metadata: EntryMetadata,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Metadata block of a control record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(default)]
    pub has_scripts: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Metadata changes applied to every control an update touches
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    /// Replaces `provenance` when set
    pub provenance: Option<String>,
    /// Extra keys merged into the metadata block
    pub extra: Map<String, JsonValue>,
}

impl MetadataPatch {
    /// Patch setting only the provenance tag
    pub fn provenance(tag: impl Into<String>) -> Self {
        Self {
            provenance: Some(tag.into()),
            extra: Map::new(),
        }
    }
}

/// Case-insensitive lookup key of a control id
pub fn control_key(control_id: &str) -> String {
    ControlId::parse(control_id)
        .map(|id| id.to_string())
        .unwrap_or_default()
}

impl Catalog {
    /// Parse a catalog document
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(text).map_err(CatalogError::serialization)
    }

    /// Pretty-printed document with a trailing newline
    pub fn to_json(&self) -> Result<String, CatalogError> {
        let mut text = serde_json::to_string_pretty(self).map_err(CatalogError::serialization)?;
        text.push('\n');
        Ok(text)
    }

    /// Find an entry by control id (any spelling)
    pub fn get(&self, control_id: &str) -> Option<&CatalogEntry> {
        let key = control_key(control_id);
        self.controls.iter().find(|e| control_key(&e.control_id) == key)
    }

    pub(crate) fn get_mut(&mut self, control_id: &str) -> Option<&mut CatalogEntry> {
        let key = control_key(control_id);
        self.controls.iter_mut().find(|e| control_key(&e.control_id) == key)
    }

    /// Entries of one family, in catalog order
    pub fn in_family<'a>(&'a self, family: &'a str) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.controls.iter().filter(move |e| e.family.eq_ignore_ascii_case(family))
    }
}

impl CatalogEntry {
    /// A bare entry, as created by catalog ingestion
    pub fn new(control_id: impl Into<String>, control_name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            control_id: control_id.into(),
            control_name: control_name.into(),
            family: family.into(),
            ..Self::default()
        }
    }

    /// Script for a platform and target
    pub fn script(&self, platform: &str, target: &str) -> Option<&str> {
        self.implementation_scripts
            .get(platform)
            .and_then(|targets| targets.get(target))
            .map(String::as_str)
    }

    /// Deep-merge new scripts and patch the metadata
    ///
    /// New platform/target keys are added, existing ones overwritten.
    pub fn merge_scripts(&mut self, scripts: &ScriptSet, patch: &MetadataPatch, timestamp: &str) {
        for (platform, targets) in scripts {
            let slot = self.implementation_scripts.entry(platform.clone()).or_default();
            for (target, text) in targets {
                slot.insert(target.clone(), text.clone());
            }
        }

        self.metadata.last_updated = Some(timestamp.to_string());
        self.metadata.has_scripts = self
            .implementation_scripts
            .values()
            .flat_map(|t| t.values())
            .any(|s| !s.trim().is_empty());
        if let Some(provenance) = &patch.provenance {
            self.metadata.provenance = Some(provenance.clone());
        }
        for (k, v) in &patch.extra {
            self.metadata.extra.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
  "version": 3,
  "controls": [
    {
      "controlId": "AC-2",
      "controlName": "Account Management",
      "family": "AC",
      "implementationScripts": {"rhel9": {"bash": "echo old"}},
      "metadata": {"hasScripts": true, "owner": "iam-team"},
      "description": "kept"
    }
  ]
}"#;

    #[test]
    fn test_unknown_keys_survive() {
        let catalog = Catalog::from_json(DOC).unwrap();
        assert_eq!(catalog.extra.get("version"), Some(&JsonValue::from(3)));
        let entry = catalog.get("ac-02").unwrap();
        assert_eq!(entry.extra.get("description"), Some(&JsonValue::from("kept")));
        assert_eq!(entry.metadata.extra.get("owner"), Some(&JsonValue::from("iam-team")));

        let again = Catalog::from_json(&catalog.to_json().unwrap()).unwrap();
        assert_eq!(again, catalog);
        assert!(catalog.to_json().unwrap().ends_with("}\n"));
    }

    #[test]
    fn test_merge_scripts() {
        let mut catalog = Catalog::from_json(DOC).unwrap();
        let entry = catalog.get_mut("AC-2").unwrap();
        let scripts: ScriptSet = BTreeMap::from([
            ("rhel9".to_string(), BTreeMap::from([("ansible".to_string(), "---\n".to_string())])),
            ("ubuntu2204".to_string(), BTreeMap::from([("bash".to_string(), "#!".to_string())])),
        ]);
        entry.merge_scripts(&scripts, &MetadataPatch::provenance("migration"), "2026-01-01T00:00:00Z");

        assert_eq!(entry.script("rhel9", "bash"), Some("echo old"));
        assert_eq!(entry.script("rhel9", "ansible"), Some("---\n"));
        assert_eq!(entry.script("ubuntu2204", "bash"), Some("#!"));
        assert_eq!(entry.metadata.provenance.as_deref(), Some("migration"));
        assert_eq!(entry.metadata.last_updated.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(entry.metadata.has_scripts);
        assert_eq!(entry.metadata.extra.get("owner"), Some(&JsonValue::from("iam-team")));
    }

    #[test]
    fn test_malformed_document() {
        let err = Catalog::from_json("{\"controls\": [").unwrap_err();
        assert!(err.is_validation());
        assert!(Catalog::from_json("{\"controls\": 5}").is_err());
    }
}
