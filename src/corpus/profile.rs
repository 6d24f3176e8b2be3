//! ComplianceAsCode Profile Parser
//!
//! Profiles carry `var_x=value` selections. When the operator names a
//! profile, those assignments feed the render context so that templates see
//! the profile's tailored values.
//!
//! ```yaml
//! documentation_complete: true
//! title: 'DISA STIG for Red Hat Enterprise Linux 9'
//! extends: ospp
//! selections:
//!   - var_sshd_set_keepalive=1
//!   - sshd_set_idle_timeout
//!   - '!sshd_disable_root_login'
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use super::error::CorpusError;

/// A profile with its variable assignments and rule selections
#[derive(Debug, Clone)]
pub struct Profile {
    /// Profile identifier (file stem unless the file sets `id`)
    pub id: String,

    /// Human-readable title
    pub title: Option<String>,

    /// Variable assignments (var name -> value as written)
    pub variables: BTreeMap<String, String>,

    /// Selected rule IDs
    pub selections: Vec<String>,

    /// Unselected rule IDs
    pub unselections: Vec<String>,

    /// Profile this extends from
    pub extends: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProfileFile {
    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    title: Option<String>,

    #[serde(default)]
    extends: Option<String>,

    #[serde(default)]
    selections: Vec<String>,
}

impl Profile {
    /// Load a profile from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CorpusError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        Self::from_yaml(&content, id).map_err(|e| match e {
            CorpusError::Parse { message, .. } => CorpusError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Parse from YAML content with a default id
    pub fn from_yaml(yaml: &str, default_id: String) -> Result<Self, CorpusError> {
        let raw: RawProfileFile = serde_yaml::from_str(yaml).map_err(|e| CorpusError::Parse {
            path: None,
            message: e.to_string(),
        })?;

        let mut variables = BTreeMap::new();
        let mut selections = Vec::new();
        let mut unselections = Vec::new();

        for entry in &raw.selections {
            let entry = entry.trim();
            if let Some(unsel) = entry.strip_prefix('!') {
                unselections.push(unsel.to_string());
            } else if let Some((var_name, value)) = entry.split_once('=') {
                variables.insert(var_name.trim().to_string(), value.trim().to_string());
            } else if !entry.is_empty() {
                selections.push(entry.to_string());
            }
        }

        Ok(Self {
            id: raw.id.unwrap_or(default_id),
            title: raw.title,
            variables,
            selections,
            unselections,
            extends: raw.extends,
        })
    }

    /// Get a variable value from this profile
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|s| s.as_str())
    }
}

/// Profiles of one product, with inheritance resolution
#[derive(Debug, Default, Clone)]
pub struct ProfileCollection {
    profiles: HashMap<String, Profile>,
}

impl ProfileCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `products/<product>/profiles/*.profile`
    pub fn load_for_product(corpus_root: impl AsRef<Path>, product: &str) -> Result<Self, CorpusError> {
        let dir = corpus_root.as_ref().join("products").join(product).join("profiles");
        let mut collection = Self::new();
        if !dir.is_dir() {
            return Ok(collection);
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| CorpusError::Io {
            path: dir.clone(),
            message: e.to_string(),
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "profile").unwrap_or(false) {
                match Profile::from_file(&path) {
                    Ok(profile) => collection.add(profile),
                    Err(e) => tracing::debug!(path = ?path, error = %e, "Skipping profile file"),
                }
            }
        }

        Ok(collection)
    }

    /// Add a profile to the collection
    pub fn add(&mut self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Get a profile with inheritance resolved (child values win)
    pub fn get_resolved(&self, id: &str) -> Option<Profile> {
        self.resolve(id, &mut Vec::new())
    }

    fn resolve(&self, id: &str, seen: &mut Vec<String>) -> Option<Profile> {
        let profile = self.profiles.get(id)?;
        if seen.iter().any(|s| s == id) {
            tracing::warn!(profile = id, "Profile inheritance cycle, ignoring parent");
            return None;
        }
        seen.push(id.to_string());

        let Some(parent) = profile.extends.as_deref().and_then(|p| self.resolve(p, seen)) else {
            return Some(Profile {
                extends: None,
                ..profile.clone()
            });
        };

        let mut variables = parent.variables;
        variables.extend(profile.variables.clone());

        let mut selections = parent.selections;
        for s in &profile.selections {
            if !selections.contains(s) {
                selections.push(s.clone());
            }
        }
        let mut unselections = parent.unselections;
        unselections.extend(profile.unselections.iter().cloned());

        Some(Profile {
            id: profile.id.clone(),
            title: profile.title.clone().or(parent.title),
            variables,
            selections,
            unselections,
            extends: None,
        })
    }

    /// Number of loaded profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
