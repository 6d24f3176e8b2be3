//! Pipeline configuration
//!
//! Loaded from a TOML file (`remediation.toml` by default), then overridden
//! from the environment, then by command-line flags in the binary.
//!
//! # Example
//!
//! ```toml
//! corpus_dir = "/srv/content"
//! catalog = "/srv/catalog/controls.json"
//! platforms = ["rhel9", "ubuntu2204"]
//! targets = ["bash", "ansible"]
//!
//! [variables]
//! var_sshd_set_keepalive = "1"
//!
//! [platform_vars.ubuntu2204]
//! pkg_manager = "apt_get"
//!
//! [profile]
//! product = "rhel9"
//! name = "moderate"
//!
//! [retention]
//! max_count = 20
//! max_age = "30d"
//!
//! [logging]
//! log_format = "json"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogStore, RetentionPolicy};
use crate::corpus::{DiscoveryIndex, ProfileCollection};
use crate::error::{Error, Result};
use crate::migrate::{MigrationOptions, Orchestrator, ProgressLog, DEFAULT_PROVENANCE};
use crate::observability::ObservabilityConfig;
use crate::parse::parse_duration;
use crate::render::{ContextBuilder, Renderer, DEFAULT_MIN_SCRIPT_LEN};
use crate::target::RenderTarget;
use crate::value::Value;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "remediation.toml";

/// Profile whose variable selections feed the render context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSelection {
    /// Product directory under `products/`
    pub product: String,
    /// Profile id (file stem)
    pub name: String,
}

/// Backup retention as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Keep at most this many backups
    pub max_count: Option<usize>,
    /// Delete backups older than this (e.g., "30d", "2w")
    pub max_age: Option<String>,
}

/// Configuration for the remediation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the rule-authority corpus
    pub corpus_dir: PathBuf,
    /// Catalog JSON file
    pub catalog: PathBuf,
    /// Backup directory (default: `<catalog dir>/backups`)
    pub backup_dir: Option<PathBuf>,
    /// Progress log (default: `<catalog dir>/migration-progress.jsonl`)
    pub progress: Option<PathBuf>,
    /// Platforms to render for
    pub platforms: Vec<String>,
    /// Targets to render for
    pub targets: Vec<RenderTarget>,
    /// Provenance tag written into migrated entries
    pub provenance: String,
    /// Shortest rendered script accepted
    pub min_script_len: usize,
    /// Variable overrides per platform id
    pub platform_vars: BTreeMap<String, BTreeMap<String, Value>>,
    /// Variable overrides applied to every render
    pub variables: BTreeMap<String, Value>,
    /// Profile to take variable selections from
    pub profile: Option<ProfileSelection>,
    /// Backup retention
    pub retention: RetentionConfig,
    /// Log format and filter
    pub logging: ObservabilityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("content"),
            catalog: PathBuf::from("controls.json"),
            backup_dir: None,
            progress: None,
            platforms: vec!["rhel9".to_string()],
            targets: RenderTarget::ALL.to_vec(),
            provenance: DEFAULT_PROVENANCE.to_string(),
            min_script_len: DEFAULT_MIN_SCRIPT_LEN,
            platform_vars: BTreeMap::new(),
            variables: BTreeMap::new(),
            profile: None,
            retention: RetentionConfig::default(),
            logging: ObservabilityConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(Some(path.to_path_buf()), format!("cannot read: {}", e)))?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(Some(path.to_path_buf()), message),
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::config(None, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// used when present and built-in defaults otherwise. Environment
    /// overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the process environment
    ///
    /// # Environment Variables
    ///
    /// - `REMEDIATION_CORPUS_DIR`: corpus root
    /// - `REMEDIATION_CATALOG`: catalog file
    /// - `REMEDIATION_BACKUP_DIR`: backup directory
    /// - `REMEDIATION_PROGRESS`: progress log file
    /// - `REMEDIATION_PLATFORMS`: comma-separated platform ids
    /// - `REMEDIATION_LOG_FORMAT`: "pretty", "json" or "compact"
    /// - `RUST_LOG`: log filter
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| env::var(name).ok())
    }

    /// Override fields from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("REMEDIATION_CORPUS_DIR") {
            self.corpus_dir = PathBuf::from(dir);
        }
        if let Some(catalog) = get("REMEDIATION_CATALOG") {
            self.catalog = PathBuf::from(catalog);
        }
        if let Some(dir) = get("REMEDIATION_BACKUP_DIR") {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(progress) = get("REMEDIATION_PROGRESS") {
            self.progress = Some(PathBuf::from(progress));
        }
        if let Some(platforms) = get("REMEDIATION_PLATFORMS") {
            self.platforms = split_list(&platforms);
        }
        if let Some(format) = get("REMEDIATION_LOG_FORMAT") {
            self.logging.log_format = format
                .parse()
                .map_err(|e: String| Error::config(None, format!("REMEDIATION_LOG_FORMAT: {}", e)))?;
        }
        if let Some(filter) = get("RUST_LOG") {
            self.logging.log_filter = filter;
        }
        self.validate()
    }

    /// Reject values no run could use
    pub fn validate(&self) -> Result<()> {
        if self.platforms.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::config(None, "at least one platform is required"));
        }
        if self.targets.is_empty() {
            return Err(Error::config(None, "at least one target is required"));
        }
        if self.min_script_len == 0 {
            return Err(Error::config(None, "min_script_len must be positive"));
        }
        if self.provenance.trim().is_empty() {
            return Err(Error::config(None, "provenance must not be blank"));
        }
        self.retention()?;
        Ok(())
    }

    fn catalog_dir(&self) -> &Path {
        self.catalog.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Effective backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.catalog_dir().join("backups"))
    }

    /// Effective progress log path
    pub fn progress_path(&self) -> PathBuf {
        self.progress
            .clone()
            .unwrap_or_else(|| self.catalog_dir().join("migration-progress.jsonl"))
    }

    /// Backup retention policy
    pub fn retention(&self) -> Result<RetentionPolicy> {
        let max_age = match &self.retention.max_age {
            Some(text) => Some(parse_duration(text).ok_or_else(|| {
                Error::config(None, format!("retention.max_age: invalid duration '{}'", text))
            })?),
            None => None,
        };
        Ok(RetentionPolicy {
            max_count: self.retention.max_count,
            max_age,
        })
    }

    /// Render context layers: platform overrides, profile, variables
    pub fn context_builder(&self) -> Result<ContextBuilder> {
        let mut builder = ContextBuilder::new().with_platform_overrides(self.platform_vars.clone());

        if let Some(selection) = &self.profile {
            let profiles = ProfileCollection::load_for_product(&self.corpus_dir, &selection.product)?;
            let profile = profiles.get_resolved(&selection.name).ok_or_else(|| {
                Error::config(
                    None,
                    format!("profile '{}' not found for product '{}'", selection.name, selection.product),
                )
            })?;
            tracing::debug!(
                product = %selection.product,
                profile = %profile.id,
                variables = profile.variables.len(),
                "Loaded profile variables"
            );
            builder = builder.with_profile_variables(profile.variables);
        }

        Ok(builder.with_overrides(self.variables.clone()))
    }

    /// Discovery index over the configured corpus
    pub fn index(&self) -> DiscoveryIndex {
        DiscoveryIndex::new(&self.corpus_dir)
    }

    /// Renderer with the configured context layers
    pub fn renderer(&self) -> Result<Renderer> {
        Ok(Renderer::new(self.context_builder()?).with_min_script_len(self.min_script_len))
    }

    /// Open the configured catalog
    pub fn open_store(&self) -> Result<CatalogStore> {
        Ok(CatalogStore::open(&self.catalog, self.backup_dir())?.with_retention(self.retention()?))
    }

    /// Orchestrator wired to the configured corpus, catalog and progress log
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::new(self.index(), self.open_store()?)
            .with_contexts(self.context_builder()?)
            .with_progress_log(ProgressLog::new(self.progress_path()))
            .with_provenance(self.provenance.clone())
            .with_min_script_len(self.min_script_len))
    }

    /// Migration options for a family with the configured platforms and targets
    pub fn migration_options(&self, family: &str) -> MigrationOptions {
        MigrationOptions::new(family)
            .platforms(self.platforms.clone())
            .targets(self.targets.clone())
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LogFormat;
    use crate::testing::FixtureCorpus;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.platforms, vec!["rhel9"]);
        assert_eq!(config.targets, vec![RenderTarget::Bash, RenderTarget::Ansible]);
        assert_eq!(config.backup_dir(), PathBuf::from("backups"));
        assert_eq!(config.progress_path(), PathBuf::from("migration-progress.jsonl"));
        assert!(config.retention().unwrap().is_unbounded());
    }

    #[test]
    fn test_from_toml() {
        let config = PipelineConfig::from_toml(
            r#"
            corpus_dir = "/srv/content"
            catalog = "/srv/catalog/controls.json"
            platforms = ["rhel9", "ubuntu2204"]
            targets = ["bash"]

            [variables]
            var_sshd_set_keepalive = "1"
            PKG_OPTIONAL = true

            [platform_vars.ubuntu2204]
            pkg_manager = "apt_get"

            [retention]
            max_count = 5
            max_age = "2w"

            [logging]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.backup_dir(), PathBuf::from("/srv/catalog/backups"));
        assert_eq!(
            config.progress_path(),
            PathBuf::from("/srv/catalog/migration-progress.jsonl")
        );
        assert_eq!(config.targets, vec![RenderTarget::Bash]);
        assert_eq!(config.variables.get("PKG_OPTIONAL"), Some(&Value::Boolean(true)));
        assert_eq!(
            config.platform_vars["ubuntu2204"].get("pkg_manager"),
            Some(&Value::from("apt_get"))
        );
        assert_eq!(config.logging.log_format, LogFormat::Json);

        let retention = config.retention().unwrap();
        assert_eq!(retention.max_count, Some(5));
        assert_eq!(retention.max_age, Some(Duration::from_secs(14 * 86400)));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PipelineConfig::from_toml("targets = []").is_err());
        assert!(PipelineConfig::from_toml("targets = [\"powershell\"]").is_err());
        assert!(PipelineConfig::from_toml("[retention]\nmax_age = \"soon\"").is_err());
        assert!(PipelineConfig::from_toml("min_script_len = 0").is_err());
    }

    #[test]
    fn test_from_file_names_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remediation.toml");
        std::fs::write(&path, "platforms = 3").unwrap();

        let err = PipelineConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("remediation.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: BTreeMap<&str, &str> = [
            ("REMEDIATION_CORPUS_DIR", "/corpus"),
            ("REMEDIATION_CATALOG", "/data/controls.json"),
            ("REMEDIATION_PLATFORMS", "rhel8, ubuntu2204,"),
            ("REMEDIATION_LOG_FORMAT", "compact"),
            ("REMEDIATION_PROGRESS", ""),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.corpus_dir, PathBuf::from("/corpus"));
        assert_eq!(config.platforms, vec!["rhel8", "ubuntu2204"]);
        assert_eq!(config.logging.log_format, LogFormat::Compact);
        assert_eq!(config.backup_dir(), PathBuf::from("/data/backups"));
        assert_eq!(config.progress_path(), PathBuf::from("/data/migration-progress.jsonl"));
    }

    #[test]
    fn test_env_rejects_unknown_log_format() {
        let mut config = PipelineConfig::default();
        let result = config.apply_env_from(|name| {
            (name == "REMEDIATION_LOG_FORMAT").then(|| "xml".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_context_builder_layers_profile_and_variables() {
        let dir = tempfile::tempdir().unwrap();
        FixtureCorpus::standard().write(dir.path()).unwrap();

        let mut config = PipelineConfig {
            corpus_dir: dir.path().to_path_buf(),
            profile: Some(ProfileSelection {
                product: "rhel9".to_string(),
                name: "moderate".to_string(),
            }),
            ..PipelineConfig::default()
        };
        config
            .variables
            .insert("rule_title".to_string(), Value::from("overridden"));

        let builder = config.context_builder().unwrap();
        let ctx = builder.build(&crate::render::Platform::lookup("rhel9"), None);
        assert_eq!(ctx.get_str("rule_title").as_deref(), Some("overridden"));

        config.profile = Some(ProfileSelection {
            product: "rhel9".to_string(),
            name: "nonexistent".to_string(),
        });
        assert!(config.context_builder().is_err());
    }
}
