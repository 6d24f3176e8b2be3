//! Render context
//!
//! Variables are merged in layers, later layers winning:
//!
//! 1. engine defaults (sshd and audit paths)
//! 2. platform defaults (`product`, `pkg_manager`, ...)
//! 3. configured per-platform overrides
//! 4. the rule's template variables, upper-cased, plus `rule_id` and `rule_title`
//! 5. profile variable selections
//! 6. explicit per-invocation overrides

use std::collections::BTreeMap;

use crate::corpus::Rule;
use crate::value::Value;

use super::platform::Platform;

/// Engine-wide defaults
pub const ENGINE_DEFAULTS: &[(&str, &str)] = &[
    ("sshd_config_file", "/etc/ssh/sshd_config"),
    ("sshd_config_dir", "/etc/ssh/sshd_config.d"),
    ("sshd_override_file", "/etc/ssh/sshd_config.d/00-complianceascode-hardening.conf"),
    ("audit_rules_file", "/etc/audit/audit.rules"),
    ("audit_rules_dir", "/etc/audit/rules.d"),
    ("audit_tool", "augenrules"),
];

/// Variables bound for one render
#[derive(Debug, Clone)]
pub struct RenderContext {
    platform: Platform,
    vars: BTreeMap<String, Value>,
}

impl RenderContext {
    /// Context holding only engine and platform defaults
    pub fn for_platform(platform: Platform) -> Self {
        ContextBuilder::new().build(&platform, None)
    }

    /// Platform the context renders for
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Look up a variable as text
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.vars.get(name).map(|v| v.to_string())
    }

    /// Look up a variable as a flag
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.vars.get(name).map(|v| v.is_truthy())
    }

    /// Bind a variable, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Every bound variable name
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|k| k.as_str())
    }
}

/// Layered construction of [`RenderContext`]s
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    platform_overrides: BTreeMap<String, BTreeMap<String, Value>>,
    profile_vars: BTreeMap<String, Value>,
    overrides: BTreeMap<String, Value>,
}

impl ContextBuilder {
    /// Builder with no configured layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-platform overrides, keyed by platform id
    pub fn with_platform_overrides(mut self, overrides: BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        self.platform_overrides = overrides
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        self
    }

    /// Profile variable selections (`var_x=value`)
    pub fn with_profile_variables<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.profile_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Explicit overrides; these win over every other layer
    pub fn with_overrides(mut self, overrides: BTreeMap<String, Value>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Set a single explicit override
    pub fn set_override(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.overrides.insert(name.into(), value.into());
    }

    /// Build the context for a platform and optionally a rule
    pub fn build(&self, platform: &Platform, rule: Option<&Rule>) -> RenderContext {
        let mut vars: BTreeMap<String, Value> = ENGINE_DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();

        for (name, value) in platform.defaults() {
            vars.insert(name.to_string(), value);
        }

        if let Some(layer) = self.platform_overrides.get(&platform.id) {
            vars.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if let Some(rule) = rule {
            if let Some(template) = &rule.template {
                for (name, value) in &template.vars {
                    vars.insert(name.to_uppercase(), value.clone());
                }
            }
            vars.insert("rule_id".to_string(), Value::String(rule.id.clone()));
            vars.insert("rule_title".to_string(), Value::String(rule.title.clone()));
        }

        vars.extend(self.profile_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars.extend(self.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        RenderContext {
            platform: platform.clone(),
            vars,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_engine_and_platform_defaults() {
        let ctx = RenderContext::for_platform(Platform::lookup("rhel9"));
        assert_eq!(ctx.get_str("sshd_config_file").as_deref(), Some("/etc/ssh/sshd_config"));
        assert_eq!(ctx.get_str("pkg_manager").as_deref(), Some("dnf"));
        assert_eq!(ctx.get_bool("sshd_fragments"), Some(true));
    }

    #[test]
    fn test_layers_later_wins() {
        let rule = Rule::from_yaml(
            "sshd_set_idle_timeout",
            "title: Idle\ntemplate:\n  name: sshd_lineinfile\n  vars:\n    value: '600'\n    pkg_manager: yum\n",
            Path::new("rule.yml"),
        );

        let mut platform_layer = BTreeMap::new();
        platform_layer.insert("audit_tool".to_string(), Value::from("auditctl"));
        platform_layer.insert("pkg_manager".to_string(), Value::from("yum"));

        let mut overrides = BTreeMap::new();
        overrides.insert("VALUE".to_string(), Value::from("900"));

        let builder = ContextBuilder::new()
            .with_platform_overrides(BTreeMap::from([("RHEL9".to_string(), platform_layer)]))
            .with_profile_variables([("VALUE", "300"), ("var_accounts_tmout", "600")])
            .with_overrides(overrides);

        let ctx = builder.build(&Platform::lookup("rhel9"), Some(&rule));
        assert_eq!(ctx.get_str("audit_tool").as_deref(), Some("auditctl"));
        assert_eq!(ctx.get_str("pkg_manager").as_deref(), Some("yum"));
        assert_eq!(ctx.get_str("PKG_MANAGER").as_deref(), Some("yum"));
        assert_eq!(ctx.get_str("VALUE").as_deref(), Some("900"));
        assert_eq!(ctx.get_str("var_accounts_tmout").as_deref(), Some("600"));
        assert_eq!(ctx.get_str("rule_id").as_deref(), Some("sshd_set_idle_timeout"));
        assert_eq!(ctx.get_str("rule_title").as_deref(), Some("Idle"));

        let other = builder.build(&Platform::lookup("ubuntu2204"), None);
        assert_eq!(other.get_str("audit_tool").as_deref(), Some("augenrules"));
    }
}
