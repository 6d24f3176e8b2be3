//! ComplianceAsCode Rule Definition Parser
//!
//! Parses `rule.yml` files. Rule files in the corpus are themselves templated
//! and frequently carry fields this pipeline does not care about, so parsing
//! is best-effort: every field has a default and a file that is not valid
//! YAML still yields whatever a line-oriented scan can recover.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::control::scalar_to_string;
use super::error::CorpusError;

/// A rule definition with every field populated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule id (the name of the directory holding `rule.yml`)
    pub id: String,

    /// Rule title; defaults to the rule id
    pub title: String,

    /// Severity level
    pub severity: Severity,

    /// Applicability tags from `platform`/`platforms` (e.g., "machine", "package[audit]")
    pub platforms: Vec<String>,

    /// Products from `prodtype` (e.g., "rhel9"); empty means every product
    pub products: Vec<String>,

    /// Template reference, if the rule is automated through a template
    pub template: Option<TemplateRef>,

    /// Source file
    pub path: PathBuf,

    /// Fields that were absent and defaulted
    #[serde(skip_deserializing)]
    pub defaulted: Vec<&'static str>,
}

impl Rule {
    /// Load a rule from its `rule.yml`
    ///
    /// Fails only when the file cannot be read.
    pub fn from_file(rule_id: &str, path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CorpusError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::from_yaml(rule_id, &content, path))
    }

    /// Extract a rule from YAML content, falling back to a line scan
    pub fn from_yaml(rule_id: &str, yaml: &str, path: &Path) -> Self {
        let extracted = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            Ok(serde_yaml::Value::Mapping(map)) => Extracted::from_mapping(&map),
            Ok(_) | Err(_) => {
                tracing::debug!(rule = rule_id, path = ?path, "rule.yml is not plain YAML, scanning lines");
                Extracted::from_lines(yaml)
            }
        };
        extracted.into_rule(rule_id, path)
    }

    /// Whether the rule applies to a product
    pub fn applies_to(&self, product: &str) -> bool {
        self.products.is_empty() || self.products.iter().any(|p| p.eq_ignore_ascii_case(product))
    }

    /// Whether the rule has a template
    pub fn has_template(&self) -> bool {
        self.template.is_some()
    }
}

/// Template reference from a rule's `template:` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Template name (directory under `shared/templates`)
    pub name: String,

    /// Variable bindings in file order
    pub vars: Vec<(String, Value)>,

    /// Per-target switches from `backends:` (false means the target is off)
    pub backends: BTreeMap<String, bool>,
}

impl TemplateRef {
    /// Whether the template is enabled for a rendering target
    pub fn backend_enabled(&self, target: &str) -> bool {
        self.backends.get(target).copied().unwrap_or(true)
    }
}

/// Rule severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Missing or unrecognized severity
    #[default]
    Unknown,
}

impl Severity {
    /// Parse a severity string, tolerating case and CAT labels
    pub fn parse(s: &str) -> Self {
        match s.trim().trim_matches(|c| c == '\'' || c == '"').to_lowercase().as_str() {
            "high" | "cat_i" | "cati" => Self::High,
            "medium" | "cat_ii" | "catii" => Self::Medium,
            "low" | "cat_iii" | "catiii" => Self::Low,
            _ => Self::Unknown,
        }
    }

    /// Convert to STIG CAT level
    pub fn to_cat(&self) -> &'static str {
        match self {
            Self::High => "CAT I",
            Self::Medium => "CAT II",
            Self::Low => "CAT III",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Fields recovered from a rule file before defaults are applied
#[derive(Debug, Default)]
struct Extracted {
    title: Option<String>,
    severity: Option<Severity>,
    platforms: Vec<String>,
    products: Vec<String>,
    template: Option<TemplateRef>,
}

impl Extracted {
    fn from_mapping(map: &serde_yaml::Mapping) -> Self {
        let get = |key: &str| map.get(serde_yaml::Value::String(key.to_string()));

        let title = get("title")
            .and_then(scalar_to_string)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let severity = get("severity").and_then(scalar_to_string).map(|s| Severity::parse(&s));

        let mut platforms = Vec::new();
        if let Some(p) = get("platform").and_then(scalar_to_string) {
            platforms.push(p.trim().to_string());
        }
        if let Some(serde_yaml::Value::Sequence(items)) = get("platforms") {
            platforms.extend(items.iter().filter_map(scalar_to_string).map(|s| s.trim().to_string()));
        }
        platforms.retain(|p| !p.is_empty());

        let products = get("prodtype")
            .and_then(scalar_to_string)
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let template = get("template").and_then(|t| match t {
            serde_yaml::Value::Mapping(tm) => template_from_mapping(tm),
            _ => None,
        });

        Self {
            title,
            severity,
            platforms,
            products,
            template,
        }
    }

    /// Line-oriented recovery for rule files that are not valid YAML
    fn from_lines(content: &str) -> Self {
        let fields = top_level_fields(content);
        let field = |name: &str| fields.get(name).cloned();

        let title = field("title");
        let severity = field("severity").map(|s| Severity::parse(&s));
        let products = field("prodtype").map(|s| split_list(&s)).unwrap_or_default();
        let platforms = field("platform").into_iter().collect();

        Self {
            title,
            severity,
            platforms,
            products,
            template: template_from_lines(content),
        }
    }

    fn into_rule(self, rule_id: &str, path: &Path) -> Rule {
        let mut defaulted = Vec::new();
        let title = self.title.unwrap_or_else(|| {
            defaulted.push("title");
            rule_id.to_string()
        });
        let severity = self.severity.unwrap_or_else(|| {
            defaulted.push("severity");
            Severity::Unknown
        });
        if self.products.is_empty() {
            defaulted.push("prodtype");
        }

        Rule {
            id: rule_id.to_string(),
            title,
            severity,
            platforms: self.platforms,
            products: self.products,
            template: self.template,
            path: path.to_path_buf(),
            defaulted,
        }
    }
}

fn template_from_mapping(tm: &serde_yaml::Mapping) -> Option<TemplateRef> {
    let get = |key: &str| tm.get(serde_yaml::Value::String(key.to_string()));

    let name = get("name").and_then(scalar_to_string)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let vars = match get("vars") {
        Some(serde_yaml::Value::Mapping(vm)) => vm
            .iter()
            .filter_map(|(k, v)| Some((scalar_to_string(k)?, Value::from_yaml(v)?)))
            .collect(),
        _ => Vec::new(),
    };

    let backends = match get("backends") {
        Some(serde_yaml::Value::Mapping(bm)) => bm
            .iter()
            .filter_map(|(k, v)| {
                let enabled = match v {
                    serde_yaml::Value::Bool(b) => *b,
                    other => !matches!(
                        scalar_to_string(other).as_deref().map(str::trim),
                        Some("off") | Some("false") | Some("no")
                    ),
                };
                Some((scalar_to_string(k)?, enabled))
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    Some(TemplateRef { name, vars, backends })
}

static TOP_LEVEL_FIELD: OnceLock<Option<Regex>> = OnceLock::new();

/// First value of every unindented `key: value` line; block scalars are skipped
fn top_level_fields(content: &str) -> BTreeMap<&str, String> {
    let Some(re) = TOP_LEVEL_FIELD
        .get_or_init(|| Regex::new(r"(?m)^([A-Za-z_][A-Za-z0-9_]*):[ \t]*(.+?)[ \t]*$").ok())
        .as_ref()
    else {
        return BTreeMap::new();
    };

    let mut fields = BTreeMap::new();
    for caps in re.captures_iter(content) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = unquote(value.as_str());
        if value.is_empty() || matches!(value.as_str(), "|-" | "|" | ">-") {
            continue;
        }
        fields.entry(key.as_str()).or_insert(value);
    }
    fields
}

/// Recover `template: { name, vars }` from indentation alone
fn template_from_lines(content: &str) -> Option<TemplateRef> {
    let mut lines = content.lines().skip_while(|l| l.trim_end() != "template:");
    lines.next()?;

    let mut name = None;
    let mut vars = Vec::new();
    let mut vars_indent: Option<usize> = None;

    for line in lines {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent == 0 {
            break;
        }
        let trimmed = line.trim();

        if let Some(indent_vars) = vars_indent {
            if indent > indent_vars {
                if let Some((k, v)) = trimmed.split_once(':') {
                    let v = unquote(v.trim());
                    if !v.is_empty() {
                        vars.push((k.trim().to_string(), Value::String(v)));
                    }
                }
                continue;
            }
            vars_indent = None;
        }

        if let Some(rest) = trimmed.strip_prefix("name:") {
            name = Some(unquote(rest.trim()));
        } else if trimmed == "vars:" {
            vars_indent = Some(indent);
        }
    }

    let name = name.filter(|n| !n.is_empty())?;
    Some(TemplateRef {
        name,
        vars,
        backends: BTreeMap::new(),
    })
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    let stripped = s
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')));
    stripped.unwrap_or(s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Rule {
        Rule::from_yaml("sample_rule", yaml, Path::new("rule.yml"))
    }

    #[test]
    fn test_parse_templated_rule() {
        let rule = parse(
            r#"
documentation_complete: true
prodtype: rhel8,rhel9
title: 'Record Events that Modify /etc/passwd'
severity: medium
platform: package[audit]
references:
  nist: AC-2(4),AU-2(d)
template:
  name: audit_rules_watch
  vars:
    path: /etc/passwd
    key: audit_rules_usergroup_modification
  backends:
    ansible: 'off'
"#,
        );

        assert_eq!(rule.title, "Record Events that Modify /etc/passwd");
        assert_eq!(rule.severity, Severity::Medium);
        assert_eq!(rule.products, vec!["rhel8", "rhel9"]);
        assert_eq!(rule.platforms, vec!["package[audit]"]);
        assert!(rule.defaulted.is_empty());

        let template = rule.template.unwrap();
        assert_eq!(template.name, "audit_rules_watch");
        assert_eq!(template.vars[0], ("path".to_string(), Value::from("/etc/passwd")));
        assert_eq!(template.vars[1].0, "key");
        assert!(template.backend_enabled("bash"));
        assert!(!template.backend_enabled("ansible"));
    }

    #[test]
    fn test_partial_rule_defaults() {
        let rule = parse("documentation_complete: false\n");
        assert_eq!(rule.title, "sample_rule");
        assert_eq!(rule.severity, Severity::Unknown);
        assert!(rule.template.is_none());
        assert!(rule.products.is_empty());
        assert!(rule.applies_to("rhel9"));
        assert_eq!(rule.defaulted, vec!["title", "severity", "prodtype"]);
    }

    #[test]
    fn test_line_fallback_for_templated_yaml() {
        let rule = parse(
            r#"
title: 'Set SSH Idle Timeout'
severity: high
{{% if product == "rhel9" %}}
prodtype: rhel9
{{% endif %}}
description: |-
    {{{ describe_sshd_option() }}}
template:
    name: sshd_lineinfile
    vars:
        parameter: ClientAliveInterval
        value: '600'
"#,
        );

        assert_eq!(rule.title, "Set SSH Idle Timeout");
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.products, vec!["rhel9"]);
        let template = rule.template.unwrap();
        assert_eq!(template.name, "sshd_lineinfile");
        assert_eq!(
            template.vars,
            vec![
                ("parameter".to_string(), Value::from("ClientAliveInterval")),
                ("value".to_string(), Value::from("600")),
            ]
        );
    }

    #[test]
    fn test_line_fallback_takes_first_non_block_value() {
        let fields = top_level_fields("title: |-\n  body\ntitle: Second\n  nested: skipped\nseverity: low\n");
        assert_eq!(fields.get("title").map(String::as_str), Some("Second"));
        assert_eq!(fields.get("severity").map(String::as_str), Some("low"));
        assert!(!fields.contains_key("nested"));
    }

    #[test]
    fn test_rule_json_reload_drops_defaulted() {
        let rule = parse("documentation_complete: false\n");
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"defaulted\":[\"title\",\"severity\",\"prodtype\"]"));

        let reloaded: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.id, "sample_rule");
        assert_eq!(reloaded.title, "sample_rule");
        assert!(reloaded.defaulted.is_empty());
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Severity::High);
        assert_eq!(Severity::parse("'low'"), Severity::Low);
        assert_eq!(Severity::parse("bogus"), Severity::Unknown);
        assert_eq!(Severity::Medium.to_cat(), "CAT II");
    }
}
