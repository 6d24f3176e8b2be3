//! Audit rule reconciliation
//!
//! Decides how a desired audit rule lands in an audit rule store: leave it
//! alone, widen an existing compatible rule with the missing syscalls, or
//! append a new line. The store is either one file (`auditctl`) or a
//! directory of `*.rules` files (`augenrules`).
//!
//! The emitted bash macros run the same decision tree in awk on the target
//! host; [`AuditRuleStore::plan`] is the in-process twin used for previews
//! and tests.
//!
//! Matching works on `flag value` pairs. `-S` pairs are syscalls, `-k x` and
//! `-F key=x` are the key, everything else is a filter field. A rule matches
//! the desired filters when its first fields equal the action/arch prefix in
//! order and its remaining fields cover every other/auid filter. It is
//! *compatible* when, in addition, it has no extra fields and the same key.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

/// Tool that loads audit rules at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditTool {
    /// Single `audit.rules` file
    Auditctl,
    /// Directory of `rules.d/*.rules` files
    Augenrules,
}

impl FromStr for AuditTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auditctl" => Ok(Self::Auditctl),
            "augenrules" => Ok(Self::Augenrules),
            other => Err(format!("unknown audit tool '{}' (expected auditctl or augenrules)", other)),
        }
    }
}

impl fmt::Display for AuditTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auditctl => write!(f, "auditctl"),
            Self::Augenrules => write!(f, "augenrules"),
        }
    }
}

/// One `flag value` pair of an audit rule line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditField {
    pub flag: String,
    pub value: String,
}

impl AuditField {
    /// Whether this existing field fulfils a wanted one
    ///
    /// Permission sets (`-p`) are fulfilled by any superset.
    fn satisfies(&self, wanted: &AuditField) -> bool {
        if self.flag != wanted.flag {
            return false;
        }
        if self.value == wanted.value {
            return true;
        }
        self.flag == "-p" && wanted.value.chars().all(|c| self.value.contains(c))
    }
}

/// Split a rule line into `flag value` pairs
///
/// A token starting with `-` takes the next token as its value; any other
/// token stands alone.
pub fn parse_fields(text: &str) -> Vec<AuditField> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut fields = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let flag = tokens[i];
        if flag.starts_with('-') && i + 1 < tokens.len() {
            fields.push(AuditField {
                flag: flag.to_string(),
                value: tokens[i + 1].to_string(),
            });
            i += 2;
        } else {
            fields.push(AuditField {
                flag: flag.to_string(),
                value: String::new(),
            });
            i += 1;
        }
    }
    fields
}

/// An existing rule line broken into its parts
#[derive(Debug, Clone)]
struct ParsedRule {
    tokens: Vec<AuditField>,
    filters: Vec<AuditField>,
    syscalls: Vec<String>,
    syscall_flags: usize,
    last_syscall: Option<usize>,
    key: Option<String>,
}

impl ParsedRule {
    fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let tokens = parse_fields(trimmed);
        let mut rule = Self {
            tokens: Vec::new(),
            filters: Vec::new(),
            syscalls: Vec::new(),
            syscall_flags: 0,
            last_syscall: None,
            key: None,
        };

        for (idx, field) in tokens.iter().enumerate() {
            if field.flag == "-S" {
                rule.syscall_flags += 1;
                rule.last_syscall = Some(idx);
                for sc in field.value.split(',').filter(|s| !s.is_empty()) {
                    if !rule.syscalls.iter().any(|s| s == sc) {
                        rule.syscalls.push(sc.to_string());
                    }
                }
            } else if field.flag == "-k" {
                rule.key = Some(field.value.clone());
            } else if let Some(key) = field.value.strip_prefix("key=").filter(|_| field.flag == "-F") {
                rule.key = Some(key.to_string());
            } else {
                rule.filters.push(field.clone());
            }
        }
        rule.tokens = tokens;
        Some(rule)
    }

    /// The line with `missing` syscalls added in the line's own style
    fn with_syscalls(&self, missing: &[String]) -> String {
        let mut out: Vec<String> = Vec::new();
        for (idx, field) in self.tokens.iter().enumerate() {
            out.push(field.flag.clone());
            let is_last = Some(idx) == self.last_syscall;
            if is_last && self.syscall_flags == 1 {
                let mut value = field.value.clone();
                for sc in missing {
                    value.push(',');
                    value.push_str(sc);
                }
                out.push(value);
            } else if !field.value.is_empty() {
                out.push(field.value.clone());
            }
            if is_last && self.syscall_flags > 1 {
                for sc in missing {
                    out.push("-S".to_string());
                    out.push(sc.clone());
                }
            }
        }
        out.join(" ")
    }
}

/// The audit rule a macro wants in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRuleSpec {
    prefix: Vec<AuditField>,
    filters: Vec<AuditField>,
    syscalls: Vec<String>,
    grouping: Vec<String>,
    key: String,
    full_rule: String,
}

impl AuditRuleSpec {
    /// A syscall rule (`-a always,exit -F arch=b64 -S ... -F key=...`)
    pub fn syscall(
        action_arch_filters: &str,
        other_filters: &str,
        auid_filters: &str,
        syscalls: &[String],
        key: &str,
        grouping: &[String],
    ) -> Self {
        let prefix = parse_fields(action_arch_filters);
        let mut filters = parse_fields(other_filters);
        filters.extend(parse_fields(auid_filters));

        let syscalls: Vec<String> = syscalls
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mut parts: Vec<String> = Vec::new();
        push_normalized(&mut parts, action_arch_filters);
        if !syscalls.is_empty() {
            parts.push(format!("-S {}", syscalls.join(",")));
        }
        push_normalized(&mut parts, other_filters);
        push_normalized(&mut parts, auid_filters);
        parts.push(format!("-F key={}", key));

        Self {
            prefix,
            filters,
            syscalls,
            grouping: grouping.iter().map(|s| s.trim().to_string()).collect(),
            key: key.to_string(),
            full_rule: parts.join(" "),
        }
    }

    /// A file watch rule (`-w path -p bits -k key`)
    pub fn watch(path: &str, access_bits: &str, key: &str) -> Self {
        let prefix = vec![AuditField {
            flag: "-w".to_string(),
            value: path.to_string(),
        }];
        let filters = vec![AuditField {
            flag: "-p".to_string(),
            value: access_bits.to_string(),
        }];
        Self {
            prefix,
            filters,
            syscalls: Vec::new(),
            grouping: Vec::new(),
            key: key.to_string(),
            full_rule: format!("-w {} -p {} -k {}", path, access_bits, key),
        }
    }

    /// The complete line appended when nothing compatible exists
    pub fn full_rule(&self) -> &str {
        &self.full_rule
    }

    /// Rule key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Desired syscalls, empty for a watch rule
    pub fn syscalls(&self) -> &[String] {
        &self.syscalls
    }

    /// Syscalls an existing rule may share to become a merge target
    pub fn grouping(&self) -> &[String] {
        &self.grouping
    }

    /// Whether this is a pure watch rule
    pub fn is_watch(&self) -> bool {
        self.syscalls.is_empty()
    }

    /// Prefix fields as one line
    pub fn prefix_text(&self) -> String {
        join_fields(&self.prefix)
    }

    /// Other and auid filter fields as one line
    pub fn filters_text(&self) -> String {
        join_fields(&self.filters)
    }

    pub(crate) fn prefix_fields(&self) -> &[AuditField] {
        &self.prefix
    }

    pub(crate) fn filter_fields(&self) -> &[AuditField] {
        &self.filters
    }

    /// Filter fields of `rule` left over once the filters are matched
    fn unmatched_fields(&self, rule: &ParsedRule) -> Option<usize> {
        if rule.filters.len() < self.prefix.len() {
            return None;
        }
        if rule.filters.iter().zip(&self.prefix).any(|(have, want)| have != want) {
            return None;
        }

        let rest = &rule.filters[self.prefix.len()..];
        let mut used = vec![false; rest.len()];
        for wanted in &self.filters {
            let slot = rest
                .iter()
                .enumerate()
                .position(|(i, have)| !used[i] && have.satisfies(wanted))?;
            used[slot] = true;
        }
        Some(rest.len() - self.filters.len())
    }

    fn matches_filters(&self, rule: &ParsedRule) -> bool {
        self.unmatched_fields(rule).is_some()
    }

    fn is_compatible(&self, rule: &ParsedRule) -> bool {
        self.unmatched_fields(rule) == Some(0) && rule.key.as_deref() == Some(self.key.as_str())
    }
}

fn push_normalized(parts: &mut Vec<String>, text: &str) {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        parts.push(normalized);
    }
}

fn join_fields(fields: &[AuditField]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.value.is_empty() {
                f.flag.clone()
            } else {
                format!("{} {}", f.flag, f.value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome of reconciling one desired rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AuditPlan {
    /// A compatible rule already covers everything
    Nothing { file: PathBuf, line: usize },
    /// Rewrite one line in place with the missing syscalls added
    Rewrite {
        file: PathBuf,
        line: usize,
        old: String,
        new: String,
    },
    /// Append a new rule line, creating the file (mode 0600) if needed
    Append { file: PathBuf, rule: String, create: bool },
}

impl fmt::Display for AuditPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing { file, line } => write!(f, "nothing to do ({}:{})", file.display(), line),
            Self::Rewrite { file, line, old, new } => {
                write!(f, "rewrite {}:{}\n  - {}\n  + {}", file.display(), line, old, new)
            }
            Self::Append { file, rule, create } => write!(
                f,
                "append to {}{}\n  + {}",
                file.display(),
                if *create { " (new file)" } else { "" },
                rule
            ),
        }
    }
}

/// In-memory view of an audit rule store
#[derive(Debug, Clone)]
pub struct AuditRuleStore {
    tool: AuditTool,
    rules_file: PathBuf,
    rules_dir: PathBuf,
    files: BTreeMap<PathBuf, String>,
}

impl AuditRuleStore {
    /// An empty store
    pub fn new(tool: AuditTool, rules_file: impl Into<PathBuf>, rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            rules_file: rules_file.into(),
            rules_dir: rules_dir.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add a file with the given contents
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Read the store the tool would load from disk
    pub fn load(
        tool: AuditTool,
        rules_file: impl Into<PathBuf>,
        rules_dir: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let mut store = Self::new(tool, rules_file, rules_dir);
        match tool {
            AuditTool::Auditctl => {
                if store.rules_file.is_file() {
                    let contents = std::fs::read_to_string(&store.rules_file)?;
                    store.files.insert(store.rules_file.clone(), contents);
                }
            }
            AuditTool::Augenrules => {
                if store.rules_dir.is_dir() {
                    for entry in std::fs::read_dir(&store.rules_dir)?.flatten() {
                        let path = entry.path();
                        if path.is_file() && path.extension().map(|e| e == "rules").unwrap_or(false) {
                            let contents = std::fs::read_to_string(&path)?;
                            store.files.insert(path, contents);
                        }
                    }
                }
            }
        }
        Ok(store)
    }

    /// Tool of this store
    pub fn tool(&self) -> AuditTool {
        self.tool
    }

    /// Contents of a file in the store
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(|s| s.as_str())
    }

    /// File a new rule line goes to
    pub fn default_file(&self, spec: &AuditRuleSpec) -> PathBuf {
        match self.tool {
            AuditTool::Auditctl => self.rules_file.clone(),
            AuditTool::Augenrules => self.rules_dir.join(format!("{}.rules", spec.key())),
        }
    }

    /// Files worth inspecting for a compatible rule
    ///
    /// For `augenrules` these are the files holding any rule that matches
    /// the desired filters, syscalls and key ignored.
    pub fn candidate_files(&self, spec: &AuditRuleSpec) -> Vec<&Path> {
        match self.tool {
            AuditTool::Auditctl => self
                .files
                .keys()
                .filter(|p| **p == self.rules_file)
                .map(|p| p.as_path())
                .collect(),
            AuditTool::Augenrules => self
                .files
                .iter()
                .filter(|(_, contents)| {
                    contents
                        .lines()
                        .filter_map(ParsedRule::parse)
                        .any(|rule| spec.matches_filters(&rule))
                })
                .map(|(path, _)| path.as_path())
                .collect(),
        }
    }

    /// Decide what to do with a desired rule
    pub fn plan(&self, spec: &AuditRuleSpec) -> AuditPlan {
        let mut merge: Option<AuditPlan> = None;

        for file in self.candidate_files(spec) {
            let Some(contents) = self.files.get(file) else {
                continue;
            };
            for (idx, line) in contents.lines().enumerate() {
                let Some(rule) = ParsedRule::parse(line) else {
                    continue;
                };
                if !spec.is_compatible(&rule) {
                    continue;
                }

                if spec.is_watch() {
                    if rule.syscall_flags == 0 {
                        return AuditPlan::Nothing {
                            file: file.to_path_buf(),
                            line: idx + 1,
                        };
                    }
                    continue;
                }
                if rule.syscall_flags == 0 {
                    continue;
                }

                let missing: Vec<String> = spec
                    .syscalls
                    .iter()
                    .filter(|s| !rule.syscalls.contains(s))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    return AuditPlan::Nothing {
                        file: file.to_path_buf(),
                        line: idx + 1,
                    };
                }

                let groupable = rule.syscalls.iter().any(|s| spec.grouping.contains(s));
                if merge.is_none() && groupable {
                    merge = Some(AuditPlan::Rewrite {
                        file: file.to_path_buf(),
                        line: idx + 1,
                        old: line.to_string(),
                        new: rule.with_syscalls(&missing),
                    });
                }
            }
        }

        merge.unwrap_or_else(|| {
            let file = self.default_file(spec);
            let create = !self.files.contains_key(&file);
            AuditPlan::Append {
                file,
                rule: spec.full_rule().to_string(),
                create,
            }
        })
    }

    /// Apply a plan to the in-memory files
    pub fn apply(&mut self, plan: &AuditPlan) {
        match plan {
            AuditPlan::Nothing { .. } => {}
            AuditPlan::Rewrite { file, line, new, .. } => {
                if let Some(contents) = self.files.get_mut(file) {
                    let mut out = String::new();
                    for (idx, existing) in contents.lines().enumerate() {
                        out.push_str(if idx + 1 == *line { new } else { existing });
                        out.push('\n');
                    }
                    *contents = out;
                }
            }
            AuditPlan::Append { file, rule, .. } => {
                let contents = self.files.entry(file.clone()).or_default();
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(rule);
                contents.push('\n');
            }
        }
    }
}
