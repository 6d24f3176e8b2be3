//! Line-presence macros and the composite config-set macro
//!
//! Bash versions emit self-contained procedures: back the file up, edit it,
//! drop the backup on success or restore it on failure. Ansible versions are
//! `lineinfile` task records.

use std::path::Path;

use crate::render::error::RenderError;

use super::MacroCall;

/// Insert position of a new line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Anchor {
    Start,
    End,
    After(String),
    Before(String),
}

impl Anchor {
    /// `insert_after`/`insert_before` arguments; `BOF`/`EOF` are positions
    pub(super) fn from_call(call: &MacroCall<'_>) -> Result<Self, RenderError> {
        match (call.optional("insert_after"), call.optional("insert_before")) {
            (Some(_), Some(_)) => Err(call.error("insert_after and insert_before are mutually exclusive")),
            (Some(after), None) if after == "EOF" => Ok(Self::End),
            (Some(after), None) => Ok(Self::After(after)),
            (None, Some(before)) if before == "BOF" => Ok(Self::Start),
            (None, Some(before)) => Ok(Self::Before(before)),
            (None, None) => Ok(Self::End),
        }
    }

    fn awk_mode(&self) -> (&'static str, &str) {
        match self {
            Self::Start => ("start", ""),
            Self::End => ("end", ""),
            Self::After(re) => ("after", re),
            Self::Before(re) => ("before", re),
        }
    }
}

/// Regex dialect of the generated pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flavor {
    /// POSIX ERE for sed/awk/grep
    Posix,
    /// Python `re` for Ansible modules
    Python,
}

impl Flavor {
    fn default_prefix(&self) -> &'static str {
        match self {
            Self::Posix => "^[[:space:]]*",
            Self::Python => r"^\s*",
        }
    }

    fn default_separator(&self) -> &'static str {
        match self {
            Self::Posix => "([[:space:]]|=)",
            Self::Python => r"(\s|=)",
        }
    }
}

/// Quote for a POSIX shell (always single quotes)
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote as a single-quoted YAML scalar
pub(crate) fn yaml_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Escape regex metacharacters so the text matches literally
pub(crate) fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if r"\.^$*+?()[]{}|".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape unescaped `/` so a pattern fits between sed's `/` delimiters
pub(super) fn sed_delimit(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut escaped = false;
    for c in pattern.chars() {
        if c == '/' && !escaped {
            out.push('\\');
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out
}

/// Identifier-safe form of arbitrary text
pub(super) fn slug(s: &str) -> String {
    let slug: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    slug.trim_matches('_').to_string()
}

const INSERT_AWK: &str = r#"BEGIN { done = 0; mode = ENVIRON["MODE"]; if (mode == "start") { print ENVIRON["LINE"]; done = 1 } }
{ if (!done && mode == "before" && $0 ~ ENVIRON["ANCHOR"]) { print ENVIRON["LINE"]; done = 1 }
  print
  if (!done && mode == "after" && $0 ~ ENVIRON["ANCHOR"]) { print ENVIRON["LINE"]; done = 1 } }
END { if (!done) print ENVIRON["LINE"] }"#;

// ============================================================================
// Bash
// ============================================================================

/// Create the file if allowed, otherwise stop the script
pub(super) fn bash_require_file(path: &str, create: bool) -> String {
    let p = shell_quote(path);
    let mut out = format!("if [ ! -e {p} ]; then\n");
    if create {
        if let Some(parent) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            out.push_str(&format!("    mkdir -p {}\n", shell_quote(&parent.to_string_lossy())));
        }
        out.push_str(&format!("    touch {p}\n"));
    } else {
        out.push_str(&format!(
            "    printf '%s\\n' {} >&2\n",
            shell_quote(&format!("Remediation failed: {} does not exist", path))
        ));
        out.push_str("    exit 1\n");
    }
    out.push_str("fi");
    out
}

pub(super) fn bash_line_absent(path: &str, pattern: &str, case_insensitive: bool) -> String {
    let p = shell_quote(path);
    let bak = shell_quote(&format!("{}.bak", path));
    let expr = format!("/{}/{}d", sed_delimit(pattern), if case_insensitive { "I" } else { "" });

    let mut out = format!("if [ -e {p} ]; then\n");
    out.push_str(&format!("    cp -p {p} {bak}\n"));
    out.push_str(&format!("    if LC_ALL=C sed -i -E {} {p}; then\n", shell_quote(&expr)));
    out.push_str(&format!("        rm -f {bak}\n"));
    out.push_str("    else\n");
    out.push_str(&format!("        mv -f {bak} {p}\n"));
    out.push_str("    fi\n");
    out.push_str("fi");
    out
}

/// Insert `line` unless present verbatim; the file must exist
pub(super) fn bash_line_present(path: &str, line: &str, anchor: &Anchor) -> String {
    let p = shell_quote(path);
    let bak = shell_quote(&format!("{}.bak", path));
    let tmp = shell_quote(&format!("{}.tmp", path));
    let (mode, anchor_re) = anchor.awk_mode();

    let mut out = format!("if ! LC_ALL=C grep -q -x -F -e {} {p}; then\n", shell_quote(line));
    out.push_str(&format!("    cp -p {p} {bak}\n"));
    out.push_str(&format!(
        "    if LINE={} ANCHOR={} MODE={} awk {} {p} > {tmp} && cat {tmp} > {p}; then\n",
        shell_quote(line),
        shell_quote(anchor_re),
        mode,
        shell_quote(INSERT_AWK)
    ));
    out.push_str(&format!("        rm -f {bak}\n"));
    out.push_str("    else\n");
    out.push_str(&format!("        mv -f {bak} {p}\n"));
    out.push_str("    fi\n");
    out.push_str(&format!("    rm -f {tmp}\n"));
    out.push_str("fi");
    out
}

/// Arguments of the config-set macros
pub(super) struct ConfigValue {
    pub path: String,
    pub parameter: String,
    pub value: String,
    pub separator: String,
    pub separator_regex: Option<String>,
    pub prefix_regex: Option<String>,
    pub anchor: Anchor,
    pub create: bool,
    pub case_insensitive: bool,
}

impl ConfigValue {
    pub(super) fn from_call(call: &MacroCall<'_>) -> Result<Self, RenderError> {
        Ok(Self {
            path: call.required("path")?,
            parameter: call.required("parameter")?,
            value: call.required("value")?,
            separator: call.raw("separator").unwrap_or_else(|| " ".to_string()),
            separator_regex: call.optional("separator_regex"),
            prefix_regex: call.optional("prefix_regex"),
            anchor: Anchor::from_call(call)?,
            create: call.flag("create", true),
            case_insensitive: call.flag("case_insensitive", false),
        })
    }

    /// Pattern matching any definition of the parameter
    pub(super) fn pattern(&self, flavor: Flavor) -> String {
        format!(
            "{}{}{}",
            self.prefix_regex.as_deref().unwrap_or(flavor.default_prefix()),
            escape_regex(&self.parameter),
            self.separator_regex.as_deref().unwrap_or(flavor.default_separator()),
        )
    }

    /// The canonical line
    pub(super) fn line(&self) -> String {
        format!("{}{}{}", self.parameter, self.separator, self.value)
    }

    pub(super) fn bash(&self) -> String {
        [
            bash_require_file(&self.path, self.create),
            bash_line_absent(&self.path, &self.pattern(Flavor::Posix), self.case_insensitive),
            bash_line_present(&self.path, &self.line(), &self.anchor),
        ]
        .join("\n")
    }

    pub(super) fn ansible(&self) -> String {
        let mut regexp = self.pattern(Flavor::Python);
        if self.case_insensitive {
            regexp.insert_str(0, "(?i)");
        }
        let register = format!("dupes_{}", slug(&self.parameter));
        let path = yaml_quote(&self.path);
        let regexp = yaml_quote(&regexp);

        let mut out = String::new();
        out.push_str(&format!(
            "- name: {}\n",
            yaml_quote(&format!("Check for duplicate {} entries in {}", self.parameter, self.path))
        ));
        out.push_str("  ansible.builtin.lineinfile:\n");
        out.push_str(&format!("    path: {path}\n"));
        out.push_str(&format!("    create: {}\n", self.create));
        out.push_str(&format!("    regexp: {regexp}\n"));
        out.push_str("    state: absent\n");
        out.push_str("  check_mode: true\n");
        out.push_str("  changed_when: false\n");
        out.push_str(&format!("  register: {register}\n"));
        out.push('\n');

        out.push_str(&format!(
            "- name: {}\n",
            yaml_quote(&format!("Remove duplicate {} entries from {}", self.parameter, self.path))
        ));
        out.push_str("  ansible.builtin.lineinfile:\n");
        out.push_str(&format!("    path: {path}\n"));
        out.push_str(&format!("    regexp: {regexp}\n"));
        out.push_str("    state: absent\n");
        out.push_str(&format!("  when: {register}.found is defined and {register}.found > 1\n"));
        out.push('\n');

        out.push_str(&format!(
            "- name: {}\n",
            yaml_quote(&format!("Set {} in {}", self.parameter, self.path))
        ));
        out.push_str("  ansible.builtin.lineinfile:\n");
        out.push_str(&format!("    path: {path}\n"));
        out.push_str(&format!("    create: {}\n", self.create));
        out.push_str(&format!("    regexp: {regexp}\n"));
        out.push_str(&format!("    line: {}\n", yaml_quote(&self.line())));
        out.push_str("    state: present\n");
        match &self.anchor {
            Anchor::End => {}
            Anchor::Start => out.push_str("    insertbefore: BOF\n"),
            Anchor::After(re) => out.push_str(&format!("    insertafter: {}\n", yaml_quote(re))),
            Anchor::Before(re) => out.push_str(&format!("    insertbefore: {}\n", yaml_quote(re))),
        }
        out.trim_end().to_string()
    }
}

pub(super) fn bash_ensure_line_absent(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let path = call.required("path")?;
    let pattern = call.required("pattern")?;
    Ok(bash_line_absent(&path, &pattern, call.flag("case_insensitive", false)))
}

pub(super) fn bash_ensure_line_present(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let path = call.required("path")?;
    let line = call.required("line")?;
    let anchor = Anchor::from_call(call)?;
    Ok([
        bash_require_file(&path, call.flag("create", true)),
        bash_line_present(&path, &line, &anchor),
    ]
    .join("\n"))
}

pub(super) fn bash_set_config_value(call: &MacroCall<'_>) -> Result<String, RenderError> {
    Ok(ConfigValue::from_call(call)?.bash())
}

pub(super) fn ansible_ensure_line_absent(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let path = call.required("path")?;
    let mut pattern = call.required("pattern")?;
    if call.flag("case_insensitive", false) {
        pattern.insert_str(0, "(?i)");
    }

    let mut out = String::new();
    out.push_str(&format!(
        "- name: {}\n",
        yaml_quote(&format!("Remove lines matching {} from {}", pattern, path))
    ));
    out.push_str("  ansible.builtin.lineinfile:\n");
    out.push_str(&format!("    path: {}\n", yaml_quote(&path)));
    out.push_str(&format!("    regexp: {}\n", yaml_quote(&pattern)));
    out.push_str("    state: absent");
    Ok(out)
}

pub(super) fn ansible_set_config_value(call: &MacroCall<'_>) -> Result<String, RenderError> {
    Ok(ConfigValue::from_call(call)?.ansible())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, expand};
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_quoting() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(yaml_quote("it's"), "'it''s'");
        assert_eq!(escape_regex("a.b(c)"), r"a\.b\(c\)");
        assert_eq!(sed_delimit(r"^/etc/x\/y"), r"^\/etc\/x\/y");
        assert_eq!(slug("Client-Alive.Interval"), "client_alive_interval");
    }

    #[test]
    fn test_line_absent_backs_up_and_restores() {
        let out = expand(
            "bash_ensure_line_absent",
            &ctx("rhel9"),
            &[("path", Value::from("/etc/login.defs")), ("pattern", Value::from("^PASS_MIN_DAYS"))],
        )
        .unwrap();
        assert!(out.contains("cp -p '/etc/login.defs' '/etc/login.defs.bak'"));
        assert!(out.contains("sed -i -E '/^PASS_MIN_DAYS/d' '/etc/login.defs'"));
        assert!(out.contains("rm -f '/etc/login.defs.bak'"));
        assert!(out.contains("mv -f '/etc/login.defs.bak' '/etc/login.defs'"));
    }

    #[test]
    fn test_set_config_value_composes_steps() {
        let out = expand(
            "bash_set_config_value",
            &ctx("rhel9"),
            &[
                ("path", Value::from("/etc/security/pwquality.conf")),
                ("parameter", Value::from("minlen")),
                ("value", Value::Integer(15)),
                ("separator", Value::from(" = ")),
            ],
        )
        .unwrap();
        let touch = out.find("touch '/etc/security/pwquality.conf'").unwrap();
        let remove = out.find("sed -i -E '/^[[:space:]]*minlen([[:space:]]|=)/d'").unwrap();
        let insert = out.find("LINE='minlen = 15'").unwrap();
        assert!(touch < remove && remove < insert);
    }

    #[test]
    fn test_set_config_value_without_create_fails_loudly() {
        let out = expand(
            "bash_set_config_value",
            &ctx("rhel9"),
            &[
                ("path", Value::from("/etc/x.conf")),
                ("parameter", Value::from("a")),
                ("value", Value::from("b")),
                ("create", Value::Boolean(false)),
            ],
        )
        .unwrap();
        assert!(out.contains("exit 1"));
        assert!(!out.contains("touch"));
    }

    #[test]
    fn test_anchors_are_exclusive() {
        let err = expand(
            "bash_ensure_line_present",
            &ctx("rhel9"),
            &[
                ("path", Value::from("/etc/x")),
                ("line", Value::from("a")),
                ("insert_after", Value::from("^b")),
                ("insert_before", Value::from("^c")),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_ansible_set_config_value_three_steps() {
        let out = expand(
            "ansible_set_config_value",
            &ctx("rhel9"),
            &[
                ("path", Value::from("/etc/login.defs")),
                ("parameter", Value::from("PASS_MAX_DAYS")),
                ("value", Value::Integer(60)),
                ("insert_after", Value::from("^#?PASS_MIN_DAYS")),
            ],
        )
        .unwrap();
        assert_eq!(out.matches("- name:").count(), 3);
        assert!(out.contains(r"regexp: '^\s*PASS_MAX_DAYS(\s|=)'"));
        assert!(out.contains("register: dupes_pass_max_days"));
        assert!(out.contains("when: dupes_pass_max_days.found is defined and dupes_pass_max_days.found > 1"));
        assert!(out.contains("line: 'PASS_MAX_DAYS 60'"));
        assert!(out.contains("insertafter: '^#?PASS_MIN_DAYS'"));
    }
}
