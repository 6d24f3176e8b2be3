//! Template expansion
//!
//! Walks a parsed [`Template`] against a [`RenderContext`]: placeholders are
//! looked up, macro call-sites are dispatched through the registry, and
//! conditional blocks pick their branch. The result then goes through
//! [`postprocess`] and [`with_preamble`] before it becomes a script.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::target::RenderTarget;
use crate::value::Value;

use super::context::RenderContext;
use super::error::RenderError;
use super::macros::{self, escape_regex, shell_quote};
use super::template::{Arg, CompareOp, Condition, Expr, Node, Template};

/// Expand a template for one target
pub fn expand(template: &Template, target: RenderTarget, ctx: &RenderContext) -> Result<String, RenderError> {
    let eval = Evaluator { template, target, ctx };
    let mut out = String::new();
    eval.nodes(template.nodes(), &mut out)?;
    Ok(out)
}

struct Evaluator<'a> {
    template: &'a Template,
    target: RenderTarget,
    ctx: &'a RenderContext,
}

impl Evaluator<'_> {
    fn nodes(&self, nodes: &[Node], out: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output { expr, indent, .. } => {
                    let text = self.expr(expr)?.to_string();
                    match indent {
                        None => out.push_str(&text),
                        Some(indent) => push_indented(out, &text, indent),
                    }
                }
                Node::If { branches, otherwise } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if self.condition(cond)? {
                            self.nodes(body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.nodes(otherwise, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn expr(&self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.ctx.get(name).cloned().ok_or_else(|| RenderError::UnresolvedPlaceholder {
                template: self.template.name().to_string(),
                name: name.clone(),
            }),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.expr(item).map(|v| v.to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
            Expr::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.expr(part)?.to_string());
                }
                Ok(Value::String(text))
            }
            Expr::Filter { expr, filter } => {
                let text = self.expr(expr)?.to_string();
                self.filter(&text, filter).map(Value::String)
            }
            Expr::Call { name, args } => self.call(name, args).map(Value::String),
        }
    }

    fn filter(&self, text: &str, filter: &str) -> Result<String, RenderError> {
        match filter {
            "escape_regex" => Ok(escape_regex(text)),
            "upper" => Ok(text.to_uppercase()),
            "lower" => Ok(text.to_lowercase()),
            "quote" => Ok(shell_quote(text)),
            other => Err(RenderError::UnknownFilter {
                template: self.template.name().to_string(),
                name: other.to_string(),
            }),
        }
    }

    fn call(&self, name: &str, args: &[Arg]) -> Result<String, RenderError> {
        let spec = macros::lookup(name).ok_or_else(|| RenderError::UnknownMacro {
            template: self.template.name().to_string(),
            name: name.to_string(),
        })?;
        if spec.target != self.target {
            return Err(RenderError::WrongTarget {
                template: self.template.name().to_string(),
                name: name.to_string(),
                expected: spec.target,
                actual: self.target,
            });
        }

        let mut positional = Vec::new();
        let mut named = BTreeMap::new();
        for arg in args {
            let value = self.expr(&arg.value)?;
            match &arg.name {
                Some(key) => {
                    if named.insert(key.clone(), value).is_some() {
                        return Err(RenderError::MacroArgument {
                            template: self.template.name().to_string(),
                            name: name.to_string(),
                            message: format!("argument '{}' given twice", key),
                        });
                    }
                }
                None => positional.push(value),
            }
        }

        tracing::trace!(template = self.template.name(), macro_name = name, "Expanding macro");
        spec.invoke(self.template.name(), self.ctx, positional, named)
    }

    /// Undefined placeholders are false in conditions
    fn lenient(&self, expr: &Expr) -> Result<Option<Value>, RenderError> {
        match expr {
            Expr::Var(name) => Ok(self.ctx.get(name).cloned()),
            other => self.expr(other).map(Some),
        }
    }

    fn condition(&self, cond: &Condition) -> Result<bool, RenderError> {
        match cond {
            Condition::Truthy(expr) => Ok(self.lenient(expr)?.is_some_and(|v| v.is_truthy())),
            Condition::Not(inner) => Ok(!self.condition(inner)?),
            Condition::And(a, b) => Ok(self.condition(a)? && self.condition(b)?),
            Condition::Or(a, b) => Ok(self.condition(a)? || self.condition(b)?),
            Condition::Compare { lhs, op, rhs } => {
                let lhs = self.lenient(lhs)?;
                let rhs = self.lenient(rhs)?;
                let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
                    return Ok(matches!(op, CompareOp::Ne | CompareOp::NotIn));
                };
                let lhs = lhs.to_string();
                Ok(match op {
                    CompareOp::Eq => lhs == rhs.to_string(),
                    CompareOp::Ne => lhs != rhs.to_string(),
                    CompareOp::In => rhs.as_list().contains(&lhs),
                    CompareOp::NotIn => !rhs.as_list().contains(&lhs),
                })
            }
        }
    }
}

fn push_indented(out: &mut String, text: &str, indent: &str) {
    if text.is_empty() {
        return;
    }
    for line in text.lines() {
        if !line.is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
        out.push('\n');
    }
}

// ============================================================================
// Finishing
// ============================================================================

/// Normalize whitespace of an expanded body
///
/// Trailing whitespace is trimmed, leading blank lines dropped, runs of blank
/// lines collapsed to one, and the text ends in exactly one newline (or is
/// empty).
pub fn postprocess(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if blank_run > 0 && !out.is_empty() {
            out.push('\n');
        }
        blank_run = 0;
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Prepend the target's preamble when the body has a construct of the target
/// and no preamble yet
pub fn with_preamble(text: &str, target: RenderTarget, provenance: &str) -> String {
    if text.starts_with(target.leading_marker()) {
        return text.to_string();
    }
    let has_construct = match target {
        RenderTarget::Bash => text.lines().any(|l| {
            let l = l.trim_start();
            !l.is_empty() && !l.starts_with('#')
        }),
        RenderTarget::Ansible => text.lines().any(|l| l.trim_start().starts_with("- name:")),
    };
    if !has_construct {
        return text.to_string();
    }

    let mut out = String::new();
    match target {
        RenderTarget::Bash => out.push_str("#!/usr/bin/env bash\n"),
        RenderTarget::Ansible => out.push_str("---\n"),
    }
    out.push_str(&format!("# {}\n\n", provenance));
    out.push_str(text);
    out
}

// ============================================================================
// Template cache
// ============================================================================

/// Parsed templates keyed by file path, kept for one run
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: BTreeMap<PathBuf, Template>,
}

impl TemplateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a template file, once
    ///
    /// The template is named `<dir>/<file>` after its last two path
    /// components, e.g. `sshd_lineinfile/bash.template`.
    pub fn load(&mut self, path: &Path) -> Result<&Template, RenderError> {
        if !self.templates.contains_key(path) {
            let source = std::fs::read_to_string(path).map_err(|e| RenderError::TemplateIo {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let template = Template::parse(template_name(path), &source)?;
            tracing::debug!(path = %path.display(), "Parsed template");
            self.templates.insert(path.to_path_buf(), template);
        }
        self.templates.get(path).ok_or_else(|| RenderError::TemplateIo {
            path: path.to_path_buf(),
            message: "template vanished from cache".to_string(),
        })
    }

    /// Number of parsed templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether nothing was parsed yet
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn template_name(path: &Path) -> String {
    let file = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    match path.parent().and_then(|p| p.file_name()) {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), file),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::platform::Platform;

    fn ctx() -> RenderContext {
        let mut ctx = RenderContext::for_platform(Platform::lookup("rhel9"));
        ctx.set("PARAMETER", "ClientAliveInterval");
        ctx.set("VALUE", "600");
        ctx.set("EMPTY", "");
        ctx
    }

    fn render(target: RenderTarget, source: &str) -> Result<String, RenderError> {
        let template = Template::parse("t/bash.template", source)?;
        expand(&template, target, &ctx())
    }

    #[test]
    fn test_placeholders_and_filters() {
        let out = render(
            RenderTarget::Bash,
            "echo {{{ PARAMETER }}}={{{ VALUE }}} {{{ PARAMETER|upper }}} {{{ \"a.b\"|escape_regex }}}\n",
        )
        .unwrap();
        assert_eq!(out, "echo ClientAliveInterval=600 CLIENTALIVEINTERVAL a\\.b\n");
    }

    #[test]
    fn test_unresolved_placeholder_is_fatal() {
        let err = render(RenderTarget::Bash, "echo {{{ MISSING }}}\n").unwrap_err();
        assert!(matches!(
            err,
            RenderError::UnresolvedPlaceholder { ref name, .. } if name == "MISSING"
        ));
    }

    #[test]
    fn test_conditions_treat_undefined_as_false() {
        let source = "{{% if MISSING %}}\nyes\n{{% elif product == \"rhel9\" %}}\nrhel9\n{{% else %}}\nno\n{{% endif %}}\n";
        assert_eq!(render(RenderTarget::Bash, source).unwrap(), "rhel9\n");

        let source = "{{% if product in [\"rhel8\", \"rhel9\"] and not EMPTY %}}\nrpm\n{{% endif %}}\n";
        assert_eq!(render(RenderTarget::Bash, source).unwrap(), "rpm\n");

        let source = "{{% if MISSING != \"x\" %}}\ndiffers\n{{% endif %}}\n";
        assert_eq!(render(RenderTarget::Bash, source).unwrap(), "differs\n");
    }

    #[test]
    fn test_standalone_macro_is_indented() {
        let source = "if true; then\n    {{{ bash_package_install(\"aide\") }}}\nfi\n";
        let out = render(RenderTarget::Bash, source).unwrap();
        assert_eq!(
            out,
            "if true; then\n    if ! rpm -q --quiet 'aide'; then\n        dnf install -y 'aide'\n    fi\nfi\n"
        );
    }

    #[test]
    fn test_macro_errors_name_macro_and_template() {
        let err = render(RenderTarget::Bash, "{{{ bash_frobnicate() }}}\n").unwrap_err();
        assert_eq!(err.macro_name(), Some("bash_frobnicate"));
        assert_eq!(err.template(), Some("t/bash.template"));

        let err = render(RenderTarget::Bash, "{{{ ansible_package_install(\"aide\") }}}\n").unwrap_err();
        assert!(matches!(err, RenderError::WrongTarget { .. }));

        let err = render(RenderTarget::Bash, "{{{ bash_package_install() }}}\n").unwrap_err();
        assert!(matches!(err, RenderError::MacroArgument { .. }));

        let err = render(RenderTarget::Bash, "{{{ VALUE|rot13 }}}\n").unwrap_err();
        assert!(matches!(err, RenderError::UnknownFilter { .. }));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let source = "{{{ bash_sshd_set(parameter=PARAMETER, value=VALUE) }}}\n";
        let a = render(RenderTarget::Bash, source).unwrap();
        let b = render(RenderTarget::Bash, source).unwrap();
        assert_eq!(a, b);
        assert!(!a.contains("{{{"));
    }

    #[test]
    fn test_postprocess() {
        assert_eq!(postprocess("\n\na  \n\n\n\nb\t\n\n"), "a\n\nb\n");
        assert_eq!(postprocess(""), "");
        assert_eq!(postprocess("x"), "x\n");
    }

    #[test]
    fn test_preamble() {
        let bash = with_preamble("echo hi\n", RenderTarget::Bash, "Remediation for AC-2 on rhel9");
        assert_eq!(bash, "#!/usr/bin/env bash\n# Remediation for AC-2 on rhel9\n\necho hi\n");
        assert_eq!(with_preamble(&bash, RenderTarget::Bash, "x"), bash);
        assert_eq!(with_preamble("# only a comment\n", RenderTarget::Bash, "x"), "# only a comment\n");

        let yaml = with_preamble("- name: 'x'\n  debug: {}\n", RenderTarget::Ansible, "p");
        assert!(yaml.starts_with("---\n# p\n\n- name:"));
    }

    #[test]
    fn test_template_cache_parses_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg").join("bash.template");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{{{ bash_package_install(PKGNAME) }}}\n").unwrap();

        let mut cache = TemplateCache::new();
        assert_eq!(cache.load(&path).unwrap().name(), "pkg/bash.template");
        std::fs::remove_file(&path).unwrap();
        assert!(cache.load(&path).is_ok());
        assert_eq!(cache.len(), 1);

        let err = cache.load(&dir.path().join("nope/bash.template")).unwrap_err();
        assert!(matches!(err, RenderError::TemplateIo { .. }));
    }
}
