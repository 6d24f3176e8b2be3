//! Macro library
//!
//! The macro set is closed: every macro a template may call is listed in
//! [`REGISTRY`] with the target it belongs to and its parameter names.
//! Macros are plain functions of their arguments and the render context;
//! composite macros call the simpler ones directly.

mod audit;
mod lines;
mod package;
mod sshd;

use std::collections::BTreeMap;

use crate::target::RenderTarget;
use crate::value::Value;

use super::context::RenderContext;
use super::error::RenderError;

pub(crate) use lines::{escape_regex, shell_quote};

/// Signature shared by every macro
pub type MacroFn = fn(&MacroCall<'_>) -> Result<String, RenderError>;

/// Registry entry
#[derive(Debug, Clone, Copy)]
pub struct MacroSpec {
    /// Name templates call the macro by
    pub name: &'static str,
    /// Target whose templates may call it
    pub target: RenderTarget,
    /// Parameter names, in positional order
    pub params: &'static [&'static str],
    expand: MacroFn,
}

const LINE_ABSENT: &[&str] = &["path", "pattern", "case_insensitive"];
const LINE_PRESENT: &[&str] = &["path", "line", "insert_after", "insert_before", "create"];
const CONFIG_VALUE: &[&str] = &[
    "path",
    "parameter",
    "value",
    "separator",
    "separator_regex",
    "prefix_regex",
    "insert_after",
    "insert_before",
    "create",
    "case_insensitive",
];
const PACKAGE: &[&str] = &["package", "pkg_manager"];
const AUDIT_SYSCALL: &[&str] = &[
    "tool",
    "action_arch_filters",
    "other_filters",
    "auid_filters",
    "syscalls",
    "key",
    "syscall_grouping",
    "rules_file",
    "rules_dir",
];
const AUDIT_WATCH: &[&str] = &["tool", "path", "required_access_bits", "key", "rules_file", "rules_dir"];
const SSHD: &[&str] = &["parameter", "value", "config_file", "config_dir", "override_file", "fragments"];

/// Every macro templates may call
pub static REGISTRY: &[MacroSpec] = &[
    MacroSpec {
        name: "bash_ensure_line_absent",
        target: RenderTarget::Bash,
        params: LINE_ABSENT,
        expand: lines::bash_ensure_line_absent,
    },
    MacroSpec {
        name: "bash_ensure_line_present",
        target: RenderTarget::Bash,
        params: LINE_PRESENT,
        expand: lines::bash_ensure_line_present,
    },
    MacroSpec {
        name: "bash_set_config_value",
        target: RenderTarget::Bash,
        params: CONFIG_VALUE,
        expand: lines::bash_set_config_value,
    },
    MacroSpec {
        name: "bash_package_install",
        target: RenderTarget::Bash,
        params: PACKAGE,
        expand: package::bash_package_install,
    },
    MacroSpec {
        name: "bash_package_remove",
        target: RenderTarget::Bash,
        params: PACKAGE,
        expand: package::bash_package_remove,
    },
    MacroSpec {
        name: "bash_fix_audit_syscall_rule",
        target: RenderTarget::Bash,
        params: AUDIT_SYSCALL,
        expand: audit::bash_fix_audit_syscall_rule,
    },
    MacroSpec {
        name: "bash_fix_audit_watch_rule",
        target: RenderTarget::Bash,
        params: AUDIT_WATCH,
        expand: audit::bash_fix_audit_watch_rule,
    },
    MacroSpec {
        name: "bash_sshd_set",
        target: RenderTarget::Bash,
        params: SSHD,
        expand: sshd::bash_sshd_set,
    },
    MacroSpec {
        name: "ansible_ensure_line_absent",
        target: RenderTarget::Ansible,
        params: LINE_ABSENT,
        expand: lines::ansible_ensure_line_absent,
    },
    MacroSpec {
        name: "ansible_set_config_value",
        target: RenderTarget::Ansible,
        params: CONFIG_VALUE,
        expand: lines::ansible_set_config_value,
    },
    MacroSpec {
        name: "ansible_package_install",
        target: RenderTarget::Ansible,
        params: PACKAGE,
        expand: package::ansible_package_install,
    },
    MacroSpec {
        name: "ansible_package_remove",
        target: RenderTarget::Ansible,
        params: PACKAGE,
        expand: package::ansible_package_remove,
    },
    MacroSpec {
        name: "ansible_fix_audit_syscall_rule",
        target: RenderTarget::Ansible,
        params: AUDIT_SYSCALL,
        expand: audit::ansible_fix_audit_syscall_rule,
    },
    MacroSpec {
        name: "ansible_fix_audit_watch_rule",
        target: RenderTarget::Ansible,
        params: AUDIT_WATCH,
        expand: audit::ansible_fix_audit_watch_rule,
    },
    MacroSpec {
        name: "ansible_sshd_set",
        target: RenderTarget::Ansible,
        params: SSHD,
        expand: sshd::ansible_sshd_set,
    },
];

/// Find a macro by name
pub fn lookup(name: &str) -> Option<&'static MacroSpec> {
    REGISTRY.iter().find(|m| m.name == name)
}

impl MacroSpec {
    /// Bind arguments and run the macro
    pub fn invoke(
        &'static self,
        template: &str,
        ctx: &RenderContext,
        positional: Vec<Value>,
        named: BTreeMap<String, Value>,
    ) -> Result<String, RenderError> {
        let call = MacroCall {
            spec: self,
            template,
            ctx,
            positional,
            named,
        };
        call.check_arity()?;
        (self.expand)(&call)
    }
}

/// One invocation of a macro with its bound arguments
#[derive(Debug)]
pub struct MacroCall<'a> {
    spec: &'static MacroSpec,
    template: &'a str,
    ctx: &'a RenderContext,
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl<'a> MacroCall<'a> {
    /// Render context of the call
    pub fn ctx(&self) -> &RenderContext {
        self.ctx
    }

    /// A rendering error naming this macro and template
    pub fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::MacroArgument {
            template: self.template.to_string(),
            name: self.spec.name.to_string(),
            message: message.into(),
        }
    }

    fn check_arity(&self) -> Result<(), RenderError> {
        if self.positional.len() > self.spec.params.len() {
            return Err(self.error(format!(
                "takes at most {} arguments, got {}",
                self.spec.params.len(),
                self.positional.len()
            )));
        }
        for name in self.named.keys() {
            let Some(pos) = self.spec.params.iter().position(|p| p == name) else {
                return Err(self.error(format!("unexpected argument '{}'", name)));
            };
            if pos < self.positional.len() {
                return Err(self.error(format!("argument '{}' given twice", name)));
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.named.get(name) {
            return Some(v);
        }
        let pos = self.spec.params.iter().position(|p| *p == name)?;
        self.positional.get(pos)
    }

    /// Argument text as given; empty is a value
    pub fn raw(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string())
    }

    /// Argument as text; empty counts as absent
    pub fn optional(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.to_string()).filter(|s| !s.is_empty())
    }

    /// Argument that must be present and non-empty
    pub fn required(&self, name: &str) -> Result<String, RenderError> {
        self.optional(name)
            .ok_or_else(|| self.error(format!("missing required argument '{}'", name)))
    }

    /// Argument with a default
    pub fn string_or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    /// Argument, else a context variable; one of them must be set
    pub fn arg_or_context(&self, name: &str, ctx_key: &str) -> Result<String, RenderError> {
        self.optional(name)
            .or_else(|| self.ctx.get_str(ctx_key).filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                self.error(format!(
                    "argument '{}' not given and '{}' is not set in the render context",
                    name, ctx_key
                ))
            })
    }

    /// Argument as a list; scalars split on commas
    pub fn list(&self, name: &str) -> Vec<String> {
        self.get(name).map(|v| v.as_list()).unwrap_or_default()
    }

    /// Argument as a flag
    pub fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name).map(|v| v.is_truthy()).unwrap_or(default)
    }

    /// Whether the argument was given at all
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_registry_is_closed_and_unique() {
        let mut names: Vec<&str> = REGISTRY.iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), REGISTRY.len());
        assert_eq!(REGISTRY.len(), 15);
        for spec in REGISTRY {
            let prefix = format!("{}_", spec.target);
            assert!(spec.name.starts_with(&prefix), "{} has wrong target", spec.name);
        }
    }

    #[test]
    fn test_argument_binding() {
        let ctx = ctx("rhel9");
        let spec = lookup("bash_package_install").unwrap();

        let positional = spec.invoke("t", &ctx, vec![Value::from("aide")], BTreeMap::new());
        assert!(positional.unwrap().contains("'aide'"));

        let err = spec
            .invoke("t", &ctx, vec![], BTreeMap::from([("pkg".to_string(), Value::from("aide"))]))
            .unwrap_err();
        assert!(matches!(err, RenderError::MacroArgument { .. }));

        let err = spec
            .invoke(
                "t",
                &ctx,
                vec![Value::from("aide")],
                BTreeMap::from([("package".to_string(), Value::from("aide"))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("given twice"));

        let err = spec.invoke("t", &ctx, vec![], BTreeMap::new()).unwrap_err();
        assert_eq!(err.macro_name(), Some("bash_package_install"));
        assert_eq!(err.template(), Some("t"));
    }
}
