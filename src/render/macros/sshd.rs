//! sshd setting macros
//!
//! A setting may already be defined in `sshd_config.d` fragments as well as
//! in the main file. Conflicting fragment definitions are commented out
//! first. The canonical definition then goes into the override fragment on
//! platforms whose sshd reads fragments (with the main file's definition
//! commented out too), or into the main file before the first `Match` block.

use crate::render::error::RenderError;

use super::lines::{escape_regex, sed_delimit, shell_quote, slug, yaml_quote, Anchor, ConfigValue};
use super::MacroCall;

struct SshdSetting {
    parameter: String,
    value: String,
    config_file: String,
    config_dir: String,
    override_file: String,
    fragments: bool,
}

impl SshdSetting {
    fn from_call(call: &MacroCall<'_>) -> Result<Self, RenderError> {
        let fragments = if call.has("fragments") {
            call.flag("fragments", false)
        } else {
            call.ctx().get_bool("sshd_fragments").unwrap_or(false)
        };
        Ok(Self {
            parameter: call.required("parameter")?,
            value: call.required("value")?,
            config_file: call.arg_or_context("config_file", "sshd_config_file")?,
            config_dir: call.arg_or_context("config_dir", "sshd_config_dir")?,
            override_file: call.arg_or_context("override_file", "sshd_override_file")?,
            fragments,
        })
    }

    fn config_value(&self, path: &str, anchor: Anchor) -> ConfigValue {
        ConfigValue {
            path: path.to_string(),
            parameter: self.parameter.clone(),
            value: self.value.clone(),
            separator: " ".to_string(),
            separator_regex: None,
            prefix_regex: None,
            anchor,
            create: true,
            case_insensitive: true,
        }
    }

    fn target(&self) -> (&str, Anchor, Anchor) {
        if self.fragments {
            (&self.override_file, Anchor::Start, Anchor::Start)
        } else {
            (
                &self.config_file,
                Anchor::Before("^[[:space:]]*[Mm]atch[[:space:]]".to_string()),
                Anchor::Before(r"(?i)^\s*match\s".to_string()),
            )
        }
    }
}

pub(super) fn bash_sshd_set(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let s = SshdSetting::from_call(call)?;
    let comment_out = shell_quote(&format!(
        "s/^([[:space:]]*{}([[:space:]]|=).*)$/# \\1/I",
        sed_delimit(&escape_regex(&s.parameter))
    ));
    let dir = shell_quote(&s.config_dir);

    let mut out = String::new();
    out.push_str(&format!("if [ -d {dir} ]; then\n"));
    out.push_str(&format!(
        "    find -L {dir} -maxdepth 1 -type f -name '*.conf' -print0 | while IFS= read -r -d '' sshd_fragment; do\n"
    ));
    if s.fragments {
        out.push_str(&format!(
            "        [ \"$sshd_fragment\" = {} ] && continue\n",
            shell_quote(&s.override_file)
        ));
    }
    out.push_str(&format!("        LC_ALL=C sed -i -E {comment_out} \"$sshd_fragment\"\n"));
    out.push_str("    done\n");
    out.push_str("fi\n");

    if s.fragments {
        let main = shell_quote(&s.config_file);
        out.push_str(&format!("if [ -e {main} ]; then\n"));
        out.push_str(&format!("    LC_ALL=C sed -i -E {comment_out} {main}\n"));
        out.push_str("fi\n");
    }

    let (path, anchor, _) = s.target();
    let path = path.to_string();
    out.push_str(&s.config_value(&path, anchor).bash());
    Ok(out)
}

pub(super) fn ansible_sshd_set(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let s = SshdSetting::from_call(call)?;
    let register = format!("sshd_fragments_{}", slug(&s.parameter));
    let comment_re = yaml_quote(&format!(r"(?i)^(\s*{}(\s|=).*)$", escape_regex(&s.parameter)));

    let mut out = String::new();
    out.push_str(&format!(
        "- name: {}\n",
        yaml_quote(&format!("Find sshd configuration fragments for {}", s.parameter))
    ));
    out.push_str("  ansible.builtin.find:\n");
    out.push_str(&format!("    paths: {}\n", yaml_quote(&s.config_dir)));
    out.push_str("    patterns: '*.conf'\n");
    out.push_str("    follow: true\n");
    out.push_str(&format!("  register: {register}\n"));
    out.push('\n');

    out.push_str(&format!(
        "- name: {}\n",
        yaml_quote(&format!("Comment out {} in sshd configuration fragments", s.parameter))
    ));
    out.push_str("  ansible.builtin.replace:\n");
    out.push_str("    path: '{{ item.path }}'\n");
    out.push_str(&format!("    regexp: {comment_re}\n"));
    out.push_str("    replace: '# \\1'\n");
    out.push_str(&format!("  loop: '{{{{ {register}.files }}}}'\n"));
    if s.fragments {
        out.push_str(&format!(
            "  when: \"item.path != {}\"\n",
            yaml_quote(&s.override_file)
        ));
    }
    out.push('\n');

    if s.fragments {
        out.push_str(&format!(
            "- name: {}\n",
            yaml_quote(&format!("Comment out {} in {}", s.parameter, s.config_file))
        ));
        out.push_str("  ansible.builtin.replace:\n");
        out.push_str(&format!("    path: {}\n", yaml_quote(&s.config_file)));
        out.push_str(&format!("    regexp: {comment_re}\n"));
        out.push_str("    replace: '# \\1'\n");
        out.push('\n');
    }

    let (path, _, anchor) = s.target();
    let path = path.to_string();
    out.push_str(&s.config_value(&path, anchor).ansible());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, expand};
    use crate::value::Value;

    fn args() -> Vec<(&'static str, Value)> {
        vec![
            ("parameter", Value::from("ClientAliveInterval")),
            ("value", Value::Integer(600)),
        ]
    }

    #[test]
    fn test_fragment_platform_writes_override() {
        let out = expand("bash_sshd_set", &ctx("rhel9"), &args()).unwrap();
        assert!(out.contains("find -L '/etc/ssh/sshd_config.d'"));
        assert!(out.contains("= '/etc/ssh/sshd_config.d/00-complianceascode-hardening.conf' ] && continue"));
        assert!(out.contains(
            "sed -i -E 's/^([[:space:]]*ClientAliveInterval([[:space:]]|=).*)$/# \\1/I' '/etc/ssh/sshd_config'"
        ));
        assert!(out.contains("touch '/etc/ssh/sshd_config.d/00-complianceascode-hardening.conf'"));
        assert!(out.contains("LINE='ClientAliveInterval 600'"));
        assert!(out.contains("MODE=start"));
    }

    #[test]
    fn test_main_file_platform_inserts_before_match() {
        let out = expand("bash_sshd_set", &ctx("rhel8"), &args()).unwrap();
        assert!(!out.contains("&& continue"));
        assert!(out.contains("touch '/etc/ssh/sshd_config'"));
        assert!(out.contains("MODE=before"));
        assert!(out.contains("ANCHOR='^[[:space:]]*[Mm]atch[[:space:]]'"));
        assert!(out.contains("sed -i -E '/^[[:space:]]*ClientAliveInterval([[:space:]]|=)/Id'"));
    }

    #[test]
    fn test_explicit_fragments_flag_overrides_platform() {
        let mut a = args();
        a.push(("fragments", Value::Boolean(false)));
        let out = expand("bash_sshd_set", &ctx("rhel9"), &a).unwrap();
        assert!(out.contains("MODE=before"));
    }

    #[test]
    fn test_ansible_sshd_set() {
        let out = expand("ansible_sshd_set", &ctx("rhel9"), &args()).unwrap();
        assert!(out.contains("register: sshd_fragments_clientaliveinterval"));
        assert!(out.contains("loop: '{{ sshd_fragments_clientaliveinterval.files }}'"));
        assert!(out.contains("path: '{{ item.path }}'"));
        assert!(out.contains(r"regexp: '(?i)^(\s*ClientAliveInterval(\s|=).*)$'"));
        assert!(out.contains("insertbefore: BOF"));
        assert!(!out.contains("{{{"));
    }
}
