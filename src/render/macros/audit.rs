//! Audit rule macros
//!
//! The bash macros embed an awk program running the same decision tree as
//! [`AuditRuleStore::plan`](crate::render::AuditRuleStore::plan): it prints
//! `NOTHING`, `REWRITE<TAB>file<TAB>line<TAB>new rule` or `APPEND`, and the
//! surrounding shell applies the decision.

use sha2::{Digest, Sha256};

use crate::render::audit::{AuditField, AuditRuleSpec, AuditTool};
use crate::render::error::RenderError;

use super::lines::{escape_regex, shell_quote, yaml_quote};
use super::MacroCall;

/// Decision program; inputs come from `AUDIT_*` environment variables
const DECIDE_AWK: &str = r#"function parse(line, fl, va,    n, t, i, c) {
    delete fl
    delete va
    n = split(line, t, " ")
    c = 0
    for (i = 1; i <= n; i++) {
        c++
        fl[c] = t[i]
        va[c] = ""
        if (substr(t[i], 1, 1) == "-" && i < n) {
            va[c] = t[i + 1]
            i++
        }
    }
    return c
}
function satisfies(hf, hv, wf, wv,    k) {
    if (hf != wf) return 0
    if (hv == wv) return 1
    if (hf != "-p") return 0
    for (k = 1; k <= length(wv); k++) if (index(hv, substr(wv, k, 1)) == 0) return 0
    return 1
}
function rewrite(n, fl, va, ns, last_s, missing,    out, i, k, c, ms) {
    out = ""
    c = split(missing, ms, " ")
    for (i = 1; i <= n; i++) {
        out = out (out == "" ? "" : " ") fl[i]
        if (i == last_s && ns == 1) {
            out = out " " va[i]
            for (k = 1; k <= c; k++) out = out "," ms[k]
        } else if (va[i] != "") {
            out = out " " va[i]
        }
        if (i == last_s && ns > 1) for (k = 1; k <= c; k++) out = out " -S " ms[k]
    }
    return out
}
BEGIN {
    np = parse(ENVIRON["AUDIT_PREFIX"], dpf, dpv)
    nr = parse(ENVIRON["AUDIT_FILTERS"], drf, drv)
    nsys = split(ENVIRON["AUDIT_SYSCALLS"], dsys, " ")
    ng = split(ENVIRON["AUDIT_GROUP"], grp, " ")
    for (i = 1; i <= ng; i++) group[grp[i]] = 1
    key = ENVIRON["AUDIT_KEY"]
    full = 0
    merge_file = ""
}
/^[ \t]*(#|$)/ { next }
full { next }
{
    n = parse($0, lf, lv)
    m = 0
    ns = 0
    last_s = 0
    lkey = ""
    delete have
    for (i = 1; i <= n; i++) {
        if (lf[i] == "-S") {
            ns++
            last_s = i
            c = split(lv[i], sc, ",")
            for (j = 1; j <= c; j++) if (sc[j] != "") have[sc[j]] = 1
        } else if (lf[i] == "-k") {
            lkey = lv[i]
        } else if (lf[i] == "-F" && substr(lv[i], 1, 4) == "key=") {
            lkey = substr(lv[i], 5)
        } else {
            m++
            rf[m] = lf[i]
            rv[m] = lv[i]
        }
    }
    if (m < np) next
    for (i = 1; i <= np; i++) if (rf[i] != dpf[i] || rv[i] != dpv[i]) next
    delete used
    for (i = 1; i <= nr; i++) {
        found = 0
        for (j = np + 1; j <= m; j++) {
            if (!(j in used) && satisfies(rf[j], rv[j], drf[i], drv[i])) {
                used[j] = 1
                found = 1
                break
            }
        }
        if (!found) next
    }
    if (m - np != nr) next
    if (lkey != key) next
    if (nsys == 0) {
        if (ns == 0) full = 1
        next
    }
    if (ns == 0) next
    missing = ""
    for (i = 1; i <= nsys; i++) if (!(dsys[i] in have)) missing = missing (missing == "" ? "" : " ") dsys[i]
    if (missing == "") {
        full = 1
        next
    }
    if (merge_file != "") next
    shared = 0
    for (s in have) if (s in group) shared = 1
    if (shared) {
        merge_file = FILENAME
        merge_line = FNR
        merge_rule = rewrite(n, lf, lv, ns, last_s, missing)
    }
}
END {
    if (full) print "NOTHING"
    else if (merge_file != "") printf "REWRITE\t%s\t%d\t%s\n", merge_file, merge_line, merge_rule
    else print "APPEND"
}"#;

const REPLACE_LINE_AWK: &str = r#"FNR == ENVIRON["LINE_NO"] + 0 { print ENVIRON["NEW_RULE"]; next } { print }"#;

/// Where rules live for the chosen tool
struct RuleStoreLocation {
    tool: AuditTool,
    rules_file: String,
    rules_dir: String,
}

impl RuleStoreLocation {
    fn from_call(call: &MacroCall<'_>) -> Result<Self, RenderError> {
        let tool_name = call.arg_or_context("tool", "audit_tool")?;
        let tool = tool_name.parse::<AuditTool>().map_err(|e| call.error(e))?;
        Ok(Self {
            tool,
            rules_file: call.arg_or_context("rules_file", "audit_rules_file")?,
            rules_dir: call.arg_or_context("rules_dir", "audit_rules_dir")?,
        })
    }

    fn default_file(&self, key: &str) -> String {
        match self.tool {
            AuditTool::Auditctl => self.rules_file.clone(),
            AuditTool::Augenrules => format!("{}/{}.rules", self.rules_dir.trim_end_matches('/'), key),
        }
    }
}

fn bash_reconcile(store: &RuleStoreLocation, spec: &AuditRuleSpec) -> String {
    let default_file = shell_quote(&store.default_file(spec.key()));
    let full_rule = shell_quote(spec.full_rule());

    let mut out = String::new();
    out.push_str(&format!("# Audit rule ({}): {}\n", store.tool, spec.full_rule()));
    out.push_str("audit_rule_files=()\n");
    match store.tool {
        AuditTool::Auditctl => {
            let file = shell_quote(&store.rules_file);
            out.push_str(&format!("if [ -e {file} ]; then\n"));
            out.push_str(&format!("    audit_rule_files+=({file})\n"));
            out.push_str("fi\n");
        }
        AuditTool::Augenrules => {
            out.push_str(&format!(
                "for audit_rule_file in {}/*.rules; do\n",
                shell_quote(store.rules_dir.trim_end_matches('/'))
            ));
            out.push_str("    if [ -e \"$audit_rule_file\" ]; then\n");
            out.push_str("        audit_rule_files+=(\"$audit_rule_file\")\n");
            out.push_str("    fi\n");
            out.push_str("done\n");
        }
    }

    out.push_str("audit_decision=APPEND\n");
    out.push_str("if [ \"${#audit_rule_files[@]}\" -gt 0 ]; then\n");
    out.push_str(&format!(
        "    audit_decision=$(LC_ALL=C AUDIT_PREFIX={} AUDIT_FILTERS={} AUDIT_SYSCALLS={} AUDIT_GROUP={} AUDIT_KEY={} awk {} \"${{audit_rule_files[@]}}\")\n",
        shell_quote(&spec.prefix_text()),
        shell_quote(&spec.filters_text()),
        shell_quote(&spec.syscalls().join(" ")),
        shell_quote(&spec.grouping().join(" ")),
        shell_quote(spec.key()),
        shell_quote(DECIDE_AWK)
    ));
    out.push_str("fi\n");
    out.push_str("IFS=$'\\t' read -r audit_action audit_file audit_line audit_new_rule <<< \"$audit_decision\"\n");
    out.push_str("case \"$audit_action\" in\n");
    out.push_str("    REWRITE)\n");
    out.push_str(&format!(
        "        if NEW_RULE=\"$audit_new_rule\" LINE_NO=\"$audit_line\" awk {} \"$audit_file\" > \"$audit_file.tmp\"; then\n",
        shell_quote(REPLACE_LINE_AWK)
    ));
    out.push_str("            cat \"$audit_file.tmp\" > \"$audit_file\"\n");
    out.push_str("        fi\n");
    out.push_str("        rm -f \"$audit_file.tmp\"\n");
    out.push_str("        ;;\n");
    out.push_str("    APPEND)\n");
    out.push_str(&format!("        if [ ! -e {default_file} ]; then\n"));
    if let Some((dir, _)) = store.default_file(spec.key()).rsplit_once('/').filter(|(d, _)| !d.is_empty()) {
        out.push_str(&format!("            mkdir -p {}\n", shell_quote(dir)));
    }
    out.push_str(&format!("            touch {default_file}\n"));
    out.push_str(&format!("            chmod 0600 {default_file}\n"));
    out.push_str("        fi\n");
    out.push_str(&format!(
        "        if [ -s {default_file} ] && [ -n \"$(tail -c 1 {default_file})\" ]; then\n"
    ));
    out.push_str(&format!("            echo >> {default_file}\n"));
    out.push_str("        fi\n");
    out.push_str(&format!("        printf '%s\\n' {full_rule} >> {default_file}\n"));
    out.push_str("        ;;\n");
    out.push_str("esac");
    out
}

/// Python regex for `body` as whole whitespace-delimited tokens
fn token(body: &str) -> String {
    format!(r"(?<!\S)(?:{})(?!\S)", body)
}

fn field_body(field: &AuditField) -> String {
    if field.value.is_empty() {
        escape_regex(&field.flag)
    } else {
        format!(r"{}\s+{}", escape_regex(&field.flag), escape_regex(&field.value))
    }
}

const SYSCALL_FIELD: &str = r"-S\s+\S+";

/// A `-S` field whose list names one of `names` (a regex alternation)
fn syscall_listed(names: &str) -> String {
    token(&format!(r"-S\s+(?:\S*,)?(?:{})(?:,\S*)?", names))
}

/// Line pattern accepted exactly when [`AuditRuleStore::plan`] treats the
/// line as carrying the same prefix, filters and key as `spec`
///
/// Prefix fields come first and in order; filter fields follow in any order
/// and each appears as often as wanted; `-S` and key fields may sit anywhere.
///
/// [`AuditRuleStore::plan`]: crate::render::AuditRuleStore::plan
fn compatible_line(spec: &AuditRuleSpec) -> String {
    let key = format!(r"(?:-F\s+key=|-k\s+){}", escape_regex(spec.key()));
    let skip = format!("{}|{}", SYSCALL_FIELD, key);
    let step = |alternatives: &str| format!(r"\s*{}", token(alternatives));

    let mut counted: Vec<(String, usize)> = Vec::new();
    for field in spec.filter_fields() {
        let body = field_body(field);
        match counted.iter_mut().find(|(b, _)| *b == body) {
            Some((_, n)) => *n += 1,
            None => counted.push((body, 1)),
        }
    }

    let mut out = String::new();
    for (body, n) in &counted {
        let once = format!(".*{}", token(body));
        out.push_str(&format!("(?={})(?!{})", once.repeat(*n), once.repeat(n + 1)));
    }
    out.push_str(&format!("(?=.*{})", token(&key)));

    out.push_str(&format!("(?:{})*", step(&skip)));
    for field in spec.prefix_fields() {
        out.push_str(&step(&field_body(field)));
        out.push_str(&format!("(?:{})*", step(&skip)));
    }
    let mut tail = vec![skip];
    tail.extend(counted.into_iter().map(|(body, _)| body));
    out.push_str(&format!("(?:{})*", step(&tail.join("|"))));
    out.push_str(r"\s*$");
    out
}

/// Search patterns for rules that already cover `spec` and rules it may merge into
fn syscall_find_patterns(spec: &AuditRuleSpec) -> (String, String) {
    let line = compatible_line(spec);
    let covered: String = spec
        .syscalls()
        .iter()
        .map(|s| format!("(?=.*{})", syscall_listed(&escape_regex(s))))
        .collect();
    (
        format!("(?m)^{covered}{line}"),
        format!("(?m)^{}{line}", groupable(spec)),
    )
}

fn groupable(spec: &AuditRuleSpec) -> String {
    let group = spec
        .grouping()
        .iter()
        .map(|s| escape_regex(s))
        .collect::<Vec<_>>()
        .join("|");
    if group.is_empty() {
        "(?!)".to_string()
    } else {
        format!("(?=.*{})", syscall_listed(&group))
    }
}

/// `lineinfile` pattern and replacement adding `{{ item }}` after the last
/// `-S` field: into its list when the line has one `-S` field, as a new
/// field otherwise
fn syscall_merge_rewrite(spec: &AuditRuleSpec, several_fields: bool) -> (String, &'static str) {
    let field = r".*(?<!\S)-S\s";
    let (count, line) = if several_fields {
        (format!("(?={field}{field})"), r"\g<head> -S {{ item }}\g<tail>")
    } else {
        (format!("(?!{field}{field})"), r"\g<head>,{{ item }}\g<tail>")
    };
    let regexp = format!(
        r"^(?!.*{item}){group}{count}(?={line})(?P<head>.*(?<!\S)-S\s+\S+)(?P<tail>(?:(?!\s-S\s).)*)$",
        item = syscall_listed("{{ item }}"),
        group = groupable(spec),
        line = compatible_line(spec),
    );
    (regexp, line)
}

/// Short stable id for register names
fn rule_slug(spec: &AuditRuleSpec) -> String {
    let digest = Sha256::digest(spec.full_rule().as_bytes());
    format!("audit_{}", &hex::encode(digest)[..10])
}

fn ansible_search(store: &RuleStoreLocation) -> (String, String) {
    match store.tool {
        AuditTool::Auditctl => {
            let (dir, file) = store
                .rules_file
                .rsplit_once('/')
                .map(|(d, f)| (if d.is_empty() { "/" } else { d }, f))
                .unwrap_or((".", store.rules_file.as_str()));
            (dir.to_string(), file.to_string())
        }
        AuditTool::Augenrules => (store.rules_dir.clone(), "*.rules".to_string()),
    }
}

fn ansible_find(out: &mut String, name: &str, store: &RuleStoreLocation, contains: &str, register: &str) {
    let (paths, patterns) = ansible_search(store);
    out.push_str(&format!("- name: {}\n", yaml_quote(name)));
    out.push_str("  ansible.builtin.find:\n");
    out.push_str(&format!("    paths: {}\n", yaml_quote(&paths)));
    out.push_str(&format!("    patterns: {}\n", yaml_quote(&patterns)));
    out.push_str(&format!("    contains: {}\n", yaml_quote(contains)));
    out.push_str(&format!("  register: {register}\n\n"));
}

fn ansible_append(out: &mut String, store: &RuleStoreLocation, spec: &AuditRuleSpec, when: &str) {
    out.push_str(&format!(
        "- name: {}\n",
        yaml_quote(&format!("Add audit rule {}", spec.key()))
    ));
    out.push_str("  ansible.builtin.lineinfile:\n");
    out.push_str(&format!("    path: {}\n", yaml_quote(&store.default_file(spec.key()))));
    out.push_str(&format!("    line: {}\n", yaml_quote(spec.full_rule())));
    out.push_str("    create: true\n");
    out.push_str("    mode: '0600'\n");
    out.push_str("    state: present\n");
    out.push_str(&format!("  when: {when}"));
}

fn ansible_reconcile_syscall(store: &RuleStoreLocation, spec: &AuditRuleSpec) -> String {
    let id = rule_slug(spec);
    let (covered, mergeable) = syscall_find_patterns(spec);

    let mut out = String::new();
    ansible_find(
        &mut out,
        &format!("Find audit rules covering {}", spec.full_rule()),
        store,
        &covered,
        &format!("{id}_full"),
    );
    ansible_find(
        &mut out,
        &format!("Find audit rules mergeable with {}", spec.full_rule()),
        store,
        &mergeable,
        &format!("{id}_merge"),
    );

    for several_fields in [false, true] {
        let (regexp, line) = syscall_merge_rewrite(spec, several_fields);
        out.push_str(&format!(
            "- name: {}\n",
            yaml_quote(&format!("Merge missing syscalls into audit rule {}", spec.key()))
        ));
        out.push_str("  ansible.builtin.lineinfile:\n");
        out.push_str(&format!("    path: '{{{{ {id}_merge.files[0].path }}}}'\n"));
        out.push_str(&format!("    regexp: {}\n", yaml_quote(&regexp)));
        out.push_str(&format!("    line: {}\n", yaml_quote(line)));
        out.push_str("    backrefs: true\n");
        out.push_str(&format!("  loop: {}\n", yaml_list(spec.syscalls())));
        out.push_str(&format!("  when: {id}_full.matched == 0 and {id}_merge.matched > 0\n\n"));
    }

    ansible_append(
        &mut out,
        store,
        spec,
        &format!("{id}_full.matched == 0 and {id}_merge.matched == 0"),
    );
    out
}

fn yaml_list(items: &[String]) -> String {
    format!(
        "[{}]",
        items.iter().map(|s| yaml_quote(s)).collect::<Vec<_>>().join(", ")
    )
}

fn ansible_reconcile_watch(store: &RuleStoreLocation, spec: &AuditRuleSpec, path: &str, bits: &str) -> String {
    let id = rule_slug(spec);
    let perms: String = bits
        .chars()
        .map(|c| format!("(?=[rwxa]*{})", escape_regex(&c.to_string())))
        .collect();

    let mut out = String::new();
    ansible_find(
        &mut out,
        &format!("Find audit watch rules for {}", path),
        store,
        &format!(
            r"(?m)^\s*-w\s+{}\s+-p\s+{}[rwxa]+\s+(-k\s+|-F\s+key=){}\s*$",
            escape_regex(path),
            perms,
            escape_regex(spec.key())
        ),
        &format!("{id}_full"),
    );
    ansible_append(&mut out, store, spec, &format!("{id}_full.matched == 0"));
    out
}

pub(super) fn bash_fix_audit_syscall_rule(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let store = RuleStoreLocation::from_call(call)?;
    Ok(bash_reconcile(&store, &syscall_spec(call)?))
}

pub(super) fn bash_fix_audit_watch_rule(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let store = RuleStoreLocation::from_call(call)?;
    let (spec, _, _) = watch_spec(call)?;
    Ok(bash_reconcile(&store, &spec))
}

pub(super) fn ansible_fix_audit_syscall_rule(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let store = RuleStoreLocation::from_call(call)?;
    Ok(ansible_reconcile_syscall(&store, &syscall_spec(call)?))
}

pub(super) fn ansible_fix_audit_watch_rule(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let store = RuleStoreLocation::from_call(call)?;
    let (spec, path, bits) = watch_spec(call)?;
    Ok(ansible_reconcile_watch(&store, &spec, &path, &bits))
}

fn syscall_spec(call: &MacroCall<'_>) -> Result<AuditRuleSpec, RenderError> {
    let action_arch = call.required("action_arch_filters")?;
    let syscalls = call.list("syscalls");
    if syscalls.is_empty() {
        return Err(call.error("missing required argument 'syscalls'"));
    }
    Ok(AuditRuleSpec::syscall(
        &action_arch,
        &call.raw("other_filters").unwrap_or_default(),
        &call.raw("auid_filters").unwrap_or_default(),
        &syscalls,
        &call.required("key")?,
        &call.list("syscall_grouping"),
    ))
}

fn watch_spec(call: &MacroCall<'_>) -> Result<(AuditRuleSpec, String, String), RenderError> {
    let path = call.required("path")?;
    let bits = call.string_or("required_access_bits", "wa");
    if !bits.chars().all(|c| "rwxa".contains(c)) {
        return Err(call.error(format!("invalid access bits '{}'", bits)));
    }
    let spec = AuditRuleSpec::watch(&path, &bits, &call.required("key")?);
    Ok((spec, path, bits))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::process::Command;

    use super::super::test_support::{ctx, expand};
    use super::{syscall_find_patterns, syscall_merge_rewrite};
    use crate::render::audit::{AuditPlan, AuditRuleSpec, AuditRuleStore, AuditTool};
    use crate::render::context::RenderContext;
    use crate::value::Value;

    fn tool_available(name: &str) -> bool {
        Command::new("sh")
            .arg("-c")
            .arg(format!("command -v {} >/dev/null 2>&1", name))
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn ctx_in(dir: &Path, tool: &str) -> RenderContext {
        let mut ctx = ctx("rhel9");
        ctx.set("audit_tool", tool);
        ctx.set("audit_rules_file", dir.join("audit.rules").display().to_string());
        ctx.set("audit_rules_dir", dir.join("rules.d").display().to_string());
        ctx
    }

    fn passwd_args(syscall: &str, group: &[&str]) -> Vec<(&'static str, Value)> {
        vec![
            ("action_arch_filters", Value::from("-a always,exit -F arch=b64")),
            ("other_filters", Value::from("-F path=/etc/passwd")),
            ("syscalls", Value::List(vec![syscall.to_string()])),
            ("key", Value::from("audit_passwd")),
            (
                "syscall_grouping",
                Value::List(group.iter().map(|s| s.to_string()).collect()),
            ),
        ]
    }

    const EXISTING: &str = "-a always,exit -F arch=b64 -S open -F path=/etc/passwd -F key=audit_passwd\n";

    fn run_bash(script: &str) {
        let status = Command::new("bash").arg("-c").arg(script).status().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_rendered_script_merges_groupable_syscall() {
        if !tool_available("bash") || !tool_available("awk") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("audit.rules");
        std::fs::write(&rules, EXISTING).unwrap();

        let script = expand(
            "bash_fix_audit_syscall_rule",
            &ctx_in(dir.path(), "auditctl"),
            &passwd_args("openat", &["open", "openat", "creat"]),
        )
        .unwrap();
        run_bash(&script);
        assert_eq!(
            std::fs::read_to_string(&rules).unwrap(),
            "-a always,exit -F arch=b64 -S open,openat -F path=/etc/passwd -F key=audit_passwd\n"
        );

        run_bash(&script);
        assert_eq!(std::fs::read_to_string(&rules).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_rendered_script_appends_unrelated_syscall() {
        if !tool_available("bash") || !tool_available("awk") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("audit.rules");
        std::fs::write(&rules, EXISTING).unwrap();

        let script = expand(
            "bash_fix_audit_syscall_rule",
            &ctx_in(dir.path(), "auditctl"),
            &passwd_args("unlink", &["unlink", "unlinkat", "rename"]),
        )
        .unwrap();
        run_bash(&script);
        assert_eq!(
            std::fs::read_to_string(&rules).unwrap(),
            format!(
                "{}-a always,exit -F arch=b64 -S unlink -F path=/etc/passwd -F key=audit_passwd\n",
                EXISTING
            )
        );
    }

    #[test]
    fn test_rendered_script_creates_key_file_for_augenrules() {
        if !tool_available("bash") || !tool_available("awk") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("rules.d")).unwrap();
        std::fs::write(dir.path().join("rules.d/10-base.rules"), "-D\n").unwrap();

        let script = expand(
            "bash_fix_audit_watch_rule",
            &ctx_in(dir.path(), "augenrules"),
            &[
                ("path", Value::from("/etc/shadow")),
                ("key", Value::from("audit_rules_usergroup_modification")),
            ],
        )
        .unwrap();
        run_bash(&script);

        let created = dir.path().join("rules.d/audit_rules_usergroup_modification.rules");
        assert_eq!(
            std::fs::read_to_string(&created).unwrap(),
            "-w /etc/shadow -p wa -k audit_rules_usergroup_modification\n"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&created).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        run_bash(&script);
        assert_eq!(std::fs::read_to_string(&created).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_missing_syscalls_is_an_error() {
        let err = expand(
            "bash_fix_audit_syscall_rule",
            &ctx("rhel9"),
            &[
                ("action_arch_filters", Value::from("-a always,exit -F arch=b64")),
                ("key", Value::from("k")),
            ],
        )
        .unwrap_err();
        assert_eq!(err.macro_name(), Some("bash_fix_audit_syscall_rule"));
    }

    #[test]
    fn test_ansible_syscall_rule_steps() {
        let out = expand(
            "ansible_fix_audit_syscall_rule",
            &ctx("rhel9"),
            &passwd_args("openat", &["open", "openat"]),
        )
        .unwrap();
        assert_eq!(out.matches("- name:").count(), 5);
        assert!(out.contains(r"line: '\g<head>,{{ item }}\g<tail>'"));
        assert!(out.contains(r"line: '\g<head> -S {{ item }}\g<tail>'"));
        assert!(out.contains("paths: '/etc/audit/rules.d'"));
        assert!(out.contains("backrefs: true"));
        assert!(out.contains("loop: ['openat']"));
        assert!(out.contains("path: '/etc/audit/rules.d/audit_passwd.rules'"));
        assert!(out.contains("mode: '0600'"));
        assert!(!out.contains("{{{"));
    }

    const DECIDE_PY: &str = r#"import os, re
line = os.environ["LINE"]
out = line.rstrip("\n")
for n in ("1", "2"):
    m = re.search(os.environ["RX" + n], line)
    if m:
        out = m.expand(os.environ["REP" + n])
print(int(bool(re.match(os.environ["FULL"], line))), int(bool(re.match(os.environ["MERGE"], line))), out, sep="\t")
"#;

    /// Run the Ansible patterns for adding `openat` over one existing line
    fn ansible_decision(spec: &AuditRuleSpec, line: &str) -> (bool, bool, String) {
        let (full, merge) = syscall_find_patterns(spec);
        let (rx1, rep1) = syscall_merge_rewrite(spec, false);
        let (rx2, rep2) = syscall_merge_rewrite(spec, true);
        let item = |s: &str| s.replace("{{ item }}", "openat");
        let output = Command::new("python3")
            .arg("-c")
            .arg(DECIDE_PY)
            .env("LINE", format!("{line}\n"))
            .env("FULL", full)
            .env("MERGE", merge)
            .env("RX1", item(&rx1))
            .env("REP1", item(rep1))
            .env("RX2", item(&rx2))
            .env("REP2", item(rep2))
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8(output.stdout).unwrap();
        let mut parts = stdout.trim_end().splitn(3, '\t');
        let full = parts.next() == Some("1");
        let merge = parts.next() == Some("1");
        (full, merge, parts.next().unwrap_or_default().to_string())
    }

    #[test]
    fn test_ansible_patterns_agree_with_planner() {
        if !tool_available("python3") {
            return;
        }
        let spec = AuditRuleSpec::syscall(
            "-a always,exit -F arch=b64",
            "-F path=/etc/passwd",
            "",
            &["openat".to_string()],
            "audit_passwd",
            &["open".to_string(), "openat".to_string(), "creat".to_string()],
        );
        let lines = [
            "-a always,exit -F arch=b64 -S open -F path=/etc/passwd -F key=audit_passwd",
            "-a always,exit -F arch=b64 -F path=/etc/passwd -S open -F key=audit_passwd",
            "-a always,exit -S open -F arch=b64 -k audit_passwd -F path=/etc/passwd",
            "-a always,exit -F arch=b64 -S open -S creat -F path=/etc/passwd -F key=audit_passwd",
            "-a always,exit -F arch=b64 -S open,openat -F path=/etc/passwd -F key=audit_passwd",
            "-a always,exit -F arch=b64 -S open -F path=/etc/passwd -F auid>=1000 -F key=audit_passwd",
            "-a always,exit -F arch=b64 -S open -F path=/etc/passwd -F path=/etc/passwd -F key=audit_passwd",
            "-a always,exit -F path=/etc/passwd -F arch=b64 -S open -F key=audit_passwd",
            "-a always,exit -F arch=b64 -S open -F path=/etc/passwd -F key=other",
        ];

        for line in lines {
            let store = AuditRuleStore::new(AuditTool::Auditctl, "/etc/audit/audit.rules", "/etc/audit/rules.d")
                .with_file("/etc/audit/audit.rules", format!("{line}\n"));
            let (full, merge, rewritten) = ansible_decision(&spec, line);
            match store.plan(&spec) {
                AuditPlan::Nothing { .. } => assert!(full, "{line}"),
                AuditPlan::Rewrite { new, .. } => {
                    assert!(!full && merge, "{line}");
                    assert_eq!(rewritten, new);
                }
                AuditPlan::Append { .. } => {
                    assert!(!full && !merge, "{line}");
                    assert_eq!(rewritten, line);
                }
            }
        }
    }

    #[test]
    fn test_rules_location_arguments_override_context() {
        let mut args = passwd_args("openat", &["open"]);
        args.push(("tool", Value::from("auditctl")));
        args.push(("rules_file", Value::from("/srv/audit/site.rules")));
        let out = expand("bash_fix_audit_syscall_rule", &ctx("rhel9"), &args).unwrap();
        assert!(out.contains("if [ -e '/srv/audit/site.rules' ]; then"));

        let out = expand(
            "ansible_fix_audit_watch_rule",
            &ctx("rhel9"),
            &[
                ("path", Value::from("/etc/group")),
                ("key", Value::from("k")),
                ("rules_dir", Value::from("/srv/rules.d")),
            ],
        )
        .unwrap();
        assert!(out.contains("paths: '/srv/rules.d'"));
        assert!(out.contains("path: '/srv/rules.d/k.rules'"));
    }

    #[test]
    fn test_ansible_watch_rule_for_auditctl() {
        let mut ctx = ctx("rhel9");
        ctx.set("audit_tool", "auditctl");
        let out = expand(
            "ansible_fix_audit_watch_rule",
            &ctx,
            &[("path", Value::from("/etc/group")), ("key", Value::from("k"))],
        )
        .unwrap();
        assert!(out.contains("paths: '/etc/audit'"));
        assert!(out.contains("patterns: 'audit.rules'"));
        assert!(out.contains("line: '-w /etc/group -p wa -k k'"));
    }
}
