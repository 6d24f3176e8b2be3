//! Package install/remove macros

use crate::render::error::RenderError;
use crate::render::platform::PackageManager;

use super::lines::{shell_quote, yaml_quote};
use super::MacroCall;

/// Package manager from the explicit argument, else the context, else the platform
fn resolve_manager(call: &MacroCall<'_>) -> Result<(PackageManager, bool), RenderError> {
    if let Some(name) = call.optional("pkg_manager") {
        return PackageManager::parse(&name)
            .map(|pm| (pm, true))
            .ok_or_else(|| call.error(format!("unknown package manager '{}'", name)));
    }
    let from_ctx = call
        .ctx()
        .get_str("pkg_manager")
        .and_then(|name| PackageManager::parse(&name));
    Ok((from_ctx.unwrap_or(call.ctx().platform().pkg_manager), false))
}

fn installed_check(pm: PackageManager, package: &str) -> String {
    let pkg = shell_quote(package);
    if pm.is_rpm() {
        format!("rpm -q --quiet {pkg}")
    } else {
        format!("dpkg-query --show --showformat='${{db:Status-Status}}' {pkg} 2>/dev/null | grep -q '^installed$'")
    }
}

fn command(pm: PackageManager, verb: &str, package: &str) -> String {
    let pkg = shell_quote(package);
    match pm {
        PackageManager::Dnf => format!("dnf {verb} -y {pkg}"),
        PackageManager::Yum => format!("yum {verb} -y {pkg}"),
        PackageManager::Apt => format!("DEBIAN_FRONTEND=noninteractive apt-get {verb} -y {pkg}"),
        PackageManager::Zypper => format!("zypper --non-interactive {verb} {pkg}"),
    }
}

pub(super) fn bash_package_install(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let package = call.required("package")?;
    let (pm, _) = resolve_manager(call)?;
    Ok(format!(
        "if ! {}; then\n    {}\nfi",
        installed_check(pm, &package),
        command(pm, "install", &package)
    ))
}

pub(super) fn bash_package_remove(call: &MacroCall<'_>) -> Result<String, RenderError> {
    let package = call.required("package")?;
    let (pm, _) = resolve_manager(call)?;
    Ok(format!(
        "if {}; then\n    {}\nfi",
        installed_check(pm, &package),
        command(pm, "remove", &package)
    ))
}

fn ansible_package(call: &MacroCall<'_>, state: &str, verb: &str) -> Result<String, RenderError> {
    let package = call.required("package")?;
    let (pm, explicit) = resolve_manager(call)?;

    let mut out = String::new();
    out.push_str(&format!(
        "- name: {}\n",
        yaml_quote(&format!("Ensure {} is {}", package, verb))
    ));
    out.push_str("  ansible.builtin.package:\n");
    out.push_str(&format!("    name: {}\n", yaml_quote(&package)));
    out.push_str(&format!("    state: {}", state));
    if explicit {
        out.push_str(&format!("\n    use: {}", pm));
    }
    Ok(out)
}

pub(super) fn ansible_package_install(call: &MacroCall<'_>) -> Result<String, RenderError> {
    ansible_package(call, "present", "installed")
}

pub(super) fn ansible_package_remove(call: &MacroCall<'_>) -> Result<String, RenderError> {
    ansible_package(call, "absent", "removed")
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, expand};
    use crate::value::Value;

    #[test]
    fn test_install_follows_platform() {
        let rhel = expand("bash_package_install", &ctx("rhel9"), &[("package", Value::from("aide"))]).unwrap();
        assert_eq!(rhel, "if ! rpm -q --quiet 'aide'; then\n    dnf install -y 'aide'\nfi");

        let ubuntu = expand("bash_package_install", &ctx("ubuntu2204"), &[("package", Value::from("aide"))]).unwrap();
        assert!(ubuntu.contains("dpkg-query --show --showformat='${db:Status-Status}' 'aide'"));
        assert!(ubuntu.contains("apt-get install -y 'aide'"));
    }

    #[test]
    fn test_explicit_manager_wins() {
        let out = expand(
            "bash_package_remove",
            &ctx("rhel9"),
            &[("package", Value::from("telnet")), ("pkg_manager", Value::from("zypper"))],
        )
        .unwrap();
        assert_eq!(out, "if rpm -q --quiet 'telnet'; then\n    zypper --non-interactive remove 'telnet'\nfi");

        let err = expand(
            "bash_package_install",
            &ctx("rhel9"),
            &[("package", Value::from("x")), ("pkg_manager", Value::from("pacman"))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("pacman"));
    }

    #[test]
    fn test_ansible_package() {
        let out = expand("ansible_package_install", &ctx("rhel9"), &[("package", Value::from("aide"))]).unwrap();
        assert_eq!(
            out,
            "- name: 'Ensure aide is installed'\n  ansible.builtin.package:\n    name: 'aide'\n    state: present"
        );

        let out = expand(
            "ansible_package_remove",
            &ctx("rhel9"),
            &[("package", Value::from("telnet")), ("pkg_manager", Value::from("dnf"))],
        )
        .unwrap();
        assert!(out.ends_with("state: absent\n    use: dnf"));
    }
}
