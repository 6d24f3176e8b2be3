//! Target platforms
//!
//! A platform decides the package manager, init system and sshd layout a
//! rendered script assumes. Known product ids come from a built-in table;
//! anything else falls back to a generic platform picked by id prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Package manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// dnf (RHEL 8+, Fedora)
    Dnf,
    /// yum (RHEL 7)
    Yum,
    /// apt (Debian, Ubuntu)
    Apt,
    /// zypper (SUSE)
    Zypper,
}

impl PackageManager {
    /// Parse a package manager name
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dnf" => Some(Self::Dnf),
            "yum" => Some(Self::Yum),
            "apt" | "apt_get" | "apt-get" | "dpkg" => Some(Self::Apt),
            "zypper" => Some(Self::Zypper),
            _ => None,
        }
    }

    /// Name as used in the render context
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Apt => "apt",
            Self::Zypper => "zypper",
        }
    }

    /// Whether installed packages are queried through rpm
    pub fn is_rpm(&self) -> bool {
        !matches!(self, Self::Apt)
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform scripts are rendered for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Product id (e.g., "rhel9")
    pub id: String,

    /// Package manager
    pub pkg_manager: PackageManager,

    /// Init system
    pub init_system: String,

    /// Whether sshd reads `sshd_config.d` fragments
    pub sshd_fragments: bool,

    /// Whether the id came from the built-in table
    pub known: bool,
}

/// (id, package manager, sshd fragments)
const BUILTIN: &[(&str, PackageManager, bool)] = &[
    ("rhel7", PackageManager::Yum, false),
    ("rhel8", PackageManager::Dnf, false),
    ("rhel9", PackageManager::Dnf, true),
    ("ol8", PackageManager::Dnf, false),
    ("ol9", PackageManager::Dnf, true),
    ("fedora", PackageManager::Dnf, true),
    ("ubuntu2004", PackageManager::Apt, false),
    ("ubuntu2204", PackageManager::Apt, true),
    ("ubuntu2404", PackageManager::Apt, true),
    ("debian11", PackageManager::Apt, false),
    ("debian12", PackageManager::Apt, true),
    ("sle15", PackageManager::Zypper, false),
];

impl Platform {
    /// Look up a platform, falling back by id prefix for unknown ids
    pub fn lookup(id: &str) -> Self {
        let id = id.trim().to_lowercase();
        if let Some((_, pkg, fragments)) = BUILTIN.iter().find(|(known, _, _)| *known == id) {
            return Self {
                id,
                pkg_manager: *pkg,
                init_system: "systemd".to_string(),
                sshd_fragments: *fragments,
                known: true,
            };
        }

        let pkg_manager = if id.starts_with("ubuntu") || id.starts_with("debian") {
            PackageManager::Apt
        } else if id.starts_with("sle") || id.starts_with("opensuse") {
            PackageManager::Zypper
        } else {
            PackageManager::Dnf
        };
        tracing::debug!(platform = %id, pkg_manager = %pkg_manager, "Unknown platform, using generic defaults");

        Self {
            id,
            pkg_manager,
            init_system: "systemd".to_string(),
            sshd_fragments: false,
            known: false,
        }
    }

    /// Ids of every built-in platform
    pub fn builtin_ids() -> impl Iterator<Item = &'static str> {
        BUILTIN.iter().map(|(id, _, _)| *id)
    }

    /// Context variables this platform contributes
    pub fn defaults(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("product", Value::String(self.id.clone())),
            ("pkg_manager", Value::String(self.pkg_manager.as_str().to_string())),
            ("init_system", Value::String(self.init_system.clone())),
            ("sshd_fragments", Value::Boolean(self.sshd_fragments)),
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let rhel9 = Platform::lookup("RHEL9");
        assert!(rhel9.known);
        assert_eq!(rhel9.pkg_manager, PackageManager::Dnf);
        assert!(rhel9.sshd_fragments);

        let rhel7 = Platform::lookup("rhel7");
        assert_eq!(rhel7.pkg_manager, PackageManager::Yum);
        assert!(!rhel7.sshd_fragments);
        assert_eq!(Platform::builtin_ids().count(), 12);
    }

    #[test]
    fn test_unknown_falls_back_by_prefix() {
        let p = Platform::lookup("ubuntu2604");
        assert!(!p.known);
        assert_eq!(p.pkg_manager, PackageManager::Apt);

        assert_eq!(Platform::lookup("opensuse-leap").pkg_manager, PackageManager::Zypper);
        assert_eq!(Platform::lookup("almalinux9").pkg_manager, PackageManager::Dnf);
    }
}
