//! Rendering targets

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution engine a template renders for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    /// Imperative shell script
    Bash,
    /// Declarative task list
    Ansible,
}

impl RenderTarget {
    /// Every supported target, in catalog order
    pub const ALL: [RenderTarget; 2] = [RenderTarget::Bash, RenderTarget::Ansible];

    /// Key used in the catalog and in `backends:` switches
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Ansible => "ansible",
        }
    }

    /// Template file name inside a template directory
    pub fn template_file_name(&self) -> &'static str {
        match self {
            Self::Bash => "bash.template",
            Self::Ansible => "ansible.template",
        }
    }

    /// Marker every rendered script for this target starts with
    pub fn leading_marker(&self) -> &'static str {
        match self {
            Self::Bash => "#!",
            Self::Ansible => "---",
        }
    }

    /// Whether the text is an imperative (shell) script
    pub fn is_imperative(&self) -> bool {
        matches!(self, Self::Bash)
    }
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bash" | "shell" | "sh" => Ok(Self::Bash),
            "ansible" | "yaml" => Ok(Self::Ansible),
            other => Err(format!("unknown render target '{}' (expected bash or ansible)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!("bash".parse::<RenderTarget>().unwrap(), RenderTarget::Bash);
        assert_eq!("Ansible".parse::<RenderTarget>().unwrap(), RenderTarget::Ansible);
        assert!("puppet".parse::<RenderTarget>().is_err());
    }

    #[test]
    fn test_target_files() {
        assert_eq!(RenderTarget::Bash.template_file_name(), "bash.template");
        assert_eq!(RenderTarget::Ansible.leading_marker(), "---");
    }
}
