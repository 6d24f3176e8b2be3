//! Rendered scripts and their validation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::target::RenderTarget;

use super::error::RenderError;

/// Shortest script accepted
pub const DEFAULT_MIN_SCRIPT_LEN: usize = 32;

/// Template syntax that must never survive into a script
const TEMPLATE_DELIMITERS: &[&str] = &["{{{", "}}}", "{{%", "%}}", "{{#", "#}}"];

/// Text left behind by a failed expansion
const ERROR_MARKERS: &[&str] = &["RENDER_ERROR", "# ERROR:", "UndefinedError"];

/// Output for one (control, platform, target) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedScript {
    /// Canonical control id
    pub control: String,
    /// Platform id
    pub platform: String,
    /// Rendering target
    pub target: RenderTarget,
    /// Script text
    pub text: String,
    /// Hex SHA-256 of `text`
    pub sha256: String,
    /// Templates the script was rendered from
    pub templates: Vec<String>,
    /// Rules contributing to the script
    pub rules: Vec<String>,
}

impl RenderedScript {
    pub fn new(
        control: impl Into<String>,
        platform: impl Into<String>,
        target: RenderTarget,
        text: String,
        templates: Vec<String>,
        rules: Vec<String>,
    ) -> Self {
        let sha256 = hex::encode(Sha256::digest(text.as_bytes()));
        Self {
            control: control.into(),
            platform: platform.into(),
            target,
            text,
            sha256,
            templates,
            rules,
        }
    }

    /// Check the script is fit to store
    pub fn validate(&self, min_len: usize) -> Result<(), RenderError> {
        let reason = if self.text.trim().is_empty() {
            Some("script is empty".to_string())
        } else if self.text.len() < min_len {
            Some(format!("script is {} bytes, minimum is {}", self.text.len(), min_len))
        } else if let Some(delim) = TEMPLATE_DELIMITERS.iter().find(|d| self.text.contains(*d)) {
            Some(format!("template syntax '{}' left in output", delim))
        } else if let Some(marker) = ERROR_MARKERS.iter().find(|m| self.text.contains(*m)) {
            Some(format!("error marker '{}' in output", marker))
        } else if !self.text.starts_with(self.target.leading_marker()) {
            Some(format!("does not start with '{}'", self.target.leading_marker()))
        } else {
            None
        };

        match reason {
            None => Ok(()),
            Some(reason) => Err(RenderError::InvalidScript {
                control: self.control.clone(),
                platform: self.platform.clone(),
                target: self.target,
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(target: RenderTarget, text: &str) -> RenderedScript {
        RenderedScript::new("AC-2", "rhel9", target, text.to_string(), vec![], vec![])
    }

    fn reason(s: &RenderedScript) -> String {
        match s.validate(DEFAULT_MIN_SCRIPT_LEN) {
            Err(RenderError::InvalidScript { reason, .. }) => reason,
            other => panic!("expected invalid script, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_scripts() {
        let bash = script(RenderTarget::Bash, "#!/usr/bin/env bash\n# Rule: x\nsystemctl enable auditd\n");
        bash.validate(DEFAULT_MIN_SCRIPT_LEN).unwrap();
        assert_eq!(bash.sha256.len(), 64);

        let yaml = script(RenderTarget::Ansible, "---\n- name: 'Enable auditd'\n  ansible.builtin.service: {}\n");
        yaml.validate(DEFAULT_MIN_SCRIPT_LEN).unwrap();
    }

    #[test]
    fn test_rejections() {
        assert_eq!(reason(&script(RenderTarget::Bash, "  \n")), "script is empty");
        assert!(reason(&script(RenderTarget::Bash, "#!/bin/sh\ntrue\n")).contains("minimum"));
        assert!(reason(&script(
            RenderTarget::Bash,
            "#!/usr/bin/env bash\necho {{{ VALUE }}} and more padding text\n"
        ))
        .contains("{{{"));
        assert!(reason(&script(
            RenderTarget::Bash,
            "#!/usr/bin/env bash\n# ERROR: template failed to render properly\n"
        ))
        .contains("error marker"));
        assert!(reason(&script(
            RenderTarget::Ansible,
            "- name: 'Enable auditd'\n  ansible.builtin.service: {}\n"
        ))
        .contains("'---'"));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = script(RenderTarget::Bash, "#!/usr/bin/env bash\ntrue\n");
        let b = script(RenderTarget::Bash, "#!/usr/bin/env bash\ntrue\n");
        assert_eq!(a.sha256, b.sha256);
    }
}
