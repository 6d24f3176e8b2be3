//! Control script composition
//!
//! A control's script for one (platform, target) pair is built from the
//! templates of every linked rule, in rule id order. Each rule's expansion is
//! headed by a `# Rule: <id>` comment; the whole body is then normalized,
//! given its preamble and validated as one [`RenderedScript`].

use std::collections::HashSet;

use crate::corpus::{CorpusError, DiscoveryIndex, Rule};
use crate::target::RenderTarget;

use super::context::ContextBuilder;
use super::engine::{self, TemplateCache};
use super::error::RenderError;
use super::platform::Platform;
use super::script::{RenderedScript, DEFAULT_MIN_SCRIPT_LEN};

/// Expansion of one rule's template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleExpansion {
    pub rule_id: String,
    /// Template name (`<template>/<target>.template`)
    pub template: String,
    /// Normalized expansion, never empty
    pub text: String,
}

/// Why a rule contributed nothing for a (platform, target) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Rule file is missing from the corpus
    UnknownRule,
    /// `prodtype` excludes the platform
    NotApplicable,
    /// Rule has no template
    NoTemplate,
    /// Template backend switched off for the target
    BackendDisabled,
    /// No template body for the target
    NoTemplateFile,
    /// Template expanded to nothing
    Empty,
}

/// Renders rules and controls into scripts
#[derive(Debug)]
pub struct Renderer {
    contexts: ContextBuilder,
    templates: TemplateCache,
    min_script_len: usize,
}

impl Renderer {
    pub fn new(contexts: ContextBuilder) -> Self {
        Self {
            contexts,
            templates: TemplateCache::new(),
            min_script_len: DEFAULT_MIN_SCRIPT_LEN,
        }
    }

    /// Set the shortest accepted script
    pub fn with_min_script_len(mut self, min_script_len: usize) -> Self {
        self.min_script_len = min_script_len;
        self
    }

    /// Shortest accepted script
    pub fn min_script_len(&self) -> usize {
        self.min_script_len
    }

    /// Context layers used for every render
    pub fn contexts(&self) -> &ContextBuilder {
        &self.contexts
    }

    /// Expand one rule's template for a platform and target
    pub fn expand_rule(
        &mut self,
        index: &mut DiscoveryIndex,
        rule_id: &str,
        platform: &Platform,
        target: RenderTarget,
    ) -> Result<Result<RuleExpansion, SkipReason>, RenderError> {
        let rule: Rule = match index.get_rule_info(rule_id) {
            Ok(rule) => rule.clone(),
            Err(CorpusError::RuleNotFound { .. }) => return Ok(Err(SkipReason::UnknownRule)),
            Err(e) => return Err(e.into()),
        };

        if !rule.applies_to(&platform.id) {
            return Ok(Err(SkipReason::NotApplicable));
        }
        let Some(template_ref) = &rule.template else {
            return Ok(Err(SkipReason::NoTemplate));
        };
        if !template_ref.backend_enabled(target.as_str()) {
            return Ok(Err(SkipReason::BackendDisabled));
        }
        let files = index.find_template_files(&template_ref.name);
        let Some(path) = files.get(&target) else {
            return Ok(Err(SkipReason::NoTemplateFile));
        };

        let ctx = self.contexts.build(platform, Some(&rule));
        let template = self.templates.load(path)?;
        let text = engine::postprocess(&engine::expand(template, target, &ctx)?);
        if text.is_empty() {
            return Ok(Err(SkipReason::Empty));
        }

        tracing::debug!(
            rule = rule_id,
            platform = %platform.id,
            target = %target,
            template = template.name(),
            "Expanded rule template"
        );
        Ok(Ok(RuleExpansion {
            rule_id: rule_id.to_string(),
            template: template.name().to_string(),
            text,
        }))
    }

    /// Render a control's script for a platform and target
    ///
    /// Returns `None` when no linked rule contributes anything.
    pub fn render_control(
        &mut self,
        index: &mut DiscoveryIndex,
        control_id: &str,
        rule_ids: &[String],
        platform: &Platform,
        target: RenderTarget,
    ) -> Result<Option<RenderedScript>, RenderError> {
        let mut ordered: Vec<&String> = rule_ids.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut expansions = Vec::new();
        for rule_id in ordered {
            match self.expand_rule(index, rule_id, platform, target)? {
                Ok(expansion) => expansions.push(expansion),
                Err(reason) => {
                    tracing::debug!(
                        control = control_id,
                        rule = %rule_id,
                        platform = %platform.id,
                        target = %target,
                        reason = ?reason,
                        "Rule skipped"
                    );
                }
            }
        }
        if expansions.is_empty() {
            return Ok(None);
        }

        let mut body = String::new();
        for expansion in &expansions {
            body.push_str(&format!("# Rule: {}\n", expansion.rule_id));
            body.push_str(&expansion.text);
            body.push('\n');
        }

        let templates = distinct_templates(&expansions);
        let provenance = format!(
            "Remediation for {} on {}, rendered from {}",
            control_id,
            platform.id,
            templates.join(", ")
        );
        let text = engine::with_preamble(&engine::postprocess(&body), target, &provenance);

        let script = RenderedScript::new(
            control_id,
            platform.id.clone(),
            target,
            text,
            templates,
            expansions.into_iter().map(|e| e.rule_id).collect(),
        );
        script.validate(self.min_script_len)?;
        Ok(Some(script))
    }
}

/// Template names in first-use order, each once
fn distinct_templates(expansions: &[RuleExpansion]) -> Vec<String> {
    let mut seen = HashSet::new();
    expansions
        .iter()
        .filter(|e| seen.insert(e.template.as_str()))
        .map(|e| e.template.clone())
        .collect()
}
