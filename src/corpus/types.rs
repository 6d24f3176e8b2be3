//! Core types for control/rule discovery

use std::fmt;

use serde::{Deserialize, Serialize};

/// A canonical control identifier
///
/// Parsed from control-file ids like "ac-2", "AC-02(1)", "ac-2.1" or "AC-2 (1)".
/// The canonical text form is upper-case `FAMILY-N` with enhancements in
/// parentheses: `AC-2`, `AC-2(1)`, `IA-5(1)(D)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ControlId {
    /// Control family (e.g., "AC", "IA", "SC")
    family: String,

    /// Control number, or the whole upper-cased id when it is not NIST-shaped
    number: String,

    /// Control enhancements (e.g., ["1", "D"] for IA-5(1)(d))
    enhancements: Vec<String>,

    /// Whether the id parsed as `FAMILY-N[(E)...]`
    nist: bool,
}

impl ControlId {
    /// Parse and normalize a control id
    ///
    /// Returns `None` only for empty input. Ids that are not NIST-shaped
    /// (`UBTU-22-211015`, `1.1.1.1`) are kept upper-cased verbatim.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        parse_nist(s).or_else(|| {
            Some(Self {
                family: family_prefix(s),
                number: s.to_uppercase(),
                enhancements: Vec::new(),
                nist: false,
            })
        })
    }

    /// Control family (the part before the dash)
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the base control id without enhancements (e.g., "AC-2")
    pub fn base_id(&self) -> String {
        if self.is_nist() {
            format!("{}-{}", self.family, self.number)
        } else {
            self.number.clone()
        }
    }

    /// Enhancements in order
    pub fn enhancements(&self) -> &[String] {
        &self.enhancements
    }

    /// Whether the id parsed as `FAMILY-N[(E)...]`
    pub fn is_nist(&self) -> bool {
        self.nist
    }

    /// Check if this control belongs to a family (case-insensitive)
    pub fn in_family(&self, family: &str) -> bool {
        self.family.eq_ignore_ascii_case(family.trim())
    }

    /// Check if this control matches a base control id, ignoring enhancements
    pub fn matches_base(&self, base_id: &str) -> bool {
        ControlId::parse(base_id)
            .map(|other| other.base_id() == self.base_id())
            .unwrap_or(false)
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_id())?;
        for enh in &self.enhancements {
            write!(f, "({})", enh)?;
        }
        Ok(())
    }
}

impl Ord for ControlId {
    /// Natural order: family, then numeric control number, then enhancements
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn numeric(s: &str) -> (u64, &str) {
            (s.parse::<u64>().unwrap_or(u64::MAX), s)
        }

        self.family
            .cmp(&other.family)
            .then_with(|| numeric(&self.number).cmp(&numeric(&other.number)))
            .then_with(|| {
                let lhs = self.enhancements.iter().map(|e| numeric(e));
                let rhs = other.enhancements.iter().map(|e| numeric(e));
                lhs.cmp(rhs)
            })
            .then_with(|| self.nist.cmp(&other.nist))
    }
}

impl PartialOrd for ControlId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<ControlId> for String {
    fn from(id: ControlId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ControlId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ControlId::parse(&value).ok_or_else(|| "empty control id".to_string())
    }
}

impl std::str::FromStr for ControlId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlId::parse(s).ok_or_else(|| "empty control id".to_string())
    }
}

fn family_prefix(s: &str) -> String {
    s.split('-').next().unwrap_or_default().trim().to_uppercase()
}

/// Parse the NIST-shaped forms; `None` if the id does not fit
fn parse_nist(s: &str) -> Option<ControlId> {
    let dash_pos = s.find('-')?;
    let family = s[..dash_pos].trim();
    if family.is_empty() || family.len() > 3 || !family.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let rest = s[dash_pos + 1..].trim();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let number = rest[..digits_end].trim_start_matches('0');
    let number = if number.is_empty() { "0" } else { number };

    let tail = rest[digits_end..].trim();
    let enhancements = if tail.is_empty() {
        Vec::new()
    } else if let Some(dotted) = tail.strip_prefix('.') {
        // "ac-2.1" style
        if dotted.is_empty() || !dotted.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        vec![normalize_enhancement(dotted)]
    } else {
        parse_enhancements(tail)?
    };

    Some(ControlId {
        family: family.to_uppercase(),
        number: number.to_string(),
        enhancements,
        nist: true,
    })
}

/// Parse "(1)(d)" or "(1) (d)"; anything else means the id is not NIST-shaped
fn parse_enhancements(s: &str) -> Option<Vec<String>> {
    let mut enhancements = Vec::new();
    let mut rest = s.trim();

    while !rest.is_empty() {
        let inner_start = rest.strip_prefix('(')?;
        let close = inner_start.find(')')?;
        let inner = inner_start[..close].trim();
        if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        enhancements.push(normalize_enhancement(inner));
        rest = inner_start[close + 1..].trim_start();
    }

    Some(enhancements)
}

fn normalize_enhancement(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_digit()) {
        let trimmed = s.trim_start_matches('0');
        if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
    } else {
        s.to_uppercase()
    }
}

/// Automation classification of a control, derived from its linked rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationStatus {
    /// Every linked rule has a template
    Automated,
    /// Some linked rules have a template
    Partial,
    /// Rules exist but none has a template
    Manual,
    /// No linked rules at all
    Pending,
}

impl AutomationStatus {
    /// Whether the orchestrator has anything to render for this control
    pub fn is_renderable(&self) -> bool {
        matches!(self, Self::Automated | Self::Partial)
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automated => write!(f, "automated"),
            Self::Partial => write!(f, "partial"),
            Self::Manual => write!(f, "manual"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_control() {
        let ctrl = ControlId::parse("ac-2").unwrap();
        assert_eq!(ctrl.family(), "AC");
        assert_eq!(ctrl.base_id(), "AC-2");
        assert_eq!(ctrl.to_string(), "AC-2");
        assert!(ctrl.is_nist());
    }

    #[test]
    fn test_normalizes_enhancement_forms() {
        for raw in ["AC-2(1)", "ac-02(1)", "ac-2.1", "AC-2 (1)", " ac-2(01) "] {
            assert_eq!(ControlId::parse(raw).unwrap().to_string(), "AC-2(1)", "{}", raw);
        }
    }

    #[test]
    fn test_multiple_enhancements() {
        let ctrl = ControlId::parse("IA-5(1)(d)").unwrap();
        assert_eq!(ctrl.enhancements(), &["1".to_string(), "D".to_string()]);
        assert_eq!(ctrl.to_string(), "IA-5(1)(D)");
        assert!(ctrl.matches_base("ia-5"));
        assert!(!ctrl.matches_base("IA-2"));
    }

    #[test]
    fn test_non_nist_ids_kept_verbatim() {
        let ctrl = ControlId::parse("ubtu-22-211015").unwrap();
        assert!(!ctrl.is_nist());
        assert_eq!(ctrl.to_string(), "UBTU-22-211015");
        assert_eq!(ctrl.family(), "UBTU");

        let cis = ControlId::parse("1.1.1.1").unwrap();
        assert_eq!(cis.to_string(), "1.1.1.1");
    }

    #[test]
    fn test_family_membership() {
        let ctrl = ControlId::parse("AC-17(2)").unwrap();
        assert!(ctrl.in_family("ac"));
        assert!(!ctrl.in_family("AU"));
    }

    #[test]
    fn test_natural_ordering() {
        let mut ids: Vec<ControlId> = ["AC-10", "AC-2(1)", "AC-2", "AB-3"]
            .iter()
            .filter_map(|s| ControlId::parse(s))
            .collect();
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["AB-3", "AC-2", "AC-2(1)", "AC-10"]);
    }

    #[test]
    fn test_empty_is_none() {
        assert!(ControlId::parse("   ").is_none());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ctrl = ControlId::parse("ac-2.1").unwrap();
        let json = serde_json::to_string(&ctrl).unwrap();
        assert_eq!(json, "\"AC-2(1)\"");
        let back: ControlId = serde_json::from_str("\"ac-02(1)\"").unwrap();
        assert_eq!(back, ctrl);
    }
}
