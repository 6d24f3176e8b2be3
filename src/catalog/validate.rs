//! Whole-catalog validation

use std::collections::HashMap;

use super::error::ValidationIssue;
use super::model::{control_key, Catalog, CatalogEntry, ScriptSet};

/// Every issue in a catalog state; empty means valid
pub fn validate_catalog(catalog: &Catalog) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, entry) in catalog.controls.iter().enumerate() {
        issues.extend(missing_fields(index, entry));

        let key = control_key(&entry.control_id);
        if !key.is_empty() {
            if let Some(first) = seen.get(&key) {
                issues.push(ValidationIssue::DuplicateControlId {
                    control_id: key.clone(),
                    first: *first,
                    second: index,
                });
            } else {
                seen.insert(key, index);
            }
        }

        issues.extend(validate_scripts(&entry.control_id, &entry.implementation_scripts));
    }
    issues
}

/// Issues in one control's script set
pub fn validate_scripts(control_id: &str, scripts: &ScriptSet) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (platform, targets) in scripts {
        for (target, text) in targets {
            if platform.trim().is_empty() || target.trim().is_empty() || text.trim().is_empty() {
                issues.push(empty_script(control_id, platform, target));
            }
        }
    }
    issues
}

fn empty_script(control_id: &str, platform: &str, target: &str) -> ValidationIssue {
    ValidationIssue::EmptyScript {
        control_id: control_id.to_string(),
        platform: platform.to_string(),
        target: target.to_string(),
    }
}

fn missing_fields(index: usize, entry: &CatalogEntry) -> Vec<ValidationIssue> {
    let control_id = Some(entry.control_id.clone()).filter(|s| !s.trim().is_empty());
    [
        ("controlId", &entry.control_id),
        ("controlName", &entry.control_name),
        ("family", &entry.family),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| ValidationIssue::MissingField {
        index,
        control_id: control_id.clone(),
        field,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_duplicates_are_case_insensitive() {
        let catalog = Catalog {
            controls: vec![
                CatalogEntry::new("AC-2", "Account Management", "AC"),
                CatalogEntry::new("AU-2", "Event Logging", "AU"),
                CatalogEntry::new("ac-02", "Account Management", "AC"),
            ],
            ..Catalog::default()
        };
        assert_eq!(
            validate_catalog(&catalog),
            vec![ValidationIssue::DuplicateControlId {
                control_id: "AC-2".to_string(),
                first: 0,
                second: 2,
            }]
        );
    }

    #[test]
    fn test_missing_fields() {
        let catalog = Catalog {
            controls: vec![CatalogEntry::new("AC-2", "", "AC"), CatalogEntry::new("", "x", "")],
            ..Catalog::default()
        };
        let issues = validate_catalog(&catalog);
        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&ValidationIssue::MissingField {
            index: 0,
            control_id: Some("AC-2".to_string()),
            field: "controlName",
        }));
        assert!(issues.contains(&ValidationIssue::MissingField {
            index: 1,
            control_id: None,
            field: "controlId",
        }));
    }

    #[test]
    fn test_blank_scripts() {
        let scripts: ScriptSet = BTreeMap::from([
            ("rhel9".to_string(), BTreeMap::from([("bash".to_string(), "   ".to_string())])),
            ("".to_string(), BTreeMap::from([("bash".to_string(), "#!".to_string())])),
            ("rhel8".to_string(), BTreeMap::from([("bash".to_string(), "#!/bin/bash".to_string())])),
        ]);
        assert_eq!(validate_scripts("AC-2", &scripts).len(), 2);
    }
}
