//! Template variable values
//!
//! Rule template bindings, platform defaults and operator overrides all carry
//! the same small set of scalar shapes. Rendering turns every value into text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A template variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Text value
    String(String),
    /// List of text values (rendered comma-joined)
    List(Vec<String>),
}

impl Value {
    /// Convert a YAML value; mappings and nulls have no template meaning
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Bool(b) => Some(Self::Boolean(*b)),
            serde_yaml::Value::Number(n) => Some(
                n.as_i64()
                    .map(Self::Integer)
                    .unwrap_or_else(|| Self::String(n.to_string())),
            ),
            serde_yaml::Value::String(s) => Some(Self::String(s.clone())),
            serde_yaml::Value::Sequence(items) => Some(Self::List(
                items
                    .iter()
                    .filter_map(|item| Self::from_yaml(item).map(|v| v.to_string()))
                    .collect(),
            )),
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
            serde_yaml::Value::Null | serde_yaml::Value::Mapping(_) => None,
        }
    }

    /// Truthiness used by template conditionals
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Integer(n) => *n != 0,
            Self::String(s) => {
                let s = s.trim();
                !(s.is_empty() || s.eq_ignore_ascii_case("false") || s.eq_ignore_ascii_case("no") || s == "0")
            }
            Self::List(items) => !items.is_empty(),
        }
    }

    /// List view; scalars split on commas
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::List(items) => items.clone(),
            other => other
                .to_string()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_shapes() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("[open, openat]").unwrap();
        assert_eq!(
            Value::from_yaml(&yaml),
            Some(Value::List(vec!["open".into(), "openat".into()]))
        );

        let n: serde_yaml::Value = serde_yaml::from_str("600").unwrap();
        assert_eq!(Value::from_yaml(&n), Some(Value::Integer(600)));

        let null: serde_yaml::Value = serde_yaml::from_str("~").unwrap();
        assert_eq!(Value::from_yaml(&null), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::from("yes").is_truthy());
        assert!(!Value::from("false").is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::List(vec!["a".into()]).is_truthy());
    }

    #[test]
    fn test_as_list_splits_scalars() {
        assert_eq!(Value::from("open, openat").as_list(), vec!["open", "openat"]);
        assert_eq!(Value::from("").as_list(), Vec::<String>::new());
    }
}
