//! Attribute values
//!
//! Configuration and state are flat maps from attribute name to
//! [`AttrValue`]. Whether a value was explicitly configured is tracked
//! separately by [`Setting`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute name → value, ordered by name
pub type Attributes = BTreeMap<String, AttrValue>;

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Number(_) => "number",
            AttrValue::String(_) => "string",
            AttrValue::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Number(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::String(s) => f.write_str(s),
            AttrValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Number(value as f64)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Number(f64::from(value))
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(items: Vec<T>) -> Self {
        AttrValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Presence of an attribute in configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    /// Explicitly set by the configuration
    Set(AttrValue),
    /// Not present in the configuration
    Absent,
}

impl Setting {
    pub fn is_set(&self) -> bool {
        matches!(self, Setting::Set(_))
    }

    pub fn value(&self) -> Option<&AttrValue> {
        match self {
            Setting::Set(v) => Some(v),
            Setting::Absent => None,
        }
    }
}

impl From<Option<AttrValue>> for Setting {
    fn from(value: Option<AttrValue>) -> Self {
        match value {
            Some(v) => Setting::Set(v),
            None => Setting::Absent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AttrValue::from(3).to_string(), "3");
        assert_eq!(AttrValue::from(2.5).to_string(), "2.5");
        assert_eq!(AttrValue::from("abc").to_string(), "abc");
        assert_eq!(AttrValue::from(vec!["a", "b"]).to_string(), "[a, b]");
    }

    #[test]
    fn test_untagged_json() {
        let value: AttrValue = serde_json::from_str(r#"["x", 1, true]"#).unwrap();
        assert_eq!(
            value,
            AttrValue::List(vec![
                AttrValue::from("x"),
                AttrValue::Number(1.0),
                AttrValue::Bool(true)
            ])
        );
        assert_eq!(serde_json::to_string(&AttrValue::from(false)).unwrap(), "false");
    }

    #[test]
    fn test_setting_presence() {
        let set = Setting::from(Some(AttrValue::from("v")));
        assert!(set.is_set());
        assert_eq!(set.value().and_then(AttrValue::as_str), Some("v"));
        assert!(!Setting::from(None).is_set());
    }
}
