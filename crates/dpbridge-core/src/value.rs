//! Capability-domain values.

use serde::{Deserialize, Serialize};

/// A value written to (or read from) a device capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Sentinel for raw input a converter could not map.
    Null,
}

impl CapabilityValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for CapabilityValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for CapabilityValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CapabilityValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for CapabilityValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(CapabilityValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(CapabilityValue::Float(2.6).as_i64(), Some(3));
        assert_eq!(CapabilityValue::Integer(0).as_bool(), Some(false));
        assert_eq!(CapabilityValue::String("x".into()).as_f64(), None);
    }

    #[test]
    fn test_untagged_json() {
        let v: CapabilityValue = serde_json::from_str("21.5").unwrap();
        assert_eq!(v, CapabilityValue::Float(21.5));
        let v: CapabilityValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, CapabilityValue::Boolean(true));
        let v: CapabilityValue = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
    }
}
