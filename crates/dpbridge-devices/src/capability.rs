//! Capability names and the trait identifiers derived from them.
//!
//! A capability is lowercase `snake_case`, optionally followed by one
//! `.suffix` naming a sub-capability (`onoff.usb2`). The trait identifier is
//! the base name in `PascalCase`:
//!
//! ```text
//! measure_temperature  -> MeasureTemperature
//! onoff.usb2           -> Onoff
//! windowcoverings_state -> WindowcoveringsState
//! ```
//!
//! [`TraitId::capability`] inverts the transform for every valid base name.

use std::fmt;

use serde::{Deserialize, Serialize};

use dpbridge_core::ConfigurationError;

/// Family prefixes stripped when deriving the default datapoint key.
const KEY_PREFIXES: &[&str] = &["measure_", "alarm_"];

/// A validated capability name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityName(String);

impl CapabilityName {
    pub fn parse(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let (base, sub) = match name.split_once('.') {
            Some((base, sub)) => (base, Some(sub)),
            None => (name.as_str(), None),
        };
        if !is_snake(base) || sub.is_some_and(|s| s.is_empty() || !is_ident(s)) {
            return Err(ConfigurationError::InvalidCapability(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name without the sub-capability suffix.
    pub fn base(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(base, _)| base)
    }

    pub fn sub(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, sub)| sub)
    }

    pub fn trait_id(&self) -> TraitId {
        TraitId::from_base(self.base())
    }

    /// Default `dpMap` key: family prefix stripped, `.` replaced by `_`.
    pub fn default_dp_key(&self) -> String {
        let base = self.base();
        let stripped = KEY_PREFIXES
            .iter()
            .find_map(|p| base.strip_prefix(p))
            .unwrap_or(base);
        match self.sub() {
            Some(sub) => format!("{}_{}", stripped, sub),
            None => stripped.to_string(),
        }
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CapabilityName {
    type Error = ConfigurationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<CapabilityName> for String {
    fn from(c: CapabilityName) -> Self {
        c.0
    }
}

impl AsRef<str> for CapabilityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// PascalCase identifier under which a trait is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraitId(String);

impl TraitId {
    /// Wrap an already PascalCase identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    fn from_base(base: &str) -> Self {
        let id = base
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inverse transform: the base capability this id was derived from.
    ///
    /// Digits stay attached to the preceding word, matching how
    /// [`CapabilityName`] validation forbids words that start with a digit.
    pub fn capability(&self) -> String {
        let mut out = String::with_capacity(self.0.len() + 4);
        for (i, c) in self.0.chars().enumerate() {
            if c.is_ascii_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for TraitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_ident(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Words are non-empty, start with a letter, and use `[a-z0-9]`.
fn is_snake(s: &str) -> bool {
    !s.is_empty()
        && s.split('_').all(|word| {
            word.chars().next().is_some_and(|c| c.is_ascii_lowercase())
                && word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(s: &str) -> CapabilityName {
        CapabilityName::parse(s).unwrap()
    }

    #[test]
    fn test_trait_id_transform() {
        assert_eq!(cap("measure_temperature").trait_id().as_str(), "MeasureTemperature");
        assert_eq!(cap("onoff").trait_id().as_str(), "Onoff");
        assert_eq!(cap("onoff.usb2").trait_id().as_str(), "Onoff");
        assert_eq!(cap("measure_co2").trait_id().as_str(), "MeasureCo2");
    }

    #[test]
    fn test_trait_id_is_reversible() {
        for name in [
            "measure_temperature",
            "alarm_motion",
            "windowcoverings_state",
            "measure_co2",
            "dim",
            "target_temperature",
        ] {
            assert_eq!(cap(name).trait_id().capability(), name);
        }
    }

    #[test]
    fn test_default_dp_key() {
        assert_eq!(cap("measure_temperature").default_dp_key(), "temperature");
        assert_eq!(cap("alarm_contact").default_dp_key(), "contact");
        assert_eq!(cap("onoff.usb2").default_dp_key(), "onoff_usb2");
        assert_eq!(cap("target_temperature").default_dp_key(), "target_temperature");
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["", "Measure", "measure__x", "_x", "x_", "a.", "a.B", "1st", "a b", "a_2b"] {
            assert!(CapabilityName::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_serde_validates() {
        let ok: CapabilityName = serde_json::from_str("\"onoff.usb2\"").unwrap();
        assert_eq!(ok.sub(), Some("usb2"));
        assert!(serde_json::from_str::<CapabilityName>("\"On-Off\"").is_err());
    }
}
