//! Converters between datapoint payloads and capability values.
//!
//! Every converter is stateless and total: malformed or out-of-range input is
//! clamped or mapped to [`CapabilityValue::Null`], never a panic or an error.
//! Encoding returns `None` when a capability value has no wire form.
//!
//! Round-trip precision per kind (`decode(encode(v)) == v` for `v` in the
//! legal domain):
//!
//! | kind | domain | precision |
//! |------|--------|-----------|
//! | `raw` | `i32` | exact |
//! | `divide` | multiples of `1/divisor` | `1/divisor` (rounded on encode) |
//! | `battery` | `0..=100` in 0.5 steps | 0.5 % |
//! | `percent` | `0..=100` integers | exact |
//! | `boolean` | `true`/`false` | exact |
//! | `enum` | declared names | exact |
//! | `range` | `0..=max` in `max/raw_max` steps | `max/raw_max` |
//! | `text` | UTF-8 without NUL | exact |

use serde::{Deserialize, Serialize};

use dpbridge_core::CapabilityValue;

use crate::datapoint::DpValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Converter {
    /// Integer passthrough.
    Raw,
    /// Fixed-point scaling, e.g. `divisor: 10` turns 215 into 21.5.
    Divide { divisor: f64 },
    /// Half-percent battery reading (0..=200) to percent.
    Battery,
    /// Percent clamped to 0..=100.
    Percent,
    /// Non-zero is `true`; `invert` flips the sense.
    Boolean {
        #[serde(default)]
        invert: bool,
    },
    /// Index into a list of names.
    Enum { values: Vec<String> },
    /// Linear map of `0..=raw_max` onto `0..=max`.
    Range { raw_max: i64, max: f64 },
    /// String passthrough.
    Text,
}

impl Converter {
    pub fn divide(divisor: f64) -> Self {
        Self::Divide { divisor }
    }

    pub fn boolean(invert: bool) -> Self {
        Self::Boolean { invert }
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(raw_max: i64, max: f64) -> Self {
        Self::Range { raw_max, max }
    }

    /// Parameter sanity check, run when a profile option overrides a default.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Divide { divisor } if !divisor.is_finite() || *divisor <= 0.0 => {
                Err(format!("divisor must be a positive number, got {}", divisor))
            }
            Self::Enum { values } if values.is_empty() => {
                Err("enum converter needs at least one value".to_string())
            }
            Self::Enum { values } if values.len() > usize::from(u8::MAX) + 1 => {
                Err(format!("enum converter supports at most 256 values, got {}", values.len()))
            }
            Self::Range { raw_max, max } if *raw_max <= 0 || !max.is_finite() || *max <= 0.0 => {
                Err(format!("range needs positive bounds, got raw_max={} max={}", raw_max, max))
            }
            _ => Ok(()),
        }
    }

    /// Smallest capability-domain step this converter can represent, or
    /// `None` when it round-trips its domain exactly.
    pub fn precision(&self) -> Option<f64> {
        match self {
            Self::Divide { divisor } => Some(1.0 / divisor),
            Self::Battery => Some(0.5),
            Self::Range { raw_max, max } => Some(max / *raw_max as f64),
            Self::Raw
            | Self::Percent
            | Self::Boolean { .. }
            | Self::Enum { .. }
            | Self::Text => None,
        }
    }

    /// Protocol domain to capability domain.
    pub fn decode(&self, raw: &DpValue) -> CapabilityValue {
        match self {
            Self::Raw => match raw {
                DpValue::String(s) => CapabilityValue::String(s.clone()),
                DpValue::Bool(b) => CapabilityValue::Boolean(*b),
                other => other
                    .as_i64()
                    .map(CapabilityValue::Integer)
                    .unwrap_or(CapabilityValue::Null),
            },
            Self::Divide { divisor } => match raw.as_i64() {
                Some(v) if divisor.is_finite() && *divisor > 0.0 => {
                    CapabilityValue::Float(v as f64 / divisor)
                }
                _ => CapabilityValue::Null,
            },
            Self::Battery => match raw.as_i64() {
                Some(v) => CapabilityValue::Float(v.clamp(0, 200) as f64 / 2.0),
                None => CapabilityValue::Null,
            },
            Self::Percent => match raw.as_i64() {
                Some(v) => CapabilityValue::Integer(v.clamp(0, 100)),
                None => CapabilityValue::Null,
            },
            Self::Boolean { invert } => match raw.as_i64() {
                Some(v) => CapabilityValue::Boolean((v != 0) ^ invert),
                None => CapabilityValue::Null,
            },
            Self::Enum { values } => raw
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| values.get(i))
                .map(|name| CapabilityValue::String(name.clone()))
                .unwrap_or(CapabilityValue::Null),
            Self::Range { raw_max, max } => match raw.as_i64() {
                Some(v) if *raw_max > 0 => {
                    CapabilityValue::Float(v.clamp(0, *raw_max) as f64 * max / *raw_max as f64)
                }
                _ => CapabilityValue::Null,
            },
            Self::Text => match raw {
                DpValue::String(s) => CapabilityValue::String(s.clone()),
                DpValue::Raw(bytes) => {
                    CapabilityValue::String(String::from_utf8_lossy(bytes).replace('\0', ""))
                }
                other => other
                    .as_i64()
                    .map(|v| CapabilityValue::String(v.to_string()))
                    .unwrap_or(CapabilityValue::Null),
            },
        }
    }

    /// Capability domain to protocol domain.
    pub fn encode(&self, value: &CapabilityValue) -> Option<DpValue> {
        match self {
            Self::Raw => match value {
                CapabilityValue::Boolean(b) => Some(DpValue::Bool(*b)),
                CapabilityValue::String(s) => Some(DpValue::String(s.clone())),
                other => other.as_i64().map(|v| DpValue::Value(saturate(v))),
            },
            Self::Divide { divisor } => {
                let v = value.as_f64()?;
                if !v.is_finite() || !divisor.is_finite() || *divisor <= 0.0 {
                    return None;
                }
                Some(DpValue::Value(saturate_f64((v * divisor).round())))
            }
            Self::Battery => {
                let v = value.as_f64().filter(|v| v.is_finite())?;
                Some(DpValue::Value((v.clamp(0.0, 100.0) * 2.0).round() as i32))
            }
            Self::Percent => {
                let v = value.as_i64()?;
                Some(DpValue::Value(v.clamp(0, 100) as i32))
            }
            Self::Boolean { invert } => value.as_bool().map(|b| DpValue::Bool(b ^ invert)),
            Self::Enum { values } => {
                let index = match value {
                    CapabilityValue::String(name) => values.iter().position(|v| v == name)?,
                    other => usize::try_from(other.as_i64()?)
                        .ok()
                        .filter(|i| *i < values.len())?,
                };
                u8::try_from(index).ok().map(DpValue::Enum)
            }
            Self::Range { raw_max, max } => {
                let v = value.as_f64().filter(|v| v.is_finite())?;
                if *raw_max <= 0 || !max.is_finite() || *max <= 0.0 {
                    return None;
                }
                let raw = (v.clamp(0.0, *max) * *raw_max as f64 / max).round();
                Some(DpValue::Value(saturate_f64(raw)))
            }
            Self::Text => value.as_str().map(|s| DpValue::String(s.to_string())),
        }
    }
}

fn saturate(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn saturate_f64(v: f64) -> i32 {
    // `as` saturates for floats and maps NaN to 0.
    v as i32
}
