//! Error taxonomy shared by the engine crates.
//!
//! Only structural data-integrity faults ([`ConfigurationError`]) are meant to
//! surface as hard failures. Everything scoped to one capability, one frame or
//! one node is recovered locally by the caller and logged.

use thiserror::Error;

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    /// A lookup that callers asked to be strict found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Fingerprint/profile/trait tables are inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// One trait failed to install; the remaining capabilities are unaffected.
    #[error("Trait installation failed for '{capability}': {reason}")]
    TraitInstall { capability: String, reason: String },

    /// A capability write carried a value the bound converter cannot encode.
    #[error("Invalid value for '{capability}': {reason}")]
    InvalidValue { capability: String, reason: String },

    /// Probing a single network node failed during discovery.
    #[error("Discovery failed for node {address}: {reason}")]
    DiscoveryNode { address: String, reason: String },

    /// A node descriptor is missing the identifying strings.
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// A proprietary-cluster payload could not be decoded.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The host transport rejected a read or command.
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a data-integrity fault that must not be swallowed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Data-integrity faults in the fingerprint/profile/trait tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("fingerprint {manufacturer}/{model} references unknown profile '{profile}'")]
    UnknownProfile {
        profile: String,
        manufacturer: String,
        model: String,
    },

    #[error("profile '{0}' is not registered")]
    UnresolvedProfile(String),

    #[error("profile '{0}' declares no capabilities")]
    EmptyCapabilities(String),

    #[error("profile '{profile}' declares capability '{capability}' with no registered trait")]
    MissingTrait { profile: String, capability: String },

    #[error(
        "fingerprint {manufacturer}/{model} already maps to '{existing}', refusing '{requested}'"
    )]
    DuplicateFingerprint {
        manufacturer: String,
        model: String,
        existing: String,
        requested: String,
    },

    #[error("profile '{profile}' maps datapoint key '{key}' that no capability binds")]
    UnknownDatapointKey { profile: String, key: String },

    #[error("invalid capability name '{0}'")]
    InvalidCapability(String),

    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
}

/// Decoding failures for proprietary-cluster payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload too short: {0} bytes")]
    TooShort(usize),

    #[error("datapoint id 0 at offset {offset}")]
    ZeroDatapoint { offset: usize },

    #[error("unknown datapoint type 0x{kind:02x} for dp {dp}")]
    UnknownType { dp: u8, kind: u8 },

    #[error("dp {dp} declares {declared} bytes but only {available} remain")]
    Truncated {
        dp: u8,
        declared: usize,
        available: usize,
    },

    #[error("dp {dp} has invalid length {len} for its type")]
    BadLength { dp: u8, len: usize },

    #[error("dp {dp} carries {len} bytes, more than a record can hold")]
    Oversize { dp: u8, len: usize },
}

/// Failures reported by the host's endpoint transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("cluster 0x{0:04x} not available on endpoint")]
    ClusterUnavailable(u16),

    #[error("attribute read failed: {0}")]
    Read(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("endpoint {0} not present on node")]
    MissingEndpoint(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = Error::from(ConfigurationError::UnknownProfile {
            profile: "climate_basic".to_string(),
            manufacturer: "_TZE200_abcdefgh".to_string(),
            model: "TS0601".to_string(),
        });
        let msg = error.to_string();
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("climate_basic"));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_frame_error_display() {
        let error = FrameError::Truncated {
            dp: 3,
            declared: 4,
            available: 1,
        };
        assert_eq!(error.to_string(), "dp 3 declares 4 bytes but only 1 remain");
        assert!(!Error::from(error).is_configuration());
    }
}
