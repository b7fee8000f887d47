//! Engine events.

use serde::{Deserialize, Serialize};

use crate::value::CapabilityValue;

/// Something observable that happened inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Traits were applied to a device.
    DevicePaired {
        device_id: String,
        profile: String,
        installed: Vec<String>,
        skipped: Vec<String>,
        timestamp: i64,
    },
    /// A datapoint report was translated into a capability update.
    CapabilityUpdated {
        device_id: String,
        capability: String,
        value: CapabilityValue,
        dp: Option<u8>,
        timestamp: i64,
    },
    /// A report carried a datapoint the active profile does not map.
    DatapointUnmapped {
        device_id: String,
        dp: u8,
        timestamp: i64,
    },
    /// A capability was left unbound while pairing.
    TraitSkipped {
        device_id: String,
        capability: String,
        reason: String,
        timestamp: i64,
    },
    /// A device's bindings were released.
    DeviceRemoved { device_id: String, timestamp: i64 },
}

impl EngineEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::DevicePaired { device_id, .. }
            | Self::CapabilityUpdated { device_id, .. }
            | Self::DatapointUnmapped { device_id, .. }
            | Self::TraitSkipped { device_id, .. }
            | Self::DeviceRemoved { device_id, .. } => device_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::DevicePaired { timestamp, .. }
            | Self::CapabilityUpdated { timestamp, .. }
            | Self::DatapointUnmapped { timestamp, .. }
            | Self::TraitSkipped { timestamp, .. }
            | Self::DeviceRemoved { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_capability_update(&self) -> bool {
        matches!(self, Self::CapabilityUpdated { .. })
    }
}
