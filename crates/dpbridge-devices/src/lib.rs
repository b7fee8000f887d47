//! Datapoint translation engine.
//!
//! Bridges a vendor's multiplexed "datapoint" dialect (many logical values
//! riding one proprietary Zigbee cluster) to a generic capability model:
//!
//! 1. a [`Registry`] matches a node's fingerprint to a declarative [`Profile`];
//! 2. the [`Engine`] installs one trait per declared capability;
//! 3. a per-device [`DatapointDispatcher`] routes incoming reports through
//!    [`Converter`]s into capability updates, and writes flow back the same way.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dpbridge_core::{EngineConfig, EventBus};
//! use dpbridge_devices::{Catalog, Engine, TraitLibrary};
//!
//! # async fn run() -> dpbridge_core::Result<()> {
//! let config = EngineConfig::default();
//! let registry = Catalog::from_config(&config)?.into_registry().await?;
//! let engine = Engine::new(
//!     Arc::new(registry),
//!     TraitLibrary::with_defaults(),
//!     config,
//!     EventBus::new(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod capability;
pub mod catalog;
pub mod converter;
pub mod datapoint;
pub mod discovery;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod loopback;
pub mod registry;
pub mod traits;

pub use binding::{TraitBinding, Writer};
pub use capability::{CapabilityName, TraitId};
pub use catalog::{Catalog, ValidationReport, ValidationWarning};
pub use converter::Converter;
pub use datapoint::{
    commands, encode_datapoint_query, encode_datapoints, encode_query, encode_time_sync, Datapoint,
    DatapointId, DpType, DpValue, ReportFrame, POWER_CONFIG_CLUSTER, PROPRIETARY_CLUSTER,
};
pub use discovery::DeviceCandidate;
pub use dispatch::{DatapointDispatcher, DatapointHandler, DispatchOutcome, DispatchState};
pub use endpoint::{
    AttributeMap, CapabilityDevice, DeviceDescriptor, EndpointEvent, EndpointHandle,
    EndpointListener, ListenerId, NetworkNode,
};
pub use engine::{Engine, PairedDevice, SkippedCapability};
pub use loopback::{LoopbackEndpoint, RecordingDevice, SentCommand};
pub use registry::{
    Fingerprint, Profile, ProfileMatch, ProfileOptions, Registry, DEFAULT_ENDPOINT,
};
pub use traits::{
    BatteryTrait, CapabilityTrait, DatapointTrait, TargetTemperatureTrait, TraitContext,
    BATTERY_PERCENTAGE_ATTRIBUTE,
    TraitLibrary,
};
