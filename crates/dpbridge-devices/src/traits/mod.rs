//! Trait library: per-capability binding logic.
//!
//! A trait wires one capability of one device to the datapoints (or standard
//! cluster attributes) that carry it. Traits are looked up by [`TraitId`],
//! derived from the capability name, in an explicit [`TraitLibrary`] map.
//! Family entries (`measure_`, `alarm_`) catch capabilities with no exact
//! registration.
//!
//! Handlers and listeners a trait creates are staged in its
//! [`TraitContext`] and only committed by the engine when `install` returns
//! `Ok`, so a failing trait leaves nothing behind.

mod battery;
mod datapoint;
mod thermostat;

pub use battery::{BatteryTrait, BATTERY_PERCENTAGE_ATTRIBUTE};
pub use datapoint::DatapointTrait;
pub use thermostat::TargetTemperatureTrait;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use dpbridge_core::{now_ts, CapabilityValue, ConfigurationError, EngineEvent, Error, EventBus, Result};

use crate::binding::{TraitBinding, Writer};
use crate::capability::{CapabilityName, TraitId};
use crate::converter::Converter;
use crate::datapoint::{Datapoint, DatapointId};
use crate::dispatch::DatapointHandler;
use crate::endpoint::{CapabilityDevice, EndpointHandle, EndpointListener};
use crate::registry::Profile;

/// Binding logic for one capability family.
#[async_trait]
pub trait CapabilityTrait: Send + Sync {
    /// `dpMap` keys this trait may consume for `capability`, in lookup order.
    fn dp_keys(&self, capability: &CapabilityName) -> Vec<String>;

    /// Subscribe whatever the capability needs and optionally seed its state.
    async fn install(&self, ctx: &mut TraitContext<'_>) -> Result<()>;
}

/// Everything a trait may touch while installing.
pub struct TraitContext<'a> {
    pub device: &'a Arc<dyn CapabilityDevice>,
    pub endpoint: &'a Arc<dyn EndpointHandle>,
    pub profile: &'a Profile,
    pub events: &'a EventBus,
    binding: TraitBinding,
    handlers: Vec<(DatapointId, Arc<dyn DatapointHandler>)>,
}

impl<'a> TraitContext<'a> {
    pub fn new(
        device: &'a Arc<dyn CapabilityDevice>,
        endpoint: &'a Arc<dyn EndpointHandle>,
        profile: &'a Profile,
        events: &'a EventBus,
        capability: CapabilityName,
    ) -> Self {
        let binding = TraitBinding::new(device.id(), endpoint.id(), capability);
        Self {
            device,
            endpoint,
            profile,
            events,
            binding,
            handlers: Vec::new(),
        }
    }

    pub fn capability(&self) -> &CapabilityName {
        self.binding.capability()
    }

    /// First of `keys` present in the profile's `dpMap`.
    pub fn lookup_datapoint<S: AsRef<str>>(&self, keys: &[S]) -> Option<(String, DatapointId)> {
        keys.iter().find_map(|k| {
            self.profile
                .datapoint(k.as_ref())
                .map(|dp| (k.as_ref().to_string(), dp))
        })
    }

    /// Profile override for `key`, else `default`.
    pub fn converter(&self, key: &str, default: Converter) -> Result<Converter> {
        Ok(self.profile.options.converter(key)?.unwrap_or(default))
    }

    /// Route reports of `dp` into `capability` through `converter`.
    pub fn bind(
        &mut self,
        key: &str,
        dp: DatapointId,
        capability: impl Into<String>,
        converter: Converter,
    ) {
        self.binding.bind_datapoint(key, dp);
        let handler = CapabilityUpdater {
            device: Arc::clone(self.device),
            capability: capability.into(),
            converter,
            events: self.events.clone(),
        };
        self.handlers.push((dp, Arc::new(handler)));
    }

    /// Accept capability writes for the bound capability on `dp`.
    pub fn writeable(&mut self, dp: DatapointId, converter: Converter) {
        self.binding.set_writer(Writer { dp, converter });
    }

    /// Subscribe a listener on a standard cluster; released on teardown.
    pub fn subscribe(&self, cluster: u16, listener: Arc<dyn EndpointListener>) {
        let id = self.endpoint.subscribe(cluster, listener);
        self.binding.add_listener(id);
    }

    /// Set a capability value and publish the update.
    pub async fn update(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        set_and_publish(self.device.as_ref(), self.events, capability, value, None).await
    }

    /// Error for a capability with no usable datapoint.
    pub fn missing_datapoint(&self, keys: &[String]) -> Error {
        Error::TraitInstall {
            capability: self.capability().to_string(),
            reason: format!("no datapoint mapped under {}", keys.join(" or ")),
        }
    }

    pub(crate) fn into_parts(self) -> (TraitBinding, Vec<(DatapointId, Arc<dyn DatapointHandler>)>) {
        (self.binding, self.handlers)
    }
}

/// Shared path for every capability update: write, log, publish.
pub(crate) async fn set_and_publish(
    device: &dyn CapabilityDevice,
    events: &EventBus,
    capability: &str,
    value: CapabilityValue,
    dp: Option<DatapointId>,
) -> Result<()> {
    if value.is_null() {
        debug!(device = device.id(), capability, ?dp, "Converter produced no value, skipping update");
        return Ok(());
    }
    device.set_capability_value(capability, value.clone()).await?;
    debug!(device = device.id(), capability, ?dp, value = %value, "Capability updated");
    events.publish(EngineEvent::CapabilityUpdated {
        device_id: device.id().to_string(),
        capability: capability.to_string(),
        value,
        dp,
        timestamp: now_ts(),
    });
    Ok(())
}

/// Datapoint handler that decodes and writes one capability.
pub struct CapabilityUpdater {
    device: Arc<dyn CapabilityDevice>,
    capability: String,
    converter: Converter,
    events: EventBus,
}

#[async_trait]
impl DatapointHandler for CapabilityUpdater {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn handle(&self, datapoint: &Datapoint) -> Result<()> {
        let value = self.converter.decode(&datapoint.value);
        set_and_publish(
            self.device.as_ref(),
            &self.events,
            &self.capability,
            value,
            Some(datapoint.dp),
        )
        .await
    }
}

/// Explicit map from trait id to implementation.
#[derive(Clone, Default)]
pub struct TraitLibrary {
    traits: HashMap<TraitId, Arc<dyn CapabilityTrait>>,
    /// `(base-name prefix, trait)`, checked in order after exact ids.
    families: Vec<(String, Arc<dyn CapabilityTrait>)>,
}

impl TraitLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with the built-in traits.
    pub fn with_defaults() -> Self {
        let mut lib = Self::new();
        lib.register(TraitId::new("MeasureTemperature"), DatapointTrait::sensor(Converter::divide(10.0)))
            .register(TraitId::new("MeasureHumidity"), DatapointTrait::sensor(Converter::Raw))
            .register(TraitId::new("MeasureLuminance"), DatapointTrait::sensor(Converter::Raw))
            .register(TraitId::new("MeasureCo2"), DatapointTrait::sensor(Converter::Raw))
            .register(TraitId::new("MeasureVoltage"), DatapointTrait::sensor(Converter::divide(10.0)))
            .register(TraitId::new("MeasureCurrent"), DatapointTrait::sensor(Converter::divide(1000.0)))
            .register(TraitId::new("MeasurePower"), DatapointTrait::sensor(Converter::divide(10.0)))
            .register(TraitId::new("MeasureBattery"), BatteryTrait)
            .register(TraitId::new("Onoff"), DatapointTrait::writeable(Converter::boolean(false)))
            .register(TraitId::new("Dim"), DatapointTrait::writeable(Converter::range(1000, 1.0)))
            .register(TraitId::new("TargetTemperature"), TargetTemperatureTrait)
            .register(
                TraitId::new("ThermostatMode"),
                DatapointTrait::writeable(Converter::enumeration(["manual", "auto", "away"])),
            )
            .register(
                TraitId::new("WindowcoveringsState"),
                DatapointTrait::writeable(Converter::enumeration(["up", "idle", "down"])),
            )
            .register_family("measure_", DatapointTrait::sensor(Converter::Raw))
            .register_family("alarm_", DatapointTrait::sensor(Converter::boolean(false)));
        lib
    }

    pub fn register(&mut self, id: TraitId, imp: impl CapabilityTrait + 'static) -> &mut Self {
        self.traits.insert(id, Arc::new(imp));
        self
    }

    pub fn register_family(
        &mut self,
        prefix: impl Into<String>,
        imp: impl CapabilityTrait + 'static,
    ) -> &mut Self {
        self.families.push((prefix.into(), Arc::new(imp)));
        self
    }

    pub fn unregister(&mut self, id: &TraitId) -> bool {
        self.traits.remove(id).is_some()
    }

    pub fn resolve(&self, capability: &CapabilityName) -> Option<Arc<dyn CapabilityTrait>> {
        if let Some(t) = self.traits.get(&capability.trait_id()) {
            return Some(Arc::clone(t));
        }
        self.families
            .iter()
            .find(|(prefix, _)| capability.base().starts_with(prefix.as_str()))
            .map(|(_, t)| Arc::clone(t))
    }

    pub fn ids(&self) -> Vec<&TraitId> {
        let mut ids: Vec<_> = self.traits.keys().collect();
        ids.sort();
        ids
    }

    /// Capabilities of `profile` with no resolvable trait.
    pub fn missing_traits(&self, profile: &Profile) -> Vec<String> {
        profile
            .capabilities
            .iter()
            .filter(|c| {
                CapabilityName::parse(c.as_str())
                    .map(|name| self.resolve(&name).is_none())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Every `dpMap` key some capability of `profile` can consume.
    pub fn owned_keys(&self, profile: &Profile) -> BTreeSet<String> {
        profile
            .capabilities
            .iter()
            .filter_map(|c| CapabilityName::parse(c.as_str()).ok())
            .flat_map(|name| match self.resolve(&name) {
                Some(t) => t.dp_keys(&name),
                None => Vec::new(),
            })
            .collect()
    }

    /// Full load-time check of one profile against this library.
    pub fn validate_profile(&self, profile: &Profile) -> std::result::Result<(), ConfigurationError> {
        profile.check()?;
        if let Some(capability) = self.missing_traits(profile).into_iter().next() {
            return Err(ConfigurationError::MissingTrait {
                profile: profile.id.clone(),
                capability,
            });
        }
        let owned = self.owned_keys(profile);
        if let Some(key) = profile.dp_map.keys().find(|k| !owned.contains(*k)) {
            return Err(ConfigurationError::UnknownDatapointKey {
                profile: profile.id.clone(),
                key: key.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TraitLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraitLibrary")
            .field("traits", &self.ids())
            .field(
                "families",
                &self.families.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            )
            .finish()
    }
}
