//! Engine facade: fingerprint lookup, profile resolution and trait
//! installation.
//!
//! Installation isolates every capability. A capability whose trait is
//! missing, returns an error or panics is logged and skipped while the rest
//! of the device is still bound. Only data-integrity faults in the tables
//! (see [`ConfigurationError`]) surface as errors.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use dpbridge_core::{
    now_ts, CapabilityValue, ConfigurationError, EndpointError, EngineConfig, EngineEvent, Error,
    EventBus, Result,
};

use crate::binding::TraitBinding;
use crate::capability::CapabilityName;
use crate::datapoint::{
    commands, encode_datapoint_query, encode_datapoints, encode_query, encode_time_sync, Datapoint,
    DatapointId, PROPRIETARY_CLUSTER,
};
use crate::dispatch::DatapointDispatcher;
use crate::endpoint::{CapabilityDevice, DeviceDescriptor, EndpointHandle, ListenerId, NetworkNode};
use crate::registry::{Fingerprint, Profile, Registry};
use crate::traits::{TraitContext, TraitLibrary};

/// A capability that was left unbound while pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCapability {
    pub capability: String,
    pub reason: String,
}

pub struct Engine {
    registry: Arc<Registry>,
    traits: Arc<TraitLibrary>,
    config: EngineConfig,
    events: EventBus,
}

impl Engine {
    /// Build an engine over an existing registry.
    ///
    /// With `strict_validation` every registered profile and fingerprint is
    /// checked against the trait library up front.
    pub async fn new(
        registry: Arc<Registry>,
        traits: TraitLibrary,
        config: EngineConfig,
        events: EventBus,
    ) -> Result<Self> {
        let engine = Self {
            registry,
            traits: Arc::new(traits),
            config,
            events,
        };
        if engine.config.strict_validation {
            engine.validate().await?;
        }
        info!(
            profiles = engine.registry.profile_count().await,
            fingerprints = engine.registry.fingerprint_count().await,
            strict = engine.config.strict_validation,
            "Engine ready"
        );
        Ok(engine)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn traits(&self) -> &TraitLibrary {
        &self.traits
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fail on the first profile or fingerprint the tables cannot honour.
    pub async fn validate(&self) -> Result<()> {
        for profile in self.registry.list_profiles().await {
            self.traits.validate_profile(&profile)?;
        }
        for fp in self.registry.list_fingerprints().await {
            if self.registry.profile(&fp.profile).await.is_none() {
                return Err(ConfigurationError::UnknownProfile {
                    profile: fp.profile,
                    manufacturer: fp.manufacturer_name,
                    model: fp.model_id,
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn get_profile(&self, descriptor: &DeviceDescriptor) -> Result<Option<Arc<Profile>>> {
        self.registry.get_profile(descriptor).await
    }

    pub async fn register_fingerprint(&self, fingerprint: Fingerprint) -> Result<()> {
        self.registry.register_fingerprint(fingerprint).await
    }

    /// Register a profile, checking it against the trait library when strict.
    pub async fn register_profile(&self, profile: Profile) -> Result<()> {
        if self.config.strict_validation {
            self.traits.validate_profile(&profile)?;
        }
        self.registry.register_profile(profile).await
    }

    /// Install one trait per capability of `profile` on `endpoint`.
    ///
    /// Never fails: capabilities that cannot be bound are reported in
    /// [`PairedDevice::skipped`].
    pub async fn apply_traits(
        &self,
        device: Arc<dyn CapabilityDevice>,
        endpoint: Arc<dyn EndpointHandle>,
        profile: &Profile,
    ) -> PairedDevice {
        let device_id = device.id().to_string();
        let dispatcher = Arc::new(
            DatapointDispatcher::new(device_id.clone(), self.events.clone()).with_endpoint(&endpoint),
        );
        let mut bindings = Vec::new();
        let mut skipped = Vec::new();

        for capability in &profile.capabilities {
            match self
                .install_one(&device, &endpoint, profile, capability, &dispatcher)
                .await
            {
                Ok(binding) => {
                    debug!(device = %device_id, capability = %capability, datapoints = ?binding.datapoints(), "Trait installed");
                    bindings.push(binding);
                }
                Err(reason) => {
                    self.events.publish(EngineEvent::TraitSkipped {
                        device_id: device_id.clone(),
                        capability: capability.clone(),
                        reason: reason.clone(),
                        timestamp: now_ts(),
                    });
                    skipped.push(SkippedCapability {
                        capability: capability.clone(),
                        reason,
                    });
                }
            }
        }

        let dispatcher_listener = endpoint.subscribe(PROPRIETARY_CLUSTER, dispatcher.clone());

        info!(
            device = %device_id,
            profile = %profile.id,
            installed = bindings.len(),
            skipped = skipped.len(),
            "Traits applied"
        );
        self.events.publish(EngineEvent::DevicePaired {
            device_id: device_id.clone(),
            profile: profile.id.clone(),
            installed: bindings.iter().map(|b| b.capability().to_string()).collect(),
            skipped: skipped.iter().map(|s| s.capability.clone()).collect(),
            timestamp: now_ts(),
        });

        PairedDevice {
            device_id,
            profile_id: profile.id.clone(),
            endpoint,
            dispatcher,
            dispatcher_listener: Mutex::new(Some(dispatcher_listener)),
            bindings,
            skipped,
            seq: Arc::new(AtomicU16::new(0)),
            time_sync_task: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            events: self.events.clone(),
        }
    }

    /// Install a single capability; the error is the logged skip reason.
    async fn install_one(
        &self,
        device: &Arc<dyn CapabilityDevice>,
        endpoint: &Arc<dyn EndpointHandle>,
        profile: &Profile,
        capability: &str,
        dispatcher: &DatapointDispatcher,
    ) -> std::result::Result<TraitBinding, String> {
        let name = CapabilityName::parse(capability).map_err(|e| {
            warn!(device = device.id(), capability, error = %e, "Invalid capability name, skipping");
            e.to_string()
        })?;

        let Some(imp) = self.traits.resolve(&name) else {
            warn!(
                device = device.id(),
                capability,
                trait_id = %name.trait_id(),
                "No trait registered for capability, skipping"
            );
            return Err(format!("no trait '{}'", name.trait_id()));
        };

        let mut ctx = TraitContext::new(device, endpoint, profile, &self.events, name);
        let result = AssertUnwindSafe(imp.install(&mut ctx)).catch_unwind().await;
        let (binding, handlers) = ctx.into_parts();

        let error = match result {
            Ok(Ok(())) => {
                for (dp, handler) in handlers {
                    dispatcher.register(dp, handler);
                }
                return Ok(binding);
            }
            Ok(Err(e)) => e,
            Err(_) => Error::TraitInstall {
                capability: capability.to_string(),
                reason: "trait panicked during install".to_string(),
            },
        };

        binding.release(endpoint.as_ref());
        warn!(device = device.id(), capability, error = %error, "Trait installation failed, skipping capability");
        Err(error.to_string())
    }

    /// Resolve `node`, bind `device` to its endpoint and seed state.
    pub async fn pair(&self, device: Arc<dyn CapabilityDevice>, node: &NetworkNode) -> Result<PairedDevice> {
        let descriptor = node.descriptor();
        let matched = self
            .registry
            .lookup(&descriptor)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no fingerprint for {}", descriptor)))?;

        let candidates = matched.fingerprint.endpoint_ids();
        let endpoint = candidates
            .iter()
            .find_map(|id| node.endpoint(*id))
            .cloned()
            .ok_or(EndpointError::MissingEndpoint(candidates[0]))?;

        debug!(
            device = device.id(),
            fingerprint = %descriptor,
            profile = %matched.profile.id,
            endpoint = endpoint.id(),
            "Pairing device"
        );
        let paired = self.apply_traits(device, endpoint, &matched.profile).await;

        if self.config.time_sync_on_pair {
            if let Err(e) = paired.sync_time().await {
                warn!(device = %paired.device_id, error = %e, "Initial time sync failed");
            }
        }
        if let Some(secs) = self.config.time_sync_interval_secs.filter(|s| *s > 0) {
            paired.start_time_sync(Duration::from_secs(secs))?;
        }
        if self.config.query_on_install {
            if let Err(e) = paired.query().await {
                warn!(device = %paired.device_id, error = %e, "Initial datapoint query failed");
            }
        }
        Ok(paired)
    }
}

/// A device with its traits installed.
///
/// Owns every binding and listener created for the device. Dropping it
/// tears the bindings down.
pub struct PairedDevice {
    device_id: String,
    profile_id: String,
    endpoint: Arc<dyn EndpointHandle>,
    dispatcher: Arc<DatapointDispatcher>,
    dispatcher_listener: Mutex<Option<ListenerId>>,
    bindings: Vec<TraitBinding>,
    skipped: Vec<SkippedCapability>,
    seq: Arc<AtomicU16>,
    time_sync_task: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
    events: EventBus,
}

impl PairedDevice {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn dispatcher(&self) -> &Arc<DatapointDispatcher> {
        &self.dispatcher
    }

    pub fn bindings(&self) -> &[TraitBinding] {
        &self.bindings
    }

    pub fn binding(&self, capability: &str) -> Option<&TraitBinding> {
        self.bindings
            .iter()
            .find(|b| b.capability().as_str() == capability)
    }

    pub fn installed(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.capability().as_str()).collect()
    }

    pub fn skipped(&self) -> &[SkippedCapability] {
        &self.skipped
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Listeners this device still holds on its endpoint.
    pub fn active_listeners(&self) -> usize {
        let dispatcher = usize::from(self.dispatcher_listener.lock().is_some());
        dispatcher + self.bindings.iter().map(TraitBinding::listener_count).sum::<usize>()
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Ask the device to report every datapoint.
    pub async fn query(&self) -> Result<()> {
        self.ensure_active()?;
        self.endpoint
            .send_command(PROPRIETARY_CLUSTER, commands::DATA_QUERY, encode_query(self.next_seq()))
            .await?;
        debug!(device = %self.device_id, "Sent datapoint query");
        Ok(())
    }

    /// Ask the device to report a single datapoint.
    pub async fn request_datapoint(&self, dp: DatapointId) -> Result<()> {
        self.ensure_active()?;
        self.endpoint
            .send_command(
                PROPRIETARY_CLUSTER,
                commands::DATA_QUERY,
                encode_datapoint_query(self.next_seq(), dp),
            )
            .await?;
        debug!(device = %self.device_id, dp, "Requested datapoint");
        Ok(())
    }

    /// Push the host clock to the device without waiting for it to ask.
    pub async fn sync_time(&self) -> Result<()> {
        self.ensure_active()?;
        self.endpoint
            .send_command(
                PROPRIETARY_CLUSTER,
                commands::TIME_SYNC,
                encode_time_sync(self.next_seq(), Utc::now()),
            )
            .await?;
        debug!(device = %self.device_id, "Sent time sync");
        Ok(())
    }

    /// Re-send the host clock every `period` until teardown. Replaces any
    /// running schedule. Must be called from within a Tokio runtime.
    pub fn start_time_sync(&self, period: Duration) -> Result<()> {
        self.ensure_active()?;
        if period.is_zero() {
            return Err(Error::InvalidValue {
                capability: "time_sync".to_string(),
                reason: "period must be non-zero".to_string(),
            });
        }

        let endpoint: Weak<dyn EndpointHandle> = Arc::downgrade(&self.endpoint);
        let seq = self.seq.clone();
        let device_id = self.device_id.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(endpoint) = endpoint.upgrade() else {
                    debug!(device = %device_id, "Endpoint gone, stopping time sync");
                    return;
                };
                let payload = encode_time_sync(seq.fetch_add(1, Ordering::Relaxed), Utc::now());
                match endpoint
                    .send_command(PROPRIETARY_CLUSTER, commands::TIME_SYNC, payload)
                    .await
                {
                    Ok(()) => debug!(device = %device_id, "Periodic time sync sent"),
                    Err(e) => warn!(device = %device_id, error = %e, "Periodic time sync failed"),
                }
            }
        });

        if let Some(previous) = self.time_sync_task.lock().replace(task) {
            previous.abort();
        }
        info!(device = %self.device_id, period_secs = period.as_secs_f64(), "Time sync scheduled");
        Ok(())
    }

    pub fn has_time_sync_schedule(&self) -> bool {
        self.time_sync_task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Encode `value` through the capability's converter and send it.
    pub async fn write_capability(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        self.ensure_active()?;
        let binding = self
            .binding(capability)
            .ok_or_else(|| Error::NotFound(format!("capability '{}' on {}", capability, self.device_id)))?;
        let writer = binding.writer().ok_or_else(|| Error::InvalidValue {
            capability: capability.to_string(),
            reason: "capability is read-only".to_string(),
        })?;
        let raw = writer.converter.encode(&value).ok_or_else(|| Error::InvalidValue {
            capability: capability.to_string(),
            reason: format!("cannot encode {}", value),
        })?;

        let payload = encode_datapoints(self.next_seq(), &[Datapoint::new(writer.dp, raw.clone())])
            .map_err(|e| Error::InvalidValue {
                capability: capability.to_string(),
                reason: e.to_string(),
            })?;
        self.endpoint
            .send_command(PROPRIETARY_CLUSTER, commands::DATA_REQUEST, payload)
            .await?;
        debug!(device = %self.device_id, capability, dp = writer.dp, raw = %raw, "Wrote capability");
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_torn_down() {
            return Err(Error::NotFound(format!("device {} was removed", self.device_id)));
        }
        Ok(())
    }

    /// Release every listener and handler. Idempotent; returns how many
    /// listeners this call released.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut released = self
            .bindings
            .iter()
            .map(|b| b.release(self.endpoint.as_ref()))
            .sum::<usize>();
        if let Some(id) = self.dispatcher_listener.lock().take() {
            if self.endpoint.unsubscribe(id) {
                released += 1;
            }
        }
        let handlers = self.dispatcher.clear();
        if let Some(task) = self.time_sync_task.lock().take() {
            task.abort();
        }

        info!(device = %self.device_id, listeners = released, handlers, "Device bindings released");
        self.events.publish(EngineEvent::DeviceRemoved {
            device_id: self.device_id.clone(),
            timestamp: now_ts(),
        });
        released
    }
}

impl Drop for PairedDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for PairedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairedDevice")
            .field("device_id", &self.device_id)
            .field("profile_id", &self.profile_id)
            .field("installed", &self.installed())
            .field("skipped", &self.skipped)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
