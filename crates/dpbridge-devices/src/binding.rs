//! Per-device, per-capability runtime bindings.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::capability::CapabilityName;
use crate::converter::Converter;
use crate::datapoint::DatapointId;
use crate::endpoint::{EndpointHandle, ListenerId};

/// Outbound path of a writeable capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Writer {
    pub dp: DatapointId,
    pub converter: Converter,
}

/// What one trait installed for one capability of one device.
///
/// A binding is owned by the [`PairedDevice`](crate::engine::PairedDevice)
/// it was created for and is never shared across devices.
#[derive(Debug)]
pub struct TraitBinding {
    device_id: String,
    endpoint_id: u8,
    capability: CapabilityName,
    datapoints: BTreeMap<String, DatapointId>,
    writer: Option<Writer>,
    listeners: Mutex<Vec<ListenerId>>,
}

impl TraitBinding {
    pub fn new(device_id: impl Into<String>, endpoint_id: u8, capability: CapabilityName) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint_id,
            capability,
            datapoints: BTreeMap::new(),
            writer: None,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn endpoint_id(&self) -> u8 {
        self.endpoint_id
    }

    pub fn capability(&self) -> &CapabilityName {
        &self.capability
    }

    /// The `dpMap` subset this binding consumes.
    pub fn datapoints(&self) -> &BTreeMap<String, DatapointId> {
        &self.datapoints
    }

    pub fn writer(&self) -> Option<&Writer> {
        self.writer.as_ref()
    }

    pub fn is_writeable(&self) -> bool {
        self.writer.is_some()
    }

    pub(crate) fn bind_datapoint(&mut self, key: impl Into<String>, dp: DatapointId) {
        self.datapoints.insert(key.into(), dp);
    }

    pub(crate) fn set_writer(&mut self, writer: Writer) {
        self.writer = Some(writer);
    }

    pub(crate) fn add_listener(&self, id: ListenerId) {
        self.listeners.lock().push(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Unsubscribe every listener this binding registered.
    ///
    /// Safe to call repeatedly; returns how many listeners were released.
    pub fn release(&self, endpoint: &dyn EndpointHandle) -> usize {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        listeners
            .into_iter()
            .filter(|id| endpoint.unsubscribe(*id))
            .count()
    }
}
