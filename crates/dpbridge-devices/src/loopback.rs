//! In-process endpoint and device used by the `replay` command and tests.
//!
//! [`LoopbackEndpoint`] records every command sent to it and lets the caller
//! inject frames as if a device had reported them. [`RecordingDevice`] keeps
//! every capability value the engine writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use dpbridge_core::{CapabilityValue, EndpointError, Result};

use crate::datapoint::{commands, encode_datapoints, Datapoint, PROPRIETARY_CLUSTER};
use crate::endpoint::{
    AttributeMap, CapabilityDevice, EndpointEvent, EndpointHandle, EndpointListener, ListenerId,
};

/// A command captured by [`LoopbackEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub cluster: u16,
    pub command: u8,
    pub payload: Bytes,
}

#[derive(Default)]
pub struct LoopbackEndpoint {
    id: u8,
    next_listener: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, u16, Arc<dyn EndpointListener>)>>,
    attributes: RwLock<HashMap<u16, AttributeMap>>,
    sent: Mutex<Vec<SentCommand>>,
    unavailable: RwLock<BTreeSet<u16>>,
}

impl LoopbackEndpoint {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Serve `value` for `name` on `cluster` reads.
    pub fn set_attribute(&self, cluster: u16, name: &str, value: serde_json::Value) {
        self.attributes
            .write()
            .entry(cluster)
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Make reads and commands on `cluster` fail.
    pub fn set_unavailable(&self, cluster: u16) {
        self.unavailable.write().insert(cluster);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn listener_count_for(&self, cluster: u16) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(_, c, _)| *c == cluster)
            .count()
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<SentCommand> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Deliver `event` on `cluster` to every subscribed listener.
    pub async fn emit(&self, cluster: u16, event: EndpointEvent) -> usize {
        // Snapshot so listeners may subscribe/unsubscribe while handling.
        let targets: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, c, _)| *c == cluster)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in &targets {
            listener.on_event(&event).await;
        }
        targets.len()
    }

    /// Inject a raw proprietary-cluster report payload.
    pub async fn report_raw(&self, payload: impl Into<Bytes>) -> usize {
        self.emit(
            PROPRIETARY_CLUSTER,
            EndpointEvent::datapoint(commands::DATA_REPORT, payload),
        )
        .await
    }

    /// Inject a report carrying `datapoints`. Nothing is delivered when a
    /// value is too large to encode.
    pub async fn report(&self, seq: u16, datapoints: &[Datapoint]) -> usize {
        match encode_datapoints(seq, datapoints) {
            Ok(payload) => self.report_raw(payload).await,
            Err(e) => {
                tracing::warn!(endpoint = self.id, error = %e, "Dropping unencodable report");
                0
            }
        }
    }

    /// Inject an attribute report on a standard cluster.
    pub async fn report_attributes(&self, cluster: u16, attributes: AttributeMap) -> usize {
        self.emit(
            cluster,
            EndpointEvent::AttributeReport {
                cluster,
                attributes,
            },
        )
        .await
    }
}

impl std::fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .field("sent", &self.sent.lock().len())
            .finish()
    }
}

#[async_trait]
impl EndpointHandle for LoopbackEndpoint {
    fn id(&self) -> u8 {
        self.id
    }

    async fn read_attributes(
        &self,
        cluster: u16,
        names: &[&str],
    ) -> std::result::Result<AttributeMap, EndpointError> {
        if self.unavailable.read().contains(&cluster) {
            return Err(EndpointError::ClusterUnavailable(cluster));
        }
        let attributes = self.attributes.read();
        let stored = attributes.get(&cluster);
        Ok(names
            .iter()
            .filter_map(|name| {
                stored
                    .and_then(|m| m.get(*name))
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect())
    }

    fn subscribe(&self, cluster: u16, listener: Arc<dyn EndpointListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, cluster, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(l, _, _)| *l != id);
        listeners.len() != before
    }

    async fn send_command(
        &self,
        cluster: u16,
        command: u8,
        payload: Bytes,
    ) -> std::result::Result<(), EndpointError> {
        if self.unavailable.read().contains(&cluster) {
            return Err(EndpointError::Command(format!(
                "cluster 0x{:04x} unavailable",
                cluster
            )));
        }
        self.sent.lock().push(SentCommand {
            cluster,
            command,
            payload,
        });
        Ok(())
    }
}

/// Capability surface that stores what it is given.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    id: String,
    capabilities: BTreeSet<String>,
    values: RwLock<BTreeMap<String, CapabilityValue>>,
    history: Mutex<Vec<(String, CapabilityValue)>>,
}

impl RecordingDevice {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn value(&self, capability: &str) -> Option<CapabilityValue> {
        self.values.read().get(capability).cloned()
    }

    pub fn values(&self) -> BTreeMap<String, CapabilityValue> {
        self.values.read().clone()
    }

    /// Every write in order.
    pub fn history(&self) -> Vec<(String, CapabilityValue)> {
        self.history.lock().clone()
    }

    pub fn take_history(&self) -> Vec<(String, CapabilityValue)> {
        std::mem::take(&mut *self.history.lock())
    }
}

#[async_trait]
impl CapabilityDevice for RecordingDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()> {
        self.values
            .write()
            .insert(capability.to_string(), value.clone());
        self.history.lock().push((capability.to_string(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(Mutex<usize>);

    #[async_trait]
    impl EndpointListener for Counter {
        async fn on_event(&self, _event: &EndpointEvent) {
            *self.0.lock() += 1;
        }
    }

    #[tokio::test]
    async fn test_subscribe_emit_unsubscribe() {
        let endpoint = LoopbackEndpoint::new(1);
        let counter = Arc::new(Counter(Mutex::new(0)));
        let id = endpoint.subscribe(PROPRIETARY_CLUSTER, counter.clone());

        assert_eq!(endpoint.report_raw(vec![0, 1]).await, 1);
        assert_eq!(*counter.0.lock(), 1);

        assert!(endpoint.unsubscribe(id));
        assert!(!endpoint.unsubscribe(id));
        assert_eq!(endpoint.report_raw(vec![0, 1]).await, 0);
        assert_eq!(endpoint.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_read_attributes() {
        let endpoint = LoopbackEndpoint::new(1);
        endpoint.set_attribute(1, "batteryPercentageRemaining", serde_json::json!(200));
        let attrs = endpoint
            .read_attributes(1, &["batteryPercentageRemaining", "batteryVoltage"])
            .await
            .unwrap();
        assert_eq!(attrs.len(), 1);

        endpoint.set_unavailable(1);
        assert_eq!(
            endpoint.read_attributes(1, &["batteryPercentageRemaining"]).await,
            Err(EndpointError::ClusterUnavailable(1))
        );
    }

    #[tokio::test]
    async fn test_recording_device() {
        let device = RecordingDevice::new("dev1", ["onoff"]);
        assert!(device.has_capability("onoff"));
        assert!(!device.has_capability("dim"));
        device
            .set_capability_value("onoff", CapabilityValue::Boolean(true))
            .await
            .unwrap();
        assert_eq!(device.value("onoff"), Some(CapabilityValue::Boolean(true)));
        assert_eq!(device.history().len(), 1);
    }
}
