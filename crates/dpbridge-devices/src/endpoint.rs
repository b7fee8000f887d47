//! Contracts the host platform supplies: network nodes, endpoint handles and
//! the capability surface of a device proxy.
//!
//! The engine only consumes these. Radio pairing, routing, transport
//! timeouts and security all live behind [`EndpointHandle`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use dpbridge_core::{CapabilityValue, EndpointError, Result};

/// Attribute name to JSON value, as returned by `read_attributes`.
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;

/// Handle returned by [`EndpointHandle::subscribe`], used to release the
/// subscription again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Something the endpoint delivers to subscribers of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Raw frame on the proprietary cluster.
    DatapointReport { command: u8, payload: Bytes },
    /// Attribute report on a standard cluster.
    AttributeReport { cluster: u16, attributes: AttributeMap },
}

impl EndpointEvent {
    pub fn datapoint(command: u8, payload: impl Into<Bytes>) -> Self {
        Self::DatapointReport {
            command,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait EndpointListener: Send + Sync {
    async fn on_event(&self, event: &EndpointEvent);
}

/// One endpoint of a network node.
#[async_trait]
pub trait EndpointHandle: Send + Sync {
    fn id(&self) -> u8;

    /// Read named attributes of a cluster. Timeouts are the transport's concern.
    async fn read_attributes(
        &self,
        cluster: u16,
        names: &[&str],
    ) -> std::result::Result<AttributeMap, EndpointError>;

    /// Register a listener for events on `cluster`.
    fn subscribe(&self, cluster: u16, listener: Arc<dyn EndpointListener>) -> ListenerId;

    /// Returns `false` when the listener was already released.
    fn unsubscribe(&self, id: ListenerId) -> bool;

    async fn send_command(
        &self,
        cluster: u16,
        command: u8,
        payload: Bytes,
    ) -> std::result::Result<(), EndpointError>;
}

/// The device proxy the engine writes capability values to.
#[async_trait]
pub trait CapabilityDevice: Send + Sync {
    fn id(&self) -> &str;

    fn has_capability(&self, capability: &str) -> bool;

    async fn set_capability_value(&self, capability: &str, value: CapabilityValue) -> Result<()>;
}

/// The identifying strings a node announces on join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub manufacturer_name: String,
    pub model_id: String,
}

impl DeviceDescriptor {
    pub fn new(manufacturer_name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            manufacturer_name: manufacturer_name.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manufacturer_name, self.model_id)
    }
}

/// A node as supplied by the host's Zigbee stack.
#[derive(Clone)]
pub struct NetworkNode {
    pub manufacturer_name: String,
    pub model_id: String,
    pub endpoints: BTreeMap<u8, Arc<dyn EndpointHandle>>,
    pub network_address: String,
}

impl NetworkNode {
    pub fn new(
        manufacturer_name: impl Into<String>,
        model_id: impl Into<String>,
        network_address: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer_name: manufacturer_name.into(),
            model_id: model_id.into(),
            endpoints: BTreeMap::new(),
            network_address: network_address.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn EndpointHandle>) -> Self {
        self.endpoints.insert(endpoint.id(), endpoint);
        self
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(&self.manufacturer_name, &self.model_id)
    }

    pub fn endpoint(&self, id: u8) -> Option<&Arc<dyn EndpointHandle>> {
        self.endpoints.get(&id)
    }
}

impl fmt::Debug for NetworkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkNode")
            .field("manufacturer_name", &self.manufacturer_name)
            .field("model_id", &self.model_id)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("network_address", &self.network_address)
            .finish()
    }
}
