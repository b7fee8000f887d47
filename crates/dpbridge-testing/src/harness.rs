//! Engine + loopback device wiring for end-to-end tests.

use std::sync::Arc;

use dpbridge_core::{EngineConfig, EventBus, Result};
use dpbridge_devices::{
    Catalog, CapabilityDevice, Engine, LoopbackEndpoint, NetworkNode, PairedDevice,
    RecordingDevice, TraitLibrary,
};

use crate::nodes::loopback_node;

/// One engine, one node, one recording device.
pub struct Harness {
    pub engine: Engine,
    pub node: NetworkNode,
    pub endpoint: Arc<LoopbackEndpoint>,
    pub device: Arc<RecordingDevice>,
}

impl Harness {
    /// Build an engine over `catalog` and a node announcing
    /// `manufacturer`/`model`. The device exposes `capabilities`.
    pub async fn new<I, S>(
        catalog: Catalog,
        traits: TraitLibrary,
        manufacturer: &str,
        model: &str,
        capabilities: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = EngineConfig {
            query_on_install: true,
            ..EngineConfig::default()
        };
        Self::with_config(catalog, traits, config, manufacturer, model, capabilities).await
    }

    /// Like [`Harness::new`] with an explicit engine configuration.
    pub async fn with_config<I, S>(
        catalog: Catalog,
        traits: TraitLibrary,
        config: EngineConfig,
        manufacturer: &str,
        model: &str,
        capabilities: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Arc::new(catalog.into_registry().await?);
        let engine = Engine::new(registry, traits, config, EventBus::new()).await?;
        let (node, endpoint) = loopback_node(manufacturer, model, "0x1a2b", 1);
        let device = Arc::new(RecordingDevice::new(
            format!("{}-{}", manufacturer, model),
            capabilities,
        ));
        Ok(Self {
            engine,
            node,
            endpoint,
            device,
        })
    }

    pub async fn pair(&self) -> Result<PairedDevice> {
        let device: Arc<dyn CapabilityDevice> = self.device.clone();
        self.engine.pair(device, &self.node).await
    }
}
