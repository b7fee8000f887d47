//! Network node builders backed by loopback endpoints.

use std::sync::Arc;

use dpbridge_devices::{EndpointHandle, LoopbackEndpoint, NetworkNode};

/// A node with one loopback endpoint, returned alongside so tests can drive it.
pub fn loopback_node(
    manufacturer: &str,
    model: &str,
    address: &str,
    endpoint_id: u8,
) -> (NetworkNode, Arc<LoopbackEndpoint>) {
    let endpoint = Arc::new(LoopbackEndpoint::new(endpoint_id));
    let handle: Arc<dyn EndpointHandle> = endpoint.clone();
    let node = NetworkNode::new(manufacturer, model, address).with_endpoint(handle);
    (node, endpoint)
}

/// Synthetic short address, `0x0000`-style.
pub fn address(index: usize) -> String {
    format!("0x{:04x}", 0x1000 + index)
}

/// `total` nodes; the ones at `matching` indices carry the given
/// `(manufacturer, model)` pairs, the rest unknown identities.
pub fn mixed_nodes(total: usize, matching: &[(usize, &str, &str)]) -> Vec<NetworkNode> {
    (0..total)
        .map(|i| {
            let (manufacturer, model) = matching
                .iter()
                .find(|(idx, _, _)| *idx == i)
                .map(|(_, m, model)| (m.to_string(), model.to_string()))
                .unwrap_or_else(|| (format!("_TZ9999_unknown{:02}", i), "TS9999".to_string()));
            loopback_node(&manufacturer, &model, &address(i), 1).0
        })
        .collect()
}
