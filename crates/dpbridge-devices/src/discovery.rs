//! Discovery over a set of network nodes.
//!
//! Each node is resolved on its own. No match is not an error, and a node whose
//! lookup fails is logged and skipped so the remaining nodes are still
//! considered.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use dpbridge_core::Error;

use crate::endpoint::NetworkNode;
use crate::engine::Engine;

/// A node that matched a known fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCandidate {
    pub display_name: String,
    pub network_address: String,
    pub profile_id: String,
}

impl Engine {
    /// Candidates for every node whose fingerprint resolves, in input order.
    pub async fn discover(&self, nodes: &[NetworkNode]) -> Vec<DeviceCandidate> {
        let mut candidates = Vec::new();
        for node in nodes {
            match self.registry().lookup(&node.descriptor()).await {
                Ok(Some(matched)) => {
                    trace!(address = %node.network_address, profile = %matched.profile.id, "Node matched");
                    candidates.push(DeviceCandidate {
                        display_name: matched.fingerprint.label(),
                        network_address: node.network_address.clone(),
                        profile_id: matched.profile.id.clone(),
                    });
                }
                Ok(None) => {
                    trace!(address = %node.network_address, fingerprint = %node.descriptor(), "No fingerprint match");
                }
                Err(e) => {
                    let configuration = e.is_configuration();
                    let error = Error::DiscoveryNode {
                        address: node.network_address.clone(),
                        reason: e.to_string(),
                    };
                    // Broken tables stay visible even though the node is skipped.
                    if configuration {
                        warn!(error = %error, "Discovery lookup hit a configuration error, skipping node");
                    } else {
                        debug!(error = %error, "Discovery lookup failed, skipping node");
                    }
                }
            }
        }
        debug!(nodes = nodes.len(), candidates = candidates.len(), "Discovery finished");
        candidates
    }
}
