//! Testing utilities for dpbridge
//!
//! This crate provides:
//! - Sample catalogs covering every built-in trait
//! - Network node builders backed by loopback endpoints
//! - A harness wiring an engine to a recording device

pub mod fixtures;
pub mod harness;
pub mod nodes;

pub use fixtures::{sample_catalog, sample_registry, CLIMATE_MANUFACTURER, CLIMATE_MODEL};
pub use harness::Harness;
pub use nodes::{loopback_node, mixed_nodes};

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dpbridge=debug")),
        )
        .with_test_writer()
        .try_init();
}
