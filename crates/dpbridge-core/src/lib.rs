//! Core types for dpbridge.
//!
//! This crate holds what every other crate in the workspace shares: the error
//! taxonomy, engine configuration, capability values and the event bus.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod value;

pub use config::EngineConfig;
pub use error::{ConfigurationError, EndpointError, Error, FrameError, Result};
pub use event::EngineEvent;
pub use eventbus::{EventBus, EventBusReceiver, DEFAULT_CHANNEL_CAPACITY};
pub use value::CapabilityValue;

/// Current Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{ConfigurationError, Error, Result};
    pub use crate::event::EngineEvent;
    pub use crate::eventbus::EventBus;
    pub use crate::value::CapabilityValue;
}
