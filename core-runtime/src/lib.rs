//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the QDN core crates:
//! - Configuration and capability validation
//! - Event bus for status, cache and playback events
//! - Logging and tracing setup
//!
//! Resource, cache and playback crates depend on this one for their config
//! inputs, their event channel and their logging conventions.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags, DEFAULT_GATEWAY_URL};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
