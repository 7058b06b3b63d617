//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service`, `core-playback`). Host applications
//! can depend on `qdn-workspace` and enable the documented features without
//! needing to wire each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{bootstrap_desktop, QdnCore, ServiceError};

#[cfg(feature = "encrypted-streaming")]
pub use core_playback as playback;
