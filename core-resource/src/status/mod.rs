//! Resource status resolution.
//!
//! A resource may have to be downloaded and built by the local node before
//! the gateway can serve it. The resolver polls the node until that happens,
//! nudging it with build requests and recovering from stalled downloads.

mod machine;
mod resolver;

pub use machine::{PollState, PollStep};
pub use resolver::{StatusHandle, StatusProbe, StatusResolver};
