//! # Encrypted Playback
//!
//! Plays resources whose bytes are AES-CTR encrypted at rest without
//! downloading them first.
//!
//! ## Overview
//!
//! - [`cipher`]: counter derivation and decrypt backends
//! - [`streaming`]: range-by-range appends into a host [`MediaSink`]
//! - [`proxy`]: decrypted range responses for a virtual URL
//! - [`session`]: keeps exactly one of the two paths alive

pub mod cipher;
pub mod config;
pub mod error;
pub mod proxy;
pub mod session;
pub mod sink;
pub mod streaming;

pub use cipher::{counter_at, AesKey, CtrBackend, CtrDecryptor, EncryptionParams};
pub use config::{StreamingConfig, StreamingState, StreamingStats};
pub use error::{PlaybackError, Result};
pub use proxy::{parse_range, ByteRange, ProxyRegistration, RangeProxy};
pub use session::{PlaybackPath, PlaybackSession};
pub use sink::{resolve_codec, MediaSink};
pub use streaming::{EncryptedStreamService, StreamRequest};
