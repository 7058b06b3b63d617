//! # Streaming Configuration
//!
//! Configuration and bookkeeping types for the encrypted streaming pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// MIME type tried when the resource declares none, or its own is rejected.
pub const BASELINE_MIME_TYPE: &str = r#"video/mp4; codecs="avc1.42E01E, mp4a.40.2""#;

/// Container-only fallback when no codec string is accepted.
pub const CONTAINER_MIME_TYPE: &str = "video/mp4";

const MIB: u64 = 1024 * 1024;

/// Streaming service configuration.
///
/// Controls range sizes, end-of-stream detection and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Bytes requested per range after the initial probe.
    ///
    /// Default: 5 MiB.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Upper bound of the first range, which checks the pipeline end to end.
    /// The probe is `min(chunk_size, probe_size)`.
    ///
    /// Default: 1 MiB.
    #[serde(default = "default_probe_size")]
    pub probe_size: u64,

    /// Consecutive reads without progress that mean end of stream.
    ///
    /// Default: 3.
    #[serde(default = "default_max_empty_reads")]
    pub max_empty_reads: u32,

    /// Maximum duration to wait for one range response.
    ///
    /// Default: 30 seconds.
    #[serde(default = "default_range_timeout")]
    pub range_timeout: Duration,

    /// Codec string used when the resource declares no usable MIME type.
    #[serde(default = "default_baseline_mime")]
    pub baseline_mime: String,

    /// Bare container MIME tried last.
    #[serde(default = "default_container_mime")]
    pub container_mime: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            probe_size: default_probe_size(),
            max_empty_reads: default_max_empty_reads(),
            range_timeout: default_range_timeout(),
            baseline_mime: default_baseline_mime(),
            container_mime: default_container_mime(),
        }
    }
}

impl StreamingConfig {
    pub fn with_chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_probe_size(mut self, bytes: u64) -> Self {
        self.probe_size = bytes;
        self
    }

    pub fn with_max_empty_reads(mut self, reads: u32) -> Self {
        self.max_empty_reads = reads;
        self
    }

    pub fn with_range_timeout(mut self, timeout: Duration) -> Self {
        self.range_timeout = timeout;
        self
    }

    /// Length of the first range request.
    pub fn probe_len(&self) -> u64 {
        self.chunk_size.min(self.probe_size)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.probe_size == 0 {
            return Err("probe_size must be > 0".to_string());
        }

        if self.max_empty_reads == 0 {
            return Err("max_empty_reads must be > 0".to_string());
        }

        if self.range_timeout.is_zero() {
            return Err("range_timeout must be > 0".to_string());
        }

        if self.baseline_mime.trim().is_empty() || self.container_mime.trim().is_empty() {
            return Err("fallback MIME types must not be empty".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_chunk_size() -> u64 {
    5 * MIB
}

fn default_probe_size() -> u64 {
    MIB
}

fn default_max_empty_reads() -> u32 {
    3
}

fn default_range_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_baseline_mime() -> String {
    BASELINE_MIME_TYPE.to_string()
}

fn default_container_mime() -> String {
    CONTAINER_MIME_TYPE.to_string()
}

// ============================================================================
// Streaming State
// ============================================================================

/// Current state of one streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    /// Not streaming.
    Idle,
    /// Sink opened, probe range in flight.
    Opening,
    /// Appending ranges.
    Streaming,
    /// End of stream signalled to the sink.
    Completed,
    /// Stopped on an error.
    Error,
}

impl StreamingState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Opening | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Counters for one streaming run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingStats {
    /// Decrypted bytes handed to the sink.
    pub bytes_appended: u64,
    /// Number of appends, probe included.
    pub chunks_appended: u64,
    /// Total number of range requests made.
    pub http_requests: u64,
    /// Reads that returned nothing or 416.
    pub empty_reads: u64,
    /// MIME type the sink accepted.
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.probe_len(), 1024 * 1024);
        assert_eq!(config.max_empty_reads, 3);
    }

    #[test]
    fn test_probe_never_exceeds_chunk() {
        let config = StreamingConfig::default().with_chunk_size(4096);
        assert_eq!(config.probe_len(), 4096);
    }

    #[test]
    fn test_config_validation() {
        let mut config = StreamingConfig::default();

        config.chunk_size = 0;
        assert!(config.validate().is_err());
        config.chunk_size = 1024;

        config.max_empty_reads = 0;
        assert!(config.validate().is_err());
        config.max_empty_reads = 3;

        config.container_mime = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: StreamingConfig = serde_json::from_str(r#"{"chunk_size": 65536}"#).unwrap();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.baseline_mime, BASELINE_MIME_TYPE);
    }

    #[test]
    fn test_streaming_state() {
        assert!(StreamingState::Opening.is_active());
        assert!(StreamingState::Streaming.is_active());
        assert!(!StreamingState::Completed.is_active());

        assert!(StreamingState::Completed.is_terminal());
        assert!(StreamingState::Error.is_terminal());
        assert!(!StreamingState::Idle.is_terminal());
    }
}
