//! Media sink abstraction and codec negotiation.
//!
//! A [`MediaSink`] is the host's streaming buffer (a media-source buffer on
//! the web, a demuxer pipe natively). Appends are awaited one at a time; the
//! sink must not be handed a new chunk before the previous append finished.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};

#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Whether the platform can decode `mime_type`.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Attach a blank buffer for `mime_type`.
    async fn open(&self, mime_type: &str) -> Result<()>;

    /// Append decrypted bytes; resolves once the sink has consumed them.
    async fn append(&self, chunk: Bytes) -> Result<()>;

    /// Signal that no more data follows.
    async fn end_of_stream(&self) -> Result<()>;
}

/// `video/webm; codecs=vp9` -> `video/webm`.
pub fn container_of(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or_default().trim()
}

/// MIME types to try, most specific first, without repeats.
///
/// The declared type comes first, then its bare container, then the
/// configured baseline codec string and bare container.
pub fn codec_candidates(declared: Option<&str>, config: &StreamingConfig) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_string());
        }
    };

    if let Some(declared) = declared {
        push(declared);
        push(container_of(declared));
    }
    push(&config.baseline_mime);
    push(&config.container_mime);
    candidates
}

/// First candidate the sink accepts.
pub fn resolve_codec(
    sink: &dyn MediaSink,
    declared: Option<&str>,
    config: &StreamingConfig,
) -> Result<String> {
    let candidates = codec_candidates(declared, config);
    for candidate in &candidates {
        if sink.is_type_supported(candidate) {
            debug!(mime_type = %candidate, "Resolved codec");
            return Ok(candidate.clone());
        }
        debug!(mime_type = %candidate, "Codec rejected by sink");
    }
    Err(PlaybackError::UnsupportedCodec(candidates.join(" | ")))
}
