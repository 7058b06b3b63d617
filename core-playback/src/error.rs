//! # Playback Error Types
//!
//! Errors raised by the encrypted streaming pipeline and the range proxy.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while streaming an encrypted resource.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Encryption was expected but the key or IV is missing.
    #[error("Missing encryption parameters: {0}")]
    MissingEncryption(String),

    /// Key or IV has the wrong shape.
    #[error("Invalid encryption parameters: {0}")]
    InvalidEncryption(String),

    /// Streaming configuration failed validation.
    #[error("Invalid streaming config: {0}")]
    InvalidConfig(String),

    /// Range header the proxy cannot serve.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    // ========================================================================
    // Format/Codec Errors
    // ========================================================================
    /// No candidate MIME type is accepted by the sink.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    // ========================================================================
    // Decryption Errors
    // ========================================================================
    /// Every decrypt backend failed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ========================================================================
    // Streaming Errors
    // ========================================================================
    /// Range request failed or returned an unexpected status.
    #[error("Streaming failed: {0}")]
    StreamingFailed(String),

    /// The gateway did not report a total size.
    #[error("Unknown resource size: {0}")]
    UnknownSize(String),

    /// The media sink rejected an operation.
    #[error("Media sink error: {0}")]
    SinkError(String),

    /// A session path is already running or was torn down.
    #[error("Playback session error: {0}")]
    SessionError(String),

    #[error("Streaming cancelled")]
    Cancelled,

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Encoding(#[from] core_encoding::EncodingError),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::StreamingFailed(_) => true,
            PlaybackError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` for caller bugs that are reported before any I/O.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PlaybackError::MissingEncryption(_)
                | PlaybackError::InvalidEncryption(_)
                | PlaybackError::InvalidConfig(_)
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
