//! # Encrypted Streaming Service
//!
//! Feeds an AES-CTR encrypted resource into a [`MediaSink`] range by range.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     EncryptedStreamService (Producer)   │
//! │                                         │
//! │  1. Range GET (HttpClient)              │
//! │  2. Decrypt at offset (CtrDecryptor)    │
//! │  3. Append, await completion            │
//! └────────────┬────────────────────────────┘
//!              │ plaintext
//!              ▼
//! ┌─────────────────────────────────────────┐
//! │         MediaSink (host buffer)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The first range is a small probe that exercises fetch, decrypt and append
//! before full-size ranges follow. The offset advances by the bytes actually
//! received. A run ends after `max_empty_reads` consecutive responses that
//! carry no data (an empty body or `416 Range Not Satisfiable`).

use std::sync::Arc;

use bridge_traits::{HttpClient, HttpRequest, ResourceKey};
use core_runtime::events::PlaybackEvent;
use core_runtime::{CoreEvent, EventBus};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::cipher::{CtrDecryptor, EncryptionParams};
use crate::config::{StreamingConfig, StreamingState, StreamingStats};
use crate::error::{PlaybackError, Result};
use crate::sink::{resolve_codec, MediaSink};

// ============================================================================
// Request Types
// ============================================================================

/// Request to stream one encrypted resource.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub key: ResourceKey,
    /// Gateway URL of the encrypted body.
    pub url: String,
    /// MIME type declared in the resource metadata.
    pub mime_type: Option<String>,
    /// `None` is a caller error: this pipeline only plays encrypted media.
    pub encryption: Option<EncryptionParams>,
    /// Known total size, if any. Reads stop once it is reached.
    pub total_size: Option<u64>,
}

/// Outcome of one range read.
enum RangeRead {
    Data(bytes::Bytes),
    Empty,
}

// ============================================================================
// EncryptedStreamService
// ============================================================================

pub struct EncryptedStreamService {
    http_client: Arc<dyn HttpClient>,
    decryptor: Arc<CtrDecryptor>,
    config: StreamingConfig,
    event_bus: Option<EventBus>,
    state: Mutex<StreamingState>,
    stats: Mutex<StreamingStats>,
}

impl EncryptedStreamService {
    pub fn new(http_client: Arc<dyn HttpClient>, config: StreamingConfig) -> Self {
        Self {
            http_client,
            decryptor: Arc::new(CtrDecryptor::new()),
            config,
            event_bus: None,
            state: Mutex::new(StreamingState::Idle),
            stats: Mutex::new(StreamingStats::default()),
        }
    }

    pub fn with_decryptor(mut self, decryptor: Arc<CtrDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn state(&self) -> StreamingState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats.lock().clone()
    }

    /// Stream `request` into `sink` until the end of the resource.
    ///
    /// # Cancellation
    ///
    /// Stops between ranges when `cancel_token` fires and returns
    /// [`PlaybackError::Cancelled`] without ending the sink's stream.
    ///
    /// # Errors
    ///
    /// Missing encryption parameters and invalid configuration are reported
    /// before any request is made. Range, decrypt and sink failures stop the
    /// run and are emitted as [`PlaybackEvent::Failed`].
    #[instrument(skip(self, request, sink, cancel_token), fields(key = %request.key))]
    pub async fn run(
        &self,
        request: StreamRequest,
        sink: Arc<dyn MediaSink>,
        cancel_token: CancellationToken,
    ) -> Result<StreamingStats> {
        let params = request.encryption.clone().ok_or_else(|| {
            PlaybackError::MissingEncryption(format!("no key/IV for {}", request.key))
        })?;
        self.config.validate().map_err(PlaybackError::InvalidConfig)?;

        *self.state.lock() = StreamingState::Opening;
        *self.stats.lock() = StreamingStats::default();

        match self.stream(&request, &params, sink.as_ref(), &cancel_token).await {
            Ok(()) => {
                *self.state.lock() = StreamingState::Completed;
                let stats = self.stats();
                info!(bytes = stats.bytes_appended, chunks = stats.chunks_appended, "Stream ended");
                self.emit(PlaybackEvent::Ended {
                    key: request.key.clone(),
                    bytes_appended: stats.bytes_appended,
                });
                Ok(stats)
            }
            Err(PlaybackError::Cancelled) => {
                info!("Streaming cancelled");
                *self.state.lock() = StreamingState::Idle;
                Err(PlaybackError::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "Streaming failed");
                *self.state.lock() = StreamingState::Error;
                self.emit(PlaybackEvent::Failed {
                    key: request.key.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stream(
        &self,
        request: &StreamRequest,
        params: &EncryptionParams,
        sink: &dyn MediaSink,
        cancel_token: &CancellationToken,
    ) -> Result<()> {
        let mime_type = resolve_codec(sink, request.mime_type.as_deref(), &self.config)?;
        sink.open(&mime_type).await?;
        self.stats.lock().mime_type = Some(mime_type.clone());
        self.emit(PlaybackEvent::Started {
            key: request.key.clone(),
            mime_type,
            total_size: request.total_size,
        });

        let mut offset: u64 = 0;
        let mut empty_reads: u32 = 0;
        let mut length = self.config.probe_len();

        loop {
            if cancel_token.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            if request.total_size.is_some_and(|total| offset >= total) {
                debug!(offset, "Reached known total size");
                break;
            }

            let read = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Err(PlaybackError::Cancelled),
                read = self.read_range(&request.url, offset, length) => read?,
            };

            match read {
                RangeRead::Empty => {
                    empty_reads += 1;
                    self.stats.lock().empty_reads += 1;
                    debug!(offset, empty_reads, "Range returned no data");
                    if empty_reads >= self.config.max_empty_reads {
                        break;
                    }
                }
                RangeRead::Data(ciphertext) => {
                    empty_reads = 0;
                    let received = ciphertext.len() as u64;
                    let plaintext = self.decryptor.decrypt(params, offset, &ciphertext)?;
                    sink.append(plaintext).await?;

                    {
                        let mut stats = self.stats.lock();
                        stats.bytes_appended += received;
                        stats.chunks_appended += 1;
                    }
                    *self.state.lock() = StreamingState::Streaming;
                    self.emit(PlaybackEvent::ChunkAppended {
                        key: request.key.clone(),
                        offset,
                        length: received,
                    });
                    debug!(offset, received, "Appended decrypted range");
                    offset += received;
                }
            }
            length = self.config.chunk_size;
        }

        sink.end_of_stream().await
    }

    async fn read_range(&self, url: &str, start: u64, length: u64) -> Result<RangeRead> {
        let request = HttpRequest::get(url)
            .range(start, start + length - 1)
            .timeout(self.config.range_timeout);
        self.stats.lock().http_requests += 1;

        let response = self.http_client.execute(request).await?;
        if response.is_range_not_satisfiable() {
            return Ok(RangeRead::Empty);
        }
        if !response.is_success() {
            return Err(PlaybackError::StreamingFailed(format!(
                "range {}+{} returned HTTP {}",
                start, length, response.status
            )));
        }

        let body = if response.status == 206 {
            response.body
        } else {
            // Upstream ignored the range and sent everything.
            let total = response.body.len() as u64;
            if start >= total {
                return Ok(RangeRead::Empty);
            }
            let stop = (start + length).min(total);
            response.body.slice(start as usize..stop as usize)
        };
        if body.is_empty() {
            return Ok(RangeRead::Empty);
        }
        Ok(RangeRead::Data(body))
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }
}
