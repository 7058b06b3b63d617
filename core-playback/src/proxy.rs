//! Intercepting range proxy.
//!
//! The alternative to pushing ranges into a [`MediaSink`](crate::MediaSink):
//! the host registers a virtual URL, hands it to a plain media element, and
//! routes every request for that URL through [`RangeProxy::serve`]. Each
//! request is answered with the matching decrypted byte range.

use std::sync::Arc;

use bridge_traits::{HttpClient, HttpRequest, HttpResponse, ResourceKey};
use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::cipher::{CtrDecryptor, EncryptionParams};
use crate::config::StreamingConfig;
use crate::error::{PlaybackError, Result};

/// Path prefix of proxied URLs.
pub const VIRTUAL_PATH_PREFIX: &str = "/qdn-stream";

/// What the host hands over when registering a proxied resource.
#[derive(Debug, Clone)]
pub struct ProxyRegistration {
    pub key: ResourceKey,
    pub url: String,
    pub mime_type: Option<String>,
    pub encryption: Option<EncryptionParams>,
}

/// Inclusive byte span, or unsatisfiable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    Span { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a single-range `Range` header against `total` bytes.
///
/// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. The end is clamped to the
/// last byte. Multi-range requests are rejected.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| PlaybackError::InvalidRange(header.to_string()))?;
    if spec.contains(',') {
        return Err(PlaybackError::InvalidRange(format!("multiple ranges: {}", header)));
    }
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| PlaybackError::InvalidRange(header.to_string()))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| PlaybackError::InvalidRange(header.to_string()))
    };

    if total == 0 {
        return Ok(ByteRange::Unsatisfiable);
    }
    let last = total - 1;

    let (start, end) = match (start.trim().is_empty(), end.trim().is_empty()) {
        (true, true) => return Err(PlaybackError::InvalidRange(header.to_string())),
        (true, false) => {
            let suffix = parse(end)?;
            if suffix == 0 {
                return Ok(ByteRange::Unsatisfiable);
            }
            (total.saturating_sub(suffix), last)
        }
        (false, true) => (parse(start)?, last),
        (false, false) => (parse(start)?, parse(end)?.min(last)),
    };

    if start > last || start > end {
        return Ok(ByteRange::Unsatisfiable);
    }
    Ok(ByteRange::Span { start, end })
}

pub struct RangeProxy {
    http_client: Arc<dyn HttpClient>,
    decryptor: Arc<CtrDecryptor>,
    config: StreamingConfig,
    key: ResourceKey,
    upstream_url: String,
    mime_type: String,
    params: EncryptionParams,
    total_size: u64,
}

impl RangeProxy {
    /// Validate the registration and learn the total size with a HEAD
    /// request.
    #[instrument(skip(http_client, decryptor, config, registration), fields(key = %registration.key))]
    pub async fn register(
        http_client: Arc<dyn HttpClient>,
        decryptor: Arc<CtrDecryptor>,
        config: StreamingConfig,
        registration: ProxyRegistration,
    ) -> Result<Self> {
        let params = registration.encryption.ok_or_else(|| {
            PlaybackError::MissingEncryption(format!("no key/IV for {}", registration.key))
        })?;
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let head = HttpRequest::head(registration.url.as_str()).timeout(config.range_timeout);
        let response = http_client.execute(head).await?;
        if !response.is_success() {
            return Err(PlaybackError::StreamingFailed(format!(
                "HEAD {} returned HTTP {}",
                registration.url, response.status
            )));
        }
        let total_size = response
            .content_length()
            .ok_or_else(|| PlaybackError::UnknownSize(registration.url.clone()))?;

        let mime_type = registration
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| config.container_mime.clone());
        info!(total_size, mime_type = %mime_type, "Registered range proxy");

        Ok(Self {
            http_client,
            decryptor,
            config,
            key: registration.key,
            upstream_url: registration.url,
            mime_type,
            params,
            total_size,
        })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// URL the media element should load instead of the gateway URL.
    pub fn virtual_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            VIRTUAL_PATH_PREFIX,
            urlencoding::encode(self.key.service.as_str()),
            urlencoding::encode(&self.key.name),
            urlencoding::encode(&self.key.identifier)
        )
    }

    /// Answer one intercepted request.
    ///
    /// Open-ended ranges are capped at `chunk_size` bytes; the
    /// `Content-Range` header tells the client what it got. Without a
    /// `Range` header the whole resource is returned with `200`.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn serve(&self, range_header: Option<&str>) -> Result<HttpResponse> {
        let (start, end, partial) = match range_header {
            None => {
                if self.total_size == 0 {
                    return Ok(self.respond(200, Bytes::new()));
                }
                (0, self.total_size - 1, false)
            }
            Some(header) => match parse_range(header, self.total_size)? {
                ByteRange::Unsatisfiable => {
                    debug!(range = header, "Unsatisfiable range");
                    return Ok(HttpResponse::new(416, Bytes::new())
                        .with_header("Content-Range", format!("bytes */{}", self.total_size)));
                }
                ByteRange::Span { start, end } => {
                    let capped = end.min(start + self.config.chunk_size - 1);
                    (start, capped, true)
                }
            },
        };

        let ciphertext = self.fetch(start, end).await?;
        let plaintext = self.decryptor.decrypt(&self.params, start, &ciphertext)?;
        debug!(start, len = plaintext.len(), "Served decrypted range");

        if !partial {
            return Ok(self.respond(200, plaintext));
        }
        let served_end = start + (plaintext.len() as u64).saturating_sub(1);
        Ok(self
            .respond(206, plaintext)
            .with_header(
                "Content-Range",
                format!("bytes {}-{}/{}", start, served_end, self.total_size),
            ))
    }

    async fn fetch(&self, start: u64, end: u64) -> Result<Bytes> {
        let request = HttpRequest::get(self.upstream_url.as_str())
            .range(start, end)
            .timeout(self.config.range_timeout);
        let response = self.http_client.execute(request).await?;

        match response.status {
            206 => Ok(response.body),
            // Upstream ignored the range and sent everything.
            200 => {
                let len = response.body.len() as u64;
                if start >= len {
                    return Ok(Bytes::new());
                }
                let stop = (end + 1).min(len);
                Ok(response.body.slice(start as usize..stop as usize))
            }
            status => Err(PlaybackError::StreamingFailed(format!(
                "range {}-{} returned HTTP {}",
                start, end, status
            ))),
        }
    }

    fn respond(&self, status: u16, body: Bytes) -> HttpResponse {
        let len = body.len();
        HttpResponse::new(status, body)
            .with_header("Content-Type", self.mime_type.clone())
            .with_header("Content-Length", len.to_string())
            .with_header("Accept-Ranges", "bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explicit_range() {
        assert_eq!(
            parse_range("bytes=0-99", 1000).unwrap(),
            ByteRange::Span { start: 0, end: 99 }
        );
        assert_eq!(
            parse_range("bytes=900-5000", 1000).unwrap(),
            ByteRange::Span { start: 900, end: 999 }
        );
    }

    #[test]
    fn test_parse_open_and_suffix_ranges() {
        assert_eq!(
            parse_range("bytes=10-", 1000).unwrap(),
            ByteRange::Span { start: 10, end: 999 }
        );
        assert_eq!(
            parse_range("bytes=-100", 1000).unwrap(),
            ByteRange::Span { start: 900, end: 999 }
        );
        assert_eq!(
            parse_range("bytes=-5000", 1000).unwrap(),
            ByteRange::Span { start: 0, end: 999 }
        );
    }

    #[test]
    fn test_parse_unsatisfiable() {
        assert_eq!(parse_range("bytes=1000-", 1000).unwrap(), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-10", 0).unwrap(), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 1000).unwrap(), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=50-10", 1000).unwrap(), ByteRange::Unsatisfiable);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_range("items=0-1", 10).is_err());
        assert!(parse_range("bytes=0-1,5-6", 10).is_err());
        assert!(parse_range("bytes=-", 10).is_err());
        assert!(parse_range("bytes=a-b", 10).is_err());
    }
}
