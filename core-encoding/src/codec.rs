//! Object and byte conversions to and from base64.
//!
//! Two object modes exist. [`object_to_base64_utf8`] and
//! [`base64_utf8_to_object`] round-trip any Unicode. The legacy pair
//! [`object_to_base64`] / [`base64_to_object`] decodes bytes as Latin-1, so
//! non-ASCII text written by the UTF-8 path comes back mangled; it is kept for
//! payloads published by older clients that relied on that behavior.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{EncodingError, Result};

/// Largest multiple of 3 not above 1 MiB; chunks this size encode without
/// intermediate padding, so their concatenation equals a one-shot encode.
const ENCODE_CHUNK: usize = 1_048_575;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Serialize `value` to JSON and base64 the UTF-8 bytes.
pub fn object_to_base64<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(bytes_to_base64(&json))
}

/// Decode base64 and read the bytes as Latin-1 text before parsing JSON.
pub fn base64_to_object<T: DeserializeOwned>(data: &str) -> Result<T> {
    let bytes = base64_to_bytes(data)?;
    let text: String = bytes.iter().map(|&b| b as char).collect();
    Ok(serde_json::from_str(&text)?)
}

pub fn object_to_base64_utf8<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(bytes_to_base64(json.as_bytes()))
}

pub fn base64_utf8_to_object<T: DeserializeOwned>(data: &str) -> Result<T> {
    let bytes = base64_to_bytes(data)?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Decode standard, URL-safe, unpadded or whitespace-broken base64.
///
/// Input is normalized to the standard alphabet with padding first; if that
/// still fails, characters outside the alphabet are dropped and a lenient
/// decoder is tried.
pub fn base64_to_bytes(data: &str) -> Result<Vec<u8>> {
    let mut normalized: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    if normalized.len() % 4 != 1 {
        let padded_len = normalized.len().div_ceil(4) * 4;
        while normalized.len() < padded_len {
            normalized.push('=');
        }
        if let Ok(bytes) = STANDARD.decode(&normalized) {
            return Ok(bytes);
        }
    }

    debug!(len = data.len(), "Strict base64 decode failed, trying lenient path");
    let mut cleaned: String = normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }

    LENIENT
        .decode(&cleaned)
        .map_err(|e| EncodingError::InvalidBase64(e.to_string()))
}

/// Standard padded base64, encoded in bounded chunks.
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK) {
        STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// `data:{mime};base64,...` URL for handing decoded bytes to a renderer.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let mime = if mime_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    format!("data:{};base64,{}", mime, bytes_to_base64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Post {
        title: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_utf8_round_trip_preserves_unicode() {
        let post = Post {
            title: "Crème brûlée 🍮 日本語".to_string(),
            tags: vec!["dessert".to_string()],
        };
        let encoded = object_to_base64_utf8(&post).unwrap();
        let decoded: Post = base64_utf8_to_object(&encoded).unwrap();
        assert_eq!(decoded, post);
    }

    #[test]
    fn test_latin1_path_mangles_non_ascii() {
        let post = Post {
            title: "é".to_string(),
            tags: Vec::new(),
        };
        let encoded = object_to_base64_utf8(&post).unwrap();
        let decoded: Post = base64_to_object(&encoded).unwrap();
        // UTF-8 bytes C3 A9 read as Latin-1
        assert_eq!(decoded.title, "Ã©");
    }

    #[test]
    fn test_latin1_path_round_trips_ascii() {
        let post = Post {
            title: "plain".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
        };
        let decoded: Post = base64_to_object(&object_to_base64(&post).unwrap()).unwrap();
        assert_eq!(decoded, post);
    }

    #[test]
    fn test_decode_accepts_url_safe_and_missing_padding() {
        let bytes = vec![0xfb, 0xff, 0xbf, 0x00, 0x10];
        let standard = STANDARD.encode(&bytes);
        assert_eq!(standard, "+/+/ABA=");

        assert_eq!(base64_to_bytes("-_-_ABA").unwrap(), bytes);
        assert_eq!(base64_to_bytes("+/+/ABA").unwrap(), bytes);
        assert_eq!(base64_to_bytes(" +/+/\nABA= ").unwrap(), bytes);
    }

    #[test]
    fn test_decode_fallback_drops_garbage() {
        assert_eq!(base64_to_bytes("aGVs*bG8=").unwrap(), b"hello");
        assert!(base64_to_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_chunked_encode_matches_one_shot() {
        let bytes: Vec<u8> = (0..(ENCODE_CHUNK * 2 + 7)).map(|i| (i % 251) as u8).collect();
        assert_eq!(bytes_to_base64(&bytes), STANDARD.encode(&bytes));
        assert_eq!(base64_to_bytes(&bytes_to_base64(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_data_url() {
        assert_eq!(to_data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
        assert_eq!(
            to_data_url("", b"hi"),
            "data:application/octet-stream;base64,aGk="
        );
    }
}
