//! AES-CTR decryption at arbitrary byte offsets.
//!
//! Resources are encrypted as one continuous CTR stream. The counter for the
//! block holding byte `offset` is `IV + offset / 16`, a big-endian 128-bit
//! addition that wraps, so any range can be decrypted on its own and
//! independently decrypted ranges concatenate to the full plaintext.
//!
//! Two backends produce the same keystream: [`StreamCipherBackend`] drives the
//! `ctr` crate (hardware AES where the CPU has it) and [`BlockwiseBackend`]
//! builds the keystream one block at a time. [`CtrDecryptor`] tries the first
//! and falls back to the second.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use bytes::Bytes;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use tracing::{trace, warn};

use crate::error::{PlaybackError, Result};

/// AES block size in bytes.
pub const BLOCK_SIZE: u64 = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Counter block for the block containing byte `offset`.
pub fn counter_at(iv: &[u8; 16], offset: u64) -> [u8; 16] {
    let base = u128::from_be_bytes(*iv);
    base.wrapping_add(u128::from(offset / BLOCK_SIZE)).to_be_bytes()
}

// ============================================================================
// Keys
// ============================================================================

/// AES-128 or AES-256 key material.
#[derive(Clone, PartialEq, Eq)]
pub enum AesKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl AesKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(bytes);
                Ok(AesKey::Aes128(key))
            }
            32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                Ok(AesKey::Aes256(key))
            }
            other => Err(PlaybackError::InvalidEncryption(format!(
                "key must be 16 or 32 bytes, got {}",
                other
            ))),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            AesKey::Aes128(_) => 128,
            AesKey::Aes256(_) => 256,
        }
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AesKey({} bits, [REDACTED])", self.bits())
    }
}

/// Key and initial counter block of one encrypted resource.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionParams {
    key: AesKey,
    iv: [u8; 16],
}

impl EncryptionParams {
    pub fn new(key: AesKey, iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn from_bytes(key: &[u8], iv: &[u8]) -> Result<Self> {
        let key = AesKey::from_bytes(key)?;
        let iv: [u8; 16] = iv.try_into().map_err(|_| {
            PlaybackError::InvalidEncryption(format!("IV must be 16 bytes, got {}", iv.len()))
        })?;
        Ok(Self { key, iv })
    }

    /// Key and IV as published alongside resource metadata.
    pub fn from_base64(key: &str, iv: &str) -> Result<Self> {
        if key.trim().is_empty() || iv.trim().is_empty() {
            return Err(PlaybackError::MissingEncryption(
                "key and IV are both required".to_string(),
            ));
        }
        let key = core_encoding::base64_to_bytes(key)?;
        let iv = core_encoding::base64_to_bytes(iv)?;
        Self::from_bytes(&key, &iv)
    }

    pub fn from_hex(key: &str, iv: &str) -> Result<Self> {
        let key = hex::decode(key)
            .map_err(|e| PlaybackError::InvalidEncryption(format!("Invalid hex key: {}", e)))?;
        let iv = hex::decode(iv)
            .map_err(|e| PlaybackError::InvalidEncryption(format!("Invalid hex IV: {}", e)))?;
        Self::from_bytes(&key, &iv)
    }

    pub fn key(&self) -> &AesKey {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}

impl fmt::Debug for EncryptionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionParams")
            .field("key", &self.key)
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Backends
// ============================================================================

/// XORs the CTR keystream starting at `offset` into `data`.
pub trait CtrBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply_keystream(&self, params: &EncryptionParams, offset: u64, data: &mut [u8]) -> Result<()>;
}

/// `ctr::Ctr128BE` seeked to the offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCipherBackend;

impl StreamCipherBackend {
    fn run<C: StreamCipher + StreamCipherSeek>(cipher: &mut C, offset: u64, data: &mut [u8]) -> Result<()> {
        cipher
            .try_seek(offset)
            .map_err(|e| PlaybackError::DecryptionFailed(format!("seek to {}: {}", offset, e)))?;
        cipher
            .try_apply_keystream(data)
            .map_err(|e| PlaybackError::DecryptionFailed(e.to_string()))
    }
}

impl CtrBackend for StreamCipherBackend {
    fn name(&self) -> &'static str {
        "stream-cipher"
    }

    fn apply_keystream(&self, params: &EncryptionParams, offset: u64, data: &mut [u8]) -> Result<()> {
        let iv = params.iv();
        match params.key() {
            AesKey::Aes128(key) => Self::run(&mut Aes128Ctr::new(key.into(), iv.into()), offset, data),
            AesKey::Aes256(key) => Self::run(&mut Aes256Ctr::new(key.into(), iv.into()), offset, data),
        }
    }
}

/// Encrypts each counter block with the raw block cipher.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockwiseBackend;

impl BlockwiseBackend {
    fn run(encrypt: impl Fn(&mut aes::Block), iv: &[u8; 16], offset: u64, data: &mut [u8]) {
        let mut counter = u128::from_be_bytes(counter_at(iv, offset));
        let mut skip = (offset % BLOCK_SIZE) as usize;
        let mut position = 0;

        while position < data.len() {
            let mut keystream = aes::Block::from(counter.to_be_bytes());
            encrypt(&mut keystream);

            let take = (BLOCK_SIZE as usize - skip).min(data.len() - position);
            for (byte, pad) in data[position..position + take]
                .iter_mut()
                .zip(&keystream[skip..skip + take])
            {
                *byte ^= pad;
            }

            position += take;
            skip = 0;
            counter = counter.wrapping_add(1);
        }
    }
}

impl CtrBackend for BlockwiseBackend {
    fn name(&self) -> &'static str {
        "blockwise"
    }

    fn apply_keystream(&self, params: &EncryptionParams, offset: u64, data: &mut [u8]) -> Result<()> {
        let iv = params.iv();
        match params.key() {
            AesKey::Aes128(key) => {
                let cipher = Aes128::new(key.into());
                Self::run(|block| cipher.encrypt_block(block), iv, offset, data);
            }
            AesKey::Aes256(key) => {
                let cipher = Aes256::new(key.into());
                Self::run(|block| cipher.encrypt_block(block), iv, offset, data);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Decryptor
// ============================================================================

/// Decrypts ranges with a preferred backend and one fallback.
pub struct CtrDecryptor {
    primary: Box<dyn CtrBackend>,
    fallback: Option<Box<dyn CtrBackend>>,
    fallbacks_used: AtomicU64,
}

impl CtrDecryptor {
    pub fn new() -> Self {
        Self::with_backends(Box::new(StreamCipherBackend), Some(Box::new(BlockwiseBackend)))
    }

    /// Blockwise only.
    pub fn portable() -> Self {
        Self::with_backends(Box::new(BlockwiseBackend), None)
    }

    pub fn with_backends(primary: Box<dyn CtrBackend>, fallback: Option<Box<dyn CtrBackend>>) -> Self {
        Self {
            primary,
            fallback,
            fallbacks_used: AtomicU64::new(0),
        }
    }

    /// Decrypt `ciphertext` that starts at byte `offset` of the resource.
    pub fn decrypt(&self, params: &EncryptionParams, offset: u64, ciphertext: &[u8]) -> Result<Bytes> {
        let mut plaintext = ciphertext.to_vec();
        let primary_error = match self.primary.apply_keystream(params, offset, &mut plaintext) {
            Ok(()) => {
                trace!(offset, len = ciphertext.len(), backend = self.primary.name(), "Decrypted range");
                return Ok(Bytes::from(plaintext));
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };
        warn!(
            backend = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_error,
            "Decrypt backend failed, using fallback"
        );
        self.fallbacks_used.fetch_add(1, Ordering::Relaxed);

        let mut plaintext = ciphertext.to_vec();
        fallback.apply_keystream(params, offset, &mut plaintext)?;
        Ok(Bytes::from(plaintext))
    }

    /// Times the fallback backend had to step in.
    pub fn fallbacks_used(&self) -> u64 {
        self.fallbacks_used.load(Ordering::Relaxed)
    }
}

impl Default for CtrDecryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CtrDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtrDecryptor")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .finish()
    }
}
