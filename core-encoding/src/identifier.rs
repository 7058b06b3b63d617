//! Identifier hashing and composition.
//!
//! Identifiers have the shape
//! `appHash-entityPrefix-parentRef-uniqueSuffix-version`. Every segment except
//! the unique suffix is deterministic, so dropping the suffix yields a prefix
//! that matches every entity of one type under one parent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{EncodingError, Result};

/// Parent reference that marks a root-level entity.
pub const ROOT_PARENT_REF: &str = "00000000000000";

/// Trailing version segment of identifiers built here.
pub const IDENTIFIER_VERSION: u32 = 0;

const UNIQUE_SUFFIX_LEN: usize = 12;

/// Token length, chosen per use to bound collision probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionStrength {
    Low,
    Medium,
    High,
    ParentRef,
    EntityLabel,
}

impl CollisionStrength {
    pub const fn len(self) -> usize {
        match self {
            CollisionStrength::Low => 8,
            CollisionStrength::Medium => 11,
            CollisionStrength::High => 14,
            CollisionStrength::ParentRef => 14,
            CollisionStrength::EntityLabel => 6,
        }
    }
}

/// Which parent an identifier (or search prefix) is scoped to.
///
/// `Root` and `Any` are distinct: `Root` writes the all-zero parent
/// reference, `Any` leaves the parent segment out entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentScope {
    Root,
    Id(String),
    Any,
}

impl ParentScope {
    fn segment(&self, salt: &str) -> Option<String> {
        match self {
            ParentScope::Root => Some(ROOT_PARENT_REF.to_string()),
            ParentScope::Id(id) => Some(hash_word(id, CollisionStrength::ParentRef, salt)),
            ParentScope::Any => None,
        }
    }
}

impl From<Option<&str>> for ParentScope {
    /// `None` is the root; an empty string means any parent.
    fn from(value: Option<&str>) -> Self {
        match value {
            None => ParentScope::Root,
            Some(id) if id.is_empty() => ParentScope::Any,
            Some(id) => ParentScope::Id(id.to_string()),
        }
    }
}

/// Salted SHA-256 of `word`, base64 with `+`→`.` and `/`→`~`, unpadded,
/// truncated to the strength's length.
pub fn hash_word(word: &str, strength: CollisionStrength, public_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_salt.as_bytes());
    hasher.update(word.as_bytes());
    let digest = hasher.finalize();

    let mut token: String = STANDARD
        .encode(digest)
        .chars()
        .filter(|c| *c != '=')
        .map(|c| match c {
            '+' => '.',
            '/' => '~',
            other => other,
        })
        .collect();
    token.truncate(strength.len());
    token
}

fn base_segments(app_name: &str, entity_type: &str, public_salt: &str) -> Result<Vec<String>> {
    if app_name.trim().is_empty() {
        return Err(EncodingError::InvalidInput("app name is empty".to_string()));
    }
    if entity_type.trim().is_empty() {
        return Err(EncodingError::InvalidInput("entity type is empty".to_string()));
    }
    Ok(vec![
        hash_word(app_name, CollisionStrength::Low, public_salt),
        hash_word(entity_type, CollisionStrength::EntityLabel, public_salt),
    ])
}

fn unique_suffix() -> String {
    let mut suffix = uuid::Uuid::new_v4().simple().to_string();
    suffix.truncate(UNIQUE_SUFFIX_LEN);
    suffix
}

/// A fresh identifier for a new entity.
pub fn build_identifier(
    app_name: &str,
    public_salt: &str,
    entity_type: &str,
    parent: &ParentScope,
) -> Result<String> {
    let mut segments = base_segments(app_name, entity_type, public_salt)?;
    if let Some(parent_ref) = parent.segment(public_salt) {
        segments.push(parent_ref);
    }
    segments.push(unique_suffix());
    segments.push(IDENTIFIER_VERSION.to_string());
    Ok(segments.join("-"))
}

/// Prefix matching every identifier [`build_identifier`] produces for the
/// same app, entity type and parent. Ends with `-`.
pub fn build_search_prefix(
    app_name: &str,
    public_salt: &str,
    entity_type: &str,
    parent: &ParentScope,
) -> Result<String> {
    let mut segments = base_segments(app_name, entity_type, public_salt)?;
    if let Some(parent_ref) = parent.segment(public_salt) {
        segments.push(parent_ref);
    }
    let mut prefix = segments.join("-");
    prefix.push('-');
    Ok(prefix)
}
