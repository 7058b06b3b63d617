//! # Core Encoding
//!
//! Pure conversions shared by the resource and playback layers:
//!
//! - [`identifier`]: salted SHA-256 word hashing and the
//!   `app-entity-parent-unique-version` identifier scheme, including the
//!   prefixes used for "everything of this type under this parent" searches.
//! - [`codec`]: object and byte conversions to and from base64, in a UTF-8
//!   mode and a legacy Latin-1 mode, plus tolerant decoding of URL-safe and
//!   unpadded input.

pub mod codec;
pub mod error;
pub mod identifier;

pub use codec::{
    base64_to_bytes, base64_to_object, base64_utf8_to_object, bytes_to_base64, object_to_base64,
    object_to_base64_utf8, to_data_url,
};
pub use error::{EncodingError, Result};
pub use identifier::{
    build_identifier, build_search_prefix, hash_word, CollisionStrength, ParentScope,
    IDENTIFIER_VERSION, ROOT_PARENT_REF,
};
