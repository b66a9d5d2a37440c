//! Deterministic fingerprints for normalized analyze requests
//!
//! Every field is written length-prefixed so that moving bytes between
//! adjacent fields always changes the digest. Images contribute a digest of
//! `mime_type | data` each, in request order.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::request::AnalyzeRequest;

/// Bumped whenever the canonical layout below changes
const KEY_VERSION: &[u8] = b"analyze-key:v1";

/// Hex-encoded SHA-256 digest of a normalized analyze request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Build the cache key for a normalized request
pub fn build_cache_key(request: &AnalyzeRequest) -> CacheKey {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, KEY_VERSION);
    write_field(&mut hasher, request.backend_identity().as_bytes());
    write_field(&mut hasher, &[request.grounding_enabled() as u8]);
    write_field(&mut hasher, &[request.log_truncated() as u8]);
    write_field(&mut hasher, request.log_text().as_bytes());
    write_field(&mut hasher, &(request.images().len() as u64).to_be_bytes());

    for image in request.images() {
        let mut image_hasher = Sha256::new();
        write_field(&mut image_hasher, image.mime_type.as_bytes());
        write_field(&mut image_hasher, image.data.as_bytes());
        write_field(&mut hasher, &image_hasher.finalize());
    }

    CacheKey(hex::encode(hasher.finalize()))
}
