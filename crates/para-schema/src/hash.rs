//! SHA-256 digests: the ones we compute and the ones we read back.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of a digest in the published index.
const INDEX_PREFIX: &str = "sha256:";

/// Hex digest copied out of an asset label.
///
/// Taken on trust: labels come from earlier runs or from people, and the
/// index republishes whatever the label says.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Wrap a hex string as-is.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The bare hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `sha256:<hex>`, as written into the index.
    pub fn prefixed(&self) -> String {
        format!("{INDEX_PREFIX}{}", self.0)
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sha256Hash {
    fn from(hex: &str) -> Self {
        Self::new(hex)
    }
}

/// Digest of bytes hashed locally: always 64 lowercase hex characters.
///
/// Only obtainable by hashing, so every label this tool writes is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Hash an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Finalize a hasher that was fed incrementally.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    /// Lowercase hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Sha256Digest> for Sha256Hash {
    fn from(digest: Sha256Digest) -> Self {
        Self(digest.0)
    }
}
