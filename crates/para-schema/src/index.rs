//! The published registry index (`para.idx.yaml`).
//!
//! ```yaml
//! provider:
//!   aws:
//!     v2.0.0:
//!       amd64:
//!         size: 1024
//!         digest: sha256:<hex>
//!         url: https://github.com/<org>/<repo>/releases/download/binaries/<fqn>
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Sha256Hash;

/// Leaf of the index: where to fetch one artifact and how to verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Size in bytes.
    pub size: u64,
    /// `sha256:<hex>` digest.
    pub digest: String,
    /// Download URL.
    pub url: String,
}

impl IndexEntry {
    /// Build an entry, prefixing the digest with `sha256:`.
    pub fn new(size: u64, digest: &Sha256Hash, url: impl Into<String>) -> Self {
        Self {
            size,
            digest: digest.prefixed(),
            url: url.into(),
        }
    }
}

type ArchMap = BTreeMap<String, IndexEntry>;
type ReleaseMap = BTreeMap<String, ArchMap>;
type PackageMap = BTreeMap<String, ReleaseMap>;

/// kind → package → release → arch → [`IndexEntry`].
///
/// Every level is a `BTreeMap`, so serializing the same document twice gives
/// byte-identical output regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument(BTreeMap<String, PackageMap>);

impl IndexDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(
        &mut self,
        kind: &str,
        package: &str,
        release: &str,
        arch: &str,
        entry: IndexEntry,
    ) -> Option<IndexEntry> {
        self.0
            .entry(kind.to_string())
            .or_default()
            .entry(package.to_string())
            .or_default()
            .entry(release.to_string())
            .or_default()
            .insert(arch.to_string(), entry)
    }

    /// Look up one entry.
    pub fn get(&self, kind: &str, package: &str, release: &str, arch: &str) -> Option<&IndexEntry> {
        self.0.get(kind)?.get(package)?.get(release)?.get(arch)
    }

    /// Number of leaf entries.
    pub fn len(&self) -> usize {
        self.0
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
