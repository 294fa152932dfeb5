//! Shared data model for the para registry.
//!
//! Everything here is pure: the catalog entities loaded from `formulae/`,
//! the fully-qualified artifact names that join the catalog to the release
//! store, asset labels, SHA-256 digests, and the published index document.
//! I/O lives in `para-core`.

pub mod asset;
pub mod catalog;
pub mod fqn;
pub mod hash;
pub mod index;
pub mod types;

// Re-exports
pub use asset::{AssetLabel, LabelError, RemoteAsset};
pub use catalog::{
    ArtifactSpec, Catalog, CatalogError, DeclaredArtifact, PackageFile, PackageSpec, ReleaseSpec,
};
pub use fqn::Fqn;
pub use hash::{Sha256Digest, Sha256Hash};
pub use index::{IndexDocument, IndexEntry};
pub use types::{PackageName, ReleaseName};

/// Prefix shared by every published artifact name.
pub const FQN_PREFIX: &str = "terraform";

/// Separator between the FQN and the digest inside an asset label.
pub const LABEL_SEPARATOR: char = '@';
