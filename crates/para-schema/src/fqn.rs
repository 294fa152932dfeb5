//! Fully-qualified artifact names.
//!
//! The FQN is the only join key between a catalog entry and an asset in the
//! release store, so its format is fixed:
//!
//! ```text
//! terraform-<kind>-<package>-<release>-<arch>
//! ```
//!
//! Changing it orphans every asset already uploaded.

use std::borrow::Borrow;

use crate::asset::AssetLabel;
use crate::hash::Sha256Digest;
use crate::{FQN_PREFIX, PackageName, ReleaseName};

/// A fully-qualified artifact name.
///
/// # Example
///
/// ```
/// use para_schema::{Fqn, PackageName, ReleaseName};
///
/// let fqn = Fqn::new("provider", &PackageName::new("aws"), &ReleaseName::new("v2.0.0"), "amd64");
/// assert_eq!(fqn.as_str(), "terraform-provider-aws-v2.0.0-amd64");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqn(String);

impl Fqn {
    /// Derive the FQN of one artifact.
    pub fn new(kind: &str, package: &PackageName, release: &ReleaseName, arch: &str) -> Self {
        Self(format!("{FQN_PREFIX}-{kind}-{package}-{release}-{arch}"))
    }

    /// Wrap an FQN read back from the store (the left side of a label).
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the `<fqn>@<digest>` label uploaded alongside the artifact.
    pub fn label(&self, digest: &Sha256Digest) -> AssetLabel {
        AssetLabel::new(self.clone(), digest.clone().into())
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Fqn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Fqn {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Fqn {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Fqn {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
