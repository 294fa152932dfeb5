//! Assets as listed by the release store, and the labels attached to them.

use serde::{Deserialize, Serialize};

use crate::LABEL_SEPARATOR;
use crate::fqn::Fqn;
use crate::hash::Sha256Hash;

/// An asset attached to the registry's binaries release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    /// Store-assigned asset ID.
    pub id: u64,
    /// Display (file) name. For assets uploaded by this tool, the FQN.
    pub name: String,
    /// `<fqn>@<sha256-hex>` label; may be empty for foreign assets.
    pub label: String,
    /// Size in bytes.
    pub size: u64,
    /// Browser-retrievable download URL.
    pub url: String,
}

impl RemoteAsset {
    /// FQN implied by the asset's **name**: everything before the first `@`,
    /// or the whole name when there is none.
    ///
    /// Existence checks use the name rather than the label, so an asset with a
    /// broken label still counts as present and is not rebuilt.
    pub fn name_fqn(&self) -> &str {
        self.name
            .split(LABEL_SEPARATOR)
            .next()
            .unwrap_or(&self.name)
    }

    /// Parse the asset's label.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Malformed`] unless the label splits into exactly
    /// two `@`-separated parts.
    pub fn parsed_label(&self) -> Result<AssetLabel, LabelError> {
        self.label.parse()
    }
}

/// Errors that can occur when parsing an asset label.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// The label does not consist of exactly one FQN and one digest.
    #[error("malformed label '{label}': expected 2 '@'-separated parts, got {parts}")]
    Malformed {
        /// The offending label.
        label: String,
        /// How many parts the label split into.
        parts: usize,
    },
}

/// A parsed `<fqn>@<digest>` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetLabel {
    /// Artifact the asset belongs to.
    pub fqn: Fqn,
    /// Hex digest as written in the label (not re-validated).
    pub digest: Sha256Hash,
}

impl AssetLabel {
    /// Assemble a label from its parts.
    pub fn new(fqn: Fqn, digest: Sha256Hash) -> Self {
        Self { fqn, digest }
    }
}

impl std::str::FromStr for AssetLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(LABEL_SEPARATOR).collect();
        match parts.as_slice() {
            [fqn, digest] => Ok(Self {
                fqn: Fqn::from_raw(*fqn),
                digest: Sha256Hash::new(*digest),
            }),
            _ => Err(LabelError::Malformed {
                label: s.to_string(),
                parts: parts.len(),
            }),
        }
    }
}

impl std::fmt::Display for AssetLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{LABEL_SEPARATOR}{}", self.fqn, self.digest)
    }
}
