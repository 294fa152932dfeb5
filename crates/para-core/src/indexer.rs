//! Index generation and publishing.
//!
//! The index maps every declared artifact to the asset that holds it. It is
//! built only when **every** artifact has a correctly labelled asset; a
//! partial index is never produced.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use para_schema::{
    AssetLabel, Catalog, Fqn, IndexDocument, IndexEntry, RemoteAsset, Sha256Hash,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::io::artifacts::{ArtifactStore, StoreError};

/// Repository path of the published index.
pub const INDEX_PATH: &str = "para.idx.yaml";
/// Commit message used when the index changes.
pub const COMMIT_MESSAGE: &str = "Update para.idx.yaml";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("no asset found for {fqn}")]
    MissingAsset { fqn: Fqn },

    #[error("failed to render index: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Result of looking an FQN up among labelled assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetLookup<'a> {
    Found {
        asset: &'a RemoteAsset,
        digest: &'a Sha256Hash,
    },
    NotFound,
}

/// Assets with well-formed labels, keyed by the FQN in the label.
///
/// Malformed labels are logged and dropped on construction. When two assets
/// claim the same FQN the first in listing order wins.
#[derive(Debug)]
pub struct LabelledAssets<'a> {
    by_fqn: HashMap<Fqn, (&'a RemoteAsset, AssetLabel)>,
}

impl<'a> LabelledAssets<'a> {
    pub fn new(assets: &'a [RemoteAsset]) -> Self {
        let mut by_fqn = HashMap::with_capacity(assets.len());
        for asset in assets {
            let label = match asset.parsed_label() {
                Ok(label) => label,
                Err(e) => {
                    warn!(asset = %asset.name, id = asset.id, "ignoring asset: {e}");
                    continue;
                }
            };
            match by_fqn.entry(label.fqn.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert((asset, label));
                }
                Entry::Occupied(first) => {
                    let (kept, _) = first.get();
                    warn!(
                        fqn = %label.fqn,
                        kept = kept.id,
                        ignored = asset.id,
                        "duplicate asset label, keeping the first"
                    );
                }
            }
        }
        Self { by_fqn }
    }

    pub fn lookup(&self, fqn: &str) -> AssetLookup<'_> {
        match self.by_fqn.get(fqn) {
            Some((asset, label)) => AssetLookup::Found {
                asset,
                digest: &label.digest,
            },
            None => AssetLookup::NotFound,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_fqn.len()
    }
}

/// Build the index for `catalog` from a fresh asset listing.
///
/// # Errors
///
/// Returns [`IndexError::MissingAsset`] for the first declared artifact that
/// has no labelled asset.
pub fn build_index(
    catalog: &Catalog,
    assets: &[RemoteAsset],
) -> Result<IndexDocument, IndexError> {
    let labelled = LabelledAssets::new(assets);
    debug!(labelled = labelled.len(), total = assets.len(), "indexed asset labels");

    let mut doc = IndexDocument::new();
    for declared in catalog.artifacts() {
        let fqn = declared.fqn();
        let AssetLookup::Found { asset, digest } = labelled.lookup(fqn.as_str()) else {
            return Err(IndexError::MissingAsset { fqn });
        };
        doc.insert(
            &declared.artifact.kind,
            declared.package.name.as_str(),
            declared.release.name.as_str(),
            &declared.artifact.arch,
            IndexEntry::new(asset.size, digest, asset.url.clone()),
        );
    }
    Ok(doc)
}

/// Serialize the index as YAML.
///
/// # Errors
///
/// Returns [`IndexError::Render`] if serialization fails.
pub fn render(doc: &IndexDocument) -> Result<String, IndexError> {
    Ok(serde_yaml::to_string(doc)?)
}

/// What [`publish`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Write the rendered index to [`INDEX_PATH`], conditioned on the version
/// that was just read. Identical content is left alone.
///
/// # Errors
///
/// Returns [`StoreError::Conflict`] if the file changed concurrently, or any
/// other store error.
pub async fn publish(
    store: &dyn ArtifactStore,
    rendered: &str,
) -> Result<PublishOutcome, StoreError> {
    let current = store.read_indexed_file(INDEX_PATH).await?;
    let outcome = match &current {
        Some(file) if file.content == rendered.as_bytes() => {
            info!(path = INDEX_PATH, "index unchanged");
            return Ok(PublishOutcome::Unchanged);
        }
        Some(_) => PublishOutcome::Updated,
        None => PublishOutcome::Created,
    };

    let version = current.as_ref().map(|file| file.version.as_str());
    store
        .write_indexed_file(INDEX_PATH, rendered.as_bytes(), version, COMMIT_MESSAGE)
        .await?;
    info!(path = INDEX_PATH, ?outcome, "published index");
    Ok(outcome)
}
