pub mod builder;
pub mod catalog;
pub mod container;
pub mod indexer;
pub mod io;
pub mod reconcile;
pub mod repo;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::{BuildEnvironment, Builder, EnvironmentError, Provisioner, WORK_DIR};
pub use catalog::{CATALOG_DIR, LoadError, load_catalog};
pub use container::{DockerConfig, DockerProvisioner};
pub use indexer::{INDEX_PATH, IndexError, PublishOutcome, build_index, publish, render};
pub use io::artifacts::{ArtifactStore, IndexedFile, StoreError};
pub use io::github::{GitHubConfig, GitHubStore};
pub use reconcile::{ReconcileOptions, ReconcileReport, Reconciler, ReleaseOutcome};
pub use repo::RepoKey;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("para-core/", env!("CARGO_PKG_VERSION"));
