//! Reconciliation: make the release store hold every artifact the catalog
//! declares.
//!
//! Existence is decided by asset **name**, recomputed from a fresh listing on
//! every run, so reruns are idempotent. Releases are processed one at a time,
//! each in its own build environment, and only releases with at least one
//! missing artifact get an environment at all.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use para_schema::{
    ArtifactSpec, Catalog, Fqn, PackageName, PackageSpec, ReleaseName, ReleaseSpec, RemoteAsset,
};
use tracing::{debug, error, info};

use crate::builder::{BuildEnvironment, Builder, Provisioner};
use crate::io::artifacts::ArtifactStore;
use crate::io::hashing::sha256_file;

/// FQNs of every asset already in the store, taken from asset names.
pub fn existing_fqns(assets: &[RemoteAsset]) -> HashSet<&str> {
    assets.iter().map(RemoteAsset::name_fqn).collect()
}

/// The release's artifacts that have no asset yet, with their FQNs.
pub fn missing_artifacts<'r>(
    package: &PackageSpec,
    release: &'r ReleaseSpec,
    existing: &HashSet<&str>,
) -> Vec<(&'r ArtifactSpec, Fqn)> {
    release
        .artifacts
        .iter()
        .map(|artifact| (artifact, artifact.fqn(&package.name, &release.name)))
        .filter(|(_, fqn)| {
            let present = existing.contains(fqn.as_str());
            if present {
                debug!(fqn = %fqn, "already uploaded, skipping");
            }
            !present
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Report what would be built without provisioning or uploading.
    pub dry_run: bool,
    /// Only reconcile this package.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Every artifact already present; nothing was provisioned.
    UpToDate,
    /// Missing artifacts were built and uploaded.
    Built { uploaded: Vec<Fqn> },
    /// Dry run: these artifacts would be built.
    Planned { missing: Vec<Fqn> },
    /// The release aborted. `uploaded` lists siblings that made it before
    /// the failure; they stay in the store.
    Failed { error: String, uploaded: Vec<Fqn> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub package: PackageName,
    pub release: ReleaseName,
    pub outcome: ReleaseOutcome,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub releases: Vec<ReleaseReport>,
    /// Number of build environments provisioned.
    pub provisioned: usize,
}

impl ReconcileReport {
    pub fn failures(&self) -> impl Iterator<Item = &ReleaseReport> {
        self.releases
            .iter()
            .filter(|r| matches!(r.outcome, ReleaseOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Total artifacts uploaded during the run, including those of failed
    /// releases.
    pub fn uploaded(&self) -> usize {
        self.releases
            .iter()
            .map(|r| match &r.outcome {
                ReleaseOutcome::Built { uploaded } | ReleaseOutcome::Failed { uploaded, .. } => {
                    uploaded.len()
                }
                _ => 0,
            })
            .sum()
    }
}

/// Drives the catalog against a store using environments from a provisioner.
pub struct Reconciler<'a> {
    store: &'a dyn ArtifactStore,
    provisioner: &'a dyn Provisioner,
    options: ReconcileOptions,
}

impl std::fmt::Debug for Reconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn ArtifactStore,
        provisioner: &'a dyn Provisioner,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            provisioner,
            options,
        }
    }

    /// Reconcile every release of the catalog, in catalog order.
    ///
    /// A failing release is recorded in the report and the run moves on.
    ///
    /// # Errors
    ///
    /// Fails outright if the asset listing cannot be fetched or an
    /// environment cannot be provisioned.
    pub async fn run(&self, catalog: &Catalog) -> Result<ReconcileReport> {
        let assets = self
            .store
            .list_release_assets()
            .await
            .context("Failed to list release assets")?;
        let existing = existing_fqns(&assets);
        debug!(assets = assets.len(), "fetched existing assets");

        let mut report = ReconcileReport::default();
        let selected = catalog.packages().iter().filter(|p| {
            self.options
                .filter
                .as_deref()
                .is_none_or(|name| p.name == name)
        });

        for package in selected {
            for release in &package.releases {
                let missing = missing_artifacts(package, release, &existing);

                let outcome = if missing.is_empty() {
                    ReleaseOutcome::UpToDate
                } else if self.options.dry_run {
                    let missing: Vec<Fqn> = missing.into_iter().map(|(_, fqn)| fqn).collect();
                    info!(
                        package = %package.name,
                        release = %release.name,
                        missing = missing.len(),
                        "would build"
                    );
                    ReleaseOutcome::Planned { missing }
                } else {
                    report.provisioned += 1;
                    self.reconcile_release(package, release, &missing).await?
                };
                report.releases.push(ReleaseReport {
                    package: package.name.clone(),
                    release: release.name.clone(),
                    outcome,
                });
            }
        }

        Ok(report)
    }

    /// Build one release in a fresh environment and upload what was missing.
    async fn reconcile_release(
        &self,
        package: &PackageSpec,
        release: &ReleaseSpec,
        missing: &[(&ArtifactSpec, Fqn)],
    ) -> Result<ReleaseOutcome> {
        info!(
            package = %package.name,
            release = %release.name,
            missing = missing.len(),
            "building release"
        );
        let env = self
            .provisioner
            .provision(package.goversion.as_deref())
            .await
            .with_context(|| {
                format!(
                    "Failed to provision build environment for {}/{}",
                    package.name, release.name
                )
            })?;

        let mut uploaded = Vec::new();
        let result = self
            .build_and_upload(&*env, release, missing, &mut uploaded)
            .await;
        env.terminate().await;

        Ok(match result {
            Ok(()) => ReleaseOutcome::Built { uploaded },
            Err(e) => {
                error!(package = %package.name, release = %release.name, "release failed: {e:#}");
                ReleaseOutcome::Failed {
                    error: format!("{e:#}"),
                    uploaded,
                }
            }
        })
    }

    async fn build_and_upload(
        &self,
        env: &dyn BuildEnvironment,
        release: &ReleaseSpec,
        missing: &[(&ArtifactSpec, Fqn)],
        uploaded: &mut Vec<Fqn>,
    ) -> Result<()> {
        let builder = Builder::new(env);
        builder
            .fetch_source(release)
            .await
            .with_context(|| format!("Failed to fetch {} at {}", release.git, release.reference))?;
        builder
            .run_script(release)
            .await
            .context("Build script failed")?;

        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        for (artifact, fqn) in missing {
            let local = scratch.path().join(fqn.as_str());
            builder
                .extract(artifact, &local)
                .await
                .with_context(|| {
                    format!("Failed to copy {} out of the environment", artifact.path)
                })?;
            self.upload(&local, fqn).await?;
            uploaded.push(fqn.clone());
        }
        Ok(())
    }

    async fn upload(&self, local: &Path, fqn: &Fqn) -> Result<()> {
        let digest = sha256_file(local)
            .await
            .with_context(|| format!("Failed to hash {fqn}"))?;
        let label = fqn.label(&digest);
        self.store
            .upload_asset(local, fqn.as_str(), &label.to_string())
            .await
            .with_context(|| format!("Failed to upload {fqn}"))?;
        info!(fqn = %fqn, digest = %digest.as_str(), "uploaded artifact");
        Ok(())
    }
}
