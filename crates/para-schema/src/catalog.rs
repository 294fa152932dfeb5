//! Catalog entities: what the registry promises to publish.
//!
//! One catalog file per package lives under `formulae/`. The package name is
//! the file stem; the file itself only declares releases:
//!
//! ```yaml
//! goversion: "1.14"
//! versions:
//!   - name: v1.0.0
//!     git: https://github.com/example/terraform-provider-foo
//!     ref: v1.0.0
//!     script:
//!       - make build
//!     artifacts:
//!       - type: provider
//!         arch: amd64
//!         path: bin/terraform-provider-foo
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::fqn::Fqn;
use crate::types::{PackageName, ReleaseName};

/// One binary produced by a release build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact kind (e.g. `provider`, `provisioner`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Target architecture string, used verbatim.
    pub arch: String,
    /// Output path inside the build environment, relative to the checkout.
    pub path: String,
}

impl ArtifactSpec {
    /// The fully-qualified name of this artifact within `package`/`release`.
    pub fn fqn(&self, package: &PackageName, release: &ReleaseName) -> Fqn {
        Fqn::new(&self.kind, package, release, &self.arch)
    }
}

/// A buildable release: one source checkout, one script, many artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    /// Release name, unique within the package.
    pub name: ReleaseName,
    /// Source repository URL.
    pub git: String,
    /// Revision to check out (tag, branch or commit).
    #[serde(rename = "ref")]
    pub reference: String,
    /// Build script, one shell command per line.
    #[serde(default)]
    pub script: Vec<String>,
    /// Artifacts the script leaves behind.
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
}

/// On-disk shape of a catalog file.
///
/// Unknown keys (including a stray `name`) are ignored: the package name
/// always comes from the file name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageFile {
    /// Go toolchain tag for the build image; the image default when absent.
    #[serde(default)]
    pub goversion: Option<String>,
    /// Declared releases, in file order.
    #[serde(default)]
    pub versions: Vec<ReleaseSpec>,
}

/// A package and everything it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Package name (catalog file stem).
    pub name: PackageName,
    /// Go toolchain tag for the build image.
    pub goversion: Option<String>,
    /// Releases in catalog order.
    pub releases: Vec<ReleaseSpec>,
}

impl PackageSpec {
    /// Name a parsed catalog file.
    pub fn from_file(name: PackageName, file: PackageFile) -> Self {
        Self {
            name,
            goversion: file.goversion.filter(|v| !v.trim().is_empty()),
            releases: file.versions,
        }
    }
}

/// Errors that make a set of packages an invalid catalog.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two artifacts would be uploaded under the same name.
    #[error("artifact name {fqn} is declared by both {first} and {second}")]
    DuplicateFqn {
        /// The colliding name.
        fqn: Fqn,
        /// `package/release` of the first declaration.
        first: String,
        /// `package/release` of the second declaration.
        second: String,
    },

    /// A release name appears twice within one package.
    #[error("release {release} is declared more than once in package {package}")]
    DuplicateRelease {
        /// Package containing the duplicate.
        package: PackageName,
        /// The repeated release name.
        release: ReleaseName,
    },
}

/// A validated, immutable catalog.
///
/// Construction rejects duplicate release names and FQN collisions, so every
/// declared artifact maps to exactly one name in the release store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    packages: Vec<PackageSpec>,
}

/// An artifact together with the package and release that declare it.
#[derive(Debug, Clone, Copy)]
pub struct DeclaredArtifact<'a> {
    /// Owning package.
    pub package: &'a PackageSpec,
    /// Owning release.
    pub release: &'a ReleaseSpec,
    /// The artifact itself.
    pub artifact: &'a ArtifactSpec,
}

impl DeclaredArtifact<'_> {
    /// Fully-qualified name of the artifact.
    pub fn fqn(&self) -> Fqn {
        self.artifact.fqn(&self.package.name, &self.release.name)
    }
}

impl Catalog {
    /// Validate `packages` into a catalog, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateRelease`] if a package repeats a
    /// release name, or [`CatalogError::DuplicateFqn`] if two artifacts
    /// anywhere in the catalog share a fully-qualified name.
    pub fn new(packages: Vec<PackageSpec>) -> Result<Self, CatalogError> {
        for package in &packages {
            let mut seen = HashSet::new();
            for release in &package.releases {
                if !seen.insert(&release.name) {
                    return Err(CatalogError::DuplicateRelease {
                        package: package.name.clone(),
                        release: release.name.clone(),
                    });
                }
            }
        }

        let catalog = Self { packages };

        let mut owners: HashMap<Fqn, String> = HashMap::new();
        for declared in catalog.artifacts() {
            let owner = format!("{}/{}", declared.package.name, declared.release.name);
            let fqn = declared.fqn();
            if let Some(first) = owners.get(&fqn) {
                return Err(CatalogError::DuplicateFqn {
                    fqn,
                    first: first.clone(),
                    second: owner,
                });
            }
            owners.insert(fqn, owner);
        }

        Ok(catalog)
    }

    /// Packages in catalog order.
    pub fn packages(&self) -> &[PackageSpec] {
        &self.packages
    }

    /// Look up a package by name.
    pub fn package(&self, name: &str) -> Option<&PackageSpec> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Every declared artifact, in catalog order.
    pub fn artifacts(&self) -> impl Iterator<Item = DeclaredArtifact<'_>> {
        self.packages.iter().flat_map(|package| {
            package.releases.iter().flat_map(move |release| {
                release.artifacts.iter().map(move |artifact| DeclaredArtifact {
                    package,
                    release,
                    artifact,
                })
            })
        })
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the catalog declares no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
