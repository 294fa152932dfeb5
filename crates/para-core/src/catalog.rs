//! Catalog loading from the `formulae/` directory.

use std::path::{Path, PathBuf};

use para_schema::{Catalog, CatalogError, PackageFile, PackageName, PackageSpec};
use thiserror::Error;
use tracing::debug;

/// Default catalog directory, relative to the working directory.
pub const CATALOG_DIR: &str = "formulae";

/// File extensions recognised as catalog files.
const CATALOG_EXTENSIONS: &[&str] = &["yaml", "yml"];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("catalog directory {} is not readable: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to read catalog file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("catalog file {} has no usable file name", path.display())]
    Name { path: PathBuf },

    #[error(transparent)]
    Invalid(#[from] CatalogError),
}

/// Load and validate every catalog file in `dir`.
///
/// Files are read in sorted path order, which fixes the order releases are
/// reconciled in. The package name is the file stem; a `name` key inside the
/// file is ignored. Any unreadable or unparsable file fails the whole load.
///
/// # Errors
///
/// Returns a [`LoadError`] if the directory cannot be read, any file fails
/// to read or parse, or the resulting catalog is invalid.
pub fn load_catalog(dir: &Path) -> Result<Catalog, LoadError> {
    std::fs::read_dir(dir).map_err(|source| LoadError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut paths = Vec::new();
    for ext in CATALOG_EXTENSIONS {
        for entry in glob::glob(&format!("{escaped}/*.{ext}"))? {
            let path = entry.map_err(|e| LoadError::Read {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }
    paths.sort();

    let mut packages = Vec::with_capacity(paths.len());
    for path in paths {
        packages.push(load_package(&path)?);
    }

    Ok(Catalog::new(packages)?)
}

/// Parse a single catalog file into a [`PackageSpec`].
///
/// # Errors
///
/// Returns a [`LoadError`] if the file cannot be read or parsed.
pub fn load_package(path: &Path) -> Result<PackageSpec, LoadError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LoadError::Name {
            path: path.to_path_buf(),
        })?;

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let file: PackageFile = serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(package = name, releases = file.versions.len(), "loaded catalog file");
    Ok(PackageSpec::from_file(PackageName::new(name), file))
}
