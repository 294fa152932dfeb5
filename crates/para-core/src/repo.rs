/// The GitHub repository that hosts the registry: its `binaries` release holds
/// the artifacts and its default branch holds the index file.
///
/// # Example
///
/// ```
/// use para_core::repo::RepoKey;
///
/// let repo = RepoKey::new("schizofreny", "registry");
/// assert_eq!(repo.to_string(), "schizofreny/registry");
/// ```
#[derive(Debug, Clone, Hash, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RepoKey {
    /// Repository owner (GitHub user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoKey {
    /// Create a new `RepoKey` from an owner and repository name.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// API path prefix for this repository: `/repos/<owner>/<repo>`.
    pub fn api_path(&self) -> String {
        format!("/repos/{}/{}", self.owner, self.repo)
    }
}

impl std::fmt::Display for RepoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_path_and_display() {
        let repo = RepoKey::new("org", "project");
        assert_eq!(repo.api_path(), "/repos/org/project");
        assert_eq!(repo.to_string(), "org/project");
    }
}
