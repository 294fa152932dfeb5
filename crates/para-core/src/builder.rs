//! Build orchestration inside disposable build environments.
//!
//! A [`Provisioner`] hands out a fresh [`BuildEnvironment`] per release. The
//! [`Builder`] then drives it through a fixed sequence:
//!
//! 1. `git clone <git> /usr/src/myapp`
//! 2. `git checkout <ref>` inside the checkout
//! 3. the release script, as one `bash` unit with `set -e` and `set -x`
//! 4. copy each requested artifact out to the host
//!
//! Tearing the environment down is the caller's job: whoever provisions an
//! environment calls [`BuildEnvironment::terminate`] on every exit path.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use para_schema::{ArtifactSpec, ReleaseSpec};
use thiserror::Error;
use tracing::info;

/// Working directory the source is cloned into inside every environment.
pub const WORK_DIR: &str = "/usr/src/myapp";

/// Shell used to run build scripts.
const SCRIPT_SHELL: &str = "/bin/bash";

/// Prologue for every build script: abort on the first failing command and
/// echo each command before it runs, so failures are attributable.
const SCRIPT_PROLOGUE: &str = "set -e\nset -x\n";

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("{path} was not found in the build environment")]
    MissingOutput { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live, isolated build environment.
#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    /// Identifier used in logs (e.g. a container ID).
    fn id(&self) -> &str;

    /// Run `command` to completion, optionally inside `workdir`.
    ///
    /// Output is streamed to the log as it arrives. A non-zero exit status is
    /// an error.
    async fn exec(&self, command: &[String], workdir: Option<&str>) -> Result<(), EnvironmentError>;

    /// Run a multi-line script as a single fail-fast shell unit.
    async fn exec_script(&self, lines: &[String], workdir: &str) -> Result<(), EnvironmentError> {
        let command = vec![
            SCRIPT_SHELL.to_string(),
            "-c".to_string(),
            render_script(lines),
        ];
        self.exec(&command, Some(workdir)).await
    }

    /// Copy a host file into the environment at `remote`.
    async fn copy_in(&self, local: &Path, remote: &str) -> Result<(), EnvironmentError>;

    /// Copy the file at `remote` out of the environment to `local`.
    async fn copy_out(&self, remote: &str, local: &Path) -> Result<(), EnvironmentError>;

    /// Destroy the environment. Best-effort: failures are logged, never returned.
    async fn terminate(&self);
}

/// Creates build environments.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision an environment for the given toolchain version (the
    /// provisioner's default toolchain when `None`).
    async fn provision(
        &self,
        toolchain: Option<&str>,
    ) -> Result<Box<dyn BuildEnvironment>, EnvironmentError>;
}

/// Concatenate script lines behind the fail-fast prologue.
pub fn render_script(lines: &[String]) -> String {
    let mut script = String::from(SCRIPT_PROLOGUE);
    for line in lines {
        script.push_str(line);
        script.push('\n');
    }
    script
}

/// Absolute path of an artifact's output inside the environment.
pub fn output_path(artifact: &ArtifactSpec) -> String {
    let relative = artifact.path.trim_start_matches("./").trim_start_matches('/');
    format!("{WORK_DIR}/{relative}")
}

/// Drives one release build inside a [`BuildEnvironment`].
#[derive(Clone, Copy)]
pub struct Builder<'a> {
    env: &'a dyn BuildEnvironment,
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").field("env", &self.env.id()).finish()
    }
}

impl<'a> Builder<'a> {
    /// Create a builder backed by the given environment.
    pub fn new(env: &'a dyn BuildEnvironment) -> Self {
        Self { env }
    }

    /// Clone the release source into [`WORK_DIR`] and check out its revision.
    ///
    /// # Errors
    ///
    /// Returns an error if either git command fails.
    pub async fn fetch_source(&self, release: &ReleaseSpec) -> Result<(), EnvironmentError> {
        info!(git = %release.git, reference = %release.reference, "fetching source");
        let clone = vec![
            "git".to_string(),
            "clone".to_string(),
            release.git.clone(),
            WORK_DIR.to_string(),
        ];
        self.env.exec(&clone, None).await?;

        let checkout = vec![
            "git".to_string(),
            "checkout".to_string(),
            release.reference.clone(),
        ];
        self.env.exec(&checkout, Some(WORK_DIR)).await
    }

    /// Run the release's build script in [`WORK_DIR`].
    ///
    /// # Errors
    ///
    /// Returns an error if any script line fails.
    pub async fn run_script(&self, release: &ReleaseSpec) -> Result<(), EnvironmentError> {
        info!(lines = release.script.len(), "running build script");
        self.env.exec_script(&release.script, WORK_DIR).await
    }

    /// Copy one built artifact out of the environment to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output does not exist or cannot be copied.
    pub async fn extract(
        &self,
        artifact: &ArtifactSpec,
        dest: &Path,
    ) -> Result<(), EnvironmentError> {
        self.env.copy_out(&output_path(artifact), dest).await
    }
}
