//! Docker-backed build environments.
//!
//! Every environment is a long-lived `golang` container kept alive by
//! `sleep infinity`; build steps run through `docker exec`. All container
//! operations go through the `docker` CLI, so anything that speaks its
//! command line (podman, nerdctl) can be swapped in via [`DockerConfig::program`].

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::builder::{BuildEnvironment, EnvironmentError, Provisioner};

/// Base image; the package's Go version becomes the tag.
pub const GOLANG_IMAGE: &str = "docker.io/library/golang";

/// How to reach the container runtime and how long to wait on it.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Container CLI binary.
    pub program: String,
    /// Image repository, without tag.
    pub image: String,
    /// Limit for pulling, creating and starting a container.
    pub provision_timeout: Duration,
    /// Limit for a single command inside the container.
    pub command_timeout: Duration,
    /// Limit for copying a file in or out.
    pub copy_timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            image: GOLANG_IMAGE.to_string(),
            provision_timeout: Duration::from_secs(600),
            command_timeout: Duration::from_secs(3600),
            copy_timeout: Duration::from_secs(300),
        }
    }
}

/// Image reference for a toolchain version: `<image>:<version>`, or the bare
/// image (its `latest` tag) when no version is set.
pub fn image_for(image: &str, toolchain: Option<&str>) -> String {
    match toolchain.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => format!("{image}:{version}"),
        None => image.to_string(),
    }
}

/// Provisions one fresh container per call.
#[derive(Debug, Clone, Default)]
pub struct DockerProvisioner {
    config: Arc<DockerConfig>,
}

impl DockerProvisioner {
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args);
        cmd
    }

    fn environment(&self, id: String) -> DockerEnvironment {
        DockerEnvironment {
            id,
            config: Arc::clone(&self.config),
        }
    }

    /// Remove a container whose creation did not complete.
    async fn discard(&self, cidfile: &Path) {
        let id = match tokio::fs::read_to_string(cidfile).await {
            Ok(id) => id.trim().to_string(),
            Err(_) => return,
        };
        if !id.is_empty() {
            warn!(container = %id, "removing partially created container");
            self.environment(id).terminate().await;
        }
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    async fn provision(
        &self,
        toolchain: Option<&str>,
    ) -> Result<Box<dyn BuildEnvironment>, EnvironmentError> {
        let image = image_for(&self.config.image, toolchain);
        let limit = self.config.provision_timeout;
        info!(%image, "provisioning build container");

        run_streaming(
            self.command(&["pull", &image]),
            &format!("pull {image}"),
            limit,
        )
        .await?;

        // The CLI writes the ID here as soon as the container exists, even if
        // the create call itself never returns.
        let scratch = tempfile::tempdir()?;
        let cidfile = scratch.path().join("cid");
        let mut create = self.command(&["create", "--cidfile"]);
        create
            .arg(&cidfile)
            .args(["--tty", &image, "sleep", "infinity"]);
        let id = match capture(create, &format!("create {image}"), limit).await {
            Ok(created) => String::from_utf8_lossy(&created).trim().to_string(),
            Err(e) => {
                self.discard(&cidfile).await;
                return Err(e);
            }
        };

        let env = self.environment(id);
        if let Err(e) = run_streaming(
            self.command(&["start", &env.id]),
            &format!("start {}", env.id),
            limit,
        )
        .await
        {
            env.terminate().await;
            return Err(e);
        }

        debug!(container = %env.id, "container started");
        Ok(Box::new(env))
    }
}

/// A running build container.
#[derive(Debug)]
pub struct DockerEnvironment {
    id: String,
    config: Arc<DockerConfig>,
}

impl DockerEnvironment {
    fn command(&self) -> Command {
        Command::new(&self.config.program)
    }
}

#[async_trait]
impl BuildEnvironment for DockerEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(
        &self,
        command: &[String],
        workdir: Option<&str>,
    ) -> Result<(), EnvironmentError> {
        let mut cmd = self.command();
        cmd.arg("exec");
        if let Some(dir) = workdir {
            cmd.args(["-w", dir]);
        }
        cmd.arg(&self.id).args(command);
        run_streaming(cmd, &command.join(" "), self.config.command_timeout).await
    }

    async fn copy_in(&self, local: &Path, remote: &str) -> Result<(), EnvironmentError> {
        let (dir, name) = split_remote(remote);
        let data = tokio::fs::read(local).await?;
        let archive = tokio::task::spawn_blocking(move || pack_single_file(&name, &data))
            .await
            .map_err(std::io::Error::other)??;

        let mut cmd = self.command();
        cmd.args(["cp", "-"]).arg(format!("{}:{dir}", self.id));
        feed(cmd, &format!("cp {remote}"), archive, self.config.copy_timeout).await
    }

    async fn copy_out(&self, remote: &str, local: &Path) -> Result<(), EnvironmentError> {
        let mut cmd = self.command();
        cmd.args(["cp", "-L"]).arg(format!("{}:{remote}", self.id)).arg("-");
        let archive = match capture(cmd, &format!("cp {remote}"), self.config.copy_timeout).await {
            Ok(archive) => archive,
            Err(EnvironmentError::CommandFailed { .. }) => {
                return Err(EnvironmentError::MissingOutput {
                    path: remote.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let dest: PathBuf = local.to_path_buf();
        let path = remote.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), EnvironmentError> {
            let data = unpack_single_file(&archive)?
                .ok_or(EnvironmentError::MissingOutput { path })?;
            std::fs::write(&dest, data)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)?
    }

    async fn terminate(&self) {
        let mut cmd = self.command();
        cmd.args(["rm", "--force", &self.id]);
        match capture(cmd, &format!("rm {}", self.id), self.config.provision_timeout).await {
            Ok(_) => debug!(container = %self.id, "container removed"),
            Err(e) => warn!(container = %self.id, "failed to remove container: {e}"),
        }
    }
}

/// Split `/a/b/file` into (`/a/b`, `file`).
fn split_remote(remote: &str) -> (String, String) {
    match remote.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), remote.to_string()),
    }
}

/// Build a tar stream holding one executable file.
fn pack_single_file(name: &str, data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_entry_type(tar::EntryType::Regular);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, data)?;
    builder.into_inner()
}

/// Contents of the first regular file in a tar stream.
fn unpack_single_file(archive: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    let mut entries = tar::Archive::new(archive);
    for entry in entries.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

fn spawn_error(cmd: &Command, source: std::io::Error) -> EnvironmentError {
    EnvironmentError::Spawn {
        program: cmd.as_std().get_program().to_string_lossy().to_string(),
        source,
    }
}

/// Relay output to the log line by line until EOF.
///
/// Bytes that are not UTF-8 are replaced. The pipe is drained to EOF even
/// after a read error.
async fn forward<R: AsyncRead + Unpin>(reader: Option<R>, stream: &'static str) {
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                info!(target: "para::build", stream, "{}", text.trim_end());
            }
            Err(e) => {
                warn!(stream, "failed to read build output: {e}");
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                return;
            }
        }
    }
}

/// Run to completion, relaying output lines to the log as they arrive.
async fn run_streaming(
    mut cmd: Command,
    label: &str,
    limit: Duration,
) -> Result<(), EnvironmentError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| spawn_error(&cmd, e))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let pump = async {
        let (_, _, status) = tokio::join!(
            forward(stdout, "stdout"),
            forward(stderr, "stderr"),
            child.wait()
        );
        status
    };
    let waited = tokio::time::timeout(limit, pump).await;
    let status = match waited {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(EnvironmentError::Timeout {
                command: label.to_string(),
                timeout: limit,
            });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(EnvironmentError::CommandFailed {
            command: label.to_string(),
            code: status.code(),
        })
    }
}

/// Run to completion and return stdout. Stderr goes to the log on failure.
async fn capture(
    mut cmd: Command,
    label: &str,
    limit: Duration,
) -> Result<Vec<u8>, EnvironmentError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd.spawn().map_err(|e| spawn_error(&cmd, e))?;
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| EnvironmentError::Timeout {
            command: label.to_string(),
            timeout: limit,
        })??;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        warn!("{label}: {}", String::from_utf8_lossy(&output.stderr).trim());
        Err(EnvironmentError::CommandFailed {
            command: label.to_string(),
            code: output.status.code(),
        })
    }
}

/// Run to completion with `input` on stdin.
async fn feed(
    mut cmd: Command,
    label: &str,
    input: Vec<u8>,
    limit: Duration,
) -> Result<(), EnvironmentError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| spawn_error(&cmd, e))?;

    let run = async {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }
        child.wait_with_output().await
    };
    let output = tokio::time::timeout(limit, run)
        .await
        .map_err(|_| EnvironmentError::Timeout {
            command: label.to_string(),
            timeout: limit,
        })??;

    if output.status.success() {
        Ok(())
    } else {
        warn!("{label}: {}", String::from_utf8_lossy(&output.stderr).trim());
        Err(EnvironmentError::CommandFailed {
            command: label.to_string(),
            code: output.status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tag_follows_toolchain() {
        assert_eq!(
            image_for(GOLANG_IMAGE, Some("1.14")),
            "docker.io/library/golang:1.14"
        );
        assert_eq!(image_for(GOLANG_IMAGE, None), "docker.io/library/golang");
        assert_eq!(image_for(GOLANG_IMAGE, Some("  ")), "docker.io/library/golang");
    }

    #[test]
    fn remote_paths_split_into_dir_and_name() {
        assert_eq!(
            split_remote("/usr/src/myapp/build.sh"),
            ("/usr/src/myapp".to_string(), "build.sh".to_string())
        );
        assert_eq!(split_remote("/init"), ("/".to_string(), "init".to_string()));
    }

    #[test]
    fn single_file_archive_survives_unpacking() {
        let archive = pack_single_file("terraform-provider-foo", b"\x7fELF").unwrap();
        assert_eq!(
            unpack_single_file(&archive).unwrap(),
            Some(b"\x7fELF".to_vec())
        );
    }

    #[test]
    fn archive_without_files_yields_nothing() {
        let archive = tar::Builder::new(Vec::new()).into_inner().unwrap();
        assert_eq!(unpack_single_file(&archive).unwrap(), None);
    }

    #[tokio::test]
    async fn missing_runtime_fails_provisioning() {
        let provisioner = DockerProvisioner::new(DockerConfig {
            program: "para-test-no-such-runtime".to_string(),
            ..DockerConfig::default()
        });
        let err = provisioner.provision(Some("1.14")).await.err().unwrap();
        assert!(matches!(err, EnvironmentError::Spawn { .. }));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let err = run_streaming(
            Command::new("false"),
            "false",
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EnvironmentError::CommandFailed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_fail_the_command() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(concat!(
            "printf 'ok\\n\\377\\376 bad\\n'; sleep 0.2; ",
            "i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done; exit 0",
        ));
        run_streaming(cmd, "noisy", Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_streaming(cmd, "sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvironmentError::Timeout { .. }));
    }

    /// A stand-in container CLI that records its arguments under `dir`.
    struct FakeRuntime {
        dir: tempfile::TempDir,
    }

    impl FakeRuntime {
        fn new() -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::tempdir().unwrap();
            let script = format!(
                r#"#!/bin/sh
state='{}'
echo "$*" >> "$state/log"
case "$1" in
  create)
    echo fake-container-1 > "$3"
    if [ -e "$state/slow-create" ]; then sleep 5; fi
    echo fake-container-1
    ;;
  start)
    if [ -e "$state/fail-start" ]; then echo "cannot start" >&2; exit 1; fi
    ;;
  exec)
    case "$*" in *" false") exit 3 ;; esac
    echo "ran $*"
    ;;
  cp)
    if [ "$2" = "-" ]; then cat > "$state/received.tar"; exit 0; fi
    case "$3" in *missing*) echo "no such file: $3" >&2; exit 1 ;; esac
    cat "$state/served.tar"
    ;;
esac
exit 0
"#,
                dir.path().display()
            );
            let program = dir.path().join("docker");
            std::fs::write(&program, script).unwrap();
            std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
            Self { dir }
        }

        fn config(&self) -> DockerConfig {
            DockerConfig {
                program: self.dir.path().join("docker").to_string_lossy().into_owned(),
                provision_timeout: Duration::from_secs(10),
                command_timeout: Duration::from_secs(10),
                copy_timeout: Duration::from_secs(10),
                ..DockerConfig::default()
            }
        }

        fn provisioner(&self) -> DockerProvisioner {
            DockerProvisioner::new(self.config())
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn touch(&self, name: &str) {
            std::fs::write(self.path(name), b"").unwrap();
        }

        fn log(&self) -> Vec<String> {
            std::fs::read_to_string(self.path("log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn last_command(&self) -> Option<String> {
            self.log().pop()
        }
    }

    #[tokio::test]
    async fn provisioning_pulls_creates_and_starts() {
        let runtime = FakeRuntime::new();
        let env = runtime.provisioner().provision(Some("1.14")).await.unwrap();
        assert_eq!(env.id(), "fake-container-1");

        let log = runtime.log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], "pull docker.io/library/golang:1.14");
        assert!(log[1].starts_with("create --cidfile "));
        assert!(log[1].ends_with(" --tty docker.io/library/golang:1.14 sleep infinity"));
        assert_eq!(log[2], "start fake-container-1");

        env.terminate().await;
        assert_eq!(runtime.last_command().as_deref(), Some("rm --force fake-container-1"));
    }

    #[tokio::test]
    async fn exec_runs_in_the_container_workdir() {
        let runtime = FakeRuntime::new();
        let env = runtime.provisioner().provision(None).await.unwrap();

        let build: Vec<String> = ["go", "build", "./..."].map(String::from).to_vec();
        env.exec(&build, Some("/usr/src/myapp")).await.unwrap();
        assert_eq!(
            runtime.last_command().as_deref(),
            Some("exec -w /usr/src/myapp fake-container-1 go build ./...")
        );

        let err = env.exec(&["false".to_string()], None).await.unwrap_err();
        assert!(matches!(err, EnvironmentError::CommandFailed { code: Some(3), .. }));
    }

    #[tokio::test]
    async fn copy_out_writes_the_archived_file() {
        let runtime = FakeRuntime::new();
        let archive = pack_single_file("terraform-provider-foo", b"plugin bytes").unwrap();
        std::fs::write(runtime.path("served.tar"), archive).unwrap();
        let env = runtime.provisioner().provision(None).await.unwrap();

        let local = runtime.path("out");
        env.copy_out("/usr/src/myapp/dist/foo", &local).await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"plugin bytes");
        assert_eq!(
            runtime.last_command().as_deref(),
            Some("cp -L fake-container-1:/usr/src/myapp/dist/foo -")
        );
    }

    #[tokio::test]
    async fn copy_out_of_absent_path_is_missing_output() {
        let runtime = FakeRuntime::new();
        let env = runtime.provisioner().provision(None).await.unwrap();

        let err = env
            .copy_out("/usr/src/myapp/missing/foo", &runtime.path("out"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnvironmentError::MissingOutput { ref path } if path == "/usr/src/myapp/missing/foo"
        ));
        assert!(!runtime.path("out").exists());
    }

    #[tokio::test]
    async fn copy_in_streams_a_single_file_archive() {
        let runtime = FakeRuntime::new();
        let local = runtime.path("build.sh");
        std::fs::write(&local, b"go build\n").unwrap();
        let env = runtime.provisioner().provision(None).await.unwrap();

        env.copy_in(&local, "/usr/src/myapp/build.sh").await.unwrap();
        assert_eq!(
            runtime.last_command().as_deref(),
            Some("cp - fake-container-1:/usr/src/myapp")
        );
        let received = std::fs::read(runtime.path("received.tar")).unwrap();
        assert_eq!(unpack_single_file(&received).unwrap(), Some(b"go build\n".to_vec()));
    }

    #[tokio::test]
    async fn failed_start_removes_the_container() {
        let runtime = FakeRuntime::new();
        runtime.touch("fail-start");

        let err = runtime.provisioner().provision(None).await.err().unwrap();
        assert!(matches!(err, EnvironmentError::CommandFailed { .. }));
        let log = runtime.log();
        assert_eq!(log[log.len() - 2], "start fake-container-1");
        assert_eq!(log[log.len() - 1], "rm --force fake-container-1");
    }

    #[tokio::test]
    async fn timed_out_create_removes_the_container() {
        let runtime = FakeRuntime::new();
        runtime.touch("slow-create");
        let provisioner = DockerProvisioner::new(DockerConfig {
            provision_timeout: Duration::from_millis(500),
            ..runtime.config()
        });

        let err = provisioner.provision(None).await.err().unwrap();
        assert!(matches!(err, EnvironmentError::Timeout { .. }));
        assert_eq!(runtime.last_command().as_deref(), Some("rm --force fake-container-1"));
        assert!(!runtime.log().iter().any(|line| line.starts_with("start")));
    }
}
