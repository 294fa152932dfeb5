//! In-memory stand-ins for the build environment and the release store.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use para_schema::{
    ArtifactSpec, Catalog, PackageName, PackageSpec, ReleaseName, ReleaseSpec, RemoteAsset,
};

use crate::builder::{BuildEnvironment, EnvironmentError, Provisioner, render_script};
use crate::io::artifacts::{ArtifactStore, IndexedFile, StoreError};

pub(crate) fn release(name: &str, artifacts: &[(&str, &str)]) -> ReleaseSpec {
    ReleaseSpec {
        name: ReleaseName::new(name),
        git: "https://example.com/foo.git".to_string(),
        reference: name.to_string(),
        script: vec!["make build".to_string()],
        artifacts: artifacts
            .iter()
            .map(|(kind, arch)| ArtifactSpec {
                kind: (*kind).to_string(),
                arch: (*arch).to_string(),
                path: format!("bin/{kind}-{arch}"),
            })
            .collect(),
    }
}

pub(crate) fn package(name: &str, releases: Vec<ReleaseSpec>) -> PackageSpec {
    PackageSpec {
        name: PackageName::new(name),
        goversion: Some("1.14".to_string()),
        releases,
    }
}

pub(crate) fn catalog(packages: Vec<PackageSpec>) -> Catalog {
    Catalog::new(packages).unwrap()
}

pub(crate) fn asset(id: u64, name: &str, label: &str) -> RemoteAsset {
    RemoteAsset {
        id,
        name: name.to_string(),
        label: label.to_string(),
        size: 1024,
        url: format!("https://example/asset{id}"),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    log: Mutex<Vec<String>>,
    provisioned: AtomicUsize,
    terminated: AtomicUsize,
    fail_provision: AtomicBool,
    failing_scripts: Mutex<HashSet<String>>,
    missing_outputs: Mutex<HashSet<String>>,
}

impl FakeState {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Hands out [`FakeEnvironment`]s that share one command log.
#[derive(Debug, Default, Clone)]
pub(crate) struct FakeProvisioner {
    state: Arc<FakeState>,
}

impl FakeProvisioner {
    pub(crate) fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub(crate) fn provisioned(&self) -> usize {
        self.state.provisioned.load(Ordering::SeqCst)
    }

    pub(crate) fn terminated(&self) -> usize {
        self.state.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_provisioning(&self) {
        self.state.fail_provision.store(true, Ordering::SeqCst);
    }

    /// Make the build script fail for releases checked out at `reference`.
    pub(crate) fn fail_script_for(&self, reference: &str) {
        self.state
            .failing_scripts
            .lock()
            .unwrap()
            .insert(reference.to_string());
    }

    /// Make `copy_out` of `remote` report a missing output.
    pub(crate) fn missing_output(&self, remote: &str) {
        self.state
            .missing_outputs
            .lock()
            .unwrap()
            .insert(remote.to_string());
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn provision(
        &self,
        toolchain: Option<&str>,
    ) -> Result<Box<dyn BuildEnvironment>, EnvironmentError> {
        self.state
            .record(format!("provision {}", toolchain.unwrap_or("default")));
        if self.state.fail_provision.load(Ordering::SeqCst) {
            return Err(EnvironmentError::CommandFailed {
                command: "provision".to_string(),
                code: Some(1),
            });
        }
        let n = self.state.provisioned.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeEnvironment {
            id: format!("fake-{n}"),
            state: Arc::clone(&self.state),
            checked_out: Mutex::new(None),
        }))
    }
}

#[derive(Debug)]
pub(crate) struct FakeEnvironment {
    id: String,
    state: Arc<FakeState>,
    checked_out: Mutex<Option<String>>,
}

#[async_trait]
impl BuildEnvironment for FakeEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(
        &self,
        command: &[String],
        workdir: Option<&str>,
    ) -> Result<(), EnvironmentError> {
        let at = workdir.map(|w| format!("[{w}]")).unwrap_or_default();
        match command {
            [shell, flag, script] if shell == "/bin/bash" && flag == "-c" => {
                let prologue = render_script(&[]);
                let body = script.strip_prefix(prologue.as_str()).unwrap_or(script);
                let lines: Vec<&str> = body.lines().collect();
                self.state.record(format!("script{at} {}", lines.join("; ")));

                let reference = self.checked_out.lock().unwrap().clone();
                let fails = reference
                    .is_some_and(|r| self.state.failing_scripts.lock().unwrap().contains(&r));
                if fails {
                    return Err(EnvironmentError::CommandFailed {
                        command: "/bin/bash -c".to_string(),
                        code: Some(2),
                    });
                }
            }
            _ => {
                self.state.record(format!("exec{at} {}", command.join(" ")));
                if let [git, checkout, reference] = command
                    && git == "git"
                    && checkout == "checkout"
                {
                    *self.checked_out.lock().unwrap() = Some(reference.clone());
                }
            }
        }
        Ok(())
    }

    async fn copy_in(&self, local: &Path, remote: &str) -> Result<(), EnvironmentError> {
        self.state
            .record(format!("copy_in {} {remote}", local.display()));
        Ok(())
    }

    async fn copy_out(&self, remote: &str, local: &Path) -> Result<(), EnvironmentError> {
        self.state.record(format!("copy_out {remote}"));
        if self.state.missing_outputs.lock().unwrap().contains(remote) {
            return Err(EnvironmentError::MissingOutput {
                path: remote.to_string(),
            });
        }
        let reference = self.checked_out.lock().unwrap().clone().unwrap_or_default();
        std::fs::write(local, format!("{remote} built at {reference}"))?;
        Ok(())
    }

    async fn terminate(&self) {
        self.state.record(format!("terminate {}", self.id));
        self.state.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: Vec<u8>,
    revision: u64,
}

/// Release store backed by memory.
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    assets: Mutex<Vec<RemoteAsset>>,
    files: Mutex<HashMap<String, StoredFile>>,
    uploads: Mutex<Vec<String>>,
    writes: AtomicUsize,
    failing_uploads: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub(crate) fn with_assets(assets: Vec<RemoteAsset>) -> Self {
        Self {
            assets: Mutex::new(assets),
            ..Self::default()
        }
    }

    pub(crate) fn put_file(&self, path: &str, content: &[u8]) {
        let mut files = self.files.lock().unwrap();
        let revision = files.get(path).map_or(1, |f| f.revision + 1);
        files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_vec(),
                revision,
            },
        );
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.content.clone())
    }

    pub(crate) fn assets(&self) -> Vec<RemoteAsset> {
        self.assets.lock().unwrap().clone()
    }

    /// Names of uploaded assets, in upload order.
    pub(crate) fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_upload_for(&self, name: &str) {
        self.failing_uploads
            .lock()
            .unwrap()
            .insert(name.to_string());
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn list_release_assets(&self) -> Result<Vec<RemoteAsset>, StoreError> {
        Ok(self.assets())
    }

    async fn upload_asset(&self, path: &Path, name: &str, label: &str) -> Result<(), StoreError> {
        if self.failing_uploads.lock().unwrap().contains(name) {
            return Err(StoreError::Status {
                call: "upload asset",
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        let size = std::fs::metadata(path)?.len();
        let mut assets = self.assets.lock().unwrap();
        let id = assets.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        assets.push(RemoteAsset {
            id,
            name: name.to_string(),
            label: label.to_string(),
            size,
            url: format!("https://example/asset{id}"),
        });
        self.uploads.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn read_indexed_file(&self, path: &str) -> Result<Option<IndexedFile>, StoreError> {
        Ok(self.files.lock().unwrap().get(path).map(|f| IndexedFile {
            content: f.content.clone(),
            version: format!("rev-{}", f.revision),
        }))
    }

    async fn write_indexed_file(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&str>,
        _message: &str,
    ) -> Result<(), StoreError> {
        let current = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| format!("rev-{}", f.revision));
        if current.as_deref() != version {
            return Err(StoreError::Conflict {
                path: path.to_string(),
            });
        }
        self.put_file(path, content);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
