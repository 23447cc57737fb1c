//! In-memory collaborators for pipeline and orchestrator tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::{BackupSettings, JobConfig, LocalSettings, LogSettings, RemoteSettings};
use crate::credentials::{Credential, CredentialError, CredentialSource};
use crate::mount::{MountDriver, MountError};
use crate::pipeline::PipelineSettings;
use crate::remote::{
    remote_basename, HostKeyPolicy, RemoteClient, RemoteConnector, RemoteEntry, RemoteError,
};

pub const REMOTE_BASE: &str = "/outbound";

#[derive(Default)]
struct RemoteState {
    order: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    fail_fetch: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_list: bool,
    fetched: Vec<String>,
    deleted: Vec<String>,
    closed: usize,
}

/// Remote directory held in memory. Clones share state, so a test can keep a
/// handle while the orchestrator owns the boxed session.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Rc<RefCell<RemoteState>>,
}

impl FakeRemote {
    pub fn with_files(names: &[&str]) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.state.borrow_mut();
            for name in names {
                state.order.push(name.to_string());
                state
                    .files
                    .insert(format!("{REMOTE_BASE}/{name}"), Self::content_of(name));
            }
        }
        remote
    }

    pub fn content_of(name: &str) -> Vec<u8> {
        format!("contents of {name}").into_bytes()
    }

    pub fn listing(&self) -> Vec<RemoteEntry> {
        self.state
            .borrow()
            .order
            .iter()
            .map(RemoteEntry::file)
            .collect()
    }

    pub fn fail_fetch(&mut self, name: &str) {
        self.state.borrow_mut().fail_fetch.insert(name.to_string());
    }

    pub fn fail_delete(&mut self, name: &str) {
        self.state.borrow_mut().fail_delete.insert(name.to_string());
    }

    pub fn fail_list(&mut self) {
        self.state.borrow_mut().fail_list = true;
    }

    pub fn remaining(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.borrow().fetched.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.borrow().deleted.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.borrow().closed
    }
}

impl RemoteClient for FakeRemote {
    fn list(&mut self, _remote_dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        if self.state.borrow().fail_list {
            return Err(RemoteError::Transport("simulated listing failure".into()));
        }
        Ok(self.listing())
    }

    fn fetch(&mut self, remote_file: &str, staging_dir: &Path) -> Result<PathBuf, RemoteError> {
        let name = remote_basename(remote_file).to_string();
        let mut state = self.state.borrow_mut();
        if state.fail_fetch.contains(&name) {
            return Err(RemoteError::Transport(format!("simulated fetch failure for {name}")));
        }
        let data = state
            .files
            .get(remote_file)
            .cloned()
            .ok_or_else(|| RemoteError::Transport(format!("no such file {remote_file}")))?;
        let target = staging_dir.join(&name);
        fs::write(&target, data).map_err(|source| RemoteError::LocalIo {
            path: target.clone(),
            source,
        })?;
        state.fetched.push(remote_file.to_string());
        Ok(target)
    }

    fn delete(&mut self, remote_file: &str) -> Result<(), RemoteError> {
        let name = remote_basename(remote_file).to_string();
        let mut state = self.state.borrow_mut();
        if state.fail_delete.contains(&name) {
            return Err(RemoteError::Transport(format!("simulated delete failure for {name}")));
        }
        state.files.remove(remote_file);
        state.deleted.push(remote_file.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        self.state.borrow_mut().closed += 1;
        Ok(())
    }
}

/// Hands out the same [`FakeRemote`] on every connect.
pub struct FakeConnector {
    pub remote: FakeRemote,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new(remote: FakeRemote) -> Self {
        Self {
            remote,
            refuse: false,
        }
    }
}

impl RemoteConnector for FakeConnector {
    fn connect(
        &self,
        _host: &str,
        _port: u16,
        _credential: &Credential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError> {
        if self.refuse {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        Ok(Box::new(self.remote.clone()))
    }
}

/// Records mount/unmount calls; can be told to fail either one.
#[derive(Default)]
pub struct FakeMount {
    pub fail_mount: bool,
    pub fail_unmount: bool,
    pub mounts: usize,
    pub unmounts: usize,
}

impl MountDriver for FakeMount {
    fn mount(
        &mut self,
        mount_point: &Path,
        _share: &str,
        _credential: &Credential,
    ) -> Result<(), MountError> {
        self.mounts += 1;
        if self.fail_mount {
            return Err(MountError::VerificationFailed(mount_point.to_path_buf()));
        }
        Ok(())
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), MountError> {
        self.unmounts += 1;
        if self.fail_unmount {
            return Err(MountError::UnmountFailed {
                mount_point: mount_point.to_path_buf(),
                detail: "device busy".into(),
            });
        }
        Ok(())
    }
}

/// Credentials keyed by path; anything else is not found.
#[derive(Default)]
pub struct FakeCredentials {
    entries: HashMap<PathBuf, Credential>,
}

impl FakeCredentials {
    pub fn with(mut self, path: &Path, username: &str) -> Self {
        self.entries
            .insert(path.to_path_buf(), Credential::new(username, "secret"));
        self
    }
}

impl CredentialSource for FakeCredentials {
    fn load(&self, path: &Path) -> Result<Credential, CredentialError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(path.to_path_buf()))
    }
}

/// Scratch directories laid out like a real deployment.
pub struct Workspace {
    pub _tmp: TempDir,
    pub root: PathBuf,
    pub log_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub local_root: PathBuf,
    pub mount_point: PathBuf,
    pub backup_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        let log_dir = root.join("logs");
        let staging_dir = root.join("staging");
        let local_root = root.join("incoming");
        let mount_point = root.join("backup-mount");
        let backup_dir = mount_point.join("daily");
        for dir in [&log_dir, &staging_dir, &local_root, &backup_dir] {
            fs::create_dir_all(dir).expect("create workspace dir");
        }
        Self {
            _tmp: tmp,
            root,
            log_dir,
            staging_dir,
            local_root,
            mount_point,
            backup_dir,
        }
    }

    pub fn settings(&self, delete_after_download: bool) -> PipelineSettings {
        PipelineSettings {
            staging_dir: self.staging_dir.clone(),
            local_root: self.local_root.clone(),
            remote_base: REMOTE_BASE.to_string(),
            delete_after_download,
        }
    }

    pub fn remote_credential(&self) -> PathBuf {
        self.root.join("remote.cred")
    }

    pub fn backup_credential(&self) -> PathBuf {
        self.root.join("backup.cred")
    }

    /// Credentials for both endpoints of [`Workspace::config`].
    pub fn credentials(&self) -> FakeCredentials {
        FakeCredentials::default()
            .with(&self.remote_credential(), "harvest")
            .with(&self.backup_credential(), "backup")
    }

    pub fn config(&self, mount: bool) -> JobConfig {
        JobConfig {
            remote: RemoteSettings {
                host: "sftp.test".into(),
                port: 22,
                path: REMOTE_BASE.into(),
                credential: self.remote_credential(),
                host_key_policy: HostKeyPolicy::AcceptAny,
                timeout: Duration::from_secs(5),
            },
            backup: BackupSettings {
                mount,
                mount_point: self.mount_point.clone(),
                share: mount.then(|| "//nas/backups".to_string()),
                subfolder: "daily".into(),
                credential: mount.then(|| self.backup_credential()),
                options: None,
            },
            local: LocalSettings {
                destination: self.local_root.clone(),
                staging: self.staging_dir.clone(),
                delete_after_download: true,
            },
            log: LogSettings {
                directory: self.log_dir.clone(),
                base_name: "harvest.log".into(),
                retention_days: 30,
            },
        }
    }
}
