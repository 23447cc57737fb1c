#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::tempdir;

use serde::Serialize;
use wait_timeout::ChildExt;

pub const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
pub struct HarvestConfig {
    pub remote: RemoteSection,
    pub backup: BackupSection,
    pub local: LocalSection,
    pub log: LogSection,
}

#[derive(Serialize)]
pub struct RemoteSection {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub credential: PathBuf,
    pub host_key_policy: String,
    pub timeout_secs: u64,
}

#[derive(Serialize)]
pub struct BackupSection {
    pub mount: bool,
    pub mount_point: PathBuf,
    pub subfolder: String,
}

#[derive(Serialize)]
pub struct LocalSection {
    pub destination: PathBuf,
    pub staging: PathBuf,
    pub delete_after_download: bool,
}

#[derive(Serialize)]
pub struct LogSection {
    pub directory: PathBuf,
    pub base_name: String,
    pub retention_days: u32,
}

/// A port nothing is listening on.
pub fn pick_unused_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .expect("bind probe listener")
        .local_addr()
        .expect("listener addr")
        .port()
}

pub struct TestContext {
    pub _work: tempfile::TempDir,
    pub workspace: PathBuf,
    pub cli_bin: PathBuf,
    pub config_path: PathBuf,
    pub credential_path: PathBuf,
    pub log_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl TestContext {
    /// Scratch layout plus a config pointing at a closed local port, with an
    /// already mounted (plain directory) backup target.
    pub fn new() -> Self {
        let work = tempdir().expect("tempdir");
        let workspace = work.path().to_path_buf();

        let log_dir = workspace.join("logs");
        let staging_dir = workspace.join("staging");
        let destination_dir = workspace.join("incoming");
        let backup_root = workspace.join("backup");
        let backup_dir = backup_root.join("daily");
        for dir in [&log_dir, &staging_dir, &destination_dir, &backup_dir] {
            fs::create_dir_all(dir).expect("create workspace dir");
        }

        let ctx = Self {
            cli_bin: PathBuf::from(env!("CARGO_BIN_EXE_harvest")),
            config_path: workspace.join("harvest.toml"),
            credential_path: workspace.join("remote.cred"),
            log_dir,
            staging_dir,
            destination_dir,
            backup_dir,
            workspace,
            _work: work,
        };
        ctx.write_config(&ctx.default_config());
        ctx
    }

    pub fn default_config(&self) -> HarvestConfig {
        HarvestConfig {
            remote: RemoteSection {
                host: "127.0.0.1".into(),
                port: pick_unused_port(),
                path: "/outbound".into(),
                credential: self.credential_path.clone(),
                host_key_policy: "accept-any".into(),
                timeout_secs: 5,
            },
            backup: BackupSection {
                mount: false,
                mount_point: self.workspace.join("backup"),
                subfolder: "daily".into(),
            },
            local: LocalSection {
                destination: self.destination_dir.clone(),
                staging: self.staging_dir.clone(),
                delete_after_download: true,
            },
            log: LogSection {
                directory: self.log_dir.clone(),
                base_name: "harvest.log".into(),
                retention_days: 30,
            },
        }
    }

    pub fn write_config(&self, config: &HarvestConfig) {
        let toml = toml::to_string(config).expect("serialize config");
        fs::write(&self.config_path, toml).expect("write config");
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cli_bin);
        cmd.arg("--config").arg(&self.config_path);
        cmd.env_remove("HARVEST_CONFIG").env_remove("RUST_LOG");
        cmd
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join("harvest.log")
    }

    pub fn log_contents(&self) -> String {
        fs::read_to_string(self.log_path()).unwrap_or_default()
    }

    pub fn store_credential(&self, path: &Path, username: &str, secret: &str) -> Output {
        let mut cmd = self.command();
        cmd.args(["credential", "set", "--username", username])
            .arg("--path")
            .arg(path);
        run_with_input(cmd, &format!("{secret}\n"), TIMEOUT)
    }
}

pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Output {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = cmd.spawn().expect("spawn command");
    wait_for(child, timeout)
}

pub fn run_with_input(mut cmd: Command, input: &str, timeout: Duration) -> Output {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().expect("spawn command");
    {
        let mut stdin = child.stdin.take().expect("child stdin");
        stdin.write_all(input.as_bytes()).expect("write stdin");
    }
    wait_for(child, timeout)
}

fn wait_for(mut child: std::process::Child, timeout: Duration) -> Output {
    match child.wait_timeout(timeout).expect("wait for process") {
        Some(_status) => child
            .wait_with_output()
            .expect("collect command output after completion"),
        None => {
            let _ = child.kill();
            let output = child
                .wait_with_output()
                .expect("collect output after killing command");
            panic!(
                "command timed out after {:?}\nstdout:\n{}\nstderr:\n{}",
                timeout,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
    }
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
