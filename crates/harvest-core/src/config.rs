//! Job configuration loaded from TOML.
//!
//! The file is parsed into raw section structs and then validated into a
//! [`JobConfig`]; callers never see a partially valid configuration.

use eyre::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::remote::HostKeyPolicy;

pub const CONFIG_ENV: &str = "HARVEST_CONFIG";
const DEFAULT_PORT: u16 = 22;
const DEFAULT_BASE_NAME: &str = "harvest.log";
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub credential: PathBuf,
    pub host_key_policy: HostKeyPolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// When false the mount point is used as an already-available directory.
    pub mount: bool,
    pub mount_point: PathBuf,
    pub share: Option<String>,
    pub subfolder: String,
    pub credential: Option<PathBuf>,
    pub options: Option<String>,
}

impl BackupSettings {
    /// Directory receiving backup copies.
    pub fn backup_dir(&self) -> PathBuf {
        if self.subfolder.is_empty() {
            self.mount_point.clone()
        } else {
            self.mount_point.join(&self.subfolder)
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub destination: PathBuf,
    pub staging: PathBuf,
    pub delete_after_download: bool,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub directory: PathBuf,
    pub base_name: String,
    pub retention_days: u32,
}

impl LogSettings {
    pub fn current_path(&self) -> PathBuf {
        self.directory.join(&self.base_name)
    }
}

/// Validated job configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub remote: RemoteSettings,
    pub backup: BackupSettings,
    pub local: LocalSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    remote: RawRemote,
    backup: RawBackup,
    local: RawLocal,
    log: RawLog,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRemote {
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    credential: Option<PathBuf>,
    #[serde(default)]
    host_key_policy: RawHostKeyPolicy,
    known_hosts: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum RawHostKeyPolicy {
    AcceptAny,
    #[default]
    TrustOnFirstUse,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackup {
    #[serde(default = "default_true")]
    mount: bool,
    mount_point: Option<PathBuf>,
    share: Option<String>,
    #[serde(default)]
    subfolder: String,
    credential: Option<PathBuf>,
    options: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocal {
    destination: Option<PathBuf>,
    staging: Option<PathBuf>,
    #[serde(default = "default_true")]
    delete_after_download: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLog {
    directory: Option<PathBuf>,
    base_name: Option<String>,
    retention_days: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Where the configuration is read from when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\Harvest\harvest.toml")
    } else {
        PathBuf::from("/etc/harvest/harvest.toml")
    }
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> std::result::Result<Self, ConfigError> {
        let host = required_str(raw.remote.host, "remote.host")?;
        let port = raw.remote.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(invalid("remote.port", "must be between 1 and 65535"));
        }
        let host_key_policy = match raw.remote.host_key_policy {
            RawHostKeyPolicy::AcceptAny => HostKeyPolicy::AcceptAny,
            RawHostKeyPolicy::TrustOnFirstUse => HostKeyPolicy::TrustOnFirstUse {
                known_hosts: required_path(raw.remote.known_hosts, "remote.known_hosts")?,
            },
        };
        let timeout_secs = raw.remote.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(invalid("remote.timeout_secs", "must be greater than zero"));
        }
        let remote = RemoteSettings {
            host,
            port,
            path: required_str(raw.remote.path, "remote.path")?,
            credential: required_path(raw.remote.credential, "remote.credential")?,
            host_key_policy,
            timeout: Duration::from_secs(timeout_secs),
        };

        let backup = raw.backup;
        let subfolder = backup.subfolder.trim_matches(|c| c == '/' || c == '\\').to_string();
        let backup = if backup.mount {
            BackupSettings {
                mount: true,
                mount_point: required_path(backup.mount_point, "backup.mount_point")?,
                share: Some(required_str(backup.share, "backup.share")?),
                subfolder,
                credential: Some(required_path(backup.credential, "backup.credential")?),
                options: backup.options,
            }
        } else {
            BackupSettings {
                mount: false,
                mount_point: required_path(backup.mount_point, "backup.mount_point")?,
                share: backup.share,
                subfolder,
                credential: backup.credential,
                options: backup.options,
            }
        };

        let local = LocalSettings {
            destination: required_path(raw.local.destination, "local.destination")?,
            staging: required_path(raw.local.staging, "local.staging")?,
            delete_after_download: raw.local.delete_after_download,
        };

        let base_name = raw
            .log
            .base_name
            .unwrap_or_else(|| DEFAULT_BASE_NAME.to_string());
        if base_name.trim().is_empty() || base_name.contains(['/', '\\']) {
            return Err(invalid("log.base_name", "must be a plain file name"));
        }
        let retention_days = raw.log.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        if retention_days == 0 {
            return Err(invalid("log.retention_days", "must be greater than zero"));
        }
        let log = LogSettings {
            directory: required_path(raw.log.directory, "log.directory")?,
            base_name,
            retention_days,
        };

        Ok(Self {
            remote,
            backup,
            local,
            log,
        })
    }
}

fn required_str(value: Option<String>, field: &'static str) -> std::result::Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn required_path(
    value: Option<PathBuf>,
    field: &'static str,
) -> std::result::Result<PathBuf, ConfigError> {
    match value {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
