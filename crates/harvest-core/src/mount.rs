//! Ephemeral mount of the backup share.
//!
//! The share is attached for the duration of one run and detached at teardown.
//! Mounts are never recorded in fstab, so nothing survives a reboot.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::credentials::Credential;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("mounting {share} on {mount_point} failed: {detail}")]
    CommandFailed {
        share: String,
        mount_point: PathBuf,
        detail: String,
    },
    #[error("mount command succeeded but {0} is not a usable mount")]
    VerificationFailed(PathBuf),
    #[error("unmounting {mount_point} failed: {detail}")]
    UnmountFailed { mount_point: PathBuf, detail: String },
    #[error("preparing mount credentials: {0}")]
    CredentialFile(#[source] io::Error),
}

/// Attaches and detaches the backup share.
pub trait MountDriver {
    /// Mount `share` at `mount_point` and verify the result is usable.
    fn mount(
        &mut self,
        mount_point: &Path,
        share: &str,
        credential: &Credential,
    ) -> Result<(), MountError>;

    fn unmount(&mut self, mount_point: &Path) -> Result<(), MountError>;
}

/// SMB/CIFS share mounted with the system `mount` and `umount` tools.
#[derive(Debug, Clone)]
pub struct CifsMount {
    fs_type: String,
    extra_options: Option<String>,
    mount_program: String,
    umount_program: String,
}

impl CifsMount {
    pub fn new(extra_options: Option<String>) -> Self {
        Self {
            fs_type: "cifs".to_string(),
            extra_options,
            mount_program: "mount".to_string(),
            umount_program: "umount".to_string(),
        }
    }

    /// Replace the `mount`/`umount` executables.
    pub fn with_programs(mut self, mount: impl Into<String>, umount: impl Into<String>) -> Self {
        self.mount_program = mount.into();
        self.umount_program = umount.into();
        self
    }

    fn options(&self, credentials_file: &Path) -> String {
        let mut options = format!("credentials={}", credentials_file.display());
        if let Some(extra) = self.extra_options.as_deref().filter(|s| !s.trim().is_empty()) {
            options.push(',');
            options.push_str(extra.trim());
        }
        options
    }
}

impl MountDriver for CifsMount {
    fn mount(
        &mut self,
        mount_point: &Path,
        share: &str,
        credential: &Credential,
    ) -> Result<(), MountError> {
        // Keeps the password off the command line; removed when dropped.
        let credentials_file = write_credentials_file(credential)?;
        let output = Command::new(&self.mount_program)
            .arg("-t")
            .arg(&self.fs_type)
            .arg(share)
            .arg(mount_point)
            .arg("-o")
            .arg(self.options(credentials_file.path()))
            .output()
            .map_err(|source| MountError::Spawn {
                program: self.mount_program.clone(),
                source,
            })?;
        drop(credentials_file);

        if !output.status.success() {
            return Err(MountError::CommandFailed {
                share: share.to_string(),
                mount_point: mount_point.to_path_buf(),
                detail: command_detail(&output),
            });
        }

        log::debug!("mounted {share} on {}", mount_point.display());
        verify_mounted(mount_point)
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), MountError> {
        let output = Command::new(&self.umount_program)
            .arg(mount_point)
            .output()
            .map_err(|source| MountError::Spawn {
                program: self.umount_program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MountError::UnmountFailed {
                mount_point: mount_point.to_path_buf(),
                detail: command_detail(&output),
            })
        }
    }
}

fn write_credentials_file(credential: &Credential) -> Result<NamedTempFile, MountError> {
    let mut file = NamedTempFile::new().map_err(MountError::CredentialFile)?;
    writeln!(file, "username={}", credential.username).map_err(MountError::CredentialFile)?;
    writeln!(file, "password={}", credential.secret()).map_err(MountError::CredentialFile)?;
    file.flush().map_err(MountError::CredentialFile)?;
    Ok(file)
}

fn command_detail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}

/// The mount point must be listable and, on unix, live on a different device
/// than its parent directory.
fn verify_mounted(mount_point: &Path) -> Result<(), MountError> {
    let failed = || MountError::VerificationFailed(mount_point.to_path_buf());
    fs::read_dir(mount_point).map_err(|_| failed())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let parent = mount_point
            .canonicalize()
            .map_err(|_| failed())?
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(failed)?;
        let own_dev = fs::metadata(mount_point).map_err(|_| failed())?.dev();
        let parent_dev = fs::metadata(&parent).map_err(|_| failed())?.dev();
        if own_dev == parent_dev {
            return Err(failed());
        }
    }
    Ok(())
}
