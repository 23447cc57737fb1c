//! Per-file transfer pipeline.
//!
//! Each listed file goes through download → relocate → backup → conditional
//! remote delete on its own. Failures are logged against the file and never
//! leave [`TransferPipeline::process`]; the next entry always runs.
//!
//! Safety rules:
//! - a file already present at the destination is skipped untouched, which
//!   makes re-runs harmless;
//! - an existing backup copy is never overwritten;
//! - the remote copy is deleted only once two local copies exist and
//!   deletion is enabled.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::backup::BackupStore;
use crate::errors::{HarvestError, HarvestResult, RemoteStage};
use crate::logger::{ActivityLog, Separator};
use crate::remote::{remote_join, RemoteClient, RemoteEntry};

/// Locations and switches shared by every file of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub staging_dir: PathBuf,
    pub local_root: PathBuf,
    pub remote_base: String,
    pub delete_after_download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyAtDestination,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyAtDestination => f.write_str("already at destination"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Download,
    /// A backup copy already existed; the new file was not copied over it.
    BackupSkipped,
    Backup,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Download => "download",
            FailureStage::BackupSkipped => "backup-skipped",
            FailureStage::Backup => "backup",
        };
        f.write_str(label)
    }
}

/// Where a file stands in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Downloaded,
    BackedUp,
    Deleted,
    Skipped(SkipReason),
    Failed { stage: FailureStage, cause: String },
}

impl TransferState {
    /// Both local copies exist.
    pub fn is_secured(&self) -> bool {
        matches!(self, TransferState::BackedUp | TransferState::Deleted)
    }
}

/// Final state of one remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub name: String,
    pub state: TransferState,
    pub remote_deleted: bool,
}

pub struct TransferPipeline<'a> {
    remote: &'a mut dyn RemoteClient,
    backup: &'a mut dyn BackupStore,
    settings: PipelineSettings,
}

impl<'a> TransferPipeline<'a> {
    pub fn new(
        remote: &'a mut dyn RemoteClient,
        backup: &'a mut dyn BackupStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            remote,
            backup,
            settings,
        }
    }

    /// Run every non-directory entry through the pipeline, in listing order.
    pub fn process(&mut self, entries: &[RemoteEntry], log: &mut ActivityLog) -> Vec<FileReport> {
        entries
            .iter()
            .filter(|entry| !entry.is_directory)
            .map(|entry| self.process_entry(entry, log))
            .collect()
    }

    fn process_entry(&mut self, entry: &RemoteEntry, log: &mut ActivityLog) -> FileReport {
        let name = entry.name.as_str();
        log.separator(Separator::Thin);
        log.info(format!("processing {name}"));

        let final_path = self.settings.local_root.join(name);
        if final_path.exists() {
            log.warn(format!(
                "{name} already exists at {}; skipping download, backup and remote deletion",
                final_path.display()
            ));
            return FileReport {
                name: name.to_string(),
                state: TransferState::Skipped(SkipReason::AlreadyAtDestination),
                remote_deleted: false,
            };
        }

        let mut state = match self.download(name, &final_path, log) {
            Ok(()) => {
                log.info(format!("downloaded {name} to {}", final_path.display()));
                TransferState::Downloaded
            }
            Err(err) => {
                log.error(format!("download of {name} failed: {err}"));
                TransferState::Failed {
                    stage: FailureStage::Download,
                    cause: err.to_string(),
                }
            }
        };

        if state == TransferState::Downloaded {
            state = self.back_up(name, &final_path, log);
        }

        let remote_deleted = self.delete_if_secured(name, &mut state, log);
        FileReport {
            name: name.to_string(),
            state,
            remote_deleted,
        }
    }

    fn download(&mut self, name: &str, final_path: &Path, log: &mut ActivityLog) -> HarvestResult<()> {
        let remote_path = remote_join(&self.settings.remote_base, name);
        let staged = self
            .remote
            .fetch(&remote_path, &self.settings.staging_dir)
            .map_err(|err| HarvestError::remote(RemoteStage::Fetch, err))?;
        relocate(&staged, final_path, log)
    }

    fn back_up(&mut self, name: &str, final_path: &Path, log: &mut ActivityLog) -> TransferState {
        let target = self.backup.location(name);
        if self.backup.contains(name) {
            log.warn(format!(
                "backup copy {} already exists; not overwriting it",
                target.display()
            ));
            return TransferState::Failed {
                stage: FailureStage::BackupSkipped,
                cause: format!("{} already exists", target.display()),
            };
        }

        match self.backup.store(final_path, name) {
            Ok(stored) => {
                log.info(format!("backed up {name} to {}", stored.display()));
                TransferState::BackedUp
            }
            Err(err) => {
                let err = HarvestError::local_io("backing up to", target, err);
                log.error(format!("backup of {name} failed: {err}"));
                TransferState::Failed {
                    stage: FailureStage::Backup,
                    cause: err.to_string(),
                }
            }
        }
    }

    /// Returns whether the remote copy was removed.
    fn delete_if_secured(
        &mut self,
        name: &str,
        state: &mut TransferState,
        log: &mut ActivityLog,
    ) -> bool {
        if !state.is_secured() {
            log.info(format!(
                "keeping remote copy of {name}: download or backup did not complete"
            ));
            return false;
        }
        if !self.settings.delete_after_download {
            log.info(format!(
                "keeping remote copy of {name}: deletion disabled by configuration"
            ));
            return false;
        }

        let remote_path = remote_join(&self.settings.remote_base, name);
        match self.remote.delete(&remote_path) {
            Ok(()) => {
                log.info(format!("deleted remote file {remote_path}"));
                *state = TransferState::Deleted;
                true
            }
            Err(err) => {
                let err = HarvestError::remote(RemoteStage::Delete, err);
                log.error(format!(
                    "{name} is safely stored locally but {remote_path} was left behind: {err}"
                ));
                false
            }
        }
    }
}

/// Move a staged file to its final location, falling back to copy + remove
/// when a rename is not possible (e.g. staging on another filesystem).
fn relocate(staged: &Path, final_path: &Path, log: &mut ActivityLog) -> HarvestResult<()> {
    relocate_with(staged, final_path, log, |from: &Path, to: &Path| {
        fs::rename(from, to)
    })
}

/// On failure neither the staged file nor a partial final file is left behind;
/// the remote copy is still in place for the next run.
fn relocate_with(
    staged: &Path,
    final_path: &Path,
    log: &mut ActivityLog,
    rename: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> HarvestResult<()> {
    match rename(staged, final_path) {
        Ok(()) => return Ok(()),
        Err(err) => log::debug!(
            "rename {} -> {} failed ({err}); copying instead",
            staged.display(),
            final_path.display()
        ),
    }

    if let Err(err) = fs::copy(staged, final_path) {
        let _ = fs::remove_file(final_path);
        discard_staged(staged, log);
        return Err(HarvestError::local_io("moving to", final_path, err));
    }
    discard_staged(staged, log);
    Ok(())
}

fn discard_staged(staged: &Path, log: &mut ActivityLog) {
    if let Err(err) = fs::remove_file(staged) {
        log.warn(format!(
            "could not remove staged file {}: {err}",
            staged.display()
        ));
    }
}
