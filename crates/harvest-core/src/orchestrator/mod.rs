//! One complete harvest run.
//!
//! Order of work: rotate the log, check local prerequisites, mount the
//! backup share, connect and list the remote directory, run every file
//! through the [`TransferPipeline`], then tear down. Teardown (closing the
//! session, unmounting the share) happens on every path once the matching
//! setup step was attempted.

mod summary;

pub use summary::{exit_code, RunCounts, RunReport};

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Instant;

use crate::backup::DirectoryBackup;
use crate::config::JobConfig;
use crate::credentials::CredentialSource;
use crate::errors::{ErrorScope, HarvestError, HarvestResult, RemoteStage};
use crate::logger::{ActivityLog, Separator};
use crate::mount::MountDriver;
use crate::pipeline::{FileReport, PipelineSettings, TransferPipeline};
use crate::remote::{HostKeyPolicy, RemoteClient, RemoteConnector};
use crate::rotation;

/// Resources acquired during a run that teardown must release.
#[derive(Default)]
struct Acquired {
    mount_attempted: bool,
    session: Option<Box<dyn RemoteClient>>,
}

pub struct Orchestrator<'a> {
    config: &'a JobConfig,
    credentials: &'a dyn CredentialSource,
    connector: &'a dyn RemoteConnector,
    mount: &'a mut dyn MountDriver,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a JobConfig,
        credentials: &'a dyn CredentialSource,
        connector: &'a dyn RemoteConnector,
        mount: &'a mut dyn MountDriver,
    ) -> Self {
        Self {
            config,
            credentials,
            connector,
            mount,
        }
    }

    /// Execute the job. Never fails: every problem ends up as an Error line
    /// in the activity log and in [`RunReport::errors`].
    pub fn run(&mut self, now: DateTime<Local>) -> RunReport {
        let started = Instant::now();
        let log_settings = &self.config.log;
        let mut log = ActivityLog::new(&log_settings.directory, &log_settings.base_name);

        rotation::rotate(
            &mut log,
            &log_settings.directory,
            &log_settings.base_name,
            log_settings.retention_days,
            now,
        );
        if let Err(err) = log.ensure_exists() {
            log.error(format!(
                "cannot create log file {}: {err}",
                log_settings.current_path().display()
            ));
        }

        log.separator(Separator::Thick);
        log.info(format!(
            "harvest run started: {}:{}{} -> {}",
            self.config.remote.host,
            self.config.remote.port,
            self.config.remote.path,
            self.config.local.destination.display()
        ));

        let mut acquired = Acquired::default();
        let files = match self.transfer(&mut log, &mut acquired) {
            Ok(files) => files,
            Err(err) => {
                match err.scope() {
                    ErrorScope::Run => log.error(format!("run aborted: {err}")),
                    ErrorScope::File | ErrorScope::Advisory => log.error(err.to_string()),
                }
                Vec::new()
            }
        };
        self.teardown(&mut log, acquired);

        let duration = started.elapsed();
        let counts = summary::tally(&files);
        log.info(summary::summary_line(&counts, files.len(), duration));
        log.separator(Separator::Thick);
        log.separator(Separator::Thick);

        RunReport {
            started_at: now,
            duration,
            files,
            warnings: log.warning_count(),
            errors: log.take_errors(),
        }
    }

    fn transfer(
        &mut self,
        log: &mut ActivityLog,
        acquired: &mut Acquired,
    ) -> HarvestResult<Vec<FileReport>> {
        let config = self.config;
        self.check_prerequisites()?;

        if config.backup.mount {
            let share = config
                .backup
                .share
                .as_deref()
                .ok_or_else(|| HarvestError::Configuration("backup.share is not set".into()))?;
            let credential_path = config.backup.credential.as_deref().ok_or_else(|| {
                HarvestError::Configuration("backup.credential is not set".into())
            })?;
            let credential = self.credentials.load(credential_path)?;
            acquired.mount_attempted = true;
            self.mount
                .mount(&config.backup.mount_point, share, &credential)?;
            log.info(format!(
                "mounted {share} on {}",
                config.backup.mount_point.display()
            ));
        }

        let backup_dir = config.backup.backup_dir();
        if !backup_dir.is_dir() {
            return Err(HarvestError::Configuration(format!(
                "backup directory {} does not exist",
                backup_dir.display()
            )));
        }

        if config.remote.host_key_policy == HostKeyPolicy::AcceptAny {
            log.warn(format!(
                "host key verification is disabled for {}",
                config.remote.host
            ));
        }
        let credential = self.credentials.load(&config.remote.credential)?;
        let client = self
            .connector
            .connect(&config.remote.host, config.remote.port, &credential)
            .map_err(|err| HarvestError::remote(RemoteStage::Connect, err))?;
        let client = acquired.session.insert(client);
        log.info(format!(
            "connected to {}:{} as {}",
            config.remote.host, config.remote.port, credential.username
        ));

        let entries = client
            .list(&config.remote.path)
            .map_err(|err| HarvestError::remote(RemoteStage::List, err))?;
        let file_count = entries.iter().filter(|e| !e.is_directory).count();
        if file_count == 0 {
            log.info(format!("no files found in {}", config.remote.path));
            return Ok(Vec::new());
        }
        log.info(format!(
            "found {file_count} file(s) in {}",
            config.remote.path
        ));

        let settings = PipelineSettings {
            staging_dir: config.local.staging.clone(),
            local_root: config.local.destination.clone(),
            remote_base: config.remote.path.clone(),
            delete_after_download: config.local.delete_after_download,
        };
        let mut backup = DirectoryBackup::new(backup_dir);
        let mut pipeline = TransferPipeline::new(&mut **client, &mut backup, settings);
        Ok(pipeline.process(&entries, log))
    }

    /// Local directories that must exist before anything remote is touched.
    fn check_prerequisites(&self) -> HarvestResult<()> {
        let config = self.config;
        let mut required: Vec<(&str, PathBuf)> = vec![
            ("log directory", config.log.directory.clone()),
            ("staging directory", config.local.staging.clone()),
            ("destination directory", config.local.destination.clone()),
        ];
        if config.backup.mount {
            required.push(("mount point", config.backup.mount_point.clone()));
        }

        let missing: Vec<String> = required
            .into_iter()
            .filter(|(_, path)| !path.is_dir())
            .map(|(label, path)| format!("{label} {}", path.display()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::Configuration(format!(
                "missing {}",
                missing.join(", ")
            )))
        }
    }

    fn teardown(&mut self, log: &mut ActivityLog, acquired: Acquired) {
        if let Some(mut session) = acquired.session {
            match session.close() {
                Ok(()) => log.info(format!("closed session to {}", self.config.remote.host)),
                Err(err) => log.warn(format!("closing session failed: {err}")),
            }
        }

        if acquired.mount_attempted {
            let mount_point = &self.config.backup.mount_point;
            match self.mount.unmount(mount_point) {
                Ok(()) => log.info(format!("unmounted {}", mount_point.display())),
                Err(err) => log.error(err.to_string()),
            }
        }
    }
}
