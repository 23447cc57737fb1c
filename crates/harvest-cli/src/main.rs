mod cli;
mod credential;

use chrono::Local;
use clap::Parser;
use eyre::Result;
use harvest_core::config::{default_config_path, JobConfig};
use harvest_core::credentials::{CredentialSource, CredentialStore, UnavailableCredentials};
use harvest_core::logger::ActivityLog;
use harvest_core::mount::CifsMount;
use harvest_core::orchestrator::Orchestrator;
use harvest_core::remote::{HostKeyPolicy, SftpConnector};
use harvest_core::rotation;
use std::path::Path;
use std::process::ExitCode;

use crate::cli::{Cli, Commands, RunArgs};
use crate::credential::run_credential;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_job(&config_path, &args),
        Commands::Credential { command } => {
            run_credential(command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rotate => run_rotate(&config_path),
        Commands::CheckConfig => run_check_config(&config_path),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_target(false)
        .init();
}

fn run_job(config_path: &Path, args: &RunArgs) -> Result<ExitCode> {
    let mut config = JobConfig::load(config_path)?;
    if let Some(delete) = args.delete_override() {
        config.local.delete_after_download = delete;
    }
    log::debug!("loaded configuration from {}", config_path.display());

    let credentials: Box<dyn CredentialSource> = match CredentialStore::for_current_identity() {
        Ok(store) => Box::new(store),
        Err(err) => Box::new(UnavailableCredentials::new(err)),
    };
    let connector = SftpConnector::new(config.remote.host_key_policy.clone(), config.remote.timeout);
    let mut mount = CifsMount::new(config.backup.options.clone());

    let report = Orchestrator::new(&config, &*credentials, &connector, &mut mount).run(Local::now());
    if !report.succeeded() {
        log::debug!("run finished with {} error(s)", report.errors.len());
    }
    Ok(ExitCode::from(report.exit_code()))
}

fn run_rotate(config_path: &Path) -> Result<ExitCode> {
    let config = JobConfig::load(config_path)?;
    let settings = &config.log;
    let mut log = ActivityLog::new(&settings.directory, &settings.base_name);
    let summary = rotation::rotate(
        &mut log,
        &settings.directory,
        &settings.base_name,
        settings.retention_days,
        Local::now(),
    );

    match &summary.archived {
        Some(archive) => println!("archived previous log to {}", archive.display()),
        None => println!("{} is current", settings.current_path().display()),
    }
    for pruned in &summary.pruned {
        println!("pruned {}", pruned.display());
    }
    Ok(if log.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn run_check_config(config_path: &Path) -> Result<ExitCode> {
    let config = JobConfig::load(config_path)?;
    println!("configuration: {}", config_path.display());

    let remote = &config.remote;
    println!("remote:        {}:{}{}", remote.host, remote.port, remote.path);
    println!("  credential:  {}", remote.credential.display());
    match &remote.host_key_policy {
        HostKeyPolicy::AcceptAny => println!("  host keys:   accept any"),
        HostKeyPolicy::TrustOnFirstUse { known_hosts } => {
            println!("  host keys:   trust on first use ({})", known_hosts.display())
        }
    }
    println!("  timeout:     {}s", remote.timeout.as_secs());

    let backup = &config.backup;
    match (&backup.share, backup.mount) {
        (Some(share), true) => println!(
            "backup:        {} mounted on {}",
            share,
            backup.mount_point.display()
        ),
        _ => println!("backup:        {} (not mounted)", backup.mount_point.display()),
    }
    println!("  directory:   {}", backup.backup_dir().display());

    let local = &config.local;
    println!("destination:   {}", local.destination.display());
    println!("staging:       {}", local.staging.display());
    println!(
        "remote delete: {}",
        if local.delete_after_download {
            "after both local copies exist"
        } else {
            "disabled"
        }
    );

    println!(
        "log:           {} (archives kept {} days)",
        config.log.current_path().display(),
        config.log.retention_days
    );
    Ok(ExitCode::SUCCESS)
}
