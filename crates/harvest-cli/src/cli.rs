use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Collect files from an SFTP drop, keep two local copies, clean up the remote")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Configuration file (defaults to $HARVEST_CONFIG, then /etc/harvest/harvest.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Print debug output on the console
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the job once (the default when no command is given)
    Run(RunArgs),
    /// Manage encrypted credential files
    Credential {
        #[command(subcommand)]
        command: CredentialCommand,
    },
    /// Rotate and prune the activity log without transferring anything
    Rotate,
    /// Validate the configuration and print the resolved settings
    CheckConfig,
}

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Leave remote files in place for this run
    #[arg(long, conflicts_with = "delete_remote")]
    pub keep_remote: bool,
    /// Delete secured remote files for this run even if the config disables it
    #[arg(long, conflicts_with = "keep_remote")]
    pub delete_remote: bool,
}

impl RunArgs {
    /// Per-invocation override of `local.delete_after_download`.
    pub fn delete_override(&self) -> Option<bool> {
        if self.keep_remote {
            Some(false)
        } else if self.delete_remote {
            Some(true)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
pub enum CredentialCommand {
    /// Store a credential; the secret is read from stdin
    Set(CredentialSetArgs),
    /// Decrypt a credential file and print its username
    Check(CredentialCheckArgs),
}

#[derive(Args, Clone, Debug)]
pub struct CredentialSetArgs {
    /// Credential file to write
    #[arg(long, value_name = "PATH")]
    pub path: PathBuf,
    /// Account name stored alongside the secret
    #[arg(long)]
    pub username: String,
}

#[derive(Args, Clone, Debug)]
pub struct CredentialCheckArgs {
    /// Credential file to read
    #[arg(long, value_name = "PATH")]
    pub path: PathBuf,
}
