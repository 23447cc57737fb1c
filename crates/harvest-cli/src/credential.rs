use eyre::{bail, Context, Result};
use harvest_core::credentials::{Credential, CredentialSource, CredentialStore};
use std::io::{self, BufRead};

use crate::cli::{CredentialCheckArgs, CredentialCommand, CredentialSetArgs};

pub fn run_credential(command: CredentialCommand) -> Result<()> {
    match command {
        CredentialCommand::Set(args) => set(&args),
        CredentialCommand::Check(args) => check(&args),
    }
}

fn set(args: &CredentialSetArgs) -> Result<()> {
    if args.username.trim().is_empty() {
        bail!("--username must not be empty");
    }
    let secret = read_secret(io::stdin().lock())?;
    let store = CredentialStore::for_current_identity()?;
    store.save(&args.path, &Credential::new(args.username.trim(), secret))?;
    println!(
        "stored credential for {} in {}",
        args.username.trim(),
        args.path.display()
    );
    Ok(())
}

fn check(args: &CredentialCheckArgs) -> Result<()> {
    let store = CredentialStore::for_current_identity()?;
    let credential = store.load(&args.path)?;
    println!("{}: username {}", args.path.display(), credential.username);
    Ok(())
}

/// First line of `input`, without its line ending.
fn read_secret(mut input: impl BufRead) -> Result<String> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .wrap_err("failed to read secret from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        bail!("no secret provided on stdin");
    }
    Ok(secret.to_string())
}
