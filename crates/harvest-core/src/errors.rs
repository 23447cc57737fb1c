//! Error taxonomy for a harvest run.
//!
//! Errors are scoped so the orchestrator and the pipeline can decide how far a
//! failure reaches:
//! - Run: the run cannot continue (missing prerequisite, credentials, mount,
//!   remote connect/list). Logged once and routed into teardown.
//! - File: the failure belongs to one remote entry. Logged and the pipeline
//!   moves on to the next entry.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::mount::MountError;
use crate::remote::RemoteError;

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Aborts the remaining work of the run (teardown still happens).
    Run,
    /// Confined to a single file; sibling files are unaffected.
    File,
    /// Reported but never stops anything.
    Advisory,
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error("remote {stage} failed: {source}")]
    Remote {
        stage: RemoteStage,
        #[source]
        source: RemoteError,
    },
    #[error("{action} {path}: {source}")]
    LocalIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("log rotation failed: {0}")]
    Rotation(String),
}

/// Which remote operation produced a [`HarvestError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStage {
    Connect,
    List,
    Fetch,
    Delete,
}

impl std::fmt::Display for RemoteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RemoteStage::Connect => "connect",
            RemoteStage::List => "list",
            RemoteStage::Fetch => "fetch",
            RemoteStage::Delete => "delete",
        };
        f.write_str(label)
    }
}

impl HarvestError {
    pub fn remote(stage: RemoteStage, source: RemoteError) -> Self {
        HarvestError::Remote { stage, source }
    }

    pub fn local_io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        HarvestError::LocalIo {
            action,
            path: path.into(),
            source,
        }
    }

    /// Scope of this error.
    pub fn scope(&self) -> ErrorScope {
        match self {
            HarvestError::Configuration(_)
            | HarvestError::Credential(_)
            | HarvestError::Mount(_) => ErrorScope::Run,
            HarvestError::Remote { stage, .. } => match stage {
                RemoteStage::Connect | RemoteStage::List => ErrorScope::Run,
                RemoteStage::Fetch | RemoteStage::Delete => ErrorScope::File,
            },
            HarvestError::LocalIo { .. } => ErrorScope::File,
            HarvestError::Rotation(_) => ErrorScope::Advisory,
        }
    }
}

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;
