//! Remote endpoint capabilities.
//!
//! The pipeline only sees [`RemoteClient`]; the orchestrator obtains one from a
//! [`RemoteConnector`]. The production implementation is SFTP ([`sftp`]).

pub mod sftp;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::credentials::Credential;

pub use sftp::SftpConnector;

/// One item of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: false,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot reach {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("ssh {op} failed: {source}")]
    Ssh {
        op: &'static str,
        #[source]
        source: ssh2::Error,
    },
    #[error("server did not present a host key")]
    MissingHostKey,
    #[error("host key for {host} does not match the key pinned in {known_hosts}")]
    HostKeyMismatch { host: String, known_hosts: PathBuf },
    #[error("authentication rejected for user {0}")]
    AuthRejected(String),
    #[error("local I/O on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub(crate) fn ssh(op: &'static str) -> impl FnOnce(ssh2::Error) -> RemoteError {
        move |source| RemoteError::Ssh { op, source }
    }
}

/// How the remote host's identity is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents.
    AcceptAny,
    /// Pin the first key seen for a host in `known_hosts` and reject changes.
    TrustOnFirstUse { known_hosts: PathBuf },
}

/// An authenticated session against the remote endpoint.
pub trait RemoteClient {
    /// List the entries of `remote_dir`, excluding `.` and `..`.
    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Copy `remote_file` into `staging_dir` under its basename and return the
    /// staged path.
    fn fetch(&mut self, remote_file: &str, staging_dir: &Path) -> Result<PathBuf, RemoteError>;

    fn delete(&mut self, remote_file: &str) -> Result<(), RemoteError>;

    /// End the session. Implementations must tolerate repeated calls.
    fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Opens [`RemoteClient`] sessions.
pub trait RemoteConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError>;
}

/// Join a remote directory and an entry name with exactly one `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() && base.starts_with('/') {
        format!("/{name}")
    } else if trimmed.is_empty() {
        name.to_string()
    } else {
        format!("{trimmed}/{name}")
    }
}

/// Final component of a remote path.
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_with_single_separator() {
        assert_eq!(remote_join("/outbound", "a.csv"), "/outbound/a.csv");
        assert_eq!(remote_join("/outbound/", "a.csv"), "/outbound/a.csv");
        assert_eq!(remote_join("/", "a.csv"), "/a.csv");
        assert_eq!(remote_join("", "a.csv"), "a.csv");
        assert_eq!(remote_join("relative/dir", "a.csv"), "relative/dir/a.csv");
    }

    #[test]
    fn basename_is_last_component() {
        assert_eq!(remote_basename("/outbound/a.csv"), "a.csv");
        assert_eq!(remote_basename("a.csv"), "a.csv");
        assert_eq!(remote_basename("/outbound/dir/"), "dir");
    }
}
