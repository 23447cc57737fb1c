use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHosts, Session, Sftp};
use std::fs::{self, File};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{remote_basename, HostKeyPolicy, RemoteClient, RemoteConnector, RemoteEntry, RemoteError};
use crate::credentials::Credential;

const KNOWN_HOSTS_COMMENT: &str = "added by harvest (trust on first use)";

/// Connects to an SFTP server with password authentication.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    policy: HostKeyPolicy,
    timeout: Duration,
}

impl SftpConnector {
    pub fn new(policy: HostKeyPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }
}

impl RemoteConnector for SftpConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
    ) -> Result<Box<dyn RemoteClient>, RemoteError> {
        let addr = format!("{host}:{port}");
        let tcp = open_tcp(&addr, self.timeout)?;

        let mut session = Session::new().map_err(RemoteError::ssh("session setup"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
        session
            .handshake()
            .map_err(RemoteError::ssh("handshake"))?;

        verify_host_key(&session, host, port, &self.policy)?;

        session
            .userauth_password(&credential.username, credential.secret())
            .map_err(RemoteError::ssh("password authentication"))?;
        if !session.authenticated() {
            return Err(RemoteError::AuthRejected(credential.username.clone()));
        }

        let sftp = session.sftp().map_err(RemoteError::ssh("sftp subsystem"))?;
        log::debug!("sftp session established with {addr}");
        Ok(Box::new(SftpClient {
            session,
            sftp: Some(sftp),
            closed: false,
        }))
    }
}

fn open_tcp(addr: &str, timeout: Duration) -> Result<TcpStream, RemoteError> {
    let connect_err = |source: io::Error| RemoteError::Connect {
        addr: addr.to_string(),
        source,
    };
    let mut last_err = None;
    for sock in addr.to_socket_addrs().map_err(connect_err)? {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(connect_err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: &HostKeyPolicy,
) -> Result<(), RemoteError> {
    let known_hosts_path = match policy {
        HostKeyPolicy::AcceptAny => return Ok(()),
        HostKeyPolicy::TrustOnFirstUse { known_hosts } => known_hosts,
    };

    let (key, key_type) = session.host_key().ok_or(RemoteError::MissingHostKey)?;
    let mut known = session
        .known_hosts()
        .map_err(RemoteError::ssh("known hosts setup"))?;
    trust_on_first_use(&mut known, known_hosts_path, host, port, key, key_type)
}

/// Accept `key` if `known_hosts_path` pins it for `host:port`, pin it if the
/// host is unknown, and reject it if a different key is pinned.
fn trust_on_first_use(
    known: &mut KnownHosts,
    known_hosts_path: &Path,
    host: &str,
    port: u16,
    key: &[u8],
    key_type: HostKeyType,
) -> Result<(), RemoteError> {
    if known_hosts_path.exists() {
        known
            .read_file(known_hosts_path, KnownHostFileKind::OpenSSH)
            .map_err(RemoteError::ssh("reading known hosts"))?;
    }

    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => {
            let entry = known_hosts_entry(host, port);
            known
                .add(&entry, key, KNOWN_HOSTS_COMMENT, key_type.into())
                .map_err(RemoteError::ssh("recording host key"))?;
            if let Some(parent) = known_hosts_path.parent() {
                fs::create_dir_all(parent).map_err(|source| RemoteError::LocalIo {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            known
                .write_file(known_hosts_path, KnownHostFileKind::OpenSSH)
                .map_err(RemoteError::ssh("saving known hosts"))?;
            log::info!(
                "trusted new host key for {entry} in {}",
                known_hosts_path.display()
            );
            Ok(())
        }
        CheckResult::Mismatch => Err(RemoteError::HostKeyMismatch {
            host: host.to_string(),
            known_hosts: known_hosts_path.to_path_buf(),
        }),
        CheckResult::Failure => Err(RemoteError::Transport(format!(
            "could not check host key for {host}"
        ))),
    }
}

/// OpenSSH host pattern: bare host on port 22, `[host]:port` otherwise.
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

struct SftpClient {
    session: Session,
    sftp: Option<Sftp>,
    closed: bool,
}

impl SftpClient {
    fn sftp(&self) -> Result<&Sftp, RemoteError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| RemoteError::Transport("session already closed".into()))
    }
}

impl RemoteClient for SftpClient {
    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let listing = self
            .sftp()?
            .readdir(Path::new(remote_dir))
            .map_err(RemoteError::ssh("readdir"))?;
        Ok(listing
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    name,
                    is_directory: stat.is_dir(),
                })
            })
            .collect())
    }

    fn fetch(&mut self, remote_file: &str, staging_dir: &Path) -> Result<PathBuf, RemoteError> {
        let target = staging_dir.join(remote_basename(remote_file));
        let mut remote = self
            .sftp()?
            .open(Path::new(remote_file))
            .map_err(RemoteError::ssh("open"))?;
        let mut local = File::create(&target).map_err(|source| RemoteError::LocalIo {
            path: target.clone(),
            source,
        })?;

        if let Err(source) = io::copy(&mut remote, &mut local).and_then(|_| local.sync_all()) {
            drop(local);
            let _ = fs::remove_file(&target);
            return Err(RemoteError::Transport(format!(
                "reading {remote_file}: {source}"
            )));
        }
        Ok(target)
    }

    fn delete(&mut self, remote_file: &str) -> Result<(), RemoteError> {
        self.sftp()?
            .unlink(Path::new(remote_file))
            .map_err(RemoteError::ssh("unlink"))
    }

    fn close(&mut self) -> Result<(), RemoteError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sftp.take();
        self.session
            .disconnect(None, "harvest run complete", None)
            .map_err(RemoteError::ssh("disconnect"))
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::debug!("sftp disconnect on drop failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ed25519_blob(fill: u8) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&11u32.to_be_bytes());
        blob.extend_from_slice(b"ssh-ed25519");
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[fill; 32]);
        blob
    }

    fn fresh_known_hosts() -> KnownHosts {
        Session::new().unwrap().known_hosts().unwrap()
    }

    fn check(path: &Path, host: &str, port: u16, key: &[u8]) -> Result<(), RemoteError> {
        trust_on_first_use(
            &mut fresh_known_hosts(),
            path,
            host,
            port,
            key,
            HostKeyType::Ed25519,
        )
    }

    #[test]
    fn entry_uses_brackets_off_the_default_port() {
        assert_eq!(known_hosts_entry("sftp.test", 22), "sftp.test");
        assert_eq!(known_hosts_entry("sftp.test", 2222), "[sftp.test]:2222");
    }

    #[test]
    fn unknown_host_is_pinned_and_saved() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("state").join("known_hosts");

        check(&path, "sftp.test", 2222, &ed25519_blob(1)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("[sftp.test]:2222 ssh-ed25519 "), "{contents}");
    }

    #[test]
    fn default_port_is_saved_as_bare_host() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("known_hosts");

        check(&path, "sftp.test", 22, &ed25519_blob(1)).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("sftp.test ssh-ed25519 "), "{contents}");
    }

    #[test]
    fn pinned_key_matches_without_rewriting() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("known_hosts");
        check(&path, "sftp.test", 2222, &ed25519_blob(1)).unwrap();
        let pinned = fs::read_to_string(&path).unwrap();

        check(&path, "sftp.test", 2222, &ed25519_blob(1)).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), pinned);
    }

    #[test]
    fn changed_key_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("known_hosts");
        check(&path, "sftp.test", 2222, &ed25519_blob(1)).unwrap();

        let err = check(&path, "sftp.test", 2222, &ed25519_blob(2)).unwrap_err();

        match err {
            RemoteError::HostKeyMismatch { host, known_hosts } => {
                assert_eq!(host, "sftp.test");
                assert_eq!(known_hosts, path);
            }
            other => panic!("expected host key mismatch, got {other:?}"),
        }
    }

    #[test]
    fn each_host_gets_its_own_pin() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("known_hosts");
        check(&path, "a.test", 2222, &ed25519_blob(1)).unwrap();
        check(&path, "b.test", 2222, &ed25519_blob(2)).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        assert!(check(&path, "a.test", 2222, &ed25519_blob(1)).is_ok());
    }
}
