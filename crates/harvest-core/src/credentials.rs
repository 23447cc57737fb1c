//! Encrypted-at-rest credentials for the remote endpoint and the backup share.
//!
//! A credential file holds a ChaCha20-Poly1305 sealed JSON `(username, secret)`
//! pair. The key is derived from the host identity and the current uid, so a
//! file only decrypts for the account on the machine that wrote it.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILE_MAGIC: &[u8; 4] = b"HRVC";
const FILE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const LEN_FIELD: usize = std::mem::size_of::<u32>();
const HEADER_LEN: usize = FILE_MAGIC.len() + 1 + NONCE_LEN + LEN_FIELD;
const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to load credential {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("failed to store credential {path}: {reason}")]
    Store { path: PathBuf, reason: String },
}

impl CredentialError {
    fn load(path: &Path, reason: impl Into<String>) -> Self {
        CredentialError::Load {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn store(path: &Path, reason: impl Into<String>) -> Self {
        CredentialError::Store {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// A username/secret pair. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Resolves a credential file into a [`Credential`].
pub trait CredentialSource {
    fn load(&self, path: &Path) -> Result<Credential, CredentialError>;
}

/// Identity-bound credential files on the local filesystem.
pub struct CredentialStore {
    key: [u8; 32],
}

impl CredentialStore {
    /// Store keyed to the current user on this host.
    pub fn for_current_identity() -> Result<Self, CredentialError> {
        let identity = current_identity()
            .map_err(|err| CredentialError::load(Path::new("<identity>"), err.to_string()))?;
        Ok(Self::with_identity(&identity))
    }

    /// Store keyed to an explicit identity blob.
    pub fn with_identity(identity: &[u8]) -> Self {
        Self {
            key: derive_key(identity),
        }
    }

    pub fn save(&self, path: &Path, credential: &Credential) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|err| CredentialError::store(path, err.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CredentialError::store(path, "encryption failed"))?;

        let mut payload = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        payload.extend_from_slice(FILE_MAGIC);
        payload.push(FILE_VERSION);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        payload.extend_from_slice(&ciphertext);

        write_private(path, &payload).map_err(|err| CredentialError::store(path, err.to_string()))
    }
}

impl CredentialSource for CredentialStore {
    fn load(&self, path: &Path) -> Result<Credential, CredentialError> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(path.to_path_buf()))
            }
            Err(err) => return Err(CredentialError::load(path, err.to_string())),
        };

        if data.len() < HEADER_LEN || &data[..FILE_MAGIC.len()] != FILE_MAGIC {
            return Err(CredentialError::load(path, "not a credential file"));
        }
        if data[FILE_MAGIC.len()] != FILE_VERSION {
            return Err(CredentialError::load(
                path,
                format!("unsupported credential version {}", data[FILE_MAGIC.len()]),
            ));
        }

        let nonce_start = FILE_MAGIC.len() + 1;
        let nonce_end = nonce_start + NONCE_LEN;
        let mut len_bytes = [0u8; LEN_FIELD];
        len_bytes.copy_from_slice(&data[nonce_end..HEADER_LEN]);
        let ciphertext_len = u32::from_be_bytes(len_bytes) as usize;
        if data.len() < HEADER_LEN + ciphertext_len {
            return Err(CredentialError::load(path, "truncated credential file"));
        }
        let ciphertext = &data[HEADER_LEN..HEADER_LEN + ciphertext_len];

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&data[nonce_start..nonce_end]), ciphertext)
            .map_err(|_| {
                CredentialError::load(path, "decryption failed (written by another user or host?)")
            })?;

        serde_json::from_slice(&plaintext).map_err(|err| CredentialError::load(path, err.to_string()))
    }
}

/// Stands in for [`CredentialStore`] when the identity key cannot be derived,
/// so the failure surfaces as an ordinary credential error during the run.
#[derive(Debug, Clone)]
pub struct UnavailableCredentials {
    reason: String,
}

impl UnavailableCredentials {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl CredentialSource for UnavailableCredentials {
    fn load(&self, path: &Path) -> Result<Credential, CredentialError> {
        Err(CredentialError::load(
            path,
            format!("credential key unavailable: {}", self.reason),
        ))
    }
}

fn derive_key(identity: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    let digest = Sha256::digest(identity);
    key.copy_from_slice(&digest);
    key
}

/// Machine identity plus the uid of the calling process. Environment
/// variables such as `USER` are not part of it; schedulers do not set them
/// consistently.
fn current_identity() -> io::Result<Vec<u8>> {
    let mut identity = Vec::new();
    let machine = MACHINE_ID_PATHS
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty());
    match machine {
        Some(id) => identity.extend_from_slice(id.as_bytes()),
        None => identity.extend_from_slice(hostname::get()?.to_string_lossy().as_bytes()),
    }
    identity.push(0);

    #[cfg(unix)]
    {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        identity.extend_from_slice(&uid.to_be_bytes());
    }
    #[cfg(not(unix))]
    {
        if let Some(user) = std::env::var_os("USERNAME") {
            identity.extend_from_slice(user.to_string_lossy().as_bytes());
        }
    }
    Ok(identity)
}

fn write_private(path: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
