//! Second, independent copy of every downloaded file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Destination for backup copies.
pub trait BackupStore {
    /// Where `name` lives (or would live) in the store.
    fn location(&self, name: &str) -> PathBuf;

    fn contains(&self, name: &str) -> bool;

    /// Copy `source` into the store as `name`. Never overwrites an existing copy.
    fn store(&mut self, source: &Path, name: &str) -> io::Result<PathBuf>;
}

/// Backup copies kept as plain files under one directory (usually on the
/// mounted share).
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    root: PathBuf,
}

impl DirectoryBackup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BackupStore for DirectoryBackup {
    fn location(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.location(name).exists()
    }

    fn store(&mut self, source: &Path, name: &str) -> io::Result<PathBuf> {
        let target = self.location(name);
        let mut input = File::open(source)?;
        let mut output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)?;
        let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
        if let Err(err) = copied {
            drop(output);
            let _ = fs::remove_file(&target);
            return Err(err);
        }
        Ok(target)
    }
}
