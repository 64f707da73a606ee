//! Durable storage of the public keys of the allowed workers, so that
//! they survive a restart of the coordinator.

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key database I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed key database: {0}")]
    Format(#[from] serde_json::Error),
}

pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// A list of public keys.
pub trait KeyStore: Send {
    /// Return the stored keys.
    fn load(&mut self) -> KeyStoreResult<Vec<String>>;

    /// Add a key. Adding a key that is already stored is a no-op.
    fn append(&mut self, public_key: &str) -> KeyStoreResult<()>;

    /// Remove a key. Returns `false` if the key was not stored.
    fn delete(&mut self, public_key: &str) -> KeyStoreResult<bool>;

    /// Remove all the keys.
    fn clear(&mut self) -> KeyStoreResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeysDb {
    public_keys: Vec<String>,
}

/// A [`KeyStore`] backed by a JSON file. Every change rewrites the
/// whole file.
#[derive(Debug)]
pub struct JsonKeyStore {
    path: PathBuf,
    db: KeysDb,
}

impl JsonKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: KeysDb::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the copy of the database taken by [`KeyStore::load`].
    pub fn backup_path(&self) -> PathBuf {
        let mut path = OsString::from(self.path.as_os_str());
        path.push(".bak");
        PathBuf::from(path)
    }

    fn flush(&self) -> KeyStoreResult<()> {
        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.db)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyStore for JsonKeyStore {
    /// Read the database, after copying it next to the original file.
    /// A missing database is created empty.
    fn load(&mut self) -> KeyStoreResult<Vec<String>> {
        if !self.path.exists() {
            warn!(
                "no key database at {}, creating a new one",
                self.path.display()
            );
            self.db = KeysDb::default();
            self.flush()?;
            return Ok(Vec::new());
        }
        let backup = self.backup_path();
        fs::copy(&self.path, &backup)?;
        info!("key database backed up to {}", backup.display());

        self.db = serde_json::from_slice(&fs::read(&self.path)?)?;
        Ok(self.db.public_keys.clone())
    }

    fn append(&mut self, public_key: &str) -> KeyStoreResult<()> {
        if self.db.public_keys.iter().any(|key| key == public_key) {
            return Ok(());
        }
        self.db.public_keys.push(public_key.to_string());
        self.flush()
    }

    fn delete(&mut self, public_key: &str) -> KeyStoreResult<bool> {
        let len = self.db.public_keys.len();
        self.db.public_keys.retain(|key| key != public_key);
        if self.db.public_keys.len() == len {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    fn clear(&mut self) -> KeyStoreResult<()> {
        self.db.public_keys.clear();
        self.flush()
    }
}

/// A [`KeyStore`] that stores nothing, for registries that do not
/// persist their workers.
#[derive(Debug, Default)]
pub struct NoopKeyStore;

impl KeyStore for NoopKeyStore {
    fn load(&mut self) -> KeyStoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn append(&mut self, _public_key: &str) -> KeyStoreResult<()> {
        Ok(())
    }

    fn delete(&mut self, _public_key: &str) -> KeyStoreResult<bool> {
        Ok(true)
    }

    fn clear(&mut self) -> KeyStoreResult<()> {
        Ok(())
    }
}
