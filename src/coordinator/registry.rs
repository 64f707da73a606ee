//! The worker registry: which workers are allowed to take part in the
//! training, which of them are registered, and how they authenticate.
//!
//! In safe mode a worker is identified by its hex encoded Ed25519
//! public key, and every request carries a signature made with the
//! matching private key. In unsafe mode nothing is checked and every
//! request is attributed to a brand new worker.

use crate::{
    common::{
        lock,
        worker::{WorkerId, WorkerStatus},
    },
    coordinator::{
        key_store::{JsonKeyStore, KeyStore, KeyStoreError, NoopKeyStore},
        settings::RegistrySettings,
    },
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use std::{
    collections::{BTreeSet, HashMap},
    fs, io,
    path::Path,
    sync::Mutex,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid public key: {0}")]
pub struct InvalidKey(String);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a key list file cannot be used when the server is not in safe mode")]
    UnsafeModeWithKeyList,
    #[error("failed to read the key list file: {0}")]
    KeyList(#[from] io::Error),
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

/// Decode a hex encoded Ed25519 public key.
pub fn parse_public_key(public_key: &str) -> Result<VerifyingKey, InvalidKey> {
    let mut bytes = [0_u8; PUBLIC_KEY_LENGTH];
    hex::decode_to_slice(public_key, &mut bytes).map_err(|e| InvalidKey(e.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| InvalidKey(e.to_string()))
}

fn parse_signature(signature: &str) -> Option<Signature> {
    let bytes = hex::decode(signature).ok()?;
    Signature::from_slice(&bytes).ok()
}

#[derive(Debug, Default)]
struct Worker {
    registered: bool,
    /// The last challenge phrase issued to the worker.
    challenge: Option<String>,
}

struct Tables {
    /// Only filled in safe mode. Keyed by the hex encoded key, which
    /// is also the worker's identifier.
    public_keys: HashMap<String, VerifyingKey>,
    /// The allowed workers.
    workers: HashMap<WorkerId, Worker>,
}

pub struct WorkerRegistry {
    safe_mode: bool,
    tables: Mutex<Tables>,
    /// Locked before the tables are released, so the writes happen in
    /// the same order as the changes to the tables without blocking
    /// their readers.
    key_store: Mutex<Box<dyn KeyStore>>,
}

impl WorkerRegistry {
    /// Create an empty registry. `safe_mode` enables public key
    /// authentication.
    pub fn new(safe_mode: bool, key_store: Box<dyn KeyStore>) -> Self {
        Self {
            safe_mode,
            tables: Mutex::new(Tables {
                public_keys: HashMap::new(),
                workers: HashMap::new(),
            }),
            key_store: Mutex::new(key_store),
        }
    }

    /// Create a registry and fill it with the workers of the previous
    /// session and of the key list file.
    pub fn from_settings(settings: &RegistrySettings) -> Result<Self, RegistryError> {
        if !settings.server_mode_safe {
            if settings.key_list_file.is_some() {
                return Err(RegistryError::UnsafeModeWithKeyList);
            }
            warn!("UNSAFE MODE: workers are not authenticated");
            return Ok(Self::new(false, Box::new(NoopKeyStore)));
        }
        info!("safe mode: workers authenticate with their public key");

        let mut keys = BTreeSet::new();
        let key_store: Box<dyn KeyStore> = if settings.load_last_session_workers {
            let mut store = JsonKeyStore::new(&settings.path_to_keys_db);
            let previous = store.load()?;
            info!(
                "loaded {} workers of the previous session from {}",
                previous.len(),
                store.path().display()
            );
            keys.extend(previous);
            // the valid keys are written back when they are added below
            store.clear()?;
            Box::new(store)
        } else {
            Box::new(NoopKeyStore)
        };
        if let Some(path) = &settings.key_list_file {
            keys.extend(read_key_list(path)?);
        }

        let registry = Self::new(true, key_store);
        for key in keys {
            if let Err(e) = registry.add_worker(&key) {
                warn!("skipping worker {}: {}", key, e);
            }
        }
        Ok(registry)
    }

    /// Whether workers have to authenticate.
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// Allow the worker with the given public key. Returns the
    /// worker's identifier, and whether it was newly added.
    pub fn add_worker(&self, public_key: &str) -> Result<(WorkerId, bool), InvalidKey> {
        let mut tables = lock(&self.tables);
        if self.safe_mode && !tables.public_keys.contains_key(public_key) {
            let key = parse_public_key(public_key)?;
            tables.public_keys.insert(public_key.to_string(), key);
        }
        let worker_id = self.generate_id(public_key);
        if tables.workers.contains_key(&worker_id) {
            debug!("worker {} was already added", worker_id.short());
            return Ok((worker_id, false));
        }
        tables.workers.insert(worker_id.clone(), Worker::default());
        let mut key_store = lock(&self.key_store);
        drop(tables);
        if let Err(e) = key_store.append(public_key) {
            warn!("failed to persist worker {}: {}", worker_id.short(), e);
        }
        info!("added worker {}", worker_id.short());
        Ok((worker_id, true))
    }

    /// The identifier of the worker with the given public key. In
    /// unsafe mode, a new identifier is generated on every call.
    pub fn generate_id(&self, public_key: &str) -> WorkerId {
        if self.safe_mode {
            WorkerId::from(public_key)
        } else {
            WorkerId::unauthenticated()
        }
    }

    /// Check that `signature` is a valid signature of `challenge` made
    /// with the private key matching `public_key`. Always succeeds in
    /// unsafe mode.
    pub fn authenticate(&self, public_key: &str, signature: &str, challenge: &[u8]) -> bool {
        if !self.safe_mode {
            warn!("accepting worker without authentication");
            return true;
        }
        let key = match lock(&self.tables).public_keys.get(public_key) {
            Some(key) => *key,
            None => {
                warn!("authentication failed: unknown public key");
                return false;
            }
        };
        let id = WorkerId::from(public_key);
        let signature = match parse_signature(signature) {
            Some(signature) => signature,
            None => {
                warn!("authentication failed for {}: malformed signature", id.short());
                return false;
            }
        };
        match key.verify(challenge, &signature) {
            Ok(()) => {
                debug!("worker {} authenticated", id.short());
                true
            }
            Err(_) => {
                warn!("authentication failed for {}: bad signature", id.short());
                false
            }
        }
    }

    /// Authenticate a worker and add it to the allowed workers. In safe
    /// mode only a worker that is already allowed can authenticate, so
    /// this never adds a new worker.
    pub fn authenticate_and_add(
        &self,
        public_key: &str,
        signature: &str,
        challenge: &[u8],
    ) -> Option<(WorkerId, bool)> {
        if !self.authenticate(public_key, signature, challenge) {
            return None;
        }
        match self.add_worker(public_key) {
            Ok(added) => Some(added),
            Err(e) => {
                error!("inconsistency: authenticated worker has an {}", e);
                None
            }
        }
    }

    /// Issue a new challenge phrase to an allowed worker. The phrase
    /// replaces the previous one. In unsafe mode the phrase is not
    /// stored and any worker gets one.
    pub fn challenge_phrase(&self, worker_id: &WorkerId) -> Option<String> {
        let phrase = hex::encode(rand::random::<[u8; 16]>());
        if !self.safe_mode {
            return Some(phrase);
        }
        let mut tables = lock(&self.tables);
        let worker = tables.workers.get_mut(worker_id)?;
        worker.challenge = Some(phrase.clone());
        Some(phrase)
    }

    /// The challenge phrase last issued to the worker.
    pub fn current_challenge(&self, worker_id: &WorkerId) -> Option<String> {
        lock(&self.tables)
            .workers
            .get(worker_id)
            .and_then(|worker| worker.challenge.clone())
    }

    /// Set the registration status of an allowed worker. Returns the
    /// previous status, or `None` if the worker is not allowed.
    pub fn set_registration_status(&self, worker_id: &WorkerId, registered: bool) -> Option<bool> {
        let mut tables = lock(&self.tables);
        let worker = tables.workers.get_mut(worker_id)?;
        let previous = worker.registered;
        worker.registered = registered;
        if previous != registered {
            info!(
                "worker {} is now {}",
                worker_id.short(),
                if registered { "registered" } else { "unregistered" }
            );
        }
        Some(previous)
    }

    /// Remove a worker from every table. Returns whether the worker
    /// was registered, or `None` if it was not allowed.
    pub fn remove_worker(&self, worker_id: &WorkerId) -> Option<bool> {
        let mut tables = lock(&self.tables);
        let worker = match tables.workers.remove(worker_id) {
            Some(worker) => worker,
            None => {
                debug!("cannot remove unknown worker {}", worker_id.short());
                return None;
            }
        };
        if self.safe_mode && tables.public_keys.remove(worker_id.as_str()).is_none() {
            error!(
                "inconsistency: allowed worker {} had no public key",
                worker_id.short()
            );
        }
        let mut key_store = lock(&self.key_store);
        drop(tables);
        match key_store.delete(worker_id.as_str()) {
            Ok(true) => {}
            Ok(false) => error!(
                "inconsistency: worker {} was not in the key database",
                worker_id.short()
            ),
            Err(e) => warn!(
                "failed to remove worker {} from the key database: {}",
                worker_id.short(),
                e
            ),
        }
        info!("removed worker {}", worker_id.short());
        Some(worker.registered)
    }

    pub fn is_allowed(&self, worker_id: &WorkerId) -> bool {
        lock(&self.tables).workers.contains_key(worker_id)
    }

    pub fn is_registered(&self, worker_id: &WorkerId) -> bool {
        lock(&self.tables)
            .workers
            .get(worker_id)
            .map(|worker| worker.registered)
            .unwrap_or(false)
    }

    /// All the allowed workers, sorted by identifier.
    pub fn list_workers(&self) -> Vec<WorkerStatus> {
        let mut workers: Vec<WorkerStatus> = lock(&self.tables)
            .workers
            .iter()
            .map(|(id, worker)| WorkerStatus {
                worker_id: id.clone(),
                registration_status: worker.registered,
            })
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }
}

fn read_key_list(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
