use crate::{
    application::{Application, ApplicationError, ApplicationResult, GlobalModel},
    common::worker::{Outcome, WorkerId, WorkerStatus},
    coordinator::{
        notifier::{Notifier, Wait},
        registry::WorkerRegistry,
    },
};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
/// Errors of the admin operations.
pub enum AdminError {
    #[error("{0}")]
    Validation(String),
    #[error("worker {} already exists", .0.short())]
    AlreadyExists(WorkerId),
    #[error("unknown worker {}", .0.short())]
    NotFound(WorkerId),
    #[error("internal inconsistency: {0}")]
    Inconsistency(String),
    #[error("application error: {0}")]
    Application(ApplicationError),
}

/// The operations exposed to the workers and to the admin.
///
/// Authorization failures of the workers are returned as
/// [`Outcome`]s. Errors are only returned when the application fails.
pub struct Coordinator<A> {
    app: Arc<A>,
    registry: Arc<WorkerRegistry>,
    notifier: Notifier<A>,
}

impl<A> Clone for Coordinator<A> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<A> Coordinator<A>
where
    A: Application,
{
    pub fn new(app: Arc<A>, registry: WorkerRegistry, check_interval: Duration) -> Self {
        let notifier = Notifier::new(app.clone(), check_interval);
        Self {
            app,
            registry: Arc::new(registry),
            notifier,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &Notifier<A> {
        &self.notifier
    }

    /// Issue a challenge phrase for the worker to sign. `None` if the
    /// worker is not allowed.
    pub fn challenge_phrase(&self, worker_id: &WorkerId) -> Option<String> {
        self.registry.challenge_phrase(worker_id)
    }

    /// Register a worker that signed its challenge phrase.
    pub async fn register(
        &self,
        public_key: &str,
        signed_phrase: &str,
    ) -> ApplicationResult<Outcome<WorkerId>> {
        let phrase = match self.phrase_of(&WorkerId::from(public_key)) {
            Some(phrase) => phrase,
            None => return Ok(Outcome::InvalidWorker),
        };
        let worker_id = match self
            .registry
            .authenticate_and_add(public_key, signed_phrase, &phrase)
        {
            Some((worker_id, _)) => worker_id,
            None => return Ok(Outcome::InvalidWorker),
        };
        match self.registry.set_registration_status(&worker_id, true) {
            Some(false) => {
                if let Err(e) = self.app.register_worker(worker_id.clone()).await {
                    self.registry.set_registration_status(&worker_id, false);
                    return Err(e);
                }
            }
            Some(true) => debug!("worker {} is already registered", worker_id.short()),
            None => {
                warn!("worker {} was removed while registering", worker_id.short());
                return Ok(Outcome::InvalidWorker);
            }
        }
        Ok(Outcome::Accepted(worker_id))
    }

    pub async fn global_model(
        &self,
        worker_id: &WorkerId,
        signed_phrase: &str,
    ) -> ApplicationResult<Outcome<GlobalModel>> {
        if let Some(rejected) = self.authorize(worker_id, signed_phrase) {
            return Ok(rejected);
        }
        let model = self.app.return_global_model().await?;
        info!(
            "returning global model version {} to {}",
            model.version,
            worker_id.short()
        );
        Ok(Outcome::Accepted(model))
    }

    /// Start waiting for the global model to move past `version`. The
    /// wait is registered when this returns, superseding any pending
    /// wait of the worker.
    pub fn wait_for_version_change(
        &self,
        worker_id: &WorkerId,
        signed_phrase: &str,
        version: String,
    ) -> Outcome<Wait> {
        if let Some(rejected) = self.authorize(worker_id, signed_phrase) {
            return rejected;
        }
        info!(
            "worker {} waits for a version newer than {}",
            worker_id.short(),
            version
        );
        Outcome::Accepted(self.start_wait(worker_id, version))
    }

    /// Install the wait of an authorized worker. A removal that
    /// happened since the authorization ends the wait right away.
    fn start_wait(&self, worker_id: &WorkerId, version: String) -> Wait {
        let wait = self.notifier.wait(worker_id.clone(), version);
        if !self.registry.is_allowed(worker_id) {
            debug!("worker {} was removed while starting to wait", worker_id.short());
            self.notifier.notify_removed(worker_id);
        }
        wait
    }

    /// Forward an update to the application. `signed_update` is the
    /// signature of the SHA-256 digest of `update`.
    pub async fn submit_update(
        &self,
        worker_id: &WorkerId,
        signed_update: &str,
        update: Bytes,
    ) -> ApplicationResult<Outcome<String>> {
        let digest = Sha256::digest(&update);
        if !self
            .registry
            .authenticate(worker_id.as_str(), signed_update, &digest)
        {
            return Ok(Outcome::InvalidWorker);
        }
        if !self.registry.is_allowed(worker_id) {
            warn!("unknown worker {} sent an update", worker_id.short());
            return Ok(Outcome::InvalidWorker);
        }
        if !self.registry.is_registered(worker_id) {
            warn!("unregistered worker {} sent an update", worker_id.short());
            return Ok(Outcome::UnregisteredWorker);
        }
        info!("received update from {}", worker_id.short());
        self.app
            .receive_worker_update(worker_id.clone(), update)
            .await
            .map(Outcome::Accepted)
    }

    pub fn list_workers(&self) -> Vec<WorkerStatus> {
        self.registry.list_workers()
    }

    pub async fn add_worker(
        &self,
        public_key: &str,
        registered: bool,
    ) -> Result<WorkerStatus, AdminError> {
        info!("admin is adding a worker");
        let (worker_id, created) = self.registry.add_worker(public_key).map_err(|e| {
            warn!("{}", e);
            AdminError::Validation(format!(
                "Unable to validate public key {}: worker not added.",
                WorkerId::from(public_key).short()
            ))
        })?;
        if !created {
            return Err(AdminError::AlreadyExists(worker_id));
        }
        if registered {
            if self
                .registry
                .set_registration_status(&worker_id, true)
                .is_none()
            {
                let message = format!(
                    "worker {} was just added but is not allowed",
                    worker_id.short()
                );
                error!("inconsistency: {}", message);
                return Err(AdminError::Inconsistency(message));
            }
            if let Err(e) = self.app.register_worker(worker_id.clone()).await {
                self.registry.set_registration_status(&worker_id, false);
                return Err(AdminError::Application(e));
            }
        }
        Ok(WorkerStatus {
            worker_id,
            registration_status: registered,
        })
    }

    /// Remove a worker. Its pending wait, if any, ends with
    /// [`Notification::Removed`](super::notifier::Notification::Removed).
    pub async fn remove_worker(&self, worker_id: &WorkerId) -> Result<WorkerId, AdminError> {
        info!("admin is removing worker {}", worker_id.short());
        let was_registered = self
            .registry
            .remove_worker(worker_id)
            .ok_or_else(|| AdminError::NotFound(worker_id.clone()))?;
        self.notifier.notify_removed(worker_id);
        if was_registered {
            self.app
                .unregister_worker(worker_id.clone())
                .await
                .map_err(AdminError::Application)?;
        }
        Ok(worker_id.clone())
    }

    pub async fn set_worker_status(
        &self,
        worker_id: &WorkerId,
        registered: bool,
    ) -> Result<WorkerStatus, AdminError> {
        info!(
            "admin is setting the status of {} to {}",
            worker_id.short(),
            registered
        );
        let previous = self
            .registry
            .set_registration_status(worker_id, registered)
            .ok_or_else(|| AdminError::NotFound(worker_id.clone()))?;
        let notified = match (previous, registered) {
            (false, true) => self.app.register_worker(worker_id.clone()).await,
            (true, false) => self.app.unregister_worker(worker_id.clone()).await,
            _ => Ok(()),
        };
        if let Err(e) = notified {
            self.registry.set_registration_status(worker_id, previous);
            return Err(AdminError::Application(e));
        }
        Ok(WorkerStatus {
            worker_id: worker_id.clone(),
            registration_status: registered,
        })
    }

    /// The phrase the worker must have signed. In unsafe mode nothing
    /// is checked and the phrase is empty. `None` if the worker never
    /// asked for a phrase.
    fn phrase_of(&self, worker_id: &WorkerId) -> Option<Vec<u8>> {
        if !self.registry.is_safe_mode() {
            return Some(Vec::new());
        }
        let phrase = self.registry.current_challenge(worker_id);
        if phrase.is_none() {
            warn!("no challenge phrase was issued to {}", worker_id.short());
        }
        phrase.map(String::into_bytes)
    }

    /// Check that the worker is allowed, signed its challenge phrase,
    /// and is registered. Returns the rejection if any.
    fn authorize<T>(&self, worker_id: &WorkerId, signed_phrase: &str) -> Option<Outcome<T>> {
        if !self.registry.is_allowed(worker_id) {
            warn!("unknown worker {}", worker_id.short());
            return Some(Outcome::InvalidWorker);
        }
        let verified = self
            .phrase_of(worker_id)
            .map(|phrase| {
                self.registry
                    .authenticate(worker_id.as_str(), signed_phrase, &phrase)
            })
            .unwrap_or(false);
        if !verified {
            return Some(Outcome::InvalidWorker);
        }
        if !self.registry.is_registered(worker_id) {
            warn!("unregistered worker {}", worker_id.short());
            return Some(Outcome::UnregisteredWorker);
        }
        None
    }
}
