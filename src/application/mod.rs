//! The interface between the coordinator and the application that
//! implements the actual federated learning logic.
//!
//! The coordinator never looks inside a model or an update: it only
//! forwards them to an [`Application`], either in the same process or
//! through the [`bridge`](crate::bridge).

pub mod memory;
pub mod settings;

use crate::common::worker::WorkerId;
use async_trait::async_trait;
use bytes::Bytes;

/// Errors returned by the application callbacks. The application is
/// free to fail in any way it wants.
pub type ApplicationError = anyhow::Error;

pub type ApplicationResult<T> = Result<T, ApplicationError>;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
/// The global model, as returned by the application.
pub struct GlobalModel {
    /// The version of the model. Workers send it back when they wait
    /// for the next version.
    pub version: String,
    /// The serialized model. It is opaque to the coordinator.
    #[serde(with = "hex")]
    pub model: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
/// The callbacks through which the coordinator drives the
/// application.
pub trait Application: Send + Sync + 'static {
    /// A worker joined the federated learning pool.
    async fn register_worker(&self, worker_id: WorkerId) -> ApplicationResult<()>;

    /// A worker left the federated learning pool.
    async fn unregister_worker(&self, worker_id: WorkerId) -> ApplicationResult<()>;

    /// Return the current global model.
    async fn return_global_model(&self) -> ApplicationResult<GlobalModel>;

    /// Whether `version` is the version of the current global model.
    async fn is_global_model_most_recent(&self, version: String) -> ApplicationResult<bool>;

    /// Handle an update sent by a registered worker, and return a
    /// status message for that worker.
    async fn receive_worker_update(
        &self,
        worker_id: WorkerId,
        update: Bytes,
    ) -> ApplicationResult<String>;
}
