use derive_more::{Display, From};
use std::{convert::Infallible, str::FromStr};
use uuid::Uuid;

/// Marker returned to a worker that is unknown or failed to
/// authenticate. The worker has to register again.
pub const INVALID_WORKER: &str = "invalid_worker";

/// Marker returned to an authenticated worker that is allowed but
/// not registered. The worker has to wait for an admin to register
/// it.
pub const UNREGISTERED_WORKER: &str = "unregistered_worker";

/// Number of characters of a worker identifier that are logged.
const SHORT_ID_LEN: usize = 10;

#[derive(
    Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Clone, Display, Serialize, Deserialize, From,
)]
#[serde(transparent)]
/// The identifier of a worker.
///
/// When public key authentication is enabled, this is the hex encoded
/// public key of the worker. Otherwise it is a random token.
pub struct WorkerId(String);

impl WorkerId {
    const UNAUTHENTICATED_SUFFIX: &'static str = "_unauthenticated";

    /// Return a new random identifier for a worker that has no public
    /// key. Two calls never return the same identifier.
    pub fn unauthenticated() -> Self {
        Self(format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Self::UNAUTHENTICATED_SUFFIX
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier was generated for a worker without a
    /// public key.
    pub fn is_unauthenticated(&self) -> bool {
        self.0.ends_with(Self::UNAUTHENTICATED_SUFFIX)
    }

    /// A prefix of the identifier, for logging.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for WorkerId {
    type Err = Infallible;
    fn from_str(id: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(id))
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
/// A worker and whether it is currently registered.
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub registration_status: bool,
}

#[derive(Eq, PartialEq, Debug)]
/// Result of a worker-facing operation.
///
/// Authorization failures are values rather than errors, so that a
/// misbehaving worker never turns into an error on the transport
/// layer.
pub enum Outcome<T> {
    Accepted(T),
    /// The worker is unknown, has been removed, or failed to
    /// authenticate.
    InvalidWorker,
    /// The worker is authenticated and allowed, but not registered.
    UnregisteredWorker,
}

impl<T> Outcome<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            Outcome::Accepted(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}
