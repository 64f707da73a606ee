//! An application that keeps everything in memory.
//!
//! It does not train anything: after a configured number of updates
//! have been received, the last update becomes the new global model.
//! It is used by the `model` binary and by the tests.

use super::{Application, ApplicationResult, GlobalModel};
use crate::common::{lock, worker::WorkerId};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

#[derive(Debug)]
struct State {
    version: u64,
    model: Vec<u8>,
    workers: HashSet<WorkerId>,
    /// Updates received since the last version was published.
    updates: HashMap<WorkerId, Bytes>,
}

#[derive(Debug, Clone)]
pub struct MemoryModel {
    state: Arc<Mutex<State>>,
    /// Number of updates that trigger a new version. `0` means a new
    /// version is only published through [`MemoryModel::publish`].
    updates_per_version: usize,
}

impl MemoryModel {
    pub fn new(model: Vec<u8>, updates_per_version: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                version: 1,
                model,
                workers: HashSet::new(),
                updates: HashMap::new(),
            })),
            updates_per_version,
        }
    }

    pub fn version(&self) -> String {
        lock(&self.state).version.to_string()
    }

    /// Replace the global model and bump its version. Returns the new
    /// version.
    pub fn publish(&self, model: Vec<u8>) -> String {
        let mut state = lock(&self.state);
        publish(&mut state, model)
    }

    pub fn registered_workers(&self) -> Vec<WorkerId> {
        let mut workers: Vec<WorkerId> = lock(&self.state).workers.iter().cloned().collect();
        workers.sort();
        workers
    }

    /// Number of updates received for the current version.
    pub fn pending_updates(&self) -> usize {
        lock(&self.state).updates.len()
    }
}

fn publish(state: &mut State, model: Vec<u8>) -> String {
    state.version += 1;
    state.model = model;
    state.updates.clear();
    info!("published global model version {}", state.version);
    state.version.to_string()
}

#[async_trait]
impl Application for MemoryModel {
    async fn register_worker(&self, worker_id: WorkerId) -> ApplicationResult<()> {
        info!("registering worker {}", worker_id.short());
        lock(&self.state).workers.insert(worker_id);
        Ok(())
    }

    async fn unregister_worker(&self, worker_id: WorkerId) -> ApplicationResult<()> {
        info!("unregistering worker {}", worker_id.short());
        let mut state = lock(&self.state);
        state.workers.remove(&worker_id);
        state.updates.remove(&worker_id);
        Ok(())
    }

    async fn return_global_model(&self) -> ApplicationResult<GlobalModel> {
        let state = lock(&self.state);
        Ok(GlobalModel {
            version: state.version.to_string(),
            model: state.model.clone(),
        })
    }

    async fn is_global_model_most_recent(&self, version: String) -> ApplicationResult<bool> {
        Ok(lock(&self.state).version.to_string() == version)
    }

    async fn receive_worker_update(
        &self,
        worker_id: WorkerId,
        update: Bytes,
    ) -> ApplicationResult<String> {
        let mut state = lock(&self.state);
        if !state.workers.contains(&worker_id) {
            warn!("update from unknown worker {}", worker_id.short());
            return Ok(format!("Worker {} is not known to the model.", worker_id.short()));
        }
        debug!(
            "received update of {} bytes from worker {}",
            update.len(),
            worker_id.short()
        );
        state.updates.insert(worker_id.clone(), update.clone());
        if self.updates_per_version > 0 && state.updates.len() >= self.updates_per_version {
            let version = publish(&mut state, update.to_vec());
            return Ok(format!(
                "Update received for worker {}. Published version {}.",
                worker_id.short(),
                version
            ));
        }
        Ok(format!("Update received for worker {}.", worker_id.short()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_most_recent() {
        let model = MemoryModel::new(vec![1, 2, 3], 0);
        assert!(model.is_global_model_most_recent("1".into()).await.unwrap());
        assert!(!model.is_global_model_most_recent("0".into()).await.unwrap());

        let version = model.publish(vec![4]);
        assert_eq!(version, "2");
        assert!(!model.is_global_model_most_recent("1".into()).await.unwrap());

        let global = model.return_global_model().await.unwrap();
        assert_eq!(global.version, "2");
        assert_eq!(global.model, vec![4]);
    }

    #[tokio::test]
    async fn test_updates_publish_new_version() {
        let model = MemoryModel::new(vec![], 2);
        let a = WorkerId::from("a");
        let b = WorkerId::from("b");
        model.register_worker(a.clone()).await.unwrap();
        model.register_worker(b.clone()).await.unwrap();

        model
            .receive_worker_update(a.clone(), Bytes::from_static(b"first"))
            .await
            .unwrap();
        assert_eq!(model.version(), "1");
        assert_eq!(model.pending_updates(), 1);

        // a second update from the same worker replaces the first one
        model
            .receive_worker_update(a, Bytes::from_static(b"again"))
            .await
            .unwrap();
        assert_eq!(model.version(), "1");

        let status = model
            .receive_worker_update(b, Bytes::from_static(b"second"))
            .await
            .unwrap();
        assert!(status.contains("Published version 2"));
        assert_eq!(model.pending_updates(), 0);
        assert_eq!(model.return_global_model().await.unwrap().model, b"second".to_vec());
    }

    #[tokio::test]
    async fn test_unknown_worker_update() {
        let model = MemoryModel::new(vec![], 1);
        model
            .receive_worker_update(WorkerId::from("ghost"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(model.version(), "1");
        assert_eq!(model.pending_updates(), 0);
    }

    #[tokio::test]
    async fn test_unregister() {
        let model = MemoryModel::new(vec![], 0);
        let a = WorkerId::from("a");
        model.register_worker(a.clone()).await.unwrap();
        assert_eq!(model.registered_workers(), vec![a.clone()]);
        model.unregister_worker(a).await.unwrap();
        assert!(model.registered_workers().is_empty());
    }
}
