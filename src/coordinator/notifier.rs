//! Long polling: a worker waits until the global model moves past the
//! version it already has.
//!
//! Each worker has at most one pending wait. A new wait from the same
//! worker supersedes the pending one, which is answered with
//! [`Notification::Superseded`].

use crate::{
    application::{Application, ApplicationError, GlobalModel},
    common::{lock, worker::WorkerId},
};
use futures::FutureExt;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::sleep,
};
use tracing::Instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
/// How a wait ended.
pub enum Notification {
    /// The global model changed. This is the new model.
    Changed(GlobalModel),
    /// The worker started a new wait.
    Superseded,
    /// The worker was removed.
    Removed,
}

pub type WaitResult = Result<Notification, ApplicationError>;

/// A pending wait. Resolves once the wait ends.
pub struct Wait(oneshot::Receiver<WaitResult>);

impl Future for Wait {
    type Output = WaitResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        // the sender is only dropped without sending when the notifier
        // itself goes away
        self.0.poll_unpin(cx).map(|result| {
            result.unwrap_or_else(|e| {
                error!("inconsistency: a wait ended without an answer");
                Err(ApplicationError::new(e).context("the wait ended without an answer"))
            })
        })
    }
}

struct Waiting {
    ticket: u64,
    response_tx: oneshot::Sender<WaitResult>,
    task: JoinHandle<()>,
}

impl Waiting {
    /// Stop the poll task and answer the worker.
    fn terminate(self, result: WaitResult) {
        self.task.abort();
        // the worker may have given up already
        let _ = self.response_tx.send(result);
    }
}

type Waits = Arc<Mutex<HashMap<WorkerId, Waiting>>>;

pub struct Notifier<A> {
    app: Arc<A>,
    check_interval: Duration,
    waits: Waits,
    tickets: Arc<AtomicU64>,
}

impl<A> Clone for Notifier<A> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            check_interval: self.check_interval,
            waits: self.waits.clone(),
            tickets: self.tickets.clone(),
        }
    }
}

impl<A> Notifier<A>
where
    A: Application,
{
    pub fn new(app: Arc<A>, check_interval: Duration) -> Self {
        Self {
            app,
            check_interval,
            waits: Arc::new(Mutex::new(HashMap::new())),
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start waiting for the global model to be different from
    /// `version`. The pending wait of the worker, if any, is
    /// superseded.
    ///
    /// The wait is registered before this returns, so of two calls
    /// made one after the other, the second one always wins.
    pub fn wait(&self, worker_id: WorkerId, version: String) -> Wait {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();

        let mut waits = lock(&self.waits);
        let previous = waits.remove(&worker_id).map(|waiting| {
            debug!("superseding the pending wait of {}", worker_id.short());
            let Waiting {
                response_tx, task, ..
            } = waiting;
            task.abort();
            let _ = response_tx.send(Ok(Notification::Superseded));
            task
        });

        let span = trace_span!("wait", worker_id = worker_id.short(), ticket);
        let task = tokio::spawn(
            self.clone()
                .poll(worker_id.clone(), version, ticket, previous)
                .instrument(span),
        );
        let waiting = Waiting {
            ticket,
            response_tx,
            task,
        };
        if let Some(stray) = waits.insert(worker_id.clone(), waiting) {
            error!(
                "inconsistency: worker {} had two pending waits",
                worker_id.short()
            );
            stray.terminate(Ok(Notification::Superseded));
        }
        Wait(response_rx)
    }

    /// End the pending wait of a worker that was removed. Returns
    /// `false` if the worker was not waiting.
    pub fn notify_removed(&self, worker_id: &WorkerId) -> bool {
        match lock(&self.waits).remove(worker_id) {
            Some(waiting) => {
                debug!("cancelling the wait of removed worker {}", worker_id.short());
                waiting.terminate(Ok(Notification::Removed));
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self, worker_id: &WorkerId) -> bool {
        lock(&self.waits).contains_key(worker_id)
    }

    /// Number of pending waits.
    pub fn pending_waits(&self) -> usize {
        lock(&self.waits).len()
    }

    async fn poll(
        self,
        worker_id: WorkerId,
        version: String,
        ticket: u64,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            // the previous task was aborted; wait until it actually
            // stopped so that it cannot check the model concurrently
            let _ = previous.await;
        }
        loop {
            if self.receiver_dropped(&worker_id, ticket) {
                debug!("worker {} stopped waiting", worker_id.short());
                self.resolve(&worker_id, ticket, None);
                return;
            }
            match self.check(&version).await {
                Ok(None) => trace!("global model is still {}", version),
                Ok(Some(model)) => {
                    debug!(
                        "notifying {} of global model version {}",
                        worker_id.short(),
                        model.version
                    );
                    self.resolve(&worker_id, ticket, Some(Ok(Notification::Changed(model))));
                    return;
                }
                Err(e) => {
                    warn!("failed to check the global model version: {}", e);
                    self.resolve(&worker_id, ticket, Some(Err(e)));
                    return;
                }
            }
            sleep(self.check_interval).await;
        }
    }

    /// Return the global model if it is not at `version` anymore.
    async fn check(&self, version: &str) -> Result<Option<GlobalModel>, ApplicationError> {
        if self
            .app
            .is_global_model_most_recent(version.to_string())
            .await?
        {
            return Ok(None);
        }
        self.app.return_global_model().await.map(Some)
    }

    fn receiver_dropped(&self, worker_id: &WorkerId, ticket: u64) -> bool {
        lock(&self.waits)
            .get(worker_id)
            .map(|waiting| waiting.ticket == ticket && waiting.response_tx.is_closed())
            .unwrap_or(false)
    }

    /// Remove the wait with the given ticket and answer it. Does
    /// nothing if the wait was superseded in the meantime.
    fn resolve(&self, worker_id: &WorkerId, ticket: u64, result: Option<WaitResult>) {
        let mut waits = lock(&self.waits);
        match waits.get(worker_id) {
            Some(waiting) if waiting.ticket == ticket => {}
            _ => return,
        }
        if let Some(waiting) = waits.remove(worker_id) {
            if let Some(result) = result {
                let _ = waiting.response_tx.send(result);
            }
        }
    }
}
