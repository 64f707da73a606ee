use super::protocol::{Request, Response};
use crate::{
    application::{Application, ApplicationError, ApplicationResult, GlobalModel},
    common::worker::WorkerId,
    coordinator::settings::{BridgeSettings, StartupArgs},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::{io, time::Duration};
use tarpc::{serde_transport::Transport, tokio_serde::formats::Json};
use thiserror::Error;
use tokio::net::TcpStream;

type ClientTransport = Transport<TcpStream, Response, Request, Json<Response, Request>>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to connect to the application at {0}: {1}")]
    Connect(String, #[source] io::Error),
    #[error("bridge I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("the application closed the connection without replying")]
    Closed,
    #[error("no reply from the application within {0:?}")]
    Timeout(Duration),
    #[error("unexpected reply to {request}: {response:?}")]
    UnexpectedResponse {
        request: &'static str,
        response: Response,
    },
    #[error("the application failed: {0}")]
    Remote(String),
}

#[derive(Debug, Clone)]
/// The coordinator side of the bridge. It implements [`Application`]
/// by forwarding every callback to the application process.
pub struct BridgeClient {
    address: String,
    timeout: Option<Duration>,
}

impl BridgeClient {
    /// Create a client for the bridge server at `address`. Calls are
    /// bounded by `timeout` if it is set.
    pub fn new(address: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.address.clone(), settings.request_timeout())
    }

    /// Fetch the configuration of the coordinator.
    pub async fn startup_args(&self) -> Result<StartupArgs, BridgeError> {
        match self.call(Request::GetStartupArgs).await? {
            Response::StartupArgs(args) => Ok(args),
            response => Err(unexpected(Request::GetStartupArgs.name(), response)),
        }
    }

    /// Send a request and wait for the reply. An `error` reply is
    /// returned as [`BridgeError::Remote`].
    pub async fn call(&self, request: Request) -> Result<Response, BridgeError> {
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(request))
                .await
                .map_err(|_| BridgeError::Timeout(timeout))??,
            None => self.exchange(request).await?,
        };
        match response {
            Response::Error { message } => Err(BridgeError::Remote(message)),
            response => Ok(response),
        }
    }

    async fn exchange(&self, request: Request) -> Result<Response, BridgeError> {
        trace!("sending {} request to {}", request.name(), self.address);
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| BridgeError::Connect(self.address.clone(), e))?;
        let mut transport: ClientTransport = Transport::from((stream, Json::default()));
        transport.send(request).await?;
        match transport.next().await {
            Some(response) => Ok(response?),
            None => Err(BridgeError::Closed),
        }
    }
}

fn unexpected(request: &'static str, response: Response) -> BridgeError {
    error!("unexpected reply to {}: {:?}", request, response);
    BridgeError::UnexpectedResponse { request, response }
}

fn unexpected_reply(request: &'static str, response: Response) -> ApplicationError {
    unexpected(request, response).into()
}

#[async_trait]
impl Application for BridgeClient {
    async fn register_worker(&self, worker_id: WorkerId) -> ApplicationResult<()> {
        match self.call(Request::RegisterWorker { worker_id }).await? {
            Response::Ack => Ok(()),
            response => Err(unexpected_reply("register_worker", response)),
        }
    }

    async fn unregister_worker(&self, worker_id: WorkerId) -> ApplicationResult<()> {
        match self.call(Request::UnregisterWorker { worker_id }).await? {
            Response::Ack => Ok(()),
            response => Err(unexpected_reply("unregister_worker", response)),
        }
    }

    async fn return_global_model(&self) -> ApplicationResult<GlobalModel> {
        match self.call(Request::ReturnGlobalModel).await? {
            Response::GlobalModel(model) => Ok(model),
            response => Err(unexpected_reply("return_global_model", response)),
        }
    }

    async fn is_global_model_most_recent(&self, version: String) -> ApplicationResult<bool> {
        match self
            .call(Request::IsGlobalModelMostRecent { version })
            .await?
        {
            Response::MostRecent { most_recent } => Ok(most_recent),
            response => Err(unexpected_reply("is_global_model_most_recent", response)),
        }
    }

    async fn receive_worker_update(
        &self,
        worker_id: WorkerId,
        update: Bytes,
    ) -> ApplicationResult<String> {
        let request = Request::ReceiveWorkerUpdate {
            worker_id,
            update: update.to_vec(),
        };
        match self.call(request).await? {
            Response::UpdateStatus { status } => Ok(status),
            response => Err(unexpected_reply("receive_worker_update", response)),
        }
    }
}
