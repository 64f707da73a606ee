use super::protocol::{Request, Response};
use crate::{application::Application, coordinator::settings::StartupArgs};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc};
use tarpc::{serde_transport::Transport, tokio_serde::formats::Json};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::Instrument;

type ServerTransport = Transport<TcpStream, Request, Response, Json<Request, Response>>;

/// The application side of the bridge. It serves the requests of the
/// coordinator with an [`Application`].
pub struct BridgeServer {
    listener: TcpListener,
    startup_args: Arc<StartupArgs>,
}

impl BridgeServer {
    /// Bind the server. `startup_args` is what the coordinator gets
    /// when it starts.
    pub async fn bind<T: ToSocketAddrs>(addr: T, startup_args: StartupArgs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            startup_args: Arc::new(startup_args),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections forever. Each connection is handled in its
    /// own task.
    pub async fn run<A: Application>(self, app: Arc<A>) {
        info!("bridge server listening on {:?}", self.listener.local_addr());
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let span = trace_span!("bridge_connection", peer = %peer);
                    tokio::spawn(
                        serve_connection(stream, app.clone(), self.startup_args.clone())
                            .instrument(span),
                    );
                }
                Err(e) => error!("failed to accept bridge connection: {}", e),
            }
        }
    }
}

async fn serve_connection<A: Application>(
    stream: TcpStream,
    app: Arc<A>,
    startup_args: Arc<StartupArgs>,
) {
    let mut transport: ServerTransport = Transport::from((stream, Json::default()));
    while let Some(frame) = transport.next().await {
        let request = match frame {
            Ok(request) => request,
            Err(e) => {
                warn!("closing bridge connection after a malformed frame: {}", e);
                return;
            }
        };
        let response = match dispatch(app.as_ref(), &startup_args, request).await {
            Some(response) => response,
            None => continue,
        };
        if let Err(e) = transport.send(response).await {
            warn!("failed to send bridge reply: {}", e);
            return;
        }
    }
    trace!("bridge connection closed");
}

/// Handle a request with the application. Returns `None` if there is
/// nothing to reply.
async fn dispatch<A: Application>(
    app: &A,
    startup_args: &StartupArgs,
    request: Request,
) -> Option<Response> {
    debug!("handling {} request", request.name());
    let result = match request {
        Request::GetStartupArgs => Ok(Response::StartupArgs(startup_args.clone())),
        Request::RegisterWorker { worker_id } => {
            app.register_worker(worker_id).await.map(|()| Response::Ack)
        }
        Request::UnregisterWorker { worker_id } => {
            app.unregister_worker(worker_id).await.map(|()| Response::Ack)
        }
        Request::ReturnGlobalModel => app.return_global_model().await.map(Response::GlobalModel),
        Request::IsGlobalModelMostRecent { version } => app
            .is_global_model_most_recent(version)
            .await
            .map(|most_recent| Response::MostRecent { most_recent }),
        Request::ReceiveWorkerUpdate { worker_id, update } => app
            .receive_worker_update(worker_id, Bytes::from(update))
            .await
            .map(|status| Response::UpdateStatus { status }),
        Request::Unrecognized => {
            error!("unrecognized bridge operation, not replying");
            return None;
        }
    };
    Some(result.unwrap_or_else(|e| {
        warn!("application failed: {}", e);
        Response::Error {
            message: e.to_string(),
        }
    }))
}
