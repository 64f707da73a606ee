//! The HTTP API of the coordinator.
//!
//! Worker-facing routes answer authorization failures with the plain
//! text markers [`INVALID_WORKER`] and [`UNREGISTERED_WORKER`]. Admin
//! routes are protected by HTTP basic authentication and reply with
//! JSON objects that carry either a `success_message` or an
//! `error_message`.

use crate::{
    application::{Application, ApplicationError, GlobalModel},
    common::worker::{Outcome, WorkerId, INVALID_WORKER, UNREGISTERED_WORKER},
    coordinator::{
        notifier::Notification,
        service::{AdminError, Coordinator},
    },
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use std::{convert::Infallible, env, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::Instrument;
use warp::{
    http::StatusCode,
    reply::{Reply, Response},
    Filter, Rejection,
};

/// Header carrying the signature of an update.
pub const SIGNED_PHRASE_HEADER: &str = "x-signed-phrase";

#[derive(Debug, Error)]
pub enum RestError {
    #[error("failed to start the HTTP server: {0}")]
    Bind(#[from] warp::Error),
}

#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read the credentials from `ADMIN_USERNAME` and `ADMIN_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        match (env::var("ADMIN_USERNAME"), env::var("ADMIN_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(Self::new(username, password)),
            _ => None,
        }
    }

    /// Check the value of an `Authorization` header.
    fn check(&self, header: &str) -> bool {
        let encoded = match header.strip_prefix("Basic ") {
            Some(encoded) => encoded.trim(),
            None => return false,
        };
        let decoded = match STANDARD.decode(encoded).map(String::from_utf8) {
            Ok(Ok(decoded)) => decoded,
            _ => return false,
        };
        match decoded.split_once(':') {
            Some((username, password)) => username == self.username && password == self.password,
            None => false,
        }
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    public_key_str: String,
    #[serde(default)]
    signed_phrase: String,
}

#[derive(Deserialize)]
struct GlobalModelRequest {
    worker_id: WorkerId,
    signed_phrase: String,
}

#[derive(Deserialize)]
struct WaitRequest {
    worker_id: WorkerId,
    signed_phrase: String,
    /// Any JSON value; strings are used as is.
    last_worker_model_version: serde_json::Value,
}

#[derive(Deserialize)]
struct AddWorkerRequest {
    public_key_str: String,
    registration_status: bool,
}

#[derive(Deserialize)]
struct WorkerStatusRequest {
    registration_status: bool,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WaitReply {
    Changed(GlobalModel),
    Superseded,
    Removed,
}

#[derive(Serialize)]
struct AdminSuccess {
    success_message: String,
    worker_id: WorkerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    registration_status: Option<bool>,
}

#[derive(Serialize)]
struct AdminFailure {
    error_message: String,
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Run the HTTP server until the process stops.
pub async fn serve<A: Application>(
    bind_address: SocketAddr,
    coordinator: Coordinator<A>,
    admin: Option<AdminCredentials>,
) -> Result<(), RestError> {
    if admin.is_none() {
        warn!("no admin credentials, the admin API is disabled");
    }
    let (address, server) =
        warp::serve(routes(coordinator, admin)).try_bind_ephemeral(bind_address)?;
    info!("starting HTTP server on {}", address);
    server.await;
    Ok(())
}

pub fn routes<A: Application>(
    coordinator: Coordinator<A>,
    admin: Option<AdminCredentials>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let admin = admin.map(Arc::new);

    let challenge_phrase = warp::path!("challenge_phrase" / WorkerId)
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_challenge_phrase);

    let register = warp::path!("register_worker")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_register);

    let global_model = warp::path!("return_global_model")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_global_model);

    let wait = warp::path!("notify_me_if_gm_version_updated")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_wait);

    let update = warp::path!("receive_worker_update" / WorkerId)
        .and(warp::post())
        .and(warp::header::<String>(SIGNED_PHRASE_HEADER))
        .and(warp::body::bytes())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_update);

    let list_workers = warp::path!("workers")
        .and(warp::get())
        .and(with_admin(admin.clone()))
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_list_workers);

    let add_worker = warp::path!("workers")
        .and(warp::post())
        .and(with_admin(admin.clone()))
        .and(warp::body::json())
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_add_worker);

    let remove_worker = warp::path!("workers" / WorkerId)
        .and(warp::delete())
        .and(with_admin(admin.clone()))
        .and(with_coordinator(coordinator.clone()))
        .and_then(handle_remove_worker);

    let set_worker_status = warp::path!("workers" / WorkerId)
        .and(warp::put())
        .and(with_admin(admin))
        .and(warp::body::json())
        .and(with_coordinator(coordinator))
        .and_then(handle_set_worker_status);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec![
            "origin",
            "accept",
            "authorization",
            "content-type",
            "x-requested-with",
            "x-csrf-token",
            SIGNED_PHRASE_HEADER,
        ]);

    challenge_phrase
        .or(register)
        .or(global_model)
        .or(wait)
        .or(update)
        .or(list_workers)
        .or(add_worker)
        .or(remove_worker)
        .or(set_worker_status)
        .with(cors)
        .recover(handle_reject)
        .with(warp::log("http"))
}

fn with_coordinator<A: Application>(
    coordinator: Coordinator<A>,
) -> impl Filter<Extract = (Coordinator<A>,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}

/// Reject requests without valid admin credentials. Every request is
/// rejected when there are no credentials.
fn with_admin(
    admin: Option<Arc<AdminCredentials>>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let admin = admin.clone();
            async move {
                match (admin, header) {
                    (Some(admin), Some(header)) if admin.check(&header) => Ok(()),
                    _ => {
                        warn!("rejecting unauthorized admin request");
                        Err(warp::reject::custom(Unauthorized))
                    }
                }
            }
        })
        .untuple_one()
}

async fn handle_challenge_phrase<A: Application>(
    worker_id: WorkerId,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    Ok(match coordinator.challenge_phrase(&worker_id) {
        Some(phrase) => phrase.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn handle_register<A: Application>(
    request: RegisterRequest,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let span = trace_span!("api_register_request");
    let result = coordinator
        .register(&request.public_key_str, &request.signed_phrase)
        .instrument(span)
        .await;
    Ok(match result {
        Ok(outcome) => outcome_reply(outcome, |worker_id| worker_id.to_string().into_response()),
        Err(e) => application_failure(e),
    })
}

async fn handle_global_model<A: Application>(
    request: GlobalModelRequest,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let span = trace_span!("api_global_model_request", worker_id = request.worker_id.short());
    let result = coordinator
        .global_model(&request.worker_id, &request.signed_phrase)
        .instrument(span)
        .await;
    Ok(match result {
        Ok(outcome) => outcome_reply(outcome, |model| warp::reply::json(&model).into_response()),
        Err(e) => application_failure(e),
    })
}

async fn handle_wait<A: Application>(
    request: WaitRequest,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let version = match request.last_worker_model_version {
        serde_json::Value::String(version) => version,
        other => other.to_string(),
    };
    let span = trace_span!("api_wait_request", worker_id = request.worker_id.short());
    let wait = match coordinator.wait_for_version_change(
        &request.worker_id,
        &request.signed_phrase,
        version,
    ) {
        Outcome::Accepted(wait) => wait,
        Outcome::InvalidWorker => return Ok(INVALID_WORKER.into_response()),
        Outcome::UnregisteredWorker => return Ok(UNREGISTERED_WORKER.into_response()),
    };
    Ok(match wait.instrument(span).await {
        Ok(Notification::Changed(model)) => warp::reply::json(&WaitReply::Changed(model)),
        Ok(Notification::Superseded) => warp::reply::json(&WaitReply::Superseded),
        Ok(Notification::Removed) => warp::reply::json(&WaitReply::Removed),
        Err(e) => return Ok(application_failure(e)),
    }
    .into_response())
}

async fn handle_update<A: Application>(
    worker_id: WorkerId,
    signed_update: String,
    update: Bytes,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let span = trace_span!("api_update_request", worker_id = worker_id.short());
    let result = coordinator
        .submit_update(&worker_id, &signed_update, update)
        .instrument(span)
        .await;
    Ok(match result {
        Ok(outcome) => outcome_reply(outcome, |status| status.into_response()),
        Err(e) => application_failure(e),
    })
}

async fn handle_list_workers<A: Application>(
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    Ok(warp::reply::json(&coordinator.list_workers()).into_response())
}

async fn handle_add_worker<A: Application>(
    request: AddWorkerRequest,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let result = coordinator
        .add_worker(&request.public_key_str, request.registration_status)
        .await;
    Ok(match result {
        Ok(status) => admin_success(AdminSuccess {
            success_message: format!("Successfully added worker {}.", status.worker_id.short()),
            worker_id: status.worker_id,
            registration_status: Some(status.registration_status),
        }),
        Err(e) => admin_failure(e),
    })
}

async fn handle_remove_worker<A: Application>(
    worker_id: WorkerId,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    Ok(match coordinator.remove_worker(&worker_id).await {
        Ok(worker_id) => admin_success(AdminSuccess {
            success_message: format!("Successfully removed worker {}.", worker_id.short()),
            worker_id,
            registration_status: None,
        }),
        Err(e) => admin_failure(e),
    })
}

async fn handle_set_worker_status<A: Application>(
    worker_id: WorkerId,
    request: WorkerStatusRequest,
    coordinator: Coordinator<A>,
) -> Result<Response, Infallible> {
    let result = coordinator
        .set_worker_status(&worker_id, request.registration_status)
        .await;
    Ok(match result {
        Ok(status) => admin_success(AdminSuccess {
            success_message: format!(
                "Successfully changed status for worker {}.",
                status.worker_id.short()
            ),
            worker_id: status.worker_id,
            registration_status: Some(status.registration_status),
        }),
        Err(e) => admin_failure(e),
    })
}

fn outcome_reply<T, F>(outcome: Outcome<T>, accepted: F) -> Response
where
    F: FnOnce(T) -> Response,
{
    match outcome {
        Outcome::Accepted(value) => accepted(value),
        Outcome::InvalidWorker => INVALID_WORKER.into_response(),
        Outcome::UnregisteredWorker => UNREGISTERED_WORKER.into_response(),
    }
}

fn application_failure(error: ApplicationError) -> Response {
    warn!("application failure: {}", error);
    warp::reply::with_status(error.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

fn admin_success(success: AdminSuccess) -> Response {
    warp::reply::json(&success).into_response()
}

fn admin_failure(error: AdminError) -> Response {
    let code = match error {
        AdminError::Validation(_) => StatusCode::BAD_REQUEST,
        AdminError::AlreadyExists(_) => StatusCode::CONFLICT,
        AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        AdminError::Inconsistency(_) | AdminError::Application(_) => {
            error!("admin operation failed: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let failure = AdminFailure {
        error_message: error.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&failure), code).into_response()
}

async fn handle_reject(err: Rejection) -> Result<Response, Infallible> {
    if err.find::<Unauthorized>().is_some() {
        return Ok(warp::reply::with_header(
            StatusCode::UNAUTHORIZED,
            "www-authenticate",
            "Basic realm=\"admin\"",
        )
        .into_response());
    }
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        let failure = AdminFailure {
            error_message: e.to_string(),
        };
        return Ok(
            warp::reply::with_status(warp::reply::json(&failure), StatusCode::BAD_REQUEST)
                .into_response(),
        );
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        StatusCode::FORBIDDEN
    } else {
        error!("unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(code.into_response())
}
