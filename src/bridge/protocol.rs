use crate::{application::GlobalModel, common::worker::WorkerId, coordinator::settings::StartupArgs};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
/// A request sent by the coordinator to the application.
pub enum Request {
    GetStartupArgs,
    RegisterWorker {
        worker_id: WorkerId,
    },
    UnregisterWorker {
        worker_id: WorkerId,
    },
    ReturnGlobalModel,
    IsGlobalModelMostRecent {
        version: String,
    },
    ReceiveWorkerUpdate {
        worker_id: WorkerId,
        #[serde(with = "hex")]
        update: Vec<u8>,
    },
    /// Any operation this version of the protocol does not know.
    #[serde(other)]
    Unrecognized,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetStartupArgs => "get_startup_args",
            Request::RegisterWorker { .. } => "register_worker",
            Request::UnregisterWorker { .. } => "unregister_worker",
            Request::ReturnGlobalModel => "return_global_model",
            Request::IsGlobalModelMostRecent { .. } => "is_global_model_most_recent",
            Request::ReceiveWorkerUpdate { .. } => "receive_worker_update",
            Request::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
/// The reply of the application.
pub enum Response {
    StartupArgs(StartupArgs),
    Ack,
    GlobalModel(GlobalModel),
    MostRecent { most_recent: bool },
    UpdateStatus { status: String },
    /// The application failed to handle the request.
    Error { message: String },
}
