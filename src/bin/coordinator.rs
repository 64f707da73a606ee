#[macro_use]
extern crate tracing;

use clap::{App, Arg};
use dcf_coordinator::{
    bridge::BridgeClient,
    common::logging,
    coordinator::{
        api::{self, AdminCredentials},
        registry::WorkerRegistry,
        settings::Settings,
        Coordinator,
    },
};
use std::{process, sync::Arc};
use tokio::signal::ctrl_c;
use tracing::Instrument;

#[tokio::main]
async fn main() {
    let matches = App::new("coordinator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Federated learning coordinator")
        .arg(
            Arg::with_name("config")
                .short("c")
                .takes_value(true)
                .required(true)
                .help("Path to the config file"),
        )
        .get_matches();
    let config_file = matches.value_of("config").unwrap_or_default();

    let Settings { logging, bridge } = Settings::new(config_file).unwrap_or_else(|err| {
        eprintln!("Problem parsing configuration file: {}", err);
        process::exit(1);
    });
    if let Err(err) = logging::configure(logging) {
        eprintln!("Failed to configure logging: {}", err);
        process::exit(1);
    }

    // the application decides how the coordinator runs
    let client = BridgeClient::from_settings(&bridge);
    let startup_args = client
        .startup_args()
        .instrument(trace_span!("startup_args"))
        .await
        .unwrap_or_else(|err| {
            error!("cannot reach the application at {}: {}", bridge.address, err);
            process::exit(1);
        });
    if let Err(err) = startup_args.validate() {
        error!("the application sent an invalid configuration: {}", err);
        process::exit(1);
    }
    let registry = WorkerRegistry::from_settings(&startup_args.registry).unwrap_or_else(|err| {
        error!("failed to load the workers: {}", err);
        process::exit(1);
    });

    let coordinator = Coordinator::new(
        Arc::new(client),
        registry,
        startup_args.notifier.check_interval(),
    );
    let api_server = api::serve(
        startup_args.api.bind_address,
        coordinator,
        AdminCredentials::from_env(),
    )
    .instrument(trace_span!("api_server"));
    let api_server_task_handle = tokio::spawn(api_server);

    tokio::select! {
        result = api_server_task_handle => {
            match result {
                Ok(Ok(())) => info!("shutting down: API task terminated"),
                Ok(Err(e)) => error!("shutting down: {}", e),
                Err(e) => error!("shutting down: API task failed: {}", e),
            }
        }
        result = ctrl_c() => {
            match result {
                Ok(()) => info!("shutting down: received SIGINT"),
                Err(e) => error!("shutting down: error while waiting for SIGINT: {}", e),
            }
        }
    }
}
