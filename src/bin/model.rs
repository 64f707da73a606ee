//! Serves an in-memory model over the bridge, for running the
//! coordinator without a real application.

#[macro_use]
extern crate tracing;

use clap::{App, Arg};
use dcf_coordinator::{
    application::{memory::MemoryModel, settings::Settings},
    bridge::BridgeServer,
    common::logging,
};
use std::{process, sync::Arc};
use tokio::signal::ctrl_c;
use tracing::Instrument;

#[tokio::main]
async fn main() {
    let matches = App::new("model")
        .version(env!("CARGO_PKG_VERSION"))
        .about("In-memory federated learning model behind a bridge server")
        .arg(
            Arg::with_name("config")
                .short("c")
                .takes_value(true)
                .required(true)
                .help("Path to the config file"),
        )
        .get_matches();
    let config_file = matches.value_of("config").unwrap_or_default();

    let Settings {
        logging,
        bridge,
        model,
        server,
    } = Settings::new(config_file).unwrap_or_else(|err| {
        eprintln!("Problem parsing configuration file: {}", err);
        process::exit(1);
    });
    if let Err(err) = logging::configure(logging) {
        eprintln!("Failed to configure logging: {}", err);
        process::exit(1);
    }

    let bridge_server = BridgeServer::bind(bridge.bind_address.as_str(), server)
        .await
        .unwrap_or_else(|err| {
            error!("failed to bind the bridge server to {}: {}", bridge.bind_address, err);
            process::exit(1);
        });
    let app = Arc::new(MemoryModel::new(Vec::new(), model.updates_per_version));
    let bridge_server_task_handle =
        tokio::spawn(bridge_server.run(app).instrument(trace_span!("bridge_server")));

    tokio::select! {
        _ = bridge_server_task_handle => {
            info!("shutting down: bridge server task terminated");
        }
        result = ctrl_c() => {
            match result {
                Ok(()) => info!("shutting down: received SIGINT"),
                Err(e) => error!("shutting down: error while waiting for SIGINT: {}", e),
            }
        }
    }
}
