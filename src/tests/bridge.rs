use crate::{
    application::{memory::MemoryModel, Application, GlobalModel, MockApplication},
    bridge::{
        protocol::{Request, Response},
        BridgeClient,
        BridgeError,
        BridgeServer,
    },
    common::worker::{Outcome, WorkerId},
    coordinator::{
        key_store::NoopKeyStore,
        notifier::Notification,
        registry::WorkerRegistry,
        settings::{ApiSettings, NotifierSettings, RegistrySettings, StartupArgs},
        Coordinator,
    },
    tests::lib::{enable_logging, keypair, sign},
};
use anyhow::anyhow;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tarpc::{serde_transport::Transport, tokio_serde::formats::Json};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};

type RawTransport = Transport<TcpStream, Value, Value, Json<Value, Value>>;

fn startup_args() -> StartupArgs {
    StartupArgs {
        registry: RegistrySettings {
            server_mode_safe: true,
            key_list_file: None,
            load_last_session_workers: false,
            path_to_keys_db: "workers_db.json".into(),
        },
        api: ApiSettings {
            bind_address: "127.0.0.1:8080".parse().unwrap(),
        },
        notifier: NotifierSettings {
            model_check_interval: 20,
        },
    }
}

/// Start a bridge server for `app` on a random port.
async fn start_server<A: Application>(app: A) -> SocketAddr {
    let server = BridgeServer::bind("127.0.0.1:0", startup_args())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run(Arc::new(app)));
    addr
}

async fn raw_connection(addr: SocketAddr) -> RawTransport {
    let stream = TcpStream::connect(addr).await.unwrap();
    Transport::from((stream, Json::default()))
}

#[tokio::test]
async fn test_startup_args() {
    enable_logging();
    let addr = start_server(MemoryModel::new(vec![], 1)).await;
    let client = BridgeClient::new(addr.to_string(), None);
    assert_eq!(client.startup_args().await.unwrap(), startup_args());
}

#[tokio::test]
async fn test_callbacks_are_forwarded() {
    let model = MemoryModel::new(vec![9, 9], 1);
    let addr = start_server(model.clone()).await;
    let client = BridgeClient::new(addr.to_string(), Some(Duration::from_secs(5)));
    let worker = WorkerId::from("worker");

    client.register_worker(worker.clone()).await.unwrap();
    assert_eq!(model.registered_workers(), vec![worker.clone()]);

    assert!(client.is_global_model_most_recent("1".to_string()).await.unwrap());
    assert_eq!(
        client.return_global_model().await.unwrap(),
        GlobalModel {
            version: "1".to_string(),
            model: vec![9, 9],
        }
    );

    let status = client
        .receive_worker_update(worker.clone(), Bytes::from_static(&[1, 2, 3]))
        .await
        .unwrap();
    assert!(status.contains("Update received"));
    assert!(!client.is_global_model_most_recent("1".to_string()).await.unwrap());
    assert_eq!(client.return_global_model().await.unwrap().model, vec![1, 2, 3]);

    client.unregister_worker(worker).await.unwrap();
    assert!(model.registered_workers().is_empty());
}

#[tokio::test]
async fn test_concurrent_calls_are_not_mixed_up() {
    let model = MemoryModel::new(vec![], 0);
    let addr = start_server(model.clone()).await;
    let client = BridgeClient::new(addr.to_string(), None);
    model.publish(vec![]);

    let calls = (0..20).map(|i| {
        let client = client.clone();
        async move {
            let version = (i % 4).to_string();
            let most_recent = client
                .is_global_model_most_recent(version.clone())
                .await
                .unwrap();
            (version, most_recent)
        }
    });
    for (version, most_recent) in futures::future::join_all(calls).await {
        assert_eq!(most_recent, version == "2");
    }
}

#[tokio::test]
async fn test_application_failure() {
    let mut app = MockApplication::new();
    app.expect_return_global_model()
        .returning(|| Err(anyhow!("no model yet")));
    let addr = start_server(app).await;
    let client = BridgeClient::new(addr.to_string(), None);

    match client.call(Request::ReturnGlobalModel).await {
        Err(BridgeError::Remote(message)) => assert_eq!(message, "no model yet"),
        other => panic!("unexpected result: {:?}", other),
    }
    let error = client.return_global_model().await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<BridgeError>(),
        Some(BridgeError::Remote(_))
    ));
}

#[tokio::test]
async fn test_unknown_operation_gets_no_reply() {
    let addr = start_server(MemoryModel::new(vec![], 1)).await;
    let mut transport = raw_connection(addr).await;

    transport
        .send(json!({"op": "dance"}))
        .await
        .unwrap();
    assert!(timeout(Duration::from_millis(200), transport.next())
        .await
        .is_err());

    // the connection is still usable
    transport
        .send(json!({"op": "return_global_model"}))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(1), transport.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply["op"], "global_model");
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let addr = start_server(MemoryModel::new(vec![], 1)).await;
    let mut transport = raw_connection(addr).await;

    transport
        .send(json!({"version": "1"}))
        .await
        .unwrap();
    let next = timeout(Duration::from_secs(1), transport.next())
        .await
        .unwrap();
    assert!(!matches!(next, Some(Ok(_))));
}

#[tokio::test]
async fn test_unreachable_application() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = BridgeClient::new(addr.to_string(), None);
    assert!(matches!(
        client.call(Request::GetStartupArgs).await,
        Err(BridgeError::Connect(..))
    ));
}

#[tokio::test]
async fn test_timeout() {
    // accepts connections but never replies
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut connections = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            connections.push(stream);
        }
    });

    let client = BridgeClient::new(addr.to_string(), Some(Duration::from_millis(100)));
    assert!(matches!(
        client.call(Request::ReturnGlobalModel).await,
        Err(BridgeError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_unexpected_reply() {
    // a fake application that acknowledges everything
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut transport: Transport<_, Request, Response, Json<Request, Response>> =
                Transport::from((stream, Json::default()));
            if let Some(Ok(_)) = transport.next().await {
                let _ = transport.send(Response::Ack).await;
            }
        }
    });

    let client = BridgeClient::new(addr.to_string(), None);
    let error = client.return_global_model().await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<BridgeError>(),
        Some(BridgeError::UnexpectedResponse { .. })
    ));
}

#[tokio::test]
async fn test_coordinator_over_the_bridge() {
    enable_logging();
    let model = MemoryModel::new(b"v1".to_vec(), 1);
    let addr = start_server(model.clone()).await;
    let client = BridgeClient::new(addr.to_string(), None);
    let args = client.startup_args().await.unwrap();
    let coordinator = Coordinator::new(
        Arc::new(client),
        WorkerRegistry::new(true, Box::new(NoopKeyStore)),
        args.notifier.check_interval(),
    );

    let (signing_key, public_key) = keypair();
    let status = coordinator.add_worker(&public_key, true).await.unwrap();
    let worker_id = status.worker_id;
    assert_eq!(model.registered_workers(), vec![worker_id.clone()]);

    let phrase = coordinator.challenge_phrase(&worker_id).unwrap();
    let signed = sign(&signing_key, phrase.as_bytes());
    let wait = coordinator
        .wait_for_version_change(&worker_id, &signed, "1".to_string())
        .accepted()
        .unwrap();

    let update = Bytes::from_static(b"v2");
    let signed_update = sign(&signing_key, &Sha256::digest(&update));
    let outcome = coordinator
        .submit_update(&worker_id, &signed_update, update)
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let notification = timeout(Duration::from_secs(1), wait)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        notification,
        Notification::Changed(GlobalModel {
            version: "2".to_string(),
            model: b"v2".to_vec(),
        })
    );

    let outcome = coordinator
        .global_model(&worker_id, &signed)
        .await
        .unwrap();
    assert_eq!(outcome.accepted().unwrap().version, "2");

    coordinator.remove_worker(&worker_id).await.unwrap();
    assert!(model.registered_workers().is_empty());
    let outcome = coordinator.global_model(&worker_id, &signed).await.unwrap();
    assert_eq!(outcome, Outcome::InvalidWorker);
}
