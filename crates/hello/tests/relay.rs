use std::sync::Arc;
use std::time::Duration;

use mondo_hello::{Blob, HelloClient, HelloError, HelloService, Input, Relay, ServerConfig, SessionId};
use mondo_rpc::{Outcome, ServerHandle, StatusCode};
use mondo_transport::TcpListener;
use pretty_assertions::assert_eq;

const WAIT: Duration = Duration::from_secs(5);

fn spawn_server(config: ServerConfig) -> (ServerHandle<TcpListener>, Arc<Relay>, String) {
	let _ = tracing_subscriber::fmt::try_init();
	let relay = Arc::new(Relay::new(&config));
	let server = HelloService::new(Arc::clone(&relay)).bind(&config).unwrap();
	let uri = format!("ipv4:127.0.0.1:{}", server.port());
	(server.spawn(), relay, uri)
}

fn config() -> ServerConfig {
	ServerConfig {
		port: 0,
		..ServerConfig::default()
	}
}

#[tokio::test]
async fn sessions_exchange_blobs_through_the_server() {
	let (server, relay, uri) = spawn_server(config());
	let alice = HelloClient::connect(&uri).unwrap();
	let bob = HelloClient::connect(&uri).unwrap();

	let a = tokio::time::timeout(WAIT, alice.start_session("alice", None)).await.unwrap().unwrap();
	let b = tokio::time::timeout(WAIT, bob.start_session("bob", None)).await.unwrap().unwrap();
	assert_ne!(a.session_id, b.session_id);
	assert_eq!(a.blobs, vec![Blob::text("greeting", "hello, alice")]);
	assert_eq!(relay.sessions().len(), 2);

	let sent = Input {
		session_id: a.session_id,
		blobs: vec![Blob::text("chat", "hi bob")],
	};
	let out = alice.poll_in_out(&sent).await.unwrap();
	assert!(out.blobs.is_empty());

	let out = bob.poll(b.session_id).await.unwrap();
	assert_eq!(out.error, None);
	assert_eq!(out.blobs, sent.blobs);
	assert!(bob.poll(b.session_id).await.unwrap().blobs.is_empty());

	alice.stop().await;
	bob.stop().await;
	tokio::time::timeout(WAIT, server.stop()).await.unwrap();
}

#[tokio::test]
async fn application_and_rpc_failures_stay_apart() {
	let (server, _relay, uri) = spawn_server(ServerConfig {
		token: Some("secret".into()),
		..config()
	});
	let client = HelloClient::connect(&uri).unwrap();

	match client.start_session("mallory", Some("guess".into())).await {
		Err(HelloError::Status(status)) => assert_eq!(status.code(), StatusCode::Unauthenticated),
		other => panic!("expected unauthenticated, got {other:?}"),
	}

	let out = client.poll(SessionId(42)).await.unwrap();
	assert!(out.error.unwrap().contains("unknown session"));

	let session = client.start_session("ada", Some("secret".into())).await.unwrap();
	assert_eq!(session.blobs.len(), 1);

	client.stop().await;
	server.stop().await;
}

#[tokio::test]
async fn calls_to_a_stopped_server_fail() {
	let (server, _relay, uri) = spawn_server(config());
	tokio::time::timeout(WAIT, server.stop()).await.unwrap();
	tokio::time::timeout(WAIT, server.listener().wait()).await.unwrap();

	let client = HelloClient::connect(&uri).unwrap();
	match tokio::time::timeout(WAIT, client.start_session("late", None)).await.unwrap() {
		Err(HelloError::NoReply(Outcome::Failed)) => {}
		other => panic!("expected failed call, got {other:?}"),
	}
	client.stop().await;
}

#[tokio::test]
async fn stopping_the_client_settles_outstanding_calls() {
	let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let uri = format!("127.0.0.1:{}", silent.local_addr().unwrap().port());
	let client = HelloClient::connect(&uri).unwrap();

	let pending = {
		let client = client.clone();
		tokio::spawn(async move { client.start_session("waiting", None).await })
	};
	let _conn = tokio::time::timeout(WAIT, silent.accept()).await.unwrap().unwrap();

	client.stop().await;
	match tokio::time::timeout(WAIT, pending).await.unwrap().unwrap() {
		Err(HelloError::NoReply(Outcome::Shutdown)) => {}
		other => panic!("expected shutdown settlement, got {other:?}"),
	}
}
