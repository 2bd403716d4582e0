//! End-to-end exercise of the `/ws` upgrade handler over a real TCP socket:
//! register, heartbeat, and point-to-point delivery between two live
//! connections on the same instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gateway_core::{GatewayParams, RoutedMessage};
use gateway_server::network::{NetworkConfig, NetworkModule};
use gateway_server::presence::InMemoryPresenceDirectory;
use gateway_server::router::{InboundDeliverer, Router, RouterError};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// No inter-gateway traffic in these tests: every connection lives on the
/// single instance under test, so direct messages never leave it.
#[derive(Default)]
struct NoopRouter;

#[async_trait]
impl Router for NoopRouter {
    async fn start(&self, _handler: Arc<dyn InboundDeliverer>) -> Result<(), RouterError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn route_to(&self, _target_gateway_id: &str, _msg: RoutedMessage, _deadline: Duration) -> Result<(), RouterError> {
        Ok(())
    }

    async fn broadcast(&self, _msg: RoutedMessage, _deadline: Duration) -> Result<(), RouterError> {
        Ok(())
    }
}

async fn spawn_gateway() -> (u16, tokio::task::JoinHandle<()>) {
    let mut module = NetworkModule::new(
        NetworkConfig::default(),
        "it-gw",
        GatewayParams::default(),
        Arc::new(InMemoryPresenceDirectory::new()),
        Arc::new(NoopRouter),
    );
    let port = module.start().await.expect("bind should succeed on an OS-assigned port");
    let handle = tokio::spawn(async move {
        module.serve(std::future::pending::<()>()).await.expect("serve should not error");
    });
    (port, handle)
}

async fn connect(port: u16) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.expect("ws handshake should succeed");
    stream
}

#[tokio::test]
async fn register_then_ping_round_trips() {
    let (port, _server) = spawn_gateway().await;
    let mut socket = connect(port).await;

    socket
        .send(WsMessage::Text(r#"{"type":"register","userId":"alice"}"#.into()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap(), r#"{"type":"registered"}"#);

    socket.send(WsMessage::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap(), r#"{"type":"pong"}"#);
}

#[tokio::test]
async fn message_to_offline_user_yields_error_frame() {
    let (port, _server) = spawn_gateway().await;
    let mut socket = connect(port).await;

    socket
        .send(WsMessage::Text(r#"{"type":"register","userId":"alice"}"#.into()))
        .await
        .unwrap();
    socket.next().await.unwrap().unwrap();

    socket
        .send(WsMessage::Text(r#"{"type":"message","to":"nobody","content":"hi"}"#.into()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(reply.contains(r#""type":"error""#), "expected an error frame, got {reply}");
}

#[tokio::test]
async fn direct_message_delivers_between_two_local_connections() {
    let (port, _server) = spawn_gateway().await;

    let mut alice = connect(port).await;
    alice
        .send(WsMessage::Text(r#"{"type":"register","userId":"alice"}"#.into()))
        .await
        .unwrap();
    alice.next().await.unwrap().unwrap();

    let mut bob = connect(port).await;
    bob.send(WsMessage::Text(r#"{"type":"register","userId":"bob"}"#.into())).await.unwrap();
    bob.next().await.unwrap().unwrap();

    alice
        .send(WsMessage::Text(r#"{"type":"message","to":"bob","content":"hello"}"#.into()))
        .await
        .unwrap();

    let delivered = bob.next().await.unwrap().unwrap().into_text().unwrap();
    assert_eq!(delivered, r#"{"type":"message","from":"alice","content":"hello"}"#);
}

#[tokio::test]
async fn malformed_frame_yields_error_without_closing_socket() {
    let (port, _server) = spawn_gateway().await;
    let mut socket = connect(port).await;

    socket.send(WsMessage::Text("not json".into())).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(reply.contains(r#""type":"error""#));

    socket
        .send(WsMessage::Text(r#"{"type":"register","userId":"carol"}"#.into()))
        .await
        .unwrap();
    let reply = socket.next().await.unwrap().unwrap().into_text().unwrap();
    assert_eq!(reply, r#"{"type":"registered"}"#);
}
