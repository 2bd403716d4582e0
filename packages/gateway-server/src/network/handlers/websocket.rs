//! WebSocket connection handler (spec §4.4, C4): per-socket state machine
//! from upgrade to teardown.
//!
//! ```text
//!   NEW ─ upgrade ─▶ UNAUTH ─ register(ok) ─▶ ACTIVE ─ close/io/timeout ─▶ CLOSED
//!                        │                       │
//!                        └── bad frame ──────────┤ (stay, send error)
//!                                                │
//!                                                └── heartbeat expiry ──▶ CLOSED
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use gateway_core::{ClientFrame, RoutedMessage, ServerFrame};
use tracing::{debug, warn};

use super::AppState;
use crate::network::connection::Connection;
use crate::network::ConnectionRegistry;
use crate::presence::{LookupOutcome, PresenceDirectory, RegisterOutcome};
use crate::router::InboundDeliverer;

/// Deadline applied to individual presence and router calls made from the
/// handler (spec §5: "every presence operation and every router send
/// takes a caller-supplied deadline (recommended default 1-2 seconds)").
const IO_DEADLINE: Duration = Duration::from_secs(2);

pub async fn ws_upgrade_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Delivers inbound inter-gateway messages to locally attached sockets
/// (spec §4.4 "inbound delivery path").
pub struct LocalDeliverer {
    pub registry: Arc<ConnectionRegistry>,
}

#[async_trait]
impl InboundDeliverer for LocalDeliverer {
    async fn deliver(&self, msg: RoutedMessage) {
        let Some(conn) = self.registry.get_by_user(&msg.to) else {
            // The recipient disconnected since presence was consulted;
            // acceptable per spec non-goals.
            return;
        };
        conn.send(ServerFrame::Message {
            from: msg.from,
            content: msg.content,
        })
        .await;
    }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = state.registry.next_id();
    let (conn, outbound_rx) = Connection::new(conn_id);

    let (sink, stream) = socket.split();
    let write_task = tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&conn)));

    let registered = AtomicBool::new(false);
    let user_id = read_loop(stream, &conn, &state, &registered).await;

    conn.close();
    let _ = write_task.await;

    if registered.load(Ordering::SeqCst) {
        state.registry.remove(conn_id);
        if let Err(err) = state.presence.remove(&user_id, IO_DEADLINE).await {
            warn!(%err, %user_id, "presence removal failed during teardown");
        }
    }
}

/// Drains the outbound queue to the socket until told to close.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<ServerFrame>,
    conn: Arc<Connection>,
) {
    loop {
        tokio::select! {
            () = conn.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                match frame.encode() {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "failed to encode outbound frame"),
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Drives the read side of the state machine; returns the `userId` the
/// connection ended up registered as (empty if it never left `UNAUTH`).
async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    conn: &Arc<Connection>,
    state: &AppState,
    registered: &AtomicBool,
) -> String {
    let mut heartbeat_task: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%err, "websocket read error");
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };

        let frame = match ClientFrame::decode(&text) {
            Ok(frame) => frame,
            Err(_) => {
                conn.send(ServerFrame::error("malformed frame")).await;
                continue;
            }
        };

        let is_active = registered.load(Ordering::SeqCst);

        match frame {
            ClientFrame::Register { user_id } if !is_active => {
                if user_id.is_empty() {
                    conn.send(ServerFrame::error("userId must not be empty")).await;
                    continue;
                }

                state.registry.add(&user_id, conn);

                if let Err(err) = state
                    .presence
                    .register(
                        &user_id,
                        &state.gateway_id,
                        conn.conn_id.0,
                        now_ts(),
                        state.params.presence_ttl,
                        IO_DEADLINE,
                    )
                    .await
                {
                    warn!(%err, %user_id, "presence registration failed");
                }

                registered.store(true, Ordering::SeqCst);
                conn.send(ServerFrame::registered()).await;
                heartbeat_task = Some(spawn_heartbeat_watcher(Arc::clone(conn), state.params.heartbeat_timeout, state.params.heartbeat_interval));
            }
            ClientFrame::Ping if is_active => {
                conn.touch_ping();
                let user_id = conn.user_id();
                if let Err(err) = state
                    .presence
                    .refresh(&user_id, now_ts(), state.params.presence_ttl, IO_DEADLINE)
                    .await
                {
                    warn!(%err, %user_id, "presence refresh failed");
                }
                conn.send(ServerFrame::Pong).await;
            }
            ClientFrame::Message { to, content } if is_active => {
                if to.is_empty() {
                    conn.send(ServerFrame::error("to must not be empty")).await;
                    continue;
                }
                handle_outbound_message(conn, state, &to, content).await;
            }
            _ => {
                conn.send(ServerFrame::error("Unknown message type")).await;
            }
        }
    }

    if let Some(task) = heartbeat_task {
        task.abort();
    }

    conn.user_id()
}

async fn handle_outbound_message(conn: &Arc<Connection>, state: &AppState, to: &str, content: String) {
    let from = conn.user_id();
    match state.presence.lookup(to, IO_DEADLINE).await {
        Ok(LookupOutcome::Offline) => {
            metrics::counter!("gateway_presence_lookup_total", "outcome" => "miss").increment(1);
            conn.send(ServerFrame::error(format!("{to} is offline"))).await;
        }
        Ok(LookupOutcome::Online(record)) => {
            metrics::counter!("gateway_presence_lookup_total", "outcome" => "hit").increment(1);
            let routed = RoutedMessage::direct(from, to, content);
            let started = std::time::Instant::now();
            let result = state.router.route_to(&record.gateway_id, routed, IO_DEADLINE).await;
            metrics::histogram!("gateway_router_route_latency_seconds").record(started.elapsed().as_secs_f64());
            if let Err(err) = result {
                conn.send(ServerFrame::error(format!("routing failed: {err}"))).await;
            }
        }
        Err(err) => {
            conn.send(ServerFrame::error(format!("presence lookup failed: {err}"))).await;
        }
    }
}

/// Cooperative heartbeat watcher (spec §4.4). Closes the socket if no
/// `ping` has arrived within `timeout`, and exits once the connection is
/// otherwise closed.
fn spawn_heartbeat_watcher(
    conn: Arc<Connection>,
    timeout: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = conn.closed() => break,
                _ = ticker.tick() => {
                    if conn.last_ping().elapsed() > timeout {
                        conn.close();
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::presence::InMemoryPresenceDirectory;
    use crate::router::test_support::RecordingRouter;
    use gateway_core::GatewayParams;
    use std::time::Instant;

    fn test_state() -> AppState {
        AppState {
            gateway_id: Arc::from("gw-1"),
            registry: Arc::new(ConnectionRegistry::new()),
            presence: Arc::new(InMemoryPresenceDirectory::new()),
            router: Arc::new(RecordingRouter::default()),
            params: GatewayParams::default(),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn deliver_drops_silently_when_recipient_absent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let deliverer = LocalDeliverer { registry };
        // Must not panic nor block.
        deliverer.deliver(RoutedMessage::direct("a", "ghost", "hi")).await;
    }

    #[tokio::test]
    async fn deliver_enqueues_message_frame_for_present_recipient() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = Connection::new(registry.next_id());
        registry.add("bob", &conn);

        let deliverer = LocalDeliverer { registry: Arc::clone(&registry) };
        deliverer.deliver(RoutedMessage::direct("alice", "bob", "hi")).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame,
            ServerFrame::Message {
                from: "alice".to_string(),
                content: "hi".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn message_to_offline_user_reports_error_and_does_not_route() {
        let state = test_state();
        let (conn, mut rx) = Connection::new(state.registry.next_id());
        *conn.user_id.lock() = "alice".to_string();

        handle_outbound_message(&conn, &state, "ghost", "hi".to_string()).await;

        match rx.recv().await.unwrap() {
            ServerFrame::Error { .. } => {}
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_to_online_user_routes_to_owning_gateway() {
        let router = Arc::new(RecordingRouter::default());
        let mut state = test_state();
        state.router = Arc::clone(&router) as Arc<dyn crate::router::Router>;

        state
            .presence
            .register("bob", "gw-2", 42, 100, state.params.presence_ttl, IO_DEADLINE)
            .await
            .unwrap();

        let (conn, _rx) = Connection::new(state.registry.next_id());
        *conn.user_id.lock() = "alice".to_string();

        handle_outbound_message(&conn, &state, "bob", "hi".to_string()).await;

        let routed = router.routed.lock().unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, "gw-2");
        assert_eq!(routed[0].1.to, "bob");
    }
}
