//! Connection registry (spec §3 `ConnectionRegistry`, §4.2, C2): a
//! per-instance bidirectional `userId ⇄ Connection` index with heartbeat
//! tracking.
//!
//! Lock-free concurrent tracking via `DashMap`, generalized to the dual
//! `byUser`/`byConn` index the contract requires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use gateway_core::ServerFrame;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

/// Locally unique connection identifier, assigned at socket accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Bounded outbound queue capacity. A slow client applies backpressure to
/// its own delivery path without blocking the rest of the registry (spec
/// §5's "per-connection write mutex" is realized here as a single-consumer
/// channel: the handler's write task is the only drainer, so sends are
/// totally ordered).
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// A single attached socket (spec §3 `Connection`).
///
/// Mutated only by its owning handler loop, with the exception of
/// `last_ping`, which the handler also updates on every `ping` frame —
/// there is no other writer. `close` is the one cross-task entry point:
/// the registry calls it on supersession and sweep.
pub struct Connection {
    pub conn_id: ConnectionId,
    pub user_id: Mutex<String>,
    pub last_ping: Mutex<Instant>,
    /// Sender half of the outbound frame queue; the handler's write task
    /// holds the receiver and is the sole writer to the socket, so every
    /// sender (the handler's own send path and the inbound delivery path)
    /// is automatically serialized.
    outbound: mpsc::Sender<ServerFrame>,
    /// Set before `close_notify` fires, so a task calling `closed()` after
    /// the notification already fired still observes the close instead of
    /// waiting forever (`Notify::notify_waiters` only wakes tasks already
    /// parked on it).
    closed_flag: AtomicBool,
    /// Signalled to force the owning handler's read loop to exit, e.g. on
    /// supersession or sweep. The handler observes this as a read error
    /// and tears down normally.
    close_notify: Notify,
}

impl Connection {
    /// Creates a connection and its paired outbound receiver. The receiver
    /// must be handed to a write task that drains it to the socket.
    #[must_use]
    pub fn new(conn_id: ConnectionId) -> (Arc<Self>, mpsc::Receiver<ServerFrame>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let conn = Arc::new(Self {
            conn_id,
            user_id: Mutex::new(String::new()),
            last_ping: Mutex::new(Instant::now()),
            outbound,
            closed_flag: AtomicBool::new(false),
            close_notify: Notify::new(),
        });
        (conn, rx)
    }

    /// Enqueues a frame for delivery. Returns `false` if the connection's
    /// write task has already exited (socket closed).
    pub async fn send(&self, frame: ServerFrame) -> bool {
        self.outbound.send(frame).await.is_ok()
    }

    pub fn touch_ping(&self) {
        *self.last_ping.lock() = Instant::now();
    }

    #[must_use]
    pub fn last_ping(&self) -> Instant {
        *self.last_ping.lock()
    }

    pub fn user_id(&self) -> String {
        self.user_id.lock().clone()
    }

    /// Forces the owning handler to close. Idempotent; safe to call after
    /// the handler has already exited.
    pub fn close(&self) {
        self.closed_flag.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();
    }

    /// Resolves when [`Connection::close`] has been called, including if
    /// it was called before this was polled.
    pub async fn closed(&self) {
        loop {
            if self.closed_flag.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.close_notify.notified();
            if self.closed_flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Thread-safe dual index of all connections attached to this instance
/// (spec §3 `ConnectionRegistry`, §4.2).
///
/// Invariant: for every `byUser[u] = c`, `byConn[c.connId] = c` with
/// `c.userId == u`; insertions and deletions update both or neither.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_user: DashMap<String, Arc<Connection>>,
    by_conn: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
            by_conn: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh `ConnectionId`, without registering it under any
    /// `userId` yet — used at socket-upgrade time, before `register` has
    /// been received (spec §4.4 `UNAUTH`).
    #[must_use]
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds `conn` under `user_id`, closing and replacing any prior
    /// connection already registered for that user (spec §4.2
    /// supersession rule).
    pub fn add(&self, user_id: &str, conn: &Arc<Connection>) {
        *conn.user_id.lock() = user_id.to_string();
        self.by_conn.insert(conn.conn_id, Arc::clone(conn));

        if let Some((_, prior)) = self.by_user.remove(user_id) {
            self.by_conn.remove(&prior.conn_id);
            prior.close();
        }
        self.by_user.insert(user_id.to_string(), Arc::clone(conn));
        self.record_active_gauge();
    }

    /// Removes `conn_id` from both indexes. A no-op if this connection was
    /// already superseded or removed (its `userId` entry may now point at
    /// a different connection, which must be left untouched).
    pub fn remove(&self, conn_id: ConnectionId) {
        let Some((_, conn)) = self.by_conn.remove(&conn_id) else {
            return;
        };
        let user_id = conn.user_id();
        if let Some(entry) = self.by_user.get(&user_id) {
            if entry.value().conn_id == conn_id {
                drop(entry);
                self.by_user.remove(&user_id);
            }
        }
        self.record_active_gauge();
    }

    /// Publishes the current connection count (spec §11 "active connections"
    /// gauge) to the installed `metrics` recorder, if any.
    fn record_active_gauge(&self) {
        metrics::gauge!("gateway_connections_active").set(self.by_conn.len() as f64);
    }

    #[must_use]
    pub fn get_by_user(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.by_user.get(user_id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn get_by_conn(&self, conn_id: ConnectionId) -> Option<Arc<Connection>> {
        self.by_conn.get(&conn_id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.by_conn.len()
    }

    /// Removes and returns every currently-registered connection. Used
    /// during orchestrator shutdown (spec §4.5).
    pub fn drain_all(&self) -> Vec<Arc<Connection>> {
        let keys: Vec<ConnectionId> = self.by_conn.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, conn)) = self.by_conn.remove(&key) {
                let user_id = conn.user_id();
                if let Some(entry) = self.by_user.get(&user_id) {
                    if entry.value().conn_id == key {
                        drop(entry);
                        self.by_user.remove(&user_id);
                    }
                }
                handles.push(conn);
            }
        }
        self.record_active_gauge();
        handles
    }

    /// Invokes `visitor` once per currently-registered connection.
    pub fn for_each(&self, mut visitor: impl FnMut(&Arc<Connection>)) {
        for entry in &self.by_conn {
            visitor(entry.value());
        }
    }

    /// Closes every connection whose `lastPing` is older than `max_age`,
    /// returning the number closed.
    ///
    /// Two-phase per spec §4.2: victims are collected without mutating
    /// the map, then closed and removed, avoiding ill-defined behaviour
    /// under concurrent iteration and deletion.
    pub fn sweep_stale(&self, max_age: std::time::Duration) -> usize {
        let now = Instant::now();
        let victims: Vec<ConnectionId> = self
            .by_conn
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_ping()) > max_age)
            .map(|entry| *entry.key())
            .collect();

        for conn_id in &victims {
            if let Some(conn) = self.get_by_conn(*conn_id) {
                conn.close();
            }
            self.remove(*conn_id);
        }
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn add_then_lookup_by_both_indexes() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::new(registry.next_id());
        registry.add("alice", &conn);

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get_by_user("alice").unwrap().conn_id, conn.conn_id);
        assert_eq!(registry.get_by_conn(conn.conn_id).unwrap().conn_id, conn.conn_id);
    }

    #[test]
    fn second_register_supersedes_and_closes_first() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = Connection::new(registry.next_id());
        let (second, _rx2) = Connection::new(registry.next_id());

        registry.add("alice", &first);
        registry.add("alice", &second);

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get_by_user("alice").unwrap().conn_id, second.conn_id);
        // The superseded connection's id must not leak in byConn.
        assert!(registry.get_by_conn(first.conn_id).is_none());
    }

    #[tokio::test]
    async fn superseded_connection_observes_close() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = Connection::new(registry.next_id());
        let (second, _rx2) = Connection::new(registry.next_id());

        registry.add("alice", &first);
        registry.add("alice", &second);

        tokio::time::timeout(Duration::from_secs(1), first.closed())
            .await
            .expect("superseded connection must be signalled closed");
    }

    #[test]
    fn remove_clears_both_indexes() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::new(registry.next_id());
        registry.add("alice", &conn);

        registry.remove(conn.conn_id);

        assert_eq!(registry.count(), 0);
        assert!(registry.get_by_user("alice").is_none());
        assert!(registry.get_by_conn(conn.conn_id).is_none());
    }

    #[test]
    fn remove_after_supersession_does_not_clobber_new_owner() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = Connection::new(registry.next_id());
        let (second, _rx2) = Connection::new(registry.next_id());

        registry.add("alice", &first);
        registry.add("alice", &second);

        // A delayed teardown of the superseded connection must not evict
        // the connection that replaced it.
        registry.remove(first.conn_id);

        assert_eq!(registry.get_by_user("alice").unwrap().conn_id, second.conn_id);
    }

    #[test]
    fn sweep_stale_closes_and_removes_only_expired() {
        let registry = ConnectionRegistry::new();
        let (fresh, _rx1) = Connection::new(registry.next_id());
        let (stale, _rx2) = Connection::new(registry.next_id());
        *stale.last_ping.lock() = Instant::now() - Duration::from_secs(120);

        registry.add("fresh-user", &fresh);
        registry.add("stale-user", &stale);

        let removed = registry.sweep_stale(Duration::from_secs(90));

        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.get_by_user("fresh-user").is_some());
        assert!(registry.get_by_user("stale-user").is_none());
    }

    #[test]
    fn for_each_visits_all_connections() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = Connection::new(registry.next_id());
        let (b, _rx2) = Connection::new(registry.next_id());
        registry.add("a", &a);
        registry.add("b", &b);

        let mut seen = Vec::new();
        registry.for_each(|c| seen.push(c.conn_id));
        seen.sort();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn drain_all_empties_both_indexes() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = Connection::new(registry.next_id());
        let (b, _rx2) = Connection::new(registry.next_id());
        registry.add("a", &a);
        registry.add("b", &b);

        let drained = registry.drain_all();

        assert_eq!(drained.len(), 2);
        assert_eq!(registry.count(), 0);
        assert!(registry.get_by_user("a").is_none());
    }

    #[tokio::test]
    async fn send_delivers_frame_to_outbound_receiver() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = Connection::new(registry.next_id());

        assert!(conn.send(ServerFrame::Pong).await);
        assert_eq!(rx.recv().await, Some(ServerFrame::Pong));
    }
}
