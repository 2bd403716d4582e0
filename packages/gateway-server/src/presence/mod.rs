//! Presence directory (spec §4.1, C1): a cluster-wide `userId ->
//! (gatewayId, connId, ts)` map with TTL and timestamp-CAS updates.
//!
//! One trait, two backends: a single narrow interface behind which any
//! store meeting a short list of requirements may sit. Here the
//! requirements are spec §4.1's three: atomic scripted CAS, keyed TTL, and
//! pipelining. `RedisPresenceDirectory` is the reference backend;
//! `InMemoryPresenceDirectory` emulates the same contract for tests and
//! infra-free development.

mod memory;
mod redis_backend;

pub use memory::InMemoryPresenceDirectory;
#[cfg(feature = "redis-backend")]
pub use redis_backend::RedisPresenceDirectory;

use async_trait::async_trait;
use gateway_core::PresenceRecord;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a `Register` call (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Ok,
    /// A stored record with a newer `ts` rejected this write (spec §4.1, I3).
    StaleRejected,
}

/// Outcome of a `Refresh` call (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Ok,
    /// No record existed to refresh (it was already removed or expired).
    NotFound,
}

/// Outcome of a `Lookup` call (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Online(PresenceRecord),
    Offline,
}

/// I/O failure from the backing store. Never fatal to a socket (spec §4.1,
/// §7): callers log and drop the operation.
#[derive(Debug, Error)]
#[error("presence directory I/O error: {0}")]
pub struct PresenceError(pub String);

/// Cluster-wide presence directory contract (spec §4.1).
///
/// Every operation takes a deadline, per spec §5's "every presence
/// operation ... takes a caller-supplied deadline" — implementations are
/// responsible for enforcing it against their own I/O.
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    async fn register(
        &self,
        user_id: &str,
        gateway_id: &str,
        conn_id: u64,
        ts: u64,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<RegisterOutcome, PresenceError>;

    async fn refresh(
        &self,
        user_id: &str,
        ts: u64,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<RefreshOutcome, PresenceError>;

    async fn lookup(
        &self,
        user_id: &str,
        deadline: Duration,
    ) -> Result<LookupOutcome, PresenceError>;

    async fn remove(&self, user_id: &str, deadline: Duration) -> Result<(), PresenceError>;
}
