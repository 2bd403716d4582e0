//! In-memory `PresenceDirectory`, emulating the Redis backend's CAS/TTL
//! contract for tests and infra-free development (spec §4.1, §12).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gateway_core::PresenceRecord;
use parking_lot::Mutex;

use super::{LookupOutcome, PresenceDirectory, PresenceError, RefreshOutcome, RegisterOutcome};

struct Entry {
    record: PresenceRecord,
    expires_at: Instant,
}

/// `HashMap` behind a `parking_lot::Mutex`, with lazy TTL expiry checked on
/// every read. Good enough for a single-process test double; the real
/// deployment backend is `RedisPresenceDirectory`.
#[derive(Default)]
pub struct InMemoryPresenceDirectory {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryPresenceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn live(entries: &mut HashMap<String, Entry>, user_id: &str) -> Option<PresenceRecord> {
        match entries.get(user_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.record.clone()),
            Some(_) => {
                entries.remove(user_id);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl PresenceDirectory for InMemoryPresenceDirectory {
    async fn register(
        &self,
        user_id: &str,
        gateway_id: &str,
        conn_id: u64,
        ts: u64,
        ttl: Duration,
        _deadline: Duration,
    ) -> Result<RegisterOutcome, PresenceError> {
        let mut entries = self.entries.lock();
        if let Some(current) = Self::live(&mut entries, user_id) {
            if current.ts > ts {
                return Ok(RegisterOutcome::StaleRejected);
            }
        }
        entries.insert(
            user_id.to_string(),
            Entry {
                record: PresenceRecord::new(gateway_id, conn_id, ts),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(RegisterOutcome::Ok)
    }

    async fn refresh(
        &self,
        user_id: &str,
        ts: u64,
        ttl: Duration,
        _deadline: Duration,
    ) -> Result<RefreshOutcome, PresenceError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, user_id) {
            Some(mut record) => {
                record.ts = ts;
                entries.insert(
                    user_id.to_string(),
                    Entry {
                        record,
                        expires_at: Instant::now() + ttl,
                    },
                );
                Ok(RefreshOutcome::Ok)
            }
            None => Ok(RefreshOutcome::NotFound),
        }
    }

    async fn lookup(
        &self,
        user_id: &str,
        _deadline: Duration,
    ) -> Result<LookupOutcome, PresenceError> {
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, user_id) {
            Some(record) => LookupOutcome::Online(record),
            None => LookupOutcome::Offline,
        })
    }

    async fn remove(&self, user_id: &str, _deadline: Duration) -> Result<(), PresenceError> {
        self.entries.lock().remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(90);
    const DEADLINE: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn register_then_lookup_observes_record() {
        let dir = InMemoryPresenceDirectory::new();
        let outcome = dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Ok);

        let looked_up = dir.lookup("alice", DEADLINE).await.unwrap();
        assert_eq!(
            looked_up,
            LookupOutcome::Online(PresenceRecord::new("g1", 1, 100))
        );
    }

    #[tokio::test]
    async fn register_with_older_ts_is_rejected_and_does_not_mutate() {
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();

        let outcome = dir.register("alice", "g2", 2, 50, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::StaleRejected);

        let looked_up = dir.lookup("alice", DEADLINE).await.unwrap();
        assert_eq!(
            looked_up,
            LookupOutcome::Online(PresenceRecord::new("g1", 1, 100))
        );
    }

    #[tokio::test]
    async fn register_with_newer_ts_wins_fast_reconnect() {
        // S3: fast reconnect CAS.
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        dir.register("alice", "g2", 2, 103, TTL, DEADLINE).await.unwrap();

        // A delayed refresh/heartbeat from the old gateway with a stale ts
        // must not clobber the newer record.
        let stale = dir.register("alice", "g1", 1, 101, TTL, DEADLINE).await.unwrap();
        assert_eq!(stale, RegisterOutcome::StaleRejected);

        let looked_up = dir.lookup("alice", DEADLINE).await.unwrap();
        assert_eq!(
            looked_up,
            LookupOutcome::Online(PresenceRecord::new("g2", 2, 103))
        );
    }

    #[tokio::test]
    async fn same_ts_register_is_a_no_op() {
        // R2
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        let outcome = dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Ok);
        let looked_up = dir.lookup("alice", DEADLINE).await.unwrap();
        assert_eq!(
            looked_up,
            LookupOutcome::Online(PresenceRecord::new("g1", 1, 100))
        );
    }

    #[tokio::test]
    async fn refresh_updates_ts_and_resets_ttl() {
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        let outcome = dir.refresh("alice", 130, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Ok);

        let looked_up = dir.lookup("alice", DEADLINE).await.unwrap();
        assert_eq!(
            looked_up,
            LookupOutcome::Online(PresenceRecord::new("g1", 1, 130))
        );
    }

    #[tokio::test]
    async fn refresh_on_absent_record_reports_not_found_and_does_not_resurrect() {
        let dir = InMemoryPresenceDirectory::new();
        let outcome = dir.refresh("alice", 100, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::NotFound);
        assert_eq!(dir.lookup("alice", DEADLINE).await.unwrap(), LookupOutcome::Offline);
    }

    #[tokio::test]
    async fn refresh_after_remove_does_not_resurrect() {
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        dir.remove("alice", DEADLINE).await.unwrap();

        let outcome = dir.refresh("alice", 101, TTL, DEADLINE).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::NotFound);
        assert_eq!(dir.lookup("alice", DEADLINE).await.unwrap(), LookupOutcome::Offline);
    }

    #[tokio::test]
    async fn lookup_absent_user_is_offline() {
        let dir = InMemoryPresenceDirectory::new();
        assert_eq!(dir.lookup("ghost", DEADLINE).await.unwrap(), LookupOutcome::Offline);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        // R3
        let dir = InMemoryPresenceDirectory::new();
        dir.register("alice", "g1", 1, 100, TTL, DEADLINE).await.unwrap();
        dir.remove("alice", DEADLINE).await.unwrap();
        dir.remove("alice", DEADLINE).await.unwrap();
        assert_eq!(dir.lookup("alice", DEADLINE).await.unwrap(), LookupOutcome::Offline);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let dir = InMemoryPresenceDirectory::new();
        let short_ttl = Duration::from_millis(20);
        dir.register("alice", "g1", 1, 100, short_ttl, DEADLINE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(dir.lookup("alice", DEADLINE).await.unwrap(), LookupOutcome::Offline);
    }
}
