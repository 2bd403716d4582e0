//! Redis-backed `PresenceDirectory` — the reference backend (spec §4.1,
//! §9, §12).
//!
//! The timestamp-CAS rule ("if a stored record exists with `ts_stored >
//! ts_new`, reject; otherwise write all three fields and reset the TTL")
//! is implemented as a server-side Lua script executed via `EVALSHA`,
//! which is exactly the "stored procedure" option spec §9 names. `Refresh`
//! is a second script implementing the recommended "update-if-exists"
//! guard so a delayed heartbeat cannot resurrect a record a concurrent
//! `Remove` already deleted (spec §9).

use std::time::Duration;

use async_trait::async_trait;
use gateway_core::PresenceRecord;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{LookupOutcome, PresenceDirectory, PresenceError, RefreshOutcome, RegisterOutcome};

const REGISTER_SCRIPT: &str = r"
local ts_stored = redis.call('HGET', KEYS[1], 'ts')
if ts_stored and tonumber(ts_stored) > tonumber(ARGV[3]) then
    return 0
end
redis.call('HSET', KEYS[1], 'gwId', ARGV[1], 'connId', ARGV[2], 'ts', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
";

const REFRESH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'ts', ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
";

/// Namespace prefix for presence keys (spec §4.1: "Keys are namespaced
/// under a reserved prefix").
const KEY_PREFIX: &str = "presence:";

fn key(user_id: &str) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

fn to_presence_error(err: redis::RedisError) -> PresenceError {
    PresenceError(err.to_string())
}

async fn with_deadline<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T, PresenceError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(to_presence_error(err)),
        Err(_) => Err(PresenceError("deadline exceeded".to_string())),
    }
}

pub struct RedisPresenceDirectory {
    manager: ConnectionManager,
    register_script: Script,
    refresh_script: Script,
}

impl RedisPresenceDirectory {
    /// # Errors
    ///
    /// Returns `PresenceError` if the initial connection cannot be
    /// established.
    pub async fn connect(client: redis::Client) -> Result<Self, PresenceError> {
        let manager = client.get_connection_manager().await.map_err(to_presence_error)?;
        Ok(Self {
            manager,
            register_script: Script::new(REGISTER_SCRIPT),
            refresh_script: Script::new(REFRESH_SCRIPT),
        })
    }
}

#[async_trait]
impl PresenceDirectory for RedisPresenceDirectory {
    async fn register(
        &self,
        user_id: &str,
        gateway_id: &str,
        conn_id: u64,
        ts: u64,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<RegisterOutcome, PresenceError> {
        let mut conn = self.manager.clone();
        let applied: i64 = with_deadline(
            deadline,
            self.register_script
                .key(key(user_id))
                .arg(gateway_id)
                .arg(conn_id)
                .arg(ts)
                .arg(ttl.as_millis() as u64)
                .invoke_async(&mut conn),
        )
        .await?;

        Ok(if applied == 1 {
            RegisterOutcome::Ok
        } else {
            RegisterOutcome::StaleRejected
        })
    }

    async fn refresh(
        &self,
        user_id: &str,
        ts: u64,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<RefreshOutcome, PresenceError> {
        let mut conn = self.manager.clone();
        let applied: i64 = with_deadline(
            deadline,
            self.refresh_script
                .key(key(user_id))
                .arg(ts)
                .arg(ttl.as_millis() as u64)
                .invoke_async(&mut conn),
        )
        .await?;

        Ok(if applied == 1 {
            RefreshOutcome::Ok
        } else {
            RefreshOutcome::NotFound
        })
    }

    async fn lookup(
        &self,
        user_id: &str,
        deadline: Duration,
    ) -> Result<LookupOutcome, PresenceError> {
        let mut conn = self.manager.clone();
        let fields: Vec<(String, String)> =
            with_deadline(deadline, conn.hgetall(key(user_id))).await?;

        if fields.is_empty() {
            return Ok(LookupOutcome::Offline);
        }

        let mut gateway_id = None;
        let mut conn_id = None;
        let mut ts = None;
        for (field, value) in fields {
            match field.as_str() {
                "gwId" => gateway_id = Some(value),
                "connId" => conn_id = value.parse::<u64>().ok(),
                "ts" => ts = value.parse::<u64>().ok(),
                _ => {}
            }
        }

        match (gateway_id, conn_id, ts) {
            (Some(gateway_id), Some(conn_id), Some(ts)) => {
                Ok(LookupOutcome::Online(PresenceRecord::new(gateway_id, conn_id, ts)))
            }
            _ => Ok(LookupOutcome::Offline),
        }
    }

    async fn remove(&self, user_id: &str, deadline: Duration) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        let _: i64 = with_deadline(deadline, conn.del(key(user_id))).await?;
        Ok(())
    }
}
