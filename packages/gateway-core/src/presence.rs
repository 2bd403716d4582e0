//! The cluster-wide presence record (spec §3).

use serde::{Deserialize, Serialize};

/// Cluster-wide record of which gateway instance currently owns a user's
/// attachment, keyed by `userId` in the backing store.
///
/// `ts` is server-wall-clock at the writing instance, monotonic per
/// `userId` only — clocks across gateways need only be close enough that
/// a newer writer's `ts` exceeds the older writer's last stored `ts`
/// (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    #[serde(rename = "gwId")]
    pub gateway_id: String,
    #[serde(rename = "connId")]
    pub conn_id: u64,
    pub ts: u64,
}

impl PresenceRecord {
    #[must_use]
    pub fn new(gateway_id: impl Into<String>, conn_id: u64, ts: u64) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            conn_id,
            ts,
        }
    }
}
