//! Heartbeat/TTL/sweep parameters (spec §6 parameter table).
//!
//! Relationship enforced by `GatewayParams::is_consistent`: `timeout ==
//! presence_ttl == 3 * heartbeat_interval`, `sweep_interval < timeout`.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayParams {
    /// Client ping cadence; heartbeat watcher tick; presence refresh cadence.
    pub heartbeat_interval: Duration,
    /// Socket closed if no ping arrives within this window.
    pub heartbeat_timeout: Duration,
    /// Presence directory entry TTL.
    pub presence_ttl: Duration,
    /// Background stale-connection sweep cadence.
    pub health_sweep_interval: Duration,
}

impl Default for GatewayParams {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            presence_ttl: Duration::from_secs(90),
            health_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayParams {
    /// Spec §6: `timeout == TTL == 3 * interval`, `sweep < timeout`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.heartbeat_timeout == self.presence_ttl
            && self.heartbeat_timeout == self.heartbeat_interval * 3
            && self.health_sweep_interval < self.heartbeat_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_table() {
        let params = GatewayParams::default();
        assert_eq!(params.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(params.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(params.presence_ttl, Duration::from_secs(90));
        assert_eq!(params.health_sweep_interval, Duration::from_secs(60));
        assert!(params.is_consistent());
    }

    #[test]
    fn detects_inconsistent_timeout() {
        let mut params = GatewayParams::default();
        params.heartbeat_timeout = Duration::from_secs(45);
        assert!(!params.is_consistent());
    }

    #[test]
    fn detects_sweep_not_less_than_timeout() {
        let mut params = GatewayParams::default();
        params.health_sweep_interval = params.heartbeat_timeout;
        assert!(!params.is_consistent());
    }
}
