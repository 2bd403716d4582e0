//! Top-level gateway configuration: identity, timing parameters, and
//! broker backend selection (spec §6 CLI flags, external collaborator).

use gateway_core::GatewayParams;

use crate::network::NetworkConfig;

/// Which router transport backend (spec §4.3a/b) this instance uses.
#[derive(Debug, Clone)]
pub enum BrokerConfig {
    /// Ephemeral pub/sub transport.
    Redis { url: String },
    /// Durable partitioned-log transport.
    Kafka { brokers: String },
}

/// Full configuration for one gateway instance.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Unique identifier for this instance within the cluster (spec §6
    /// `-id`).
    pub gateway_id: String,
    pub network: NetworkConfig,
    pub params: GatewayParams,
    pub broker: BrokerConfig,
    /// Redis connection string for the presence directory. Independent of
    /// `broker` -- a Kafka-routed deployment still needs a presence store.
    pub presence_redis_url: String,
}
