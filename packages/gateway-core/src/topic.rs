//! Deterministic channel/topic naming for the two router transports
//! (spec §3 "ChannelName / TopicName", §6 "Broker channel/topic naming").
//!
//! The two transports use different separators for historical reasons
//! (spec §9); either is acceptable, but it must be constant within a
//! deployment. `TopicConvention` picks one; `ChannelNaming` applies it.

/// Which separator convention a deployment uses for gateway channel/topic
/// names. Both are wire-compatible with their respective transport; the
/// choice does not affect C1/C2/C4 semantics (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicConvention {
    /// `gateway:{id}` / `gateway:broadcast` — the ephemeral pub/sub transport's reference form.
    PubSub,
    /// `gateway-{id}` / `gateway-broadcast` — the durable-log transport's reference form.
    DurableLog,
}

/// Computes the channel/topic name owned by a given gateway, and the
/// reserved broadcast name, under one `TopicConvention`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelNaming {
    convention: TopicConvention,
}

impl ChannelNaming {
    #[must_use]
    pub fn new(convention: TopicConvention) -> Self {
        Self { convention }
    }

    /// The channel/topic name owned by `gateway_id`.
    #[must_use]
    pub fn owned(&self, gateway_id: &str) -> String {
        match self.convention {
            TopicConvention::PubSub => format!("gateway:{gateway_id}"),
            TopicConvention::DurableLog => format!("gateway-{gateway_id}"),
        }
    }

    /// The reserved broadcast channel/topic name.
    #[must_use]
    pub fn broadcast(&self) -> &'static str {
        match self.convention {
            TopicConvention::PubSub => "gateway:broadcast",
            TopicConvention::DurableLog => "gateway-broadcast",
        }
    }
}
