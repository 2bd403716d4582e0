//! Fan-out gateway core — wire message schemas, presence record, and
//! channel/topic naming shared between the gateway server and any client
//! or tooling that needs to speak the same protocol.

pub mod message;
pub mod params;
pub mod presence;
pub mod topic;

pub use message::{ClientFrame, RoutedMessage, RoutedMessageType, ServerFrame};
pub use params::GatewayParams;
pub use presence::PresenceRecord;
pub use topic::{ChannelNaming, TopicConvention};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
