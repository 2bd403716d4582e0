//! Inter-gateway router (spec §4.3, C3): publishes to the channel/topic
//! owned by a target gateway, and consumes its own.
//!
//! One trait, two interchangeable transports — the same "narrow interface,
//! swappable backend" shape as [`crate::presence::PresenceDirectory`]. The
//! orchestrator and the connection handler hold only `Arc<dyn Router>`; no
//! type checks outside the constructor (spec §9).

#[cfg(feature = "kafka-backend")]
pub mod kafka;
#[cfg(feature = "redis-backend")]
pub mod pubsub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::RoutedMessage;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("router I/O error: {0}")]
pub struct RouterError(pub String);

/// Invoked once per successfully decoded inbound message destined for
/// delivery on this instance. The router calls this sequentially from a
/// single logical consumer (spec §4.3); implementations must not assume
/// concurrent invocations.
#[async_trait]
pub trait InboundDeliverer: Send + Sync {
    async fn deliver(&self, msg: RoutedMessage);
}

/// Inter-gateway router contract (spec §4.3).
#[async_trait]
pub trait Router: Send + Sync {
    /// Subscribes this instance to its own channel/topic. Must block until
    /// the subscription is confirmed active before returning (spec §4.3a);
    /// idempotent with `stop` — safe to call again after a failed `start`.
    async fn start(&self, handler: Arc<dyn InboundDeliverer>) -> Result<(), RouterError>;

    /// Signals the consumer loop to exit, waits for it to unwind, and
    /// releases transport resources. Idempotent.
    async fn stop(&self);

    /// Publishes `msg` to the channel/topic owned by `target_gateway_id`.
    async fn route_to(
        &self,
        target_gateway_id: &str,
        msg: RoutedMessage,
        deadline: Duration,
    ) -> Result<(), RouterError>;

    /// Publishes `msg` to the reserved broadcast channel/topic.
    async fn broadcast(&self, msg: RoutedMessage, deadline: Duration) -> Result<(), RouterError>;
}

/// Test doubles shared by handler/module unit tests across the crate.
#[cfg(test)]
pub mod test_support {
    use super::{async_trait, Arc, Duration, InboundDeliverer, Router, RouterError, RoutedMessage};
    use std::sync::Mutex;

    /// A `Router` that records `route_to`/`broadcast` calls instead of
    /// performing any I/O, for tests exercising C4/C5 wiring in isolation.
    #[derive(Default)]
    pub struct RecordingRouter {
        pub routed: Mutex<Vec<(String, RoutedMessage)>>,
        pub broadcasts: Mutex<Vec<RoutedMessage>>,
    }

    #[async_trait]
    impl Router for RecordingRouter {
        async fn start(&self, _handler: Arc<dyn InboundDeliverer>) -> Result<(), RouterError> {
            Ok(())
        }

        async fn stop(&self) {}

        async fn route_to(
            &self,
            target_gateway_id: &str,
            msg: RoutedMessage,
            _deadline: Duration,
        ) -> Result<(), RouterError> {
            self.routed.lock().unwrap().push((target_gateway_id.to_string(), msg));
            Ok(())
        }

        async fn broadcast(&self, msg: RoutedMessage, _deadline: Duration) -> Result<(), RouterError> {
            self.broadcasts.lock().unwrap().push(msg);
            Ok(())
        }
    }
}
