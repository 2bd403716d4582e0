//! Ephemeral pub/sub transport (spec §4.3a): at-most-once, lowest latency.
//! Reference channel names come from [`gateway_core::ChannelNaming`] with
//! [`gateway_core::TopicConvention::PubSub`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gateway_core::{ChannelNaming, RoutedMessage, TopicConvention};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{InboundDeliverer, Router, RouterError};

pub struct PubSubRouter {
    client: redis::Client,
    gateway_id: String,
    naming: ChannelNaming,
    publish_conn: ConnectionManager,
    consumer: Mutex<Option<(JoinHandle<()>, Arc<Notify>)>>,
}

impl PubSubRouter {
    /// # Errors
    ///
    /// Returns `RouterError` if the initial connection cannot be
    /// established.
    pub async fn connect(client: redis::Client, gateway_id: impl Into<String>) -> Result<Self, RouterError> {
        let publish_conn = client
            .get_connection_manager()
            .await
            .map_err(|e| RouterError(e.to_string()))?;

        Ok(Self {
            client,
            gateway_id: gateway_id.into(),
            naming: ChannelNaming::new(TopicConvention::PubSub),
            publish_conn,
            consumer: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Router for PubSubRouter {
    async fn start(&self, handler: Arc<dyn InboundDeliverer>) -> Result<(), RouterError> {
        let own_channel = self.naming.owned(&self.gateway_id);
        let broadcast_channel = self.naming.broadcast().to_string();

        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| RouterError(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();

        // subscribe() does not return until the broker confirms the
        // subscription, so by the time this returns Ok the "subscribe
        // requested but not yet active" window (spec §4.3a) has closed.
        pubsub
            .subscribe(&own_channel)
            .await
            .map_err(|e| RouterError(e.to_string()))?;
        pubsub
            .subscribe(&broadcast_channel)
            .await
            .map_err(|e| RouterError(e.to_string()))?;

        info!(channel = %own_channel, "pub/sub router subscribed");

        let shutdown = Arc::new(Notify::new());
        let shutdown_in_task = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    () = shutdown_in_task.notified() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        let payload: Vec<u8> = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(%err, "pub/sub payload decode error");
                                continue;
                            }
                        };
                        match RoutedMessage::decode(&payload) {
                            Ok(routed) => handler.deliver(routed).await,
                            Err(err) => {
                                warn!(%err, "dropping malformed inter-gateway message");
                            }
                        }
                    }
                }
            }
            debug!("pub/sub router consumer loop exited");
        });

        *self.consumer.lock() = Some((task, shutdown));
        Ok(())
    }

    async fn stop(&self) {
        let consumer = self.consumer.lock().take();
        if let Some((task, shutdown)) = consumer {
            shutdown.notify_one();
            let _ = task.await;
        }
    }

    async fn route_to(
        &self,
        target_gateway_id: &str,
        msg: RoutedMessage,
        deadline: Duration,
    ) -> Result<(), RouterError> {
        let channel = self.naming.owned(target_gateway_id);
        publish(&self.publish_conn, &channel, &msg, deadline).await
    }

    async fn broadcast(&self, msg: RoutedMessage, deadline: Duration) -> Result<(), RouterError> {
        let channel = self.naming.broadcast().to_string();
        publish(&self.publish_conn, &channel, &msg, deadline).await
    }
}

async fn publish(
    conn: &ConnectionManager,
    channel: &str,
    msg: &RoutedMessage,
    deadline: Duration,
) -> Result<(), RouterError> {
    let bytes = msg.encode().map_err(|e| RouterError(e.to_string()))?;
    let mut conn = conn.clone();
    match tokio::time::timeout(deadline, conn.publish::<_, _, i64>(channel, bytes)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(RouterError(err.to_string())),
        Err(_) => Err(RouterError("deadline exceeded".to_string())),
    }
}
