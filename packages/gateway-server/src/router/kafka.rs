//! Durable partitioned-log transport (spec §4.3b): at-least-once, survives
//! a consumer restart. Topic names come from [`gateway_core::ChannelNaming`]
//! with [`gateway_core::TopicConvention::DurableLog`]; each gateway's own
//! topic is hash-partitioned by `to` so ordering is preserved per
//! destination user, not globally (spec §4.3b, §9).
//!
//! Self-published messages loop back through the consumer on some brokers'
//! client libraries; a `from_gateway` header lets the consumer recognize
//! and skip its own output instead of re-delivering it locally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{ChannelNaming, RoutedMessage, TopicConvention};
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{InboundDeliverer, Router, RouterError};

const FROM_GATEWAY_HEADER: &str = "from_gateway";

pub struct KafkaRouter {
    gateway_id: String,
    naming: ChannelNaming,
    brokers: String,
    group_id: String,
    producer: FutureProducer,
    consumer: Mutex<Option<(JoinHandle<()>, Arc<Notify>)>>,
}

impl KafkaRouter {
    /// # Errors
    ///
    /// Returns `RouterError` if the producer cannot be constructed (e.g.
    /// malformed broker list).
    pub fn new(brokers: impl Into<String>, gateway_id: impl Into<String>) -> Result<Self, RouterError> {
        let brokers = brokers.into();
        let gateway_id = gateway_id.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(to_router_error)?;

        Ok(Self {
            group_id: format!("gateway-router-{gateway_id}"),
            gateway_id,
            naming: ChannelNaming::new(TopicConvention::DurableLog),
            brokers,
            producer,
            consumer: Mutex::new(None),
        })
    }
}

fn to_router_error(err: KafkaError) -> RouterError {
    RouterError(err.to_string())
}

#[async_trait]
impl Router for KafkaRouter {
    async fn start(&self, handler: Arc<dyn InboundDeliverer>) -> Result<(), RouterError> {
        let own_topic = self.naming.owned(&self.gateway_id);
        let broadcast_topic = self.naming.broadcast().to_string();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(to_router_error)?;

        consumer
            .subscribe(&[own_topic.as_str(), broadcast_topic.as_str()])
            .map_err(to_router_error)?;

        info!(topic = %own_topic, "durable-log router subscribed");

        let own_gateway_id = self.gateway_id.clone();
        let shutdown = Arc::new(Notify::new());
        let shutdown_in_task = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown_in_task.notified() => break,
                    received = consumer.recv() => {
                        let msg = match received {
                            Ok(msg) => msg,
                            Err(err) => {
                                warn!(%err, "durable-log router receive error");
                                continue;
                            }
                        };

                        if is_self_published(&msg, &own_gateway_id) {
                            continue;
                        }

                        let Some(payload) = msg.payload() else { continue };
                        match RoutedMessage::decode(payload) {
                            Ok(routed) => handler.deliver(routed).await,
                            Err(err) => {
                                warn!(%err, "dropping poison-pill inter-gateway message");
                            }
                        }
                    }
                }
            }
            debug!("durable-log router consumer loop exited");
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
        let topic = self.naming.owned(target_gateway_id);
        self.publish(&topic, &msg, deadline).await
    }

    async fn broadcast(&self, msg: RoutedMessage, deadline: Duration) -> Result<(), RouterError> {
        let topic = self.naming.broadcast().to_string();
        self.publish(&topic, &msg, deadline).await
    }
}

impl KafkaRouter {
    async fn publish(&self, topic: &str, msg: &RoutedMessage, deadline: Duration) -> Result<(), RouterError> {
        let bytes = msg.encode().map_err(|e| RouterError(e.to_string()))?;
        let key = msg.to.clone();
        let headers = OwnedHeaders::new().insert(Header {
            key: FROM_GATEWAY_HEADER,
            value: Some(self.gateway_id.as_bytes()),
        });

        let record = FutureRecord::to(topic).key(&key).payload(&bytes).headers(headers);

        match self.producer.send(record, deadline).await {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(to_router_error(err)),
        }
    }
}

fn is_self_published(msg: &rdkafka::message::BorrowedMessage<'_>, own_gateway_id: &str) -> bool {
    let Some(headers) = msg.headers() else { return false };
    for i in 0..headers.count() {
        let header = headers.get(i);
        if header.key == FROM_GATEWAY_HEADER {
            return header.value == Some(own_gateway_id.as_bytes());
        }
    }
    false
}
