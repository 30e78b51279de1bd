//! AMQP transport backed by `lapin`.
//!
//! Declares one exclusive, server-named reply queue and one auto-ack
//! consumer on it. Requests go through the default exchange with the
//! destination queue name as routing key.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{BrokerConfig, BrokerTransport, Delivery, DeliveryStream, OutboundEnvelope};
use crate::rpc::RpcError;

const CONSUMER_TAG: &str = "sitelens-replies";

/// Live AMQP connection with its reply consumer.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    reply_queue: String,
    consumer_tag: String,
    consumer: Mutex<Option<Consumer>>,
    closed: AtomicBool,
}

impl AmqpBroker {
    /// Connects, retrying up to `config.connect_attempts` times with a fixed
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`] carrying the last failure once all
    /// attempts are exhausted.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, RpcError> {
        let attempts = config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::try_connect(config).await {
                Ok(broker) => {
                    info!(
                        uri = %config.redacted_uri(),
                        reply_queue = %broker.reply_queue,
                        attempt,
                        "connected to broker"
                    );
                    return Ok(broker);
                }
                Err(e) => {
                    warn!(
                        uri = %config.redacted_uri(),
                        attempt,
                        attempts,
                        error = %e,
                        "broker connection attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.connect_backoff).await;
                    }
                }
            }
        }

        Err(RpcError::Connection {
            attempts,
            reason: last_error,
        })
    }

    async fn try_connect(config: &BrokerConfig) -> Result<Self, lapin::Error> {
        let connection =
            Connection::connect_uri(config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        let reply_queue = queue.name().as_str().to_string();

        let consumer = channel
            .basic_consume(
                &reply_queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(Self {
            connection,
            channel,
            reply_queue,
            consumer_tag: consumer.tag().as_str().to_string(),
            consumer: Mutex::new(Some(consumer)),
            closed: AtomicBool::new(false),
        })
    }
}

fn to_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let properties = &delivery.properties;
    Delivery {
        correlation_id: properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string()),
        content_type: properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string()),
        body: Bytes::from(delivery.data),
    }
}

#[async_trait]
impl BrokerTransport for AmqpBroker {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Shutdown);
        }

        let publish_error = |e: lapin::Error| RpcError::Publish {
            destination: envelope.destination.clone(),
            reason: e.to_string(),
        };

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(envelope.content_type))
            .with_correlation_id(ShortString::from(envelope.correlation_id.to_string()))
            .with_reply_to(ShortString::from(envelope.reply_to.clone()));

        let confirm = self
            .channel
            .basic_publish(
                "",
                &envelope.destination,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await
            .map_err(publish_error)?;
        confirm.await.map_err(publish_error)?;

        debug!(
            destination = %envelope.destination,
            token = %envelope.correlation_id,
            bytes = envelope.body.len(),
            "request published"
        );
        Ok(())
    }

    fn take_deliveries(&self) -> Option<DeliveryStream> {
        let consumer = self.consumer.lock().take()?;
        let stream = consumer.filter_map(|item| async move {
            match item {
                Ok(delivery) => Some(to_delivery(delivery)),
                Err(e) => {
                    warn!(error = %e, "reply consumer error");
                    None
                }
            }
        });
        Some(stream.boxed())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "failed to cancel reply consumer");
        }
        if let Err(e) = self.channel.close(200, "shutdown").await {
            warn!(error = %e, "failed to close broker channel");
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            warn!(error = %e, "failed to close broker connection");
        }
        info!("broker connection closed");
    }
}
