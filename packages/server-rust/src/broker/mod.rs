//! Broker transport: one connection, one channel, one private reply queue.
//!
//! [`BrokerTransport`] is the seam between the correlation engine and the
//! wire. Writes (`publish`) may come from any number of tasks; the inbound
//! reply stream can be taken exactly once, which keeps a single reader on
//! the reply queue.

pub mod amqp;
pub mod config;
pub mod memory;

pub use amqp::AmqpBroker;
pub use config::BrokerConfig;
pub use memory::{MemoryBroker, MemoryWorker};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use sitelens_core::CorrelationToken;

use crate::rpc::RpcError;

/// Request envelope published to the worker's request queue.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    /// Routing key on the default exchange, i.e. the request queue name.
    pub destination: String,
    pub content_type: &'static str,
    pub correlation_id: CorrelationToken,
    /// Private reply queue the worker must answer to.
    pub reply_to: String,
    pub body: Bytes,
}

/// Inbound message read from the reply queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Echoed correlation id, if the worker set one.
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Stream of replies from the private reply queue.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Connection to the message broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Name of the exclusive reply queue declared for this process.
    fn reply_queue(&self) -> &str;

    /// Publishes one request envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Publish`] if the broker rejected or never
    /// accepted the message, or [`RpcError::Shutdown`] after `close()`.
    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), RpcError>;

    /// Hands out the reply stream. Returns `None` on every call after the
    /// first.
    fn take_deliveries(&self) -> Option<DeliveryStream>;

    /// Stops the consumer, closes the channel, then the connection.
    ///
    /// Safe to call more than once; later calls do nothing. Failures are
    /// logged, not returned, because there is nothing left to retry.
    async fn close(&self);
}
