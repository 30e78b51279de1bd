//! In-process broker used by tests and the `memory` development mode.
//!
//! [`MemoryBroker`] is the server side of the transport. [`MemoryWorker`]
//! plays the external classification worker: it receives every published
//! envelope and can answer, answer out of order, send garbage, or stay
//! silent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use sitelens_core::{ClassificationRequest, ClassificationResponse, WireFormat};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use super::{BrokerTransport, Delivery, DeliveryStream, OutboundEnvelope};
use crate::rpc::RpcError;

static NEXT_QUEUE: AtomicU64 = AtomicU64::new(1);

/// Server side of an in-memory broker pair.
#[derive(Debug)]
pub struct MemoryBroker {
    reply_queue: String,
    requests: mpsc::UnboundedSender<OutboundEnvelope>,
    deliveries: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    fail_publishes: AtomicBool,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Creates a connected broker/worker pair.
    #[must_use]
    pub fn new() -> (Self, MemoryWorker) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let reply_queue = format!("amq.gen-memory-{}", NEXT_QUEUE.fetch_add(1, Ordering::Relaxed));

        let broker = Self {
            reply_queue,
            requests: request_tx,
            deliveries: Mutex::new(Some(reply_rx)),
            fail_publishes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        let worker = MemoryWorker {
            requests: request_rx,
            replies: MemoryReplier { tx: reply_tx },
        };
        (broker, worker)
    }

    /// Makes every subsequent `publish` fail with [`RpcError::Publish`].
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Shutdown);
        }
        if self.fail_publishes.load(Ordering::Acquire) {
            return Err(RpcError::Publish {
                destination: envelope.destination,
                reason: "broker rejected publish".to_string(),
            });
        }

        let destination = envelope.destination.clone();
        self.requests.send(envelope).map_err(|_| RpcError::Publish {
            destination,
            reason: "no worker attached".to_string(),
        })
    }

    fn take_deliveries(&self) -> Option<DeliveryStream> {
        let rx = self.deliveries.lock().take()?;
        Some(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(reply_queue = %self.reply_queue, "memory broker closed");
        }
    }
}

/// Cloneable sender onto the server's reply queue.
#[derive(Debug, Clone)]
pub struct MemoryReplier {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl MemoryReplier {
    /// Answers `envelope` with `response`, echoing its correlation id and
    /// content type.
    ///
    /// Returns `false` if the server side has gone away.
    pub fn reply(&self, envelope: &OutboundEnvelope, response: &ClassificationResponse) -> bool {
        let format = WireFormat::from_content_type(Some(envelope.content_type));
        let body = match format.encode(response) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "memory worker failed to encode reply");
                return false;
            }
        };
        self.send(Delivery {
            correlation_id: Some(envelope.correlation_id.to_string()),
            content_type: Some(envelope.content_type.to_string()),
            body: body.into(),
        })
    }

    /// Pushes an arbitrary delivery onto the reply queue.
    pub fn send(&self, delivery: Delivery) -> bool {
        self.tx.send(delivery).is_ok()
    }
}

/// Worker side of an in-memory broker pair.
#[derive(Debug)]
pub struct MemoryWorker {
    requests: mpsc::UnboundedReceiver<OutboundEnvelope>,
    replies: MemoryReplier,
}

impl MemoryWorker {
    /// Waits for the next published request envelope.
    pub async fn next_request(&mut self) -> Option<OutboundEnvelope> {
        self.requests.recv().await
    }

    /// Decodes the body of a published envelope.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the body is not a valid request.
    pub fn decode_request(
        envelope: &OutboundEnvelope,
    ) -> Result<ClassificationRequest, sitelens_core::CodecError> {
        WireFormat::from_content_type(Some(envelope.content_type)).decode(&envelope.body)
    }

    #[must_use]
    pub fn replier(&self) -> MemoryReplier {
        self.replies.clone()
    }

    /// Answers every request with `classify` until the server side closes.
    ///
    /// `classify` returning `None` leaves that request unanswered.
    pub fn spawn_responder<F>(mut self, classify: F) -> JoinHandle<()>
    where
        F: Fn(ClassificationRequest) -> Option<ClassificationResponse> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(envelope) = self.next_request().await {
                let request = match Self::decode_request(&envelope) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "memory worker received undecodable request");
                        continue;
                    }
                };
                if let Some(response) = classify(request) {
                    if !self.replies.reply(&envelope, &response) {
                        break;
                    }
                }
            }
        })
    }
}
