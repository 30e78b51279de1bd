//! Request side of the RPC: register, publish, await.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sitelens_core::{
    ClassificationRequest, ClassificationResponse, CorrelationToken, SubjectKind, WireFormat,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::completion::{CompletionHandle, Outcome};
use super::error::RpcError;
use super::registry::CorrelationRegistry;
use crate::broker::{BrokerTransport, OutboundEnvelope};

/// Upper bound on a single publish, independent of the call timeout.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// A call that was published but is not being awaited by its creator.
///
/// The deadline is enforced in the background, so the call settles (and
/// its result reaches persistence and subscribers) whether or not anyone
/// waits on `handle`.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub token: CorrelationToken,
    pub deadline: Instant,
    handle: CompletionHandle,
}

impl PendingCall {
    /// Another observer of the same completion.
    #[must_use]
    pub fn handle(&self) -> CompletionHandle {
        self.handle.clone()
    }

    /// Waits for the call to settle.
    ///
    /// # Errors
    ///
    /// Returns the call's failure outcome.
    pub async fn wait(self) -> Outcome {
        self.handle.wait().await
    }
}

/// Publishes requests over a [`BrokerTransport`] and correlates replies
/// through the shared [`CorrelationRegistry`].
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn BrokerTransport>,
    registry: Arc<CorrelationRegistry>,
    format: WireFormat,
}

impl RpcClient {
    #[must_use]
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        registry: Arc<CorrelationRegistry>,
        format: WireFormat,
    ) -> Self {
        Self {
            transport,
            registry,
            format,
        }
    }

    /// Sends `request` to `destination` and waits up to `timeout` for the
    /// matching reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Shutdown`] if the service is shutting down.
    /// - [`RpcError::Publish`] if the request could not be sent.
    /// - [`RpcError::Timeout`] if no reply arrived in time.
    pub async fn call(
        &self,
        destination: &str,
        request: ClassificationRequest,
        target: Option<SubjectKind>,
        timeout: Duration,
    ) -> Result<Arc<ClassificationResponse>, RpcError> {
        let (token, handle, deadline) = self.send(destination, request, target, timeout).await?;

        match tokio::time::timeout_at(deadline, handle.clone().wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if self.registry.expire(token.as_str()) {
                    warn!(%token, destination, timeout_ms = millis(timeout), "call timed out");
                }
                // Losing the race to a reply or a drain leaves that outcome
                // in the slot.
                handle.wait().await
            }
        }
    }

    /// Sends `request` without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call`] minus [`RpcError::Timeout`], which is
    /// delivered through the returned [`PendingCall`] instead.
    pub async fn submit(
        &self,
        destination: &str,
        request: ClassificationRequest,
        target: Option<SubjectKind>,
        timeout: Duration,
    ) -> Result<PendingCall, RpcError> {
        let (token, handle, deadline) = self.send(destination, request, target, timeout).await?;

        let registry = Arc::clone(&self.registry);
        let timer_token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if registry.expire(timer_token.as_str()) {
                warn!(token = %timer_token, "detached call timed out");
            }
        });

        Ok(PendingCall {
            token,
            deadline,
            handle,
        })
    }

    /// Attaches an observer to a call that is still in flight.
    #[must_use]
    pub fn observe(&self, token: &str) -> Option<CompletionHandle> {
        self.registry.observe(token)
    }

    async fn send(
        &self,
        destination: &str,
        request: ClassificationRequest,
        target: Option<SubjectKind>,
        timeout: Duration,
    ) -> Result<(CorrelationToken, CompletionHandle, Instant), RpcError> {
        let token = CorrelationToken::generate();
        // Time spent publishing counts against the call's timeout.
        let deadline = Instant::now() + timeout;
        let body = self.format.encode(&request);
        let subject_id = request.id;
        let handle = self
            .registry
            .register(token.clone(), request, target, timeout)?;

        let publish_failed = |reason: String| {
            let error = RpcError::Publish {
                destination: destination.to_string(),
                reason,
            };
            self.registry.cancel(token.as_str(), error.clone());
            error
        };

        let body = body.map_err(|e| publish_failed(e.to_string()))?;
        let envelope = OutboundEnvelope {
            destination: destination.to_string(),
            content_type: self.format.content_type(),
            correlation_id: token.clone(),
            reply_to: self.transport.reply_queue().to_string(),
            body: Bytes::from(body),
        };

        match tokio::time::timeout(PUBLISH_TIMEOUT, self.transport.publish(envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(RpcError::Shutdown)) => {
                self.registry.cancel(token.as_str(), RpcError::Shutdown);
                return Err(RpcError::Shutdown);
            }
            Ok(Err(RpcError::Publish { reason, .. })) => return Err(publish_failed(reason)),
            Ok(Err(other)) => return Err(publish_failed(other.to_string())),
            Err(_) => return Err(publish_failed("publish timed out".to_string())),
        }

        debug!(%token, destination, subject_id, "classification requested");
        Ok((token, handle, deadline))
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("reply_queue", &self.transport.reply_queue())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::broker::{DeliveryStream, MemoryBroker, MemoryWorker};

    /// Takes `delay` to accept every publish.
    struct SlowPublish {
        inner: MemoryBroker,
        delay: Duration,
    }

    #[async_trait]
    impl BrokerTransport for SlowPublish {
        fn reply_queue(&self) -> &str {
            self.inner.reply_queue()
        }

        async fn publish(&self, envelope: OutboundEnvelope) -> Result<(), RpcError> {
            tokio::time::sleep(self.delay).await;
            self.inner.publish(envelope).await
        }

        fn take_deliveries(&self) -> Option<DeliveryStream> {
            self.inner.take_deliveries()
        }

        async fn close(&self) {
            self.inner.close().await;
        }
    }

    fn slow_client(delay: Duration) -> (RpcClient, MemoryWorker, Arc<CorrelationRegistry>) {
        let (broker, worker) = MemoryBroker::new();
        let registry = Arc::new(CorrelationRegistry::new());
        let transport = Arc::new(SlowPublish {
            inner: broker,
            delay,
        });
        let client = RpcClient::new(transport, Arc::clone(&registry), WireFormat::Json);
        (client, worker, registry)
    }

    fn client() -> (RpcClient, Arc<MemoryBroker>, MemoryWorker, Arc<CorrelationRegistry>) {
        let (broker, worker) = MemoryBroker::new();
        let broker = Arc::new(broker);
        let registry = Arc::new(CorrelationRegistry::new());
        let client = RpcClient::new(broker.clone(), Arc::clone(&registry), WireFormat::Json);
        (client, broker, worker, registry)
    }

    fn request(id: u64) -> ClassificationRequest {
        ClassificationRequest::new(id, "https://example.com")
    }

    #[tokio::test]
    async fn envelope_carries_token_and_reply_queue() {
        let (client, broker, mut worker, registry) = client();
        let pending = client
            .submit("url_queue", request(1), None, Duration::from_secs(5))
            .await
            .unwrap();

        let envelope = worker.next_request().await.unwrap();
        assert_eq!(envelope.destination, "url_queue");
        assert_eq!(envelope.correlation_id, pending.token);
        assert_eq!(envelope.reply_to, broker.reply_queue());
        assert_eq!(envelope.content_type, "application/json");
        assert_eq!(MemoryWorker::decode_request(&envelope).unwrap().id, 1);
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test]
    async fn tokens_differ_per_call() {
        let (client, _broker, _worker, _registry) = client();
        let a = client
            .submit("q", request(1), None, Duration::from_secs(5))
            .await
            .unwrap();
        let b = client
            .submit("q", request(1), None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn publish_failure_cleans_up_registry() {
        let (client, broker, _worker, registry) = client();
        broker.fail_publishes(true);

        let err = client
            .call("url_queue", request(1), None, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Publish { ref destination, .. } if destination == "url_queue"));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_and_removes_entry() {
        let (client, _broker, _worker, registry) = client();

        let started = Instant::now();
        let err = client
            .call("url_queue", request(1), None, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::Timeout { timeout_ms: 200 });
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_call_expires_in_background() {
        let (client, _broker, _worker, registry) = client();
        let pending = client
            .submit("url_queue", request(1), None, Duration::from_millis(100))
            .await
            .unwrap();
        let observer = pending.handle();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(
            observer.peek().unwrap().unwrap_err(),
            RpcError::Timeout { timeout_ms: 100 }
        );
    }

    #[tokio::test]
    async fn calls_after_close_fail_fast() {
        let (client, _broker, _worker, registry) = client();
        registry.close();
        let err = client
            .call("url_queue", request(1), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::Shutdown);
    }

    #[tokio::test]
    async fn observe_tracks_in_flight_calls_only() {
        let (client, _broker, _worker, registry) = client();
        let pending = client
            .submit("url_queue", request(1), None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(client.observe(pending.token.as_str()).is_some());
        registry.expire(pending.token.as_str());
        assert!(client.observe(pending.token.as_str()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_publish_counts_against_the_timeout() {
        let (client, _worker, registry) = slow_client(Duration::from_millis(150));

        let started = Instant::now();
        let err = client
            .call("url_queue", request(1), None, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::Timeout { timeout_ms: 200 });
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_deadline_starts_before_publish() {
        let (client, _worker, _registry) = slow_client(Duration::from_millis(150));

        let started = Instant::now();
        let pending = client
            .submit("url_queue", request(1), None, Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(pending.deadline, started + Duration::from_millis(200));
    }
}
