//! Classification service: owns the RPC machinery and its lifecycle.
//!
//! Startup builds, in order: hub -> registry -> sink -> dispatcher ->
//! expiry sweeper. Shutdown tears down in the order:
//!
//! 1. Close the registry (new calls fail with `Shutdown`)
//! 2. Signal the dispatcher and wait, up to `shutdown_grace`, for it to
//!    drain outstanding calls and finish persisting and broadcasting the
//!    calls it already resolved
//! 3. Stop the expiry sweeper
//! 4. Close every hub subscription
//! 5. Close the broker transport

pub mod config;
pub mod sweeper;

pub use config::{ServiceConfig, DEFAULT_REQUEST_QUEUE};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};

use std::sync::Arc;

use sitelens_core::{ClassificationRequest, ClassificationResponse, SubjectKind};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::BrokerTransport;
use crate::hub::{BroadcastHub, Subscription};
use crate::rpc::{
    CompletionHandle, CorrelationRegistry, DispatchStats, Dispatcher, PendingCall, ResultSink,
    RpcClient, RpcError,
};
use crate::traits::ClassificationStore;

/// Background tasks owned by a running service.
struct Lifecycle {
    stop_dispatcher: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<DispatchStats>>,
    sweeper: SweeperHandle,
}

/// Entry point for classification requests.
///
/// Constructed explicitly and shared via `Arc`; there is no global state.
pub struct ClassificationService {
    config: ServiceConfig,
    client: RpcClient,
    registry: Arc<CorrelationRegistry>,
    hub: Arc<BroadcastHub>,
    transport: Arc<dyn BrokerTransport>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl ClassificationService {
    /// Takes the transport's reply stream and starts the dispatcher and the
    /// expiry sweeper.
    ///
    /// # Errors
    ///
    /// Fails if the transport's reply stream was already taken.
    pub fn start(
        transport: Arc<dyn BrokerTransport>,
        store: Arc<dyn ClassificationStore>,
        config: ServiceConfig,
    ) -> anyhow::Result<Self> {
        let deliveries = transport
            .take_deliveries()
            .ok_or_else(|| anyhow::anyhow!("reply stream already has a reader"))?;

        let hub = Arc::new(BroadcastHub::new(config.subscriber_capacity));
        let registry = Arc::new(CorrelationRegistry::new());
        let sink = ResultSink::new(store, Arc::clone(&hub));

        let (stop_dispatcher, stop_rx) = watch::channel(false);
        let dispatcher = Dispatcher::spawn(deliveries, Arc::clone(&registry), sink, stop_rx);
        let sweeper = ExpirySweeper::new(Arc::clone(&registry), config.sweep_interval).spawn();

        let client = RpcClient::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            config.wire_format,
        );

        info!(
            reply_queue = transport.reply_queue(),
            request_queue = %config.request_queue,
            call_timeout_ms = u64::try_from(config.call_timeout.as_millis()).unwrap_or(u64::MAX),
            "classification service started"
        );

        Ok(Self {
            config,
            client,
            registry,
            hub,
            transport,
            lifecycle: Mutex::new(Some(Lifecycle {
                stop_dispatcher,
                dispatcher: Some(dispatcher),
                sweeper,
            })),
        })
    }

    /// Classifies `url` and waits for the result, persisting it as `kind`
    /// with `subject_id`.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn request_classification(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        url: impl Into<String>,
    ) -> Result<Arc<ClassificationResponse>, RpcError> {
        self.client
            .call(
                &self.config.request_queue,
                ClassificationRequest::new(subject_id, url),
                Some(kind),
                self.config.call_timeout,
            )
            .await
    }

    /// Requests a classification without waiting. The result still lands
    /// in persistence and on the hub.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::submit`].
    pub async fn request_classification_detached(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        url: impl Into<String>,
    ) -> Result<PendingCall, RpcError> {
        self.client
            .submit(
                &self.config.request_queue,
                ClassificationRequest::new(subject_id, url),
                Some(kind),
                self.config.call_timeout,
            )
            .await
    }

    /// Waits on a call some other caller started, if it is still in flight.
    #[must_use]
    pub fn observe(&self, token: &str) -> Option<CompletionHandle> {
        self.client.observe(token)
    }

    /// Live feed of completed classifications from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    #[must_use]
    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.registry.is_closed()
    }

    /// Stops the service. Every outstanding call fails with
    /// [`RpcError::Shutdown`]. Safe to call more than once; later calls
    /// return `None`.
    pub async fn shutdown(&self) -> Option<DispatchStats> {
        let mut lifecycle = self.lifecycle.lock().await.take()?;
        info!(pending = self.registry.pending_count(), "classification service shutting down");

        self.registry.close();
        lifecycle.stop_dispatcher.send_replace(true);

        let mut stats = None;
        if let Some(mut dispatcher) = lifecycle.dispatcher.take() {
            match tokio::time::timeout(self.config.shutdown_grace, &mut dispatcher).await {
                Ok(Ok(dispatched)) => stats = Some(dispatched),
                Ok(Err(e)) => warn!(error = %e, "dispatcher task failed"),
                Err(_) => {
                    warn!("dispatcher did not stop within grace period; aborting");
                    dispatcher.abort();
                }
            }
        }
        // Covers a dispatcher that panicked or was aborted before draining.
        self.registry.close_and_drain();

        let swept = lifecycle.sweeper.stop().await.unwrap_or_default();
        let closed = self.hub.close_all();
        self.transport.close().await;

        info!(
            subscribers_closed = closed,
            swept = swept.expired,
            "classification service stopped"
        );
        Some(stats.unwrap_or_default())
    }
}

impl std::fmt::Debug for ClassificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationService")
            .field("config", &self.config)
            .field("pending", &self.registry.pending_count())
            .field("subscribers", &self.hub.subscriber_count())
            .finish_non_exhaustive()
    }
}
