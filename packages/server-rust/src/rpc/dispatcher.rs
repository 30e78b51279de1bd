//! The single reader of the reply queue.
//!
//! Exactly one dispatcher task consumes the delivery stream. Each delivery
//! is matched to its pending call through the registry; persistence and
//! broadcast run on tasks the dispatcher owns, so a slow store never delays
//! the next delivery and no resolved call loses its side effects on exit.

use std::sync::Arc;

use futures_util::StreamExt;
use sitelens_core::{ClassificationResponse, CorrelationToken, WireFormat};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::error::RpcError;
use super::registry::CorrelationRegistry;
use super::sink::ResultSink;
use crate::broker::{Delivery, DeliveryStream};

/// Counters reported when the dispatcher exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Replies matched to a pending call.
    pub delivered: u64,
    /// Well-formed replies whose token was unknown, settled or expired.
    pub unmatched: u64,
    /// Replies whose body could not be decoded.
    pub malformed: u64,
    /// Replies without a correlation id.
    pub missing_token: u64,
}

pub struct Dispatcher {
    deliveries: DeliveryStream,
    registry: Arc<CorrelationRegistry>,
    sink: ResultSink,
    shutdown: watch::Receiver<bool>,
    completions: JoinSet<()>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Spawns the dispatcher task.
    ///
    /// The task runs until `shutdown` becomes `true` or the delivery stream
    /// ends. On exit it closes the registry, fails every outstanding call
    /// with [`RpcError::Shutdown`], and then waits for the persistence and
    /// broadcast of every call it already resolved.
    #[must_use]
    pub fn spawn(
        deliveries: DeliveryStream,
        registry: Arc<CorrelationRegistry>,
        sink: ResultSink,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<DispatchStats> {
        let dispatcher = Self {
            deliveries,
            registry,
            sink,
            shutdown,
            completions: JoinSet::new(),
            stats: DispatchStats::default(),
        };
        tokio::spawn(dispatcher.run())
    }

    async fn run(mut self) -> DispatchStats {
        info!("dispatcher started");

        loop {
            tokio::select! {
                biased;

                () = stop_requested(&mut self.shutdown) => {
                    debug!("dispatcher received shutdown signal");
                    break;
                }
                Some(joined) = self.completions.join_next(), if !self.completions.is_empty() => {
                    reap(joined);
                }
                next = self.deliveries.next() => match next {
                    Some(delivery) => self.dispatch(delivery),
                    None => {
                        warn!("reply stream ended");
                        break;
                    }
                },
            }
        }

        let drained = self.registry.close_and_drain();
        let settling = self.completions.len();
        while let Some(joined) = self.completions.join_next().await {
            reap(joined);
        }

        info!(
            drained,
            settling,
            delivered = self.stats.delivered,
            unmatched = self.stats.unmatched,
            malformed = self.stats.malformed,
            missing_token = self.stats.missing_token,
            "dispatcher stopped"
        );
        self.stats
    }

    fn dispatch(&mut self, delivery: Delivery) {
        let Some(token) = delivery
            .correlation_id
            .as_deref()
            .and_then(CorrelationToken::from_wire)
        else {
            self.stats.missing_token += 1;
            warn!(bytes = delivery.body.len(), "reply without correlation id dropped");
            return;
        };

        let format = WireFormat::from_content_type(delivery.content_type.as_deref());
        let response: ClassificationResponse = match format.decode(&delivery.body) {
            Ok(response) => response,
            Err(e) => {
                self.stats.malformed += 1;
                let error = RpcError::MalformedReply {
                    reason: e.to_string(),
                };
                warn!(%token, error = %error, "malformed reply dropped");
                return;
            }
        };

        match self.registry.resolve(token.as_str(), response) {
            Some(resolved) => {
                self.stats.delivered += 1;
                let sink = self.sink.clone();
                self.completions
                    .spawn(async move { sink.complete(resolved).await });
            }
            None => self.stats.unmatched += 1,
        }
    }
}

/// Resolves once a stop is requested or the signalling side is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "result sink task failed");
    }
}
