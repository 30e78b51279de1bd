//! Side effects of a successful resolution: persist, then broadcast.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::registry::ResolvedCall;
use crate::hub::BroadcastHub;
use crate::traits::ClassificationStore;

/// Runs persistence and broadcast for every resolved call.
///
/// Cheap to clone; the dispatcher hands each resolution to its own task.
#[derive(Clone)]
pub struct ResultSink {
    store: Arc<dyn ClassificationStore>,
    hub: Arc<BroadcastHub>,
}

impl ResultSink {
    #[must_use]
    pub fn new(store: Arc<dyn ClassificationStore>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    /// Persists the result (when the call has a target) and publishes it to
    /// the hub.
    ///
    /// A persistence failure is logged and does not affect the broadcast or
    /// the caller, which has already received its reply.
    pub async fn complete(&self, resolved: ResolvedCall) {
        let ResolvedCall {
            token,
            request,
            target,
            response,
            elapsed,
        } = resolved;

        // The subject this process asked about is authoritative.
        if response.id != request.id {
            warn!(
                %token,
                requested = request.id,
                echoed = response.id,
                "worker echoed a different subject id; persisting under the requested id"
            );
        }

        if let Some(kind) = target {
            let stored = self
                .store
                .update(
                    kind,
                    request.id,
                    &response.category,
                    &response.theme,
                    response.stats.as_ref(),
                )
                .await;
            if let Err(e) = stored {
                error!(
                    %token,
                    kind = %kind,
                    subject_id = request.id,
                    error = %e,
                    "failed to persist classification"
                );
            }
        }

        let delivered = self.hub.publish(response);
        debug!(
            %token,
            subject_id = request.id,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            subscribers = delivered,
            "classification completed"
        );
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("subscribers", &self.hub.subscriber_count())
            .finish_non_exhaustive()
    }
}
