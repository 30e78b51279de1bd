//! Health state, in-flight tracking, and the ordered stop of the service
//! behind the HTTP API.
//!
//! Health lives in an `ArcSwap` so health checks read it without locking. The
//! in-flight count is a `watch` channel: handlers bump it through an
//! [`InFlightGuard`] and shutdown waits on it instead of polling.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::rpc::DispatchStats;
use crate::service::ClassificationService;

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener not serving yet.
    Starting,
    /// Accepting classification requests.
    Ready,
    /// Refusing new requests; in-flight ones may still finish.
    Draining,
    /// Classification service stopped.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Outcome of [`ShutdownController::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every in-flight request finished within the drain timeout.
    pub drained: bool,
    /// Requests still in flight when the service was stopped. They fail
    /// with 503.
    pub abandoned: u64,
    /// `None` if the service had already been stopped.
    pub dispatch: Option<DispatchStats>,
}

/// Couples HTTP health to the [`ClassificationService`] lifecycle.
///
/// Health reads as `Draining` as soon as the service starts shutting down,
/// whoever started it, so classify endpoints and readiness follow a
/// service that stopped because its reply stream ended.
#[derive(Debug)]
pub struct ShutdownController {
    service: Arc<ClassificationService>,
    health: ArcSwap<HealthState>,
    in_flight: Arc<watch::Sender<u64>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new(service: Arc<ClassificationService>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            service,
            health: ArcSwap::from_pointee(HealthState::Starting),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Moves `Starting` to `Ready`. No effect once shutdown has begun.
    pub fn set_ready(&self) {
        self.health.rcu(|current| {
            if **current == HealthState::Starting {
                Arc::new(HealthState::Ready)
            } else {
                Arc::clone(current)
            }
        });
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        let state = **self.health.load();
        if state == HealthState::Ready && self.service.is_shutting_down() {
            HealthState::Draining
        } else {
            state
        }
    }

    /// Whether classify endpoints take new work.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.health_state() == HealthState::Ready
    }

    /// Counts one in-flight request until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.send_modify(|count| *count += 1);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        *self.in_flight.borrow()
    }

    /// Stops taking requests, waits up to `drain_timeout` for in-flight
    /// ones, then shuts the classification service down. That fails any
    /// call still outstanding and ends every event stream.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        self.health.store(Arc::new(HealthState::Draining));

        let mut idle = self.in_flight.subscribe();
        let drained = matches!(
            tokio::time::timeout(drain_timeout, idle.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        );
        let abandoned = self.in_flight_count();
        if !drained {
            warn!(abandoned, "drain timeout expired with requests in flight");
        }

        let dispatch = self.service.shutdown().await;
        self.health.store(Arc::new(HealthState::Stopped));
        info!(drained, abandoned, "HTTP side stopped");

        ShutdownReport {
            drained,
            abandoned,
            dispatch,
        }
    }
}

/// Decrements the in-flight count on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<watch::Sender<u64>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
