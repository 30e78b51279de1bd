//! Periodic expiry of calls whose deadline nobody enforced.
//!
//! `call` and `submit` each expire their own entry on time. The sweeper
//! catches the rest: entries left behind when an awaiting caller's future
//! was dropped before its deadline fired.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::rpc::CorrelationRegistry;

/// Shortest accepted sweep period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Totals reported when the sweeper stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub passes: u64,
    pub expired: usize,
}

/// Expires overdue registry entries every `interval`.
#[derive(Debug)]
pub struct ExpirySweeper {
    registry: Arc<CorrelationRegistry>,
    interval: Duration,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(registry: Arc<CorrelationRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Expires every entry whose deadline has passed. Returns how many.
    pub fn sweep_once(&self) -> usize {
        let expired = self.registry.sweep_expired(Instant::now());
        if expired > 0 {
            debug!(
                expired,
                pending = self.registry.pending_count(),
                "swept expired calls"
            );
        }
        expired
    }

    /// Runs the sweeper on its own task. The first pass happens one
    /// `interval` after the call.
    ///
    /// Dropping the returned handle stops the task as well.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut report = SweepReport::default();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        report.passes += 1;
                        report.expired += self.sweep_once();
                    }
                    _ = &mut stop_rx => break,
                }
            }

            info!(
                passes = report.passes,
                expired = report.expired,
                "expiry sweeper stopped"
            );
            report
        });

        SweeperHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Owner of a running [`ExpirySweeper`] task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SweepReport>>,
}

impl SweeperHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the sweeper and waits for its task.
    ///
    /// Returns `None` if it was already stopped.
    pub async fn stop(&mut self) -> Option<SweepReport> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take()?.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "expiry sweeper task failed");
                None
            }
        }
    }
}
