//! Write-once, multi-observer completion cell for a single call.
//!
//! The registry owns the [`CompletionSlot`]; callers hold cloneable
//! [`CompletionHandle`]s. Any number of handles observe the same single
//! outcome, so one observer returning early never consumes the result
//! another observer is waiting for.

use std::sync::Arc;

use sitelens_core::ClassificationResponse;
use tokio::sync::watch;

use super::error::RpcError;

/// Final outcome of a call as seen by every observer.
pub type Outcome = Result<Arc<ClassificationResponse>, RpcError>;

/// Producer side of a completion. Accepts exactly one outcome.
#[derive(Debug)]
pub struct CompletionSlot {
    tx: watch::Sender<Option<Outcome>>,
}

impl CompletionSlot {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Creates a new observer of this slot.
    #[must_use]
    pub fn handle(&self) -> CompletionHandle {
        CompletionHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Stores `outcome` if the slot is still empty.
    ///
    /// Returns `false` (and discards `outcome`) if the slot was already
    /// fulfilled.
    pub fn fulfill(&self, outcome: Outcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = outcome.take();
                true
            } else {
                false
            }
        })
    }
}

impl Default for CompletionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a completion. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    rx: watch::Receiver<Option<Outcome>>,
}

impl CompletionHandle {
    /// Waits for the outcome.
    ///
    /// A slot dropped without ever being fulfilled reads as
    /// [`RpcError::Shutdown`].
    ///
    /// # Errors
    ///
    /// Returns the call's failure outcome.
    pub async fn wait(mut self) -> Outcome {
        let settled = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone());
        match settled {
            Ok(Some(outcome)) => outcome,
            Ok(None) | Err(_) => Err(RpcError::Shutdown),
        }
    }

    /// Returns the outcome if it is already available.
    #[must_use]
    pub fn peek(&self) -> Option<Outcome> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: u64) -> Arc<ClassificationResponse> {
        Arc::new(ClassificationResponse {
            id,
            url: "https://example.com".to_string(),
            category: "news".to_string(),
            theme: "politics".to_string(),
            stats: None,
        })
    }

    #[test]
    fn fulfill_is_write_once() {
        let slot = CompletionSlot::new();
        assert!(slot.handle().peek().is_none());
        assert!(slot.fulfill(Ok(response(1))));
        assert!(!slot.fulfill(Err(RpcError::Timeout { timeout_ms: 1 })));

        let outcome = slot.handle().peek().unwrap();
        assert_eq!(outcome.unwrap().id, 1);
    }

    #[tokio::test]
    async fn every_observer_sees_the_same_outcome() {
        let slot = CompletionSlot::new();
        let first = slot.handle();
        let second = first.clone();
        let third = slot.handle();

        let waiters = [first, second, third].map(|h| tokio::spawn(h.wait()));
        slot.fulfill(Ok(response(9)));

        for waiter in waiters {
            let outcome = waiter.await.unwrap();
            assert_eq!(outcome.unwrap().id, 9);
        }
    }

    #[tokio::test]
    async fn observer_created_after_fulfill_still_sees_outcome() {
        let slot = CompletionSlot::new();
        slot.fulfill(Err(RpcError::Timeout { timeout_ms: 50 }));
        let outcome = slot.handle().wait().await;
        assert_eq!(outcome.unwrap_err(), RpcError::Timeout { timeout_ms: 50 });
    }

    #[tokio::test]
    async fn dropped_slot_reads_as_shutdown() {
        let slot = CompletionSlot::new();
        let handle = slot.handle();
        drop(slot);
        assert_eq!(handle.wait().await.unwrap_err(), RpcError::Shutdown);
    }
}
