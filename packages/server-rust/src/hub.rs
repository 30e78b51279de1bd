//! Broadcast hub for completed classifications.
//!
//! Each subscriber gets its own bounded mpsc channel, and `publish` only
//! ever uses `try_send`, so one slow subscriber never blocks the publisher
//! or its peers. When a subscriber's buffer is full the *new* event is
//! dropped for that subscriber only; older buffered events are kept so a
//! reader always sees a gap-free prefix. Closed subscribers are pruned on
//! the next publish.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::Stream;
use sitelens_core::ClassificationResponse;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Unique identifier for a subscriber, assigned by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

type Event = Arc<ClassificationResponse>;

/// Fan-out of classification results to live subscribers.
#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: DashMap<SubscriberId, mpsc::Sender<Event>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Creates a hub whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new subscriber. Only events published after this call
    /// are delivered.
    ///
    /// After [`Self::close_all`] the returned subscription is already ended.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.insert(id, tx);
            // close_all may have run between the check and the insert.
            if self.closed.load(Ordering::Acquire) {
                self.subscribers.remove(&id);
            }
        }

        debug!(subscriber = id.0, "subscriber added");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Removes a subscriber, ending its stream. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id.0, "subscriber removed");
        }
        removed
    }

    /// Delivers `event` to every current subscriber without waiting.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for entry in &self.subscribers {
            match entry.value().try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = entry.key().0, "subscriber buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => gone.push(*entry.key()),
            }
        }

        // Removal happens after iteration; DashMap shard locks are held
        // while iterating.
        for id in gone {
            self.unsubscribe(id);
        }
        delivered
    }

    /// Ends every subscription and refuses new ones.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<SubscriberId> = self.subscribers.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.subscribers.remove(id).is_some())
            .count()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events dropped because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A live subscription. Unsubscribes itself when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Event>,
    hub: Weak<BroadcastHub>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the hub has closed
    /// this subscription.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns the next buffered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
