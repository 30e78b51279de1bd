//! Correlation registry: token -> pending call.
//!
//! Every mutation happens under one `parking_lot::Mutex`, so `resolve`,
//! `expire`, `cancel`, `sweep_expired` and `close_and_drain` racing on the
//! same token have exactly one winner. The winner removes the entry and
//! fulfills its slot; every loser finds nothing and is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sitelens_core::{ClassificationRequest, ClassificationResponse, CorrelationToken, SubjectKind};
use tokio::time::Instant;
use tracing::{debug, error};

use super::completion::{CompletionHandle, CompletionSlot};
use super::error::RpcError;

/// A call that has been registered and not yet resolved.
#[derive(Debug)]
pub struct PendingRequest {
    pub token: CorrelationToken,
    pub request: ClassificationRequest,
    /// Repository the result is persisted into, if any.
    pub target: Option<SubjectKind>,
    pub created_at: Instant,
    pub deadline: Instant,
    slot: CompletionSlot,
}

impl PendingRequest {
    fn timeout(&self) -> Duration {
        self.deadline.saturating_duration_since(self.created_at)
    }
}

/// A pending call that won resolution with a worker reply.
///
/// Handed to the result sink; carries the original request so persistence
/// can use the identity this process asked about.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub token: CorrelationToken,
    pub request: ClassificationRequest,
    pub target: Option<SubjectKind>,
    pub response: Arc<ClassificationResponse>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<CorrelationToken, PendingRequest>,
    closed: bool,
}

/// Concurrency-safe map of outstanding calls.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    state: Mutex<RegistryState>,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh pending call and returns its first observer.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Shutdown`] once the registry has been closed.
    /// - [`RpcError::DuplicateToken`] if `token` is already outstanding. The
    ///   existing entry is left untouched.
    pub fn register(
        &self,
        token: CorrelationToken,
        request: ClassificationRequest,
        target: Option<SubjectKind>,
        timeout: Duration,
    ) -> Result<CompletionHandle, RpcError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::Shutdown);
        }
        if state.pending.contains_key(&token) {
            error!(%token, "correlation token registered twice");
            return Err(RpcError::DuplicateToken {
                token: token.to_string(),
            });
        }

        let now = Instant::now();
        let slot = CompletionSlot::new();
        let handle = slot.handle();
        state.pending.insert(
            token.clone(),
            PendingRequest {
                token,
                request,
                target,
                created_at: now,
                deadline: now + timeout,
                slot,
            },
        );
        Ok(handle)
    }

    /// Delivers a worker reply to the call registered under `token`.
    ///
    /// Returns `None` if the token is unknown, already resolved or expired.
    pub fn resolve(
        &self,
        token: &str,
        response: ClassificationResponse,
    ) -> Option<ResolvedCall> {
        let Some(entry) = self.state.lock().pending.remove(token) else {
            debug!(token, "reply for unknown or settled token dropped");
            return None;
        };

        let response = Arc::new(response);
        entry.slot.fulfill(Ok(Arc::clone(&response)));
        Some(ResolvedCall {
            elapsed: entry.created_at.elapsed(),
            token: entry.token,
            request: entry.request,
            target: entry.target,
            response,
        })
    }

    /// Fails the call with [`RpcError::Timeout`] if it is still pending.
    ///
    /// Returns `true` if this call won.
    pub fn expire(&self, token: &str) -> bool {
        let Some(entry) = self.state.lock().pending.remove(token) else {
            return false;
        };
        let timeout_ms = millis(entry.timeout());
        debug!(token, timeout_ms, "pending call expired");
        entry.slot.fulfill(Err(RpcError::Timeout { timeout_ms }))
    }

    /// Fails the call with `error` if it is still pending.
    ///
    /// Returns `true` if this call won.
    pub fn cancel(&self, token: &str, error: RpcError) -> bool {
        let Some(entry) = self.state.lock().pending.remove(token) else {
            return false;
        };
        entry.slot.fulfill(Err(error))
    }

    /// Attaches another observer to an outstanding call.
    #[must_use]
    pub fn observe(&self, token: &str) -> Option<CompletionHandle> {
        self.state
            .lock()
            .pending
            .get(token)
            .map(|entry| entry.slot.handle())
    }

    /// Expires every entry whose deadline is at or before `now`.
    ///
    /// Returns the number of entries expired.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let overdue: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            let tokens: Vec<CorrelationToken> = state
                .pending
                .values()
                .filter(|entry| entry.deadline <= now)
                .map(|entry| entry.token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| state.pending.remove(token))
                .collect()
        };

        for entry in &overdue {
            entry.slot.fulfill(Err(RpcError::Timeout {
                timeout_ms: millis(entry.timeout()),
            }));
        }
        overdue.len()
    }

    /// Rejects all future registrations with [`RpcError::Shutdown`].
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Closes the registry and fails every outstanding call with
    /// [`RpcError::Shutdown`].
    ///
    /// Returns the number of calls drained.
    pub fn close_and_drain(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.slot.fulfill(Err(RpcError::Shutdown));
        }
        drained.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn request(id: u64) -> ClassificationRequest {
        ClassificationRequest::new(id, format!("https://example.com/{id}"))
    }

    fn response(id: u64) -> ClassificationResponse {
        ClassificationResponse {
            id,
            url: format!("https://example.com/{id}"),
            category: "news".to_string(),
            theme: "politics".to_string(),
            stats: None,
        }
    }

    fn register(
        registry: &CorrelationRegistry,
        id: u64,
    ) -> (CorrelationToken, CompletionHandle) {
        let token = CorrelationToken::generate();
        let handle = registry
            .register(token.clone(), request(id), Some(SubjectKind::Page), Duration::from_secs(5))
            .unwrap();
        (token, handle)
    }

    #[test]
    fn resolve_removes_and_fulfills() {
        let registry = CorrelationRegistry::new();
        let (token, handle) = register(&registry, 1);
        assert_eq!(registry.pending_count(), 1);

        let resolved = registry.resolve(token.as_str(), response(1)).unwrap();
        assert_eq!(resolved.request.id, 1);
        assert_eq!(resolved.target, Some(SubjectKind::Page));
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(handle.peek().unwrap().unwrap().category, "news");
    }

    #[test]
    fn second_resolve_is_noop() {
        let registry = CorrelationRegistry::new();
        let (token, _handle) = register(&registry, 1);
        assert!(registry.resolve(token.as_str(), response(1)).is_some());
        assert!(registry.resolve(token.as_str(), response(1)).is_none());
    }

    #[test]
    fn unknown_token_is_noop() {
        let registry = CorrelationRegistry::new();
        assert!(registry.resolve("nope", response(1)).is_none());
        assert!(!registry.expire("nope"));
        assert!(!registry.cancel("nope", RpcError::Shutdown));
        assert!(registry.observe("nope").is_none());
    }

    #[test]
    fn duplicate_token_is_rejected_and_original_kept() {
        let registry = CorrelationRegistry::new();
        let (token, handle) = register(&registry, 1);

        let err = registry
            .register(token.clone(), request(2), None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateToken { .. }));
        assert_eq!(registry.pending_count(), 1);

        let resolved = registry.resolve(token.as_str(), response(1)).unwrap();
        assert_eq!(resolved.request.id, 1);
        assert!(handle.peek().unwrap().is_ok());
    }

    #[test]
    fn expire_then_late_reply_cannot_resurrect() {
        let registry = CorrelationRegistry::new();
        let (token, handle) = register(&registry, 1);

        assert!(registry.expire(token.as_str()));
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.resolve(token.as_str(), response(1)).is_none());
        assert!(matches!(
            handle.peek().unwrap(),
            Err(RpcError::Timeout { timeout_ms: 5000 })
        ));
    }

    #[test]
    fn resolve_then_expire_loses() {
        let registry = CorrelationRegistry::new();
        let (token, handle) = register(&registry, 1);
        assert!(registry.resolve(token.as_str(), response(1)).is_some());
        assert!(!registry.expire(token.as_str()));
        assert!(handle.peek().unwrap().is_ok());
    }

    #[test]
    fn cancel_delivers_given_error() {
        let registry = CorrelationRegistry::new();
        let (token, handle) = register(&registry, 1);
        let err = RpcError::Publish {
            destination: "url_queue".into(),
            reason: "boom".into(),
        };
        assert!(registry.cancel(token.as_str(), err.clone()));
        assert_eq!(handle.peek().unwrap().unwrap_err(), err);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn observe_adds_independent_observers() {
        let registry = CorrelationRegistry::new();
        let (token, first) = register(&registry, 5);
        let second = registry.observe(token.as_str()).unwrap();

        registry.resolve(token.as_str(), response(5));
        assert_eq!(first.peek().unwrap().unwrap().id, 5);
        assert_eq!(second.peek().unwrap().unwrap().id, 5);
    }

    #[test]
    fn close_and_drain_fails_everything_with_shutdown() {
        let registry = CorrelationRegistry::new();
        let handles: Vec<_> = (0..10).map(|id| register(&registry, id).1).collect();

        assert_eq!(registry.close_and_drain(), 10);
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.is_closed());
        for handle in handles {
            assert_eq!(handle.peek().unwrap().unwrap_err(), RpcError::Shutdown);
        }
    }

    #[test]
    fn register_after_close_fails_fast() {
        let registry = CorrelationRegistry::new();
        registry.close();
        let err = registry
            .register(CorrelationToken::generate(), request(1), None, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, RpcError::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_only_overdue_entries() {
        let registry = CorrelationRegistry::new();
        let short = CorrelationToken::generate();
        let short_handle = registry
            .register(short.clone(), request(1), None, Duration::from_millis(100))
            .unwrap();
        let (_long, long_handle) = register(&registry, 2);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(registry.sweep_expired(Instant::now()), 1);
        assert_eq!(registry.pending_count(), 1);
        assert!(matches!(
            short_handle.peek().unwrap(),
            Err(RpcError::Timeout { timeout_ms: 100 })
        ));
        assert!(long_handle.peek().is_none());
    }

    #[test]
    fn concurrent_resolve_and_expire_have_one_winner() {
        for _ in 0..200 {
            let registry = Arc::new(CorrelationRegistry::new());
            let (token, handle) = register(&registry, 1);

            let r = Arc::clone(&registry);
            let t = token.clone();
            let resolver = std::thread::spawn(move || r.resolve(t.as_str(), response(1)).is_some());
            let e = Arc::clone(&registry);
            let t = token.clone();
            let expirer = std::thread::spawn(move || e.expire(t.as_str()));

            let resolved = resolver.join().unwrap();
            let expired = expirer.join().unwrap();
            assert!(resolved ^ expired, "exactly one side must win");
            assert_eq!(handle.peek().unwrap().is_ok(), resolved);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Resolve,
        Expire,
        Cancel,
        Drain,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Resolve),
            Just(Op::Expire),
            Just(Op::Cancel),
            Just(Op::Drain),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_settlement_per_token(ops in proptest::collection::vec(op(), 1..12)) {
            let registry = CorrelationRegistry::new();
            let (token, handle) = register(&registry, 1);

            let mut wins = 0;
            for op in &ops {
                let won = match op {
                    Op::Resolve => registry.resolve(token.as_str(), response(1)).is_some(),
                    Op::Expire => registry.expire(token.as_str()),
                    Op::Cancel => registry.cancel(token.as_str(), RpcError::Shutdown),
                    Op::Drain => registry.close_and_drain() == 1,
                };
                if won {
                    wins += 1;
                }
            }

            prop_assert_eq!(wins, 1);
            prop_assert!(handle.peek().is_some());
            prop_assert_eq!(registry.pending_count(), 0);
        }
    }
}
